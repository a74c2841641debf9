//! # bandmath - Band algebra over in-memory GeoTIFFs
//!
//! Evaluates an arithmetic formula pixel-wise across the bands of a raster and
//! exports the result as a CSV value table and a single-band GeoTIFF.
//!
//! ## Features
//!
//! - **Pure Rust decoding**: stripped or tiled, chunky or planar TIFF/BigTIFF
//! - **Compression**: DEFLATE, LZW, ZSTD, PackBits and uncompressed, with predictors
//! - **Safe formulas**: an explicit arithmetic grammar; calls, attribute access
//!   and unknown names are rejected before evaluation
//! - **Georeferencing carried through**: pixel scale, tiepoints, transformation,
//!   GeoKeys and nodata are copied into the exported raster
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bandmath::{BandMathOptions, DEFAULT_FORMULA, run};
//!
//! let bytes = std::fs::read("scene.tif")?;
//! let output = run(&bytes, DEFAULT_FORMULA, &BandMathOptions::default())?;
//!
//! std::fs::write("values.csv", &output.table_csv)?;
//! std::fs::write("index.tif", &output.raster)?;
//! println!("{} finite values, mean {:?}", output.summary.count, output.summary.mean);
//! ```
//!
//! ## Architecture
//!
//! - [`raster_loader`]: bytes to [`Raster`] (band mapping `B1..BN` plus metadata)
//! - [`formula`]: parsing and evaluating [`Formula`]s against [`Bands`]
//! - [`table`]: finite-value table, CSV, summary statistics and preview
//! - [`geotiff_writer`]: single-band GeoTIFF export
//! - [`pipeline`]: the whole load, evaluate and export pass via [`run`]

// ============================================================================
// Public modules
// ============================================================================

pub mod compression;
pub mod config;
pub mod error;
pub mod formula;
pub mod geotiff_writer;
pub mod pipeline;
pub mod raster;
pub mod raster_loader;
pub mod table;
pub mod tiff_utils;

#[cfg(test)]
mod test_support;

// ============================================================================
// Pipeline
// ============================================================================

pub use pipeline::{BandMathOutput, run};

// ============================================================================
// Raster Model
// ============================================================================

pub use raster::{
    BandArray,
    Bands,
    GeoKeys,
    GeoTransform,
    Raster,
    RasterDataType,
    RasterMetadata,
    band_name,
};
pub use raster_loader::load_raster;
pub use compression::Compression;

// ============================================================================
// Formulas
// ============================================================================

pub use formula::{
    BinaryOp,
    DEFAULT_FORMULA,
    Expr,
    Formula,
};

// ============================================================================
// Export
// ============================================================================

pub use table::{ValueSummary, ValueTable};
pub use geotiff_writer::write_geotiff;

// ============================================================================
// Configuration
// ============================================================================

pub use config::{
    BandMathOptions,
    ExportOptions,
    OutputCompression,
    OutputPixelType,
    PreviewOptions,
};

// ============================================================================
// Errors
// ============================================================================

pub use error::{
    BandMathError,
    DecodeError,
    EncodeError,
    EvaluationError,
};

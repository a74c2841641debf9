//! One full request: load the raster, evaluate the formula, export both outputs.

use tracing::{info, warn};

use crate::config::{BandMathOptions, OutputPixelType};
use crate::error::BandMathError;
use crate::formula::Formula;
use crate::geotiff_writer::write_geotiff;
use crate::raster::{RasterDataType, RasterMetadata};
use crate::raster_loader::load_raster;
use crate::table::{ValueSummary, ValueTable};

/// Everything produced for one request
#[derive(Debug, Clone)]
pub struct BandMathOutput {
    /// CSV with a single `value` column of the finite results
    pub table_csv: Vec<u8>,
    /// Single-band GeoTIFF of the full result
    pub raster: Vec<u8>,
    pub summary: ValueSummary,
    pub preview: Vec<f64>,
    /// Bands available in the input, `B1..BN`
    pub band_names: Vec<String>,
    /// Metadata of the exported raster
    pub metadata: RasterMetadata,
}

/// Run `formula` over the raster in `bytes`.
///
/// Fails without producing any output if the raster cannot be read, the
/// formula is invalid, or an output cannot be encoded.
pub fn run(
    bytes: &[u8],
    formula: &str,
    options: &BandMathOptions,
) -> Result<BandMathOutput, BandMathError> {
    let formula = Formula::parse(formula)?;
    let raster = load_raster(bytes)?;
    let band_names = raster.bands.names();

    let values = formula.evaluate(&raster.bands)?;

    let table = ValueTable::from_array(&values);
    if table.is_empty() {
        warn!(formula = %formula, "Formula produced no finite values");
    }

    let data_type = match options.export.pixel_type {
        OutputPixelType::Float32 => RasterDataType::Float32,
        OutputPixelType::Float64 => RasterDataType::Float64,
    };
    let metadata = raster.metadata.single_band(data_type);
    let raster_bytes = write_geotiff(&values, &metadata, &options.export)?;
    let table_csv = table.to_csv()?;

    info!(
        formula = %formula,
        pixels = table.total_pixels(),
        finite = table.len(),
        dropped = table.dropped(),
        "Band math complete"
    );

    Ok(BandMathOutput {
        table_csv,
        raster: raster_bytes,
        summary: table.summary(),
        preview: table.preview(options.preview.rows, options.preview.seed),
        band_names,
        metadata,
    })
}

//! Error types for the three pipeline stages.
//!
//! Every variant renders a message that can be shown to the user as-is. All
//! errors are terminal for the current request.

use thiserror::Error;

/// The input bytes are not a readable raster, or hold no bands.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("input is empty")]
    Empty,
    #[error("invalid TIFF signature")]
    InvalidSignature,
    #[error("unsupported TIFF version: {0}")]
    UnsupportedVersion(u16),
    #[error("read of {len} bytes at offset {offset} exceeds input size {size}")]
    OutOfRange { offset: u64, len: u64, size: u64 },
    #[error("missing required tag: {0}")]
    MissingTag(&'static str),
    #[error("unsupported field type {field_type} for tag {tag}")]
    UnsupportedFieldType { tag: u16, field_type: u16 },
    #[error("unsupported data type: bits={bits}, format={format}")]
    UnsupportedDataType { bits: u16, format: u16 },
    #[error("bands with differing bit depths are not supported: {0:?}")]
    MixedBitDepths(Vec<u16>),
    #[error("unsupported compression: {0}")]
    UnsupportedCompression(u16),
    #[error("unsupported predictor: {0}")]
    UnsupportedPredictor(u16),
    #[error("unsupported planar configuration: {0}")]
    UnsupportedPlanarConfiguration(u16),
    #[error("decompression failed: {0}")]
    Decompress(String),
    #[error("chunk {index} holds {actual} bytes, expected at least {expected}")]
    ShortChunk {
        index: usize,
        actual: usize,
        expected: usize,
    },
    #[error("expected {expected} chunk offsets, found {actual}")]
    ChunkCount { expected: usize, actual: usize },
    #[error("raster contains no bands")]
    NoBands,
    #[error("band {band} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        band: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("raster dimensions {width}x{height} are invalid")]
    InvalidDimensions { width: u64, height: u64 },
    #[error("{tag} value {value} is out of range")]
    TagOutOfRange { tag: &'static str, value: u64 },
    #[error("declared pixel data of {declared} bytes is implausible for a {input}-byte input")]
    PayloadTooLarge { declared: u64, input: u64 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The formula could not be parsed, names an unknown band, or reaches for
/// something other than arithmetic.
#[derive(Debug, Error, PartialEq)]
pub enum EvaluationError {
    #[error("syntax error at column {column}: {message}")]
    Syntax { column: usize, message: String },
    #[error("unknown band '{name}' (available: {})", available.join(", "))]
    UnknownBand {
        name: String,
        available: Vec<String>,
    },
    #[error("{construct} is not permitted at column {column}: only arithmetic on band names is allowed")]
    Disallowed { column: usize, construct: String },
}

/// The single-band output could not be encoded.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("array shape {actual:?} does not match raster dimensions {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("raster dimensions {width}x{height} cannot be encoded")]
    InvalidDimensions { width: usize, height: usize },
    #[error("TIFF encoding failed: {0}")]
    Tiff(#[from] tiff::TiffError),
    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Any failure of a full load, evaluate and export pass.
#[derive(Debug, Error)]
pub enum BandMathError {
    #[error("failed to read raster: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to evaluate formula: {0}")]
    Evaluation(#[from] EvaluationError),
    #[error("failed to export result: {0}")]
    Encode(#[from] EncodeError),
}

pub type DecodeResult<T> = Result<T, DecodeError>;

//! In-memory raster model: typed band arrays, the band mapping and the
//! georeferencing metadata carried from input to output.

use ndarray::Array2;

use crate::compression::Compression;
use crate::error::{DecodeError, DecodeResult};

// GeoKey constants
const GEO_KEY_MODEL_TYPE: u16 = 1024;
const GEO_KEY_RASTER_TYPE: u16 = 1025;
const GEO_KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const GEO_KEY_PROJECTED_CRS: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

// Sample format constants
const SAMPLE_FORMAT_UINT: u16 = 1;
const SAMPLE_FORMAT_INT: u16 = 2;
const SAMPLE_FORMAT_FLOAT: u16 = 3;

/// Pixel data type detected from TIFF tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterDataType {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl RasterDataType {
    #[must_use]
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            RasterDataType::UInt8 | RasterDataType::Int8 => 1,
            RasterDataType::UInt16 | RasterDataType::Int16 => 2,
            RasterDataType::UInt32 | RasterDataType::Int32 | RasterDataType::Float32 => 4,
            RasterDataType::UInt64 | RasterDataType::Int64 | RasterDataType::Float64 => 8,
        }
    }

    /// Detect data type from TIFF tags
    #[must_use]
    pub fn from_tags(bits_per_sample: u16, sample_format: u16) -> Option<Self> {
        match (sample_format, bits_per_sample) {
            (SAMPLE_FORMAT_UINT, 8) => Some(RasterDataType::UInt8),
            (SAMPLE_FORMAT_UINT, 16) => Some(RasterDataType::UInt16),
            (SAMPLE_FORMAT_UINT, 32) => Some(RasterDataType::UInt32),
            (SAMPLE_FORMAT_UINT, 64) => Some(RasterDataType::UInt64),
            (SAMPLE_FORMAT_INT, 8) => Some(RasterDataType::Int8),
            (SAMPLE_FORMAT_INT, 16) => Some(RasterDataType::Int16),
            (SAMPLE_FORMAT_INT, 32) => Some(RasterDataType::Int32),
            (SAMPLE_FORMAT_INT, 64) => Some(RasterDataType::Int64),
            (SAMPLE_FORMAT_FLOAT, 32) => Some(RasterDataType::Float32),
            (SAMPLE_FORMAT_FLOAT, 64) => Some(RasterDataType::Float64),
            _ => None,
        }
    }
}

/// `GeoTIFF` transform information
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoTransform {
    /// Pixel scale (`x_scale`, `y_scale`, `z_scale`)
    pub pixel_scale: Option<[f64; 3]>,
    /// Tiepoint (i, j, k, x, y, z) - maps pixel (i,j,k) to world (x,y,z)
    pub tiepoint: Option<[f64; 6]>,
    /// Full 4x4 row-major model transformation, used instead of scale + tiepoint
    /// for rotated or sheared rasters
    pub model_transformation: Option<[f64; 16]>,
}

impl GeoTransform {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixel_scale.is_none() && self.tiepoint.is_none() && self.model_transformation.is_none()
    }

    /// The six-coefficient affine (origin x, x step, row rotation, origin y,
    /// column rotation, y step), in GDAL order.
    #[must_use]
    pub fn affine(&self) -> Option<[f64; 6]> {
        if let Some(m) = self.model_transformation {
            return Some([m[3], m[0], m[1], m[7], m[4], m[5]]);
        }

        let scale = self.pixel_scale?;
        let tie = self.tiepoint?;
        // Y is typically inverted
        Some([
            tie[3] - tie[0] * scale[0],
            scale[0],
            0.0,
            tie[4] + tie[1] * scale[1],
            0.0,
            -scale[1],
        ])
    }

    /// Convert pixel coordinates to world coordinates
    #[must_use]
    pub fn pixel_to_world(&self, px: f64, py: f64) -> Option<(f64, f64)> {
        let a = self.affine()?;
        Some((a[0] + px * a[1] + py * a[2], a[3] + px * a[4] + py * a[5]))
    }

    /// World extent `(minx, miny, maxx, maxy)` of a `width` x `height` image
    #[must_use]
    pub fn get_extent(&self, width: usize, height: usize) -> Option<(f64, f64, f64, f64)> {
        let corners = [
            self.pixel_to_world(0.0, 0.0)?,
            self.pixel_to_world(width as f64, 0.0)?,
            self.pixel_to_world(0.0, height as f64)?,
            self.pixel_to_world(width as f64, height as f64)?,
        ];

        let mut extent = (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (x, y) in corners {
            extent.0 = extent.0.min(x);
            extent.1 = extent.1.min(y);
            extent.2 = extent.2.max(x);
            extent.3 = extent.3.max(y);
        }
        Some(extent)
    }
}

/// Raw `GeoKeyDirectory` plus the parameter tags its keys may point into.
/// Carried byte-for-byte so the output keeps the exact coordinate system.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoKeys {
    pub directory: Vec<u16>,
    pub double_params: Option<Vec<f64>>,
    pub ascii_params: Option<String>,
}

impl GeoKeys {
    /// Minimal directory declaring an EPSG coordinate system.
    #[must_use]
    pub fn from_epsg(code: u16) -> Self {
        let (model_type, crs_key) = if is_geographic_epsg(i32::from(code)) {
            (MODEL_TYPE_GEOGRAPHIC, GEO_KEY_GEOGRAPHIC_TYPE)
        } else {
            (MODEL_TYPE_PROJECTED, GEO_KEY_PROJECTED_CRS)
        };

        // Header: KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys
        // Keys:   KeyID, TIFFTagLocation, Count, Value_Offset
        let directory = vec![
            1, 1, 0, 3,
            GEO_KEY_MODEL_TYPE, 0, 1, model_type,
            GEO_KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
            crs_key, 0, 1, code,
        ];

        Self {
            directory,
            double_params: None,
            ascii_params: None,
        }
    }

    /// EPSG code from `ProjectedCSTypeGeoKey` (3072) or `GeographicTypeGeoKey` (2048).
    /// A projected code wins when both are present.
    #[must_use]
    pub fn epsg_code(&self) -> Option<i32> {
        if self.directory.len() < 4 {
            return None;
        }

        let num_keys = usize::from(self.directory[3]);
        let mut geographic = None;

        for key in self.directory[4..].chunks_exact(4).take(num_keys) {
            let (key_id, location, value) = (key[0], key[1], key[3]);
            // Location 0 means the value is stored inline
            if location != 0 || value == 0 || value == 32767 {
                continue;
            }
            if key_id == GEO_KEY_PROJECTED_CRS {
                return Some(i32::from(value));
            }
            if key_id == GEO_KEY_GEOGRAPHIC_TYPE {
                geographic = Some(i32::from(value));
            }
        }

        geographic
    }
}

/// Check if an EPSG code represents a geographic (lon/lat) CRS
#[inline]
#[must_use]
pub fn is_geographic_epsg(epsg: i32) -> bool {
    epsg == 4326 || (4000..5000).contains(&epsg)
}

/// Raster metadata - dimensions, pixel type and georeferencing
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMetadata {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub data_type: RasterDataType,
    pub compression: Compression,
    pub geo_transform: GeoTransform,
    pub geo_keys: Option<GeoKeys>,
    /// Detected CRS (EPSG code)
    pub crs_code: Option<i32>,
    /// `NoData` value
    pub nodata: Option<f64>,
}

impl RasterMetadata {
    /// Metadata for a derived single-band raster: everything is kept except
    /// the band count and the pixel type.
    #[must_use]
    pub fn single_band(&self, data_type: RasterDataType) -> Self {
        Self {
            band_count: 1,
            data_type,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    #[must_use]
    pub fn extent(&self) -> Option<(f64, f64, f64, f64)> {
        self.geo_transform.get_extent(self.width, self.height)
    }
}

/// One band's pixels in the numeric type they were stored with.
/// Arrays are indexed `[row, column]`.
#[derive(Debug, Clone, PartialEq)]
pub enum BandArray {
    U8(Array2<u8>),
    U16(Array2<u16>),
    U32(Array2<u32>),
    U64(Array2<u64>),
    I8(Array2<i8>),
    I16(Array2<i16>),
    I32(Array2<i32>),
    I64(Array2<i64>),
    F32(Array2<f32>),
    F64(Array2<f64>),
}

macro_rules! with_band_array {
    ($band:expr, $array:ident => $body:expr) => {
        match $band {
            BandArray::U8($array) => $body,
            BandArray::U16($array) => $body,
            BandArray::U32($array) => $body,
            BandArray::U64($array) => $body,
            BandArray::I8($array) => $body,
            BandArray::I16($array) => $body,
            BandArray::I32($array) => $body,
            BandArray::I64($array) => $body,
            BandArray::F32($array) => $body,
            BandArray::F64($array) => $body,
        }
    };
}

macro_rules! decode_samples {
    ($bytes:expr, $little_endian:expr, $ty:ty) => {{
        const N: usize = std::mem::size_of::<$ty>();
        $bytes
            .chunks_exact(N)
            .map(|chunk| {
                let mut raw = [0u8; N];
                raw.copy_from_slice(chunk);
                if $little_endian {
                    <$ty>::from_le_bytes(raw)
                } else {
                    <$ty>::from_be_bytes(raw)
                }
            })
            .collect::<Vec<$ty>>()
    }};
}

impl BandArray {
    /// Build a band from raw samples stored in file byte order.
    ///
    /// `bytes` must hold exactly `rows * cols` samples of `data_type`.
    pub fn from_samples(
        data_type: RasterDataType,
        little_endian: bool,
        bytes: &[u8],
        rows: usize,
        cols: usize,
    ) -> DecodeResult<Self> {
        fn shaped<T>(rows: usize, cols: usize, values: Vec<T>) -> DecodeResult<Array2<T>> {
            let actual = values.len();
            Array2::from_shape_vec((rows, cols), values).map_err(|_| DecodeError::ShortChunk {
                index: 0,
                actual,
                expected: rows * cols,
            })
        }

        let le = little_endian;
        Ok(match data_type {
            RasterDataType::UInt8 => BandArray::U8(shaped(rows, cols, bytes.to_vec())?),
            RasterDataType::Int8 => {
                BandArray::I8(shaped(rows, cols, bytes.iter().map(|&b| b as i8).collect())?)
            }
            RasterDataType::UInt16 => BandArray::U16(shaped(rows, cols, decode_samples!(bytes, le, u16))?),
            RasterDataType::Int16 => BandArray::I16(shaped(rows, cols, decode_samples!(bytes, le, i16))?),
            RasterDataType::UInt32 => BandArray::U32(shaped(rows, cols, decode_samples!(bytes, le, u32))?),
            RasterDataType::Int32 => BandArray::I32(shaped(rows, cols, decode_samples!(bytes, le, i32))?),
            RasterDataType::UInt64 => BandArray::U64(shaped(rows, cols, decode_samples!(bytes, le, u64))?),
            RasterDataType::Int64 => BandArray::I64(shaped(rows, cols, decode_samples!(bytes, le, i64))?),
            RasterDataType::Float32 => BandArray::F32(shaped(rows, cols, decode_samples!(bytes, le, f32))?),
            RasterDataType::Float64 => BandArray::F64(shaped(rows, cols, decode_samples!(bytes, le, f64))?),
        })
    }

    /// `(rows, columns)`
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        with_band_array!(self, a => a.dim())
    }

    #[must_use]
    pub fn data_type(&self) -> RasterDataType {
        match self {
            BandArray::U8(_) => RasterDataType::UInt8,
            BandArray::U16(_) => RasterDataType::UInt16,
            BandArray::U32(_) => RasterDataType::UInt32,
            BandArray::U64(_) => RasterDataType::UInt64,
            BandArray::I8(_) => RasterDataType::Int8,
            BandArray::I16(_) => RasterDataType::Int16,
            BandArray::I32(_) => RasterDataType::Int32,
            BandArray::I64(_) => RasterDataType::Int64,
            BandArray::F32(_) => RasterDataType::Float32,
            BandArray::F64(_) => RasterDataType::Float64,
        }
    }

    /// Widen to f64 for evaluation. Exact for every type except 64-bit
    /// integers beyond 2^53.
    #[must_use]
    pub fn to_f64(&self) -> Array2<f64> {
        match self {
            BandArray::F64(a) => a.clone(),
            BandArray::U64(a) => a.mapv(|v| v as f64),
            BandArray::I64(a) => a.mapv(|v| v as f64),
            BandArray::U8(a) => a.mapv(f64::from),
            BandArray::U16(a) => a.mapv(f64::from),
            BandArray::U32(a) => a.mapv(f64::from),
            BandArray::I8(a) => a.mapv(f64::from),
            BandArray::I16(a) => a.mapv(f64::from),
            BandArray::I32(a) => a.mapv(f64::from),
            BandArray::F32(a) => a.mapv(f64::from),
        }
    }
}

/// Canonical key of the band at zero-based `index`: `B1`, `B2`, ...
#[must_use]
pub fn band_name(index: usize) -> String {
    format!("B{}", index + 1)
}

/// The band mapping: bands in source order, all of one shape, addressed by
/// their canonical `B{i}` key.
#[derive(Debug, Clone, PartialEq)]
pub struct Bands {
    shape: (usize, usize),
    arrays: Vec<BandArray>,
}

impl Bands {
    pub fn new(arrays: Vec<BandArray>) -> DecodeResult<Self> {
        let shape = arrays.first().ok_or(DecodeError::NoBands)?.shape();

        for (i, band) in arrays.iter().enumerate() {
            if band.shape() != shape {
                return Err(DecodeError::ShapeMismatch {
                    band: i + 1,
                    expected: shape,
                    actual: band.shape(),
                });
            }
        }

        Ok(Self { shape, arrays })
    }

    /// `(rows, columns)` shared by every band
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        (0..self.arrays.len()).map(band_name).collect()
    }

    /// Zero-based position of an exact `B{i}` key. `b1`, `B01` and `B0` are not keys.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let digits = name.strip_prefix('B')?;
        if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let number: usize = digits.parse().ok()?;
        (number <= self.arrays.len()).then(|| number - 1)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BandArray> {
        self.index_of(name).map(|i| &self.arrays[i])
    }
}

/// A decoded raster: its band mapping and metadata.
#[derive(Debug, Clone)]
pub struct Raster {
    pub metadata: RasterMetadata,
    pub bands: Bands,
}

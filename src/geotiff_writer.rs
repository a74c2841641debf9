//! Single-band GeoTIFF export.
//!
//! The computed array is written as one floating-point band with the source
//! raster's georeferencing tags copied across. Values are written as they
//! are, non-finite ones included.

use std::io::{Cursor, Seek, Write};

use ndarray::Array2;
use tiff::encoder::colortype::{ColorType, Gray32Float, Gray64Float};
use tiff::encoder::compression::{
    Compression as TiffCompression, Deflate, Lzw, Uncompressed,
};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind, TiffValue};
use tiff::tags::Tag;
use tracing::{debug, info};

use crate::config::{ExportOptions, OutputCompression, OutputPixelType};
use crate::error::EncodeError;
use crate::raster::{GeoKeys, RasterMetadata};
use crate::tiff_utils::{
    TAG_GDAL_NODATA, TAG_GEO_ASCII_PARAMS, TAG_GEO_DOUBLE_PARAMS, TAG_GEO_KEY_DIRECTORY,
    TAG_MODEL_PIXEL_SCALE, TAG_MODEL_TIEPOINT, TAG_MODEL_TRANSFORMATION,
};

/// Largest file classic TIFF offsets can address
const CLASSIC_TIFF_LIMIT: u64 = u32::MAX as u64;

/// Encode `array` as a GeoTIFF that reuses `metadata`'s spatial referencing.
///
/// `array` must have the `(height, width)` shape recorded in `metadata`.
pub fn write_geotiff(
    array: &Array2<f64>,
    metadata: &RasterMetadata,
    options: &ExportOptions,
) -> Result<Vec<u8>, EncodeError> {
    if array.dim() != metadata.shape() {
        return Err(EncodeError::ShapeMismatch {
            expected: metadata.shape(),
            actual: array.dim(),
        });
    }

    let (width, height) = match (u32::try_from(metadata.width), u32::try_from(metadata.height)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(EncodeError::InvalidDimensions {
                width: metadata.width,
                height: metadata.height,
            });
        }
    };

    let compression = options.compression.resolve(metadata.compression);
    let payload = metadata.pixel_count() as u64 * options.pixel_type.bytes_per_sample() as u64;
    // Headroom for the directory and geo tags
    let big_tiff = payload >= CLASSIC_TIFF_LIMIT - (1 << 20);

    let target = ImageTarget {
        width,
        height,
        metadata,
        compression,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(payload.min(1 << 30) as usize));
    if big_tiff {
        let mut encoder = TiffEncoder::new_big(&mut cursor)?;
        write_pixels(&mut encoder, array, options.pixel_type, &target)?;
    } else {
        let mut encoder = TiffEncoder::new(&mut cursor)?;
        write_pixels(&mut encoder, array, options.pixel_type, &target)?;
    }
    let bytes = cursor.into_inner();

    info!(
        width,
        height,
        pixel_type = ?options.pixel_type,
        compression = ?compression,
        big_tiff,
        bytes = bytes.len(),
        "Encoded GeoTIFF"
    );
    Ok(bytes)
}

struct ImageTarget<'a> {
    width: u32,
    height: u32,
    metadata: &'a RasterMetadata,
    compression: OutputCompression,
}

fn write_pixels<W: Write + Seek, K: TiffKind>(
    encoder: &mut TiffEncoder<W, K>,
    array: &Array2<f64>,
    pixel_type: OutputPixelType,
    target: &ImageTarget<'_>,
) -> Result<(), EncodeError> {
    // Logical (row-major) order regardless of memory layout
    match pixel_type {
        OutputPixelType::Float32 => {
            let data: Vec<f32> = array.iter().map(|&v| v as f32).collect();
            write_compressed::<W, K, Gray32Float>(encoder, &data, target)
        }
        OutputPixelType::Float64 => {
            let data: Vec<f64> = array.iter().copied().collect();
            write_compressed::<W, K, Gray64Float>(encoder, &data, target)
        }
    }
}

fn write_compressed<W: Write + Seek, K: TiffKind, C: ColorType>(
    encoder: &mut TiffEncoder<W, K>,
    data: &[C::Inner],
    target: &ImageTarget<'_>,
) -> Result<(), EncodeError>
where
    [C::Inner]: TiffValue,
{
    match target.compression {
        OutputCompression::Deflate => write_image::<W, K, C, _>(encoder, data, target, Deflate::default()),
        OutputCompression::Lzw => write_image::<W, K, C, _>(encoder, data, target, Lzw::default()),
        OutputCompression::None | OutputCompression::MatchSource => {
            write_image::<W, K, C, _>(encoder, data, target, Uncompressed)
        }
    }
}

fn write_image<W: Write + Seek, K: TiffKind, C: ColorType, D: TiffCompression>(
    encoder: &mut TiffEncoder<W, K>,
    data: &[C::Inner],
    target: &ImageTarget<'_>,
    compression: D,
) -> Result<(), EncodeError>
where
    [C::Inner]: TiffValue,
{
    let mut image =
        encoder.new_image_with_compression::<C, D>(target.width, target.height, compression)?;
    write_geo_tags(image.encoder(), target.metadata)?;
    image.write_data(data)?;
    Ok(())
}

fn write_geo_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<'_, W, K>,
    metadata: &RasterMetadata,
) -> Result<(), EncodeError> {
    let geo = &metadata.geo_transform;
    if let Some(scale) = geo.pixel_scale {
        dir.write_tag(Tag::from_u16_exhaustive(TAG_MODEL_PIXEL_SCALE), &scale[..])?;
    }
    if let Some(tiepoint) = geo.tiepoint {
        dir.write_tag(Tag::from_u16_exhaustive(TAG_MODEL_TIEPOINT), &tiepoint[..])?;
    }
    if let Some(matrix) = geo.model_transformation {
        dir.write_tag(Tag::from_u16_exhaustive(TAG_MODEL_TRANSFORMATION), &matrix[..])?;
    }

    let synthesized;
    let geo_keys = match (&metadata.geo_keys, metadata.crs_code) {
        (Some(keys), _) => Some(keys),
        (None, Some(code)) => match u16::try_from(code) {
            Ok(code) => {
                synthesized = GeoKeys::from_epsg(code);
                Some(&synthesized)
            }
            Err(_) => None,
        },
        (None, None) => None,
    };
    if let Some(keys) = geo_keys {
        dir.write_tag(Tag::from_u16_exhaustive(TAG_GEO_KEY_DIRECTORY), &keys.directory[..])?;
        if let Some(doubles) = &keys.double_params {
            dir.write_tag(Tag::from_u16_exhaustive(TAG_GEO_DOUBLE_PARAMS), &doubles[..])?;
        }
        if let Some(ascii) = &keys.ascii_params {
            let ascii = sanitize_ascii(ascii);
            dir.write_tag(Tag::from_u16_exhaustive(TAG_GEO_ASCII_PARAMS), ascii.as_str())?;
        }
    }

    if let Some(nodata) = metadata.nodata {
        dir.write_tag(
            Tag::from_u16_exhaustive(TAG_GDAL_NODATA),
            format_nodata(nodata).as_str(),
        )?;
    }

    if geo.is_empty() && geo_keys.is_none() {
        debug!("Source raster carries no georeferencing, writing plain TIFF");
    }
    Ok(())
}

/// GDAL's textual nodata form
fn format_nodata(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        value.to_string()
    }
}

/// TIFF ASCII fields hold 7-bit text without interior NULs
fn sanitize_ascii(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() && c != '\0' { c } else { '?' })
        .collect()
}

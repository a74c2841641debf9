//! Raster loader: decodes an in-memory GeoTIFF into a band mapping.
//!
//! Only the first IFD (the full-resolution image) is read. Strips and tiles are
//! both supported, as are chunky (pixel-interleaved) and separate (one plane
//! per band) layouts. Every chunk is decompressed, un-predicted and scattered
//! into per-band sample buffers, which are then converted to typed arrays
//! without any rescaling.

use tracing::{debug, info};

use crate::compression::{Compression, apply_predictor, decompress_chunk};
use crate::error::{DecodeError, DecodeResult};
use crate::raster::{BandArray, Bands, GeoKeys, GeoTransform, Raster, RasterDataType, RasterMetadata};
use crate::tiff_utils::{
    Ifd, TAG_BITS_PER_SAMPLE, TAG_COMPRESSION, TAG_GDAL_NODATA, TAG_GEO_ASCII_PARAMS,
    TAG_GEO_DOUBLE_PARAMS, TAG_GEO_KEY_DIRECTORY, TAG_IMAGE_LENGTH, TAG_IMAGE_WIDTH,
    TAG_MODEL_PIXEL_SCALE, TAG_MODEL_TIEPOINT, TAG_MODEL_TRANSFORMATION,
    TAG_PLANAR_CONFIGURATION, TAG_PREDICTOR, TAG_ROWS_PER_STRIP, TAG_SAMPLE_FORMAT,
    TAG_SAMPLES_PER_PIXEL, TAG_STRIP_BYTE_COUNTS, TAG_STRIP_OFFSETS, TAG_TILE_BYTE_COUNTS,
    TAG_TILE_LENGTH, TAG_TILE_OFFSETS, TAG_TILE_WIDTH, TiffHeader, slice_at,
};

const PLANAR_CHUNKY: u16 = 1;
const PLANAR_SEPARATE: u16 = 2;

/// Upper bound on decoded pixel bytes per input byte. Well above what
/// Deflate, LZW or PackBits can reach; only large sparse or highly
/// compressed Zstd images come near it.
const MAX_EXPANSION: u64 = 1 << 16;

/// Decode raster bytes into bands `B1..BN` plus metadata.
pub fn load_raster(data: &[u8]) -> DecodeResult<Raster> {
    let header = TiffHeader::parse(data)?;
    let ifd = Ifd::parse(data, &header, header.first_ifd_offset)?;
    let layout = ImageLayout::from_ifd(data, &ifd, header.little_endian)?;
    let metadata = read_metadata(data, &ifd, &layout)?;

    debug!(
        width = layout.width,
        height = layout.height,
        bands = layout.bands,
        data_type = ?layout.data_type,
        compression = ?layout.compression,
        tiled = layout.is_tiled,
        planar = layout.planar,
        big_tiff = header.big_tiff,
        "Parsed raster layout"
    );

    let band_bytes = read_band_samples(data, &layout)?;

    let arrays = band_bytes
        .iter()
        .map(|bytes| {
            BandArray::from_samples(
                layout.data_type,
                layout.little_endian,
                bytes,
                layout.height,
                layout.width,
            )
        })
        .collect::<DecodeResult<Vec<_>>>()?;
    let bands = Bands::new(arrays)?;

    info!(
        width = metadata.width,
        height = metadata.height,
        bands = bands.len(),
        crs = ?metadata.crs_code,
        "Loaded raster"
    );

    Ok(Raster { metadata, bands })
}

/// Everything needed to walk the image's chunks.
#[derive(Debug, Clone)]
struct ImageLayout {
    width: usize,
    height: usize,
    bands: usize,
    data_type: RasterDataType,
    compression: Compression,
    predictor: u16,
    planar: u16,
    little_endian: bool,
    is_tiled: bool,
    /// Strip width is the image width
    chunk_width: usize,
    /// Tile height, or rows per strip
    chunk_height: usize,
    chunks_across: usize,
    chunks_down: usize,
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
}

impl ImageLayout {
    fn from_ifd(data: &[u8], ifd: &Ifd, little_endian: bool) -> DecodeResult<Self> {
        let width = ifd
            .u64_value(data, TAG_IMAGE_WIDTH)?
            .ok_or(DecodeError::MissingTag("ImageWidth"))?;
        let height = ifd
            .u64_value(data, TAG_IMAGE_LENGTH)?
            .ok_or(DecodeError::MissingTag("ImageLength"))?;
        if width == 0 || height == 0 || width.checked_mul(height).is_none() {
            return Err(DecodeError::InvalidDimensions { width, height });
        }
        let pixels = width * height;
        let (width, height) = (to_usize(width, "ImageWidth")?, to_usize(height, "ImageLength")?);

        let bands = to_usize(
            ifd.u64_value(data, TAG_SAMPLES_PER_PIXEL)?.unwrap_or(1),
            "SamplesPerPixel",
        )?;
        if bands == 0 {
            return Err(DecodeError::NoBands);
        }

        let bits = ifd
            .u64_values(data, TAG_BITS_PER_SAMPLE)?
            .unwrap_or_else(|| vec![1])
            .into_iter()
            .map(|value| {
                u16::try_from(value).map_err(|_| DecodeError::TagOutOfRange {
                    tag: "BitsPerSample",
                    value,
                })
            })
            .collect::<DecodeResult<Vec<_>>>()?;
        let Some(&bits_per_sample) = bits.first() else {
            return Err(DecodeError::MissingTag("BitsPerSample"));
        };
        if bits.iter().any(|&b| b != bits_per_sample) {
            return Err(DecodeError::MixedBitDepths(bits));
        }

        // Default to unsigned if sample format not specified
        let sample_format = u16_tag(data, ifd, TAG_SAMPLE_FORMAT, "SampleFormat", 1)?;
        let data_type = RasterDataType::from_tags(bits_per_sample, sample_format).ok_or(
            DecodeError::UnsupportedDataType {
                bits: bits_per_sample,
                format: sample_format,
            },
        )?;

        let bps = data_type.bytes_per_sample() as u64;
        let limit = (data.len() as u64).saturating_mul(MAX_EXPANSION);
        let declared = pixels
            .checked_mul(bps)
            .and_then(|v| v.checked_mul(bands as u64))
            .ok_or(DecodeError::InvalidDimensions {
                width: width as u64,
                height: height as u64,
            })?;
        if declared > limit {
            return Err(DecodeError::PayloadTooLarge {
                declared,
                input: data.len() as u64,
            });
        }

        let compression_val = u16_tag(data, ifd, TAG_COMPRESSION, "Compression", 1)?;
        let compression = Compression::from_tag(compression_val)
            .ok_or(DecodeError::UnsupportedCompression(compression_val))?;

        let predictor = u16_tag(data, ifd, TAG_PREDICTOR, "Predictor", 1)?;
        if !matches!(predictor, 1..=3) {
            return Err(DecodeError::UnsupportedPredictor(predictor));
        }

        let planar = u16_tag(data, ifd, TAG_PLANAR_CONFIGURATION, "PlanarConfiguration", 1)?;
        // A single band is laid out identically either way
        let planar = match planar {
            PLANAR_CHUNKY | PLANAR_SEPARATE if bands == 1 => PLANAR_CHUNKY,
            PLANAR_CHUNKY | PLANAR_SEPARATE => planar,
            other => return Err(DecodeError::UnsupportedPlanarConfiguration(other)),
        };

        let is_tiled = ifd.contains(TAG_TILE_OFFSETS);

        let (chunk_width, chunk_height, offsets_tag, counts_tag) = if is_tiled {
            let tw = ifd
                .u64_value(data, TAG_TILE_WIDTH)?
                .ok_or(DecodeError::MissingTag("TileWidth"))?;
            let th = ifd
                .u64_value(data, TAG_TILE_LENGTH)?
                .ok_or(DecodeError::MissingTag("TileLength"))?;
            (
                to_usize(tw, "TileWidth")?,
                to_usize(th, "TileLength")?,
                TAG_TILE_OFFSETS,
                TAG_TILE_BYTE_COUNTS,
            )
        } else if ifd.contains(TAG_STRIP_OFFSETS) {
            let rows_per_strip = ifd
                .u64_value(data, TAG_ROWS_PER_STRIP)?
                .map(|v| v.min(height as u64))
                .map(|v| to_usize(v, "RowsPerStrip"))
                .transpose()?
                .unwrap_or(height);
            (width, rows_per_strip, TAG_STRIP_OFFSETS, TAG_STRIP_BYTE_COUNTS)
        } else {
            return Err(DecodeError::MissingTag("StripOffsets or TileOffsets"));
        };

        if chunk_width == 0 || chunk_height == 0 {
            return Err(DecodeError::InvalidDimensions {
                width: chunk_width as u64,
                height: chunk_height as u64,
            });
        }

        // One decoded chunk, padding included, must fit the same bound
        let samples_per_chunk_pixel = if planar == PLANAR_SEPARATE { 1 } else { bands as u64 };
        let chunk_bytes = (chunk_width as u64)
            .checked_mul(chunk_height as u64)
            .and_then(|v| v.checked_mul(samples_per_chunk_pixel * bps));
        match chunk_bytes {
            Some(bytes) if bytes <= limit => {}
            _ => {
                return Err(DecodeError::PayloadTooLarge {
                    declared: chunk_bytes.unwrap_or(u64::MAX),
                    input: data.len() as u64,
                });
            }
        }

        let chunks_across = width.div_ceil(chunk_width);
        let chunks_down = height.div_ceil(chunk_height);
        let planes = if planar == PLANAR_SEPARATE { bands } else { 1 };
        let expected = chunks_across * chunks_down * planes;

        let offsets = ifd
            .u64_values(data, offsets_tag)?
            .ok_or(DecodeError::MissingTag("chunk offsets"))?;
        let byte_counts = ifd
            .u64_values(data, counts_tag)?
            .ok_or(DecodeError::MissingTag("chunk byte counts"))?;

        for actual in [offsets.len(), byte_counts.len()] {
            if actual < expected {
                return Err(DecodeError::ChunkCount { expected, actual });
            }
        }

        Ok(Self {
            width,
            height,
            bands,
            data_type,
            compression,
            predictor,
            planar,
            little_endian,
            is_tiled,
            chunk_width,
            chunk_height,
            chunks_across,
            chunks_down,
            offsets,
            byte_counts,
        })
    }

    fn samples_per_chunk_pixel(&self) -> usize {
        if self.planar == PLANAR_SEPARATE { 1 } else { self.bands }
    }

    /// Rows actually holding image data in chunk row `chunk_row`. Tiles are
    /// always stored at full size; the last strip may be shorter.
    fn stored_rows(&self, chunk_row: usize) -> usize {
        if self.is_tiled {
            self.chunk_height
        } else {
            self.valid_rows(chunk_row)
        }
    }

    fn valid_rows(&self, chunk_row: usize) -> usize {
        (self.height - chunk_row * self.chunk_height).min(self.chunk_height)
    }

    fn valid_cols(&self, chunk_col: usize) -> usize {
        (self.width - chunk_col * self.chunk_width).min(self.chunk_width)
    }
}

fn to_usize(value: u64, tag: &'static str) -> DecodeResult<usize> {
    usize::try_from(value).map_err(|_| DecodeError::TagOutOfRange { tag, value })
}

fn u16_tag(data: &[u8], ifd: &Ifd, tag: u16, name: &'static str, default: u16) -> DecodeResult<u16> {
    let value = ifd.u64_value(data, tag)?.unwrap_or(u64::from(default));
    u16::try_from(value).map_err(|_| DecodeError::TagOutOfRange { tag: name, value })
}

/// Decode every chunk and scatter its samples into one buffer per band,
/// each `width * height * bytes_per_sample` long, in file byte order.
fn read_band_samples(data: &[u8], layout: &ImageLayout) -> DecodeResult<Vec<Vec<u8>>> {
    let bps = layout.data_type.bytes_per_sample();
    // Bounded by the payload check in ImageLayout::from_ifd
    let band_len = layout.width * layout.height * bps;
    let mut band_bytes = vec![vec![0u8; band_len]; layout.bands];

    let spp = layout.samples_per_chunk_pixel();
    let planes = if layout.planar == PLANAR_SEPARATE { layout.bands } else { 1 };
    let chunks_per_plane = layout.chunks_across * layout.chunks_down;
    let mut sparse_chunks = 0usize;

    for plane in 0..planes {
        for chunk in 0..chunks_per_plane {
            let index = plane * chunks_per_plane + chunk;
            let chunk_row = chunk / layout.chunks_across;
            let chunk_col = chunk % layout.chunks_across;

            let byte_count = layout.byte_counts[index];
            if byte_count == 0 {
                // Sparse chunk: leave zeros
                sparse_chunks += 1;
                continue;
            }

            let rows = layout.stored_rows(chunk_row);
            let row_bytes = layout.chunk_width * spp * bps;
            let expected = rows * row_bytes;

            let compressed = slice_at(data, layout.offsets[index], byte_count)?;
            let mut decoded = decompress_chunk(compressed, layout.compression, expected)?;
            if decoded.len() < expected {
                return Err(DecodeError::ShortChunk {
                    index,
                    actual: decoded.len(),
                    expected,
                });
            }
            decoded.truncate(expected);

            apply_predictor(
                &mut decoded,
                layout.predictor,
                layout.chunk_width,
                spp,
                bps,
                layout.little_endian,
            )?;

            let y0 = chunk_row * layout.chunk_height;
            let x0 = chunk_col * layout.chunk_width;
            let valid_rows = layout.valid_rows(chunk_row);
            let valid_cols = layout.valid_cols(chunk_col);

            for r in 0..valid_rows {
                let src_row = &decoded[r * row_bytes..(r + 1) * row_bytes];
                let dst_start = ((y0 + r) * layout.width + x0) * bps;

                if spp == 1 {
                    let band = if layout.planar == PLANAR_SEPARATE { plane } else { 0 };
                    band_bytes[band][dst_start..dst_start + valid_cols * bps]
                        .copy_from_slice(&src_row[..valid_cols * bps]);
                    continue;
                }

                for c in 0..valid_cols {
                    let pixel = &src_row[c * spp * bps..(c + 1) * spp * bps];
                    let dst = dst_start + c * bps;
                    for (band, sample) in pixel.chunks_exact(bps).enumerate() {
                        band_bytes[band][dst..dst + bps].copy_from_slice(sample);
                    }
                }
            }
        }
    }

    if sparse_chunks > 0 {
        debug!(sparse_chunks, "Sparse chunks decoded as zeros");
    }

    Ok(band_bytes)
}

fn read_metadata(data: &[u8], ifd: &Ifd, layout: &ImageLayout) -> DecodeResult<RasterMetadata> {
    let pixel_scale = ifd
        .f64_values(data, TAG_MODEL_PIXEL_SCALE)?
        .filter(|v| v.len() >= 3)
        .map(|v| [v[0], v[1], v[2]]);
    let tiepoint = ifd
        .f64_values(data, TAG_MODEL_TIEPOINT)?
        .filter(|v| v.len() >= 6)
        .map(|v| [v[0], v[1], v[2], v[3], v[4], v[5]]);
    let model_transformation = ifd
        .f64_values(data, TAG_MODEL_TRANSFORMATION)?
        .and_then(|v| <[f64; 16]>::try_from(v.get(..16)?).ok());

    let geo_keys = ifd
        .u16_values(data, TAG_GEO_KEY_DIRECTORY)?
        .map(|directory| -> DecodeResult<GeoKeys> {
            Ok(GeoKeys {
                directory,
                double_params: ifd.f64_values(data, TAG_GEO_DOUBLE_PARAMS)?,
                ascii_params: ifd.ascii(data, TAG_GEO_ASCII_PARAMS)?,
            })
        })
        .transpose()?;
    let crs_code = geo_keys.as_ref().and_then(GeoKeys::epsg_code);

    let nodata = ifd
        .ascii(data, TAG_GDAL_NODATA)?
        .and_then(|s| s.trim().parse::<f64>().ok());

    Ok(RasterMetadata {
        width: layout.width,
        height: layout.height,
        band_count: layout.bands,
        data_type: layout.data_type,
        compression: layout.compression,
        geo_transform: GeoTransform {
            pixel_scale,
            tiepoint,
            model_transformation,
        },
        geo_keys,
        crs_code,
        nodata,
    })
}

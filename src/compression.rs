//! Chunk decompression and predictor reversal.

use std::io::Read;

use crate::error::{DecodeError, DecodeResult};

// Compression constants
const COMPRESSION_NONE: u16 = 1;
const COMPRESSION_LZW: u16 = 5;
const COMPRESSION_DEFLATE: u16 = 8;
const COMPRESSION_DEFLATE_LEGACY: u16 = 32946;
const COMPRESSION_PACKBITS: u16 = 32773;
const COMPRESSION_ZSTD: u16 = 50000;

/// Compression method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzw,
    Deflate,
    PackBits,
    Zstd,
}

impl Compression {
    #[must_use]
    pub fn from_tag(value: u16) -> Option<Self> {
        match value {
            COMPRESSION_NONE => Some(Compression::None),
            COMPRESSION_LZW => Some(Compression::Lzw),
            COMPRESSION_DEFLATE | COMPRESSION_DEFLATE_LEGACY => Some(Compression::Deflate),
            COMPRESSION_PACKBITS => Some(Compression::PackBits),
            COMPRESSION_ZSTD => Some(Compression::Zstd),
            _ => None,
        }
    }
}

/// Inflate one strip or tile. Deflate and Zstd output stops at
/// `expected_size`; callers check the length against the chunk geometry.
pub fn decompress_chunk(
    compressed: &[u8],
    compression: Compression,
    expected_size: usize,
) -> DecodeResult<Vec<u8>> {
    match compression {
        Compression::None => Ok(compressed.to_vec()),
        Compression::Deflate => {
            let decoder = flate2::read::ZlibDecoder::new(compressed);
            let mut decompressed = Vec::with_capacity(expected_size);
            decoder
                .take(expected_size as u64)
                .read_to_end(&mut decompressed)
                .map_err(|e| DecodeError::Decompress(format!("deflate: {e}")))?;
            Ok(decompressed)
        }
        Compression::Lzw => {
            let mut decoder =
                weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
            decoder
                .decode(compressed)
                .map_err(|e| DecodeError::Decompress(format!("LZW: {e}")))
        }
        Compression::PackBits => Ok(unpack_bits(compressed, expected_size)),
        Compression::Zstd => {
            let decoder = zstd::stream::read::Decoder::new(compressed)
                .map_err(|e| DecodeError::Decompress(format!("zstd: {e}")))?;
            let mut decompressed = Vec::with_capacity(expected_size);
            decoder
                .take(expected_size as u64)
                .read_to_end(&mut decompressed)
                .map_err(|e| DecodeError::Decompress(format!("zstd: {e}")))?;
            Ok(decompressed)
        }
    }
}

/// PackBits run-length decoding. A truncated run ends the output early.
fn unpack_bits(compressed: &[u8], expected_size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(expected_size);
    let mut pos = 0;

    while pos < compressed.len() {
        let header = compressed[pos] as i8;
        pos += 1;
        match header {
            // -128 is a no-op
            -128 => {}
            0..=127 => {
                let len = header as usize + 1;
                let end = (pos + len).min(compressed.len());
                out.extend_from_slice(&compressed[pos..end]);
                pos = end;
            }
            _ => {
                let Some(&value) = compressed.get(pos) else {
                    break;
                };
                let len = (1 - i16::from(header)) as usize;
                out.resize(out.len() + len, value);
                pos += 1;
            }
        }
    }

    out
}

/// Reverses TIFF predictor encoding in place.
///
/// # TIFF Predictor Types
///
/// - **Predictor 1 (None)**: data is stored as-is.
/// - **Predictor 2 (Horizontal Differencing)**: each sample stores the
///   difference from the same sample of the previous pixel in the row.
///   Decoding is cumulative addition over whole samples as integers, so carries
///   between the bytes of a multi-byte sample propagate correctly.
/// - **Predictor 3 (Floating Point)**: each row was split into byte planes
///   (most significant byte first) and byte-differenced. Decoding accumulates
///   the bytes, then interleaves the planes back into samples.
///
/// Each row is processed independently; the first pixel of a row never
/// accumulates from the previous row.
///
/// # Arguments
///
/// * `data` - Decompressed chunk data with predictor encoding still applied
/// * `predictor` - TIFF predictor tag value
/// * `row_width` - Width of the chunk in pixels
/// * `samples_per_pixel` - Interleaved samples per pixel in this chunk
/// * `bytes_per_sample` - Size of each sample in bytes (1, 2, 4, or 8)
/// * `little_endian` - Byte order of the samples in `data`
pub fn apply_predictor(
    data: &mut [u8],
    predictor: u16,
    row_width: usize,
    samples_per_pixel: usize,
    bytes_per_sample: usize,
    little_endian: bool,
) -> DecodeResult<()> {
    let row_samples = row_width * samples_per_pixel;
    let row_bytes = row_samples * bytes_per_sample;
    if row_bytes == 0 {
        return Ok(());
    }

    match predictor {
        1 => Ok(()),
        2 => {
            for row in data.chunks_exact_mut(row_bytes) {
                match bytes_per_sample {
                    1 => {
                        for i in samples_per_pixel..row.len() {
                            row[i] = row[i].wrapping_add(row[i - samples_per_pixel]);
                        }
                    }
                    2 => accumulate_row::<2>(row, samples_per_pixel, little_endian),
                    4 => accumulate_row::<4>(row, samples_per_pixel, little_endian),
                    8 => accumulate_row::<8>(row, samples_per_pixel, little_endian),
                    _ => return Err(DecodeError::UnsupportedPredictor(predictor)),
                }
            }
            Ok(())
        }
        3 => {
            let mut planes = vec![0u8; row_bytes];
            for row in data.chunks_exact_mut(row_bytes) {
                // Byte-wise accumulation with a stride of one pixel
                for i in samples_per_pixel..row.len() {
                    row[i] = row[i].wrapping_add(row[i - samples_per_pixel]);
                }

                // Plane b holds byte b (most significant first) of every sample
                planes.copy_from_slice(row);
                for sample in 0..row_samples {
                    for b in 0..bytes_per_sample {
                        let dst = if little_endian {
                            sample * bytes_per_sample + (bytes_per_sample - 1 - b)
                        } else {
                            sample * bytes_per_sample + b
                        };
                        row[dst] = planes[b * row_samples + sample];
                    }
                }
            }
            Ok(())
        }
        _ => Err(DecodeError::UnsupportedPredictor(predictor)),
    }
}

/// Predictor 2 accumulation over `N`-byte samples using u64 arithmetic
/// truncated to the sample width.
fn accumulate_row<const N: usize>(row: &mut [u8], stride: usize, little_endian: bool) {
    let mask = if N == 8 { u64::MAX } else { (1u64 << (N * 8)) - 1 };
    let samples = row.len() / N;

    for i in stride..samples {
        let prev = load_sample::<N>(&row[(i - stride) * N..], little_endian);
        let curr = load_sample::<N>(&row[i * N..], little_endian);
        let sum = curr.wrapping_add(prev) & mask;
        store_sample::<N>(&mut row[i * N..], sum, little_endian);
    }
}

#[inline]
fn load_sample<const N: usize>(bytes: &[u8], little_endian: bool) -> u64 {
    let mut value = 0u64;
    for k in 0..N {
        let byte = if little_endian { bytes[N - 1 - k] } else { bytes[k] };
        value = (value << 8) | u64::from(byte);
    }
    value
}

#[inline]
fn store_sample<const N: usize>(bytes: &mut [u8], value: u64, little_endian: bool) {
    for k in 0..N {
        let shift = 8 * k;
        let byte = ((value >> shift) & 0xFF) as u8;
        if little_endian {
            bytes[k] = byte;
        } else {
            bytes[N - 1 - k] = byte;
        }
    }
}

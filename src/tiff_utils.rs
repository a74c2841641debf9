//! Low-level TIFF structure parsing over an in-memory buffer.
//!
//! Handles both classic TIFF (version 42, 12-byte IFD entries, 32-bit offsets)
//! and BigTIFF (version 43, 20-byte IFD entries, 64-bit offsets). Values that
//! fit inside an entry's value field are read in place; larger values are read
//! from the offset the field points to.

use std::collections::HashMap;

use crate::error::{DecodeError, DecodeResult};

pub const TAG_IMAGE_WIDTH: u16 = 256;
pub const TAG_IMAGE_LENGTH: u16 = 257;
pub const TAG_BITS_PER_SAMPLE: u16 = 258;
pub const TAG_COMPRESSION: u16 = 259;
pub const TAG_PHOTOMETRIC_INTERPRETATION: u16 = 262;
pub const TAG_STRIP_OFFSETS: u16 = 273;
pub const TAG_SAMPLES_PER_PIXEL: u16 = 277;
pub const TAG_ROWS_PER_STRIP: u16 = 278;
pub const TAG_STRIP_BYTE_COUNTS: u16 = 279;
pub const TAG_PLANAR_CONFIGURATION: u16 = 284;
pub const TAG_PREDICTOR: u16 = 317;
pub const TAG_TILE_WIDTH: u16 = 322;
pub const TAG_TILE_LENGTH: u16 = 323;
pub const TAG_TILE_OFFSETS: u16 = 324;
pub const TAG_TILE_BYTE_COUNTS: u16 = 325;
pub const TAG_SAMPLE_FORMAT: u16 = 339;
pub const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
pub const TAG_MODEL_TIEPOINT: u16 = 33922;
pub const TAG_MODEL_TRANSFORMATION: u16 = 34264;
pub const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
pub const TAG_GEO_DOUBLE_PARAMS: u16 = 34736;
pub const TAG_GEO_ASCII_PARAMS: u16 = 34737;
pub const TAG_GDAL_NODATA: u16 = 42113;

// Field types
const TYPE_BYTE: u16 = 1;
const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;
const TYPE_RATIONAL: u16 = 5;
const TYPE_SBYTE: u16 = 6;
const TYPE_UNDEFINED: u16 = 7;
const TYPE_SSHORT: u16 = 8;
const TYPE_SLONG: u16 = 9;
const TYPE_SRATIONAL: u16 = 10;
const TYPE_FLOAT: u16 = 11;
const TYPE_DOUBLE: u16 = 12;
const TYPE_IFD: u16 = 13;
const TYPE_LONG8: u16 = 16;
const TYPE_SLONG8: u16 = 17;
const TYPE_IFD8: u16 = 18;

/// Parsed 8- or 16-byte file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub little_endian: bool,
    pub big_tiff: bool,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    pub fn parse(data: &[u8]) -> DecodeResult<Self> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }
        let prefix = slice_at(data, 0, 8)?;

        let little_endian = match &prefix[0..2] {
            b"II" => true,
            b"MM" => false,
            _ => return Err(DecodeError::InvalidSignature),
        };

        match read_u16(&prefix[2..4], little_endian) {
            42 => Ok(Self {
                little_endian,
                big_tiff: false,
                first_ifd_offset: u64::from(read_u32(&prefix[4..8], little_endian)),
            }),
            43 => {
                // BigTIFF: bytesize of offsets (always 8), reserved zero, then a u64 offset
                let offset_size = read_u16(&prefix[4..6], little_endian);
                if offset_size != 8 {
                    return Err(DecodeError::UnsupportedVersion(43));
                }
                let offset = slice_at(data, 8, 8)?;
                Ok(Self {
                    little_endian,
                    big_tiff: true,
                    first_ifd_offset: read_u64(offset, little_endian),
                })
            }
            version => Err(DecodeError::UnsupportedVersion(version)),
        }
    }

    fn entry_len(&self) -> usize {
        if self.big_tiff { 20 } else { 12 }
    }

    fn inline_capacity(&self) -> u64 {
        if self.big_tiff { 8 } else { 4 }
    }
}

/// One IFD entry. `value_pos` is the absolute position of the value bytes,
/// either inside the entry itself or wherever its offset field points.
#[derive(Debug, Clone, Copy)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type: u16,
    pub count: u64,
    pub value_pos: u64,
}

impl IfdEntry {
    fn byte_len(&self) -> DecodeResult<u64> {
        let size = type_size(self.field_type).ok_or(DecodeError::UnsupportedFieldType {
            tag: self.tag,
            field_type: self.field_type,
        })?;
        self.count
            .checked_mul(size)
            .ok_or(DecodeError::OutOfRange {
                offset: self.value_pos,
                len: u64::MAX,
                size: 0,
            })
    }
}

/// An image file directory: every entry keyed by tag, plus the link to the next IFD.
#[derive(Debug, Clone)]
pub struct Ifd {
    entries: HashMap<u16, IfdEntry>,
    pub next_offset: u64,
    little_endian: bool,
}

impl Ifd {
    pub fn parse(data: &[u8], header: &TiffHeader, offset: u64) -> DecodeResult<Self> {
        let little_endian = header.little_endian;

        let (entry_count, first_entry) = if header.big_tiff {
            (read_u64(slice_at(data, offset, 8)?, little_endian), offset + 8)
        } else {
            (
                u64::from(read_u16(slice_at(data, offset, 2)?, little_endian)),
                offset + 2,
            )
        };

        let entry_len = header.entry_len() as u64;
        let table_len = entry_count.checked_mul(entry_len).ok_or(DecodeError::OutOfRange {
            offset: first_entry,
            len: u64::MAX,
            size: data.len() as u64,
        })?;
        let table = slice_at(data, first_entry, table_len)?;

        let mut entries = HashMap::with_capacity(entry_count as usize);
        for (index, raw) in table.chunks_exact(header.entry_len()).enumerate() {
            let tag = read_u16(&raw[0..2], little_endian);
            let field_type = read_u16(&raw[2..4], little_endian);
            let (count, field_pos, field) = if header.big_tiff {
                (read_u64(&raw[4..12], little_endian), 12, &raw[12..20])
            } else {
                (u64::from(read_u32(&raw[4..8], little_endian)), 8, &raw[8..12])
            };

            let entry_start = first_entry + (index as u64) * entry_len;
            let mut entry = IfdEntry {
                tag,
                field_type,
                count,
                value_pos: entry_start + field_pos,
            };

            // Unknown field types are kept; they only fail if a caller reads them
            if let Ok(len) = entry.byte_len()
                && len > header.inline_capacity()
            {
                entry.value_pos = if header.big_tiff {
                    read_u64(field, little_endian)
                } else {
                    u64::from(read_u32(field, little_endian))
                };
            }

            entries.insert(tag, entry);
        }

        let next_pos = first_entry + table_len;
        let next_offset = if header.big_tiff {
            slice_at(data, next_pos, 8).map(|b| read_u64(b, little_endian)).unwrap_or(0)
        } else {
            slice_at(data, next_pos, 4)
                .map(|b| u64::from(read_u32(b, little_endian)))
                .unwrap_or(0)
        };

        Ok(Self {
            entries,
            next_offset,
            little_endian,
        })
    }

    #[must_use]
    pub fn contains(&self, tag: u16) -> bool {
        self.entries.contains_key(&tag)
    }

    #[must_use]
    pub fn entry(&self, tag: u16) -> Option<&IfdEntry> {
        self.entries.get(&tag)
    }

    fn raw<'a>(&self, data: &'a [u8], entry: &IfdEntry) -> DecodeResult<&'a [u8]> {
        slice_at(data, entry.value_pos, entry.byte_len()?)
    }

    /// Read an unsigned integer array (BYTE, SHORT, LONG, LONG8 and their IFD variants).
    pub fn u64_values(&self, data: &[u8], tag: u16) -> DecodeResult<Option<Vec<u64>>> {
        let Some(entry) = self.entry(tag) else {
            return Ok(None);
        };
        let raw = self.raw(data, entry)?;
        let le = self.little_endian;

        let values = match entry.field_type {
            TYPE_BYTE | TYPE_UNDEFINED => raw.iter().map(|&b| u64::from(b)).collect(),
            TYPE_SHORT => raw.chunks_exact(2).map(|c| u64::from(read_u16(c, le))).collect(),
            TYPE_LONG | TYPE_IFD => raw.chunks_exact(4).map(|c| u64::from(read_u32(c, le))).collect(),
            TYPE_LONG8 | TYPE_IFD8 => raw.chunks_exact(8).map(|c| read_u64(c, le)).collect(),
            field_type => return Err(DecodeError::UnsupportedFieldType { tag, field_type }),
        };
        Ok(Some(values))
    }

    /// First value of an unsigned integer tag.
    pub fn u64_value(&self, data: &[u8], tag: u16) -> DecodeResult<Option<u64>> {
        Ok(self.u64_values(data, tag)?.and_then(|v| v.first().copied()))
    }

    pub fn u16_values(&self, data: &[u8], tag: u16) -> DecodeResult<Option<Vec<u16>>> {
        let Some(entry) = self.entry(tag) else {
            return Ok(None);
        };
        if entry.field_type != TYPE_SHORT {
            return Err(DecodeError::UnsupportedFieldType {
                tag,
                field_type: entry.field_type,
            });
        }
        let raw = self.raw(data, entry)?;
        Ok(Some(
            raw.chunks_exact(2).map(|c| read_u16(c, self.little_endian)).collect(),
        ))
    }

    pub fn f64_values(&self, data: &[u8], tag: u16) -> DecodeResult<Option<Vec<f64>>> {
        let Some(entry) = self.entry(tag) else {
            return Ok(None);
        };
        let raw = self.raw(data, entry)?;
        let le = self.little_endian;

        let values = match entry.field_type {
            TYPE_DOUBLE => raw.chunks_exact(8).map(|c| read_f64(c, le)).collect(),
            TYPE_FLOAT => raw
                .chunks_exact(4)
                .map(|c| f64::from(f32::from_bits(read_u32(c, le))))
                .collect(),
            field_type => return Err(DecodeError::UnsupportedFieldType { tag, field_type }),
        };
        Ok(Some(values))
    }

    /// Read an ASCII tag, cut at the first NUL.
    pub fn ascii(&self, data: &[u8], tag: u16) -> DecodeResult<Option<String>> {
        let Some(entry) = self.entry(tag) else {
            return Ok(None);
        };
        if !matches!(entry.field_type, TYPE_ASCII | TYPE_BYTE | TYPE_UNDEFINED) {
            return Err(DecodeError::UnsupportedFieldType {
                tag,
                field_type: entry.field_type,
            });
        }
        let mut raw = self.raw(data, entry)?;
        if let Some(pos) = raw.iter().position(|&b| b == 0) {
            raw = &raw[..pos];
        }
        Ok(Some(String::from_utf8_lossy(raw).into_owned()))
    }
}

fn type_size(field_type: u16) -> Option<u64> {
    match field_type {
        TYPE_BYTE | TYPE_ASCII | TYPE_SBYTE | TYPE_UNDEFINED => Some(1),
        TYPE_SHORT | TYPE_SSHORT => Some(2),
        TYPE_LONG | TYPE_SLONG | TYPE_FLOAT | TYPE_IFD => Some(4),
        TYPE_RATIONAL | TYPE_SRATIONAL | TYPE_DOUBLE | TYPE_LONG8 | TYPE_SLONG8 | TYPE_IFD8 => {
            Some(8)
        }
        _ => None,
    }
}

/// Borrow `len` bytes at `offset`, failing instead of panicking when the
/// range runs past the end of the buffer.
pub fn slice_at(data: &[u8], offset: u64, len: u64) -> DecodeResult<&[u8]> {
    let size = data.len() as u64;
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(&data[offset as usize..end as usize]),
        _ => Err(DecodeError::OutOfRange { offset, len, size }),
    }
}

// ============================================================================
// Byte-order helpers
// ============================================================================

#[inline]
pub fn read_u16(bytes: &[u8], little_endian: bool) -> u16 {
    if little_endian {
        u16::from_le_bytes([bytes[0], bytes[1]])
    } else {
        u16::from_be_bytes([bytes[0], bytes[1]])
    }
}

#[inline]
pub fn read_u32(bytes: &[u8], little_endian: bool) -> u32 {
    if little_endian {
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    } else {
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

#[inline]
pub fn read_u64(bytes: &[u8], little_endian: bool) -> u64 {
    let raw = [
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5], bytes[6], bytes[7],
    ];
    if little_endian {
        u64::from_le_bytes(raw)
    } else {
        u64::from_be_bytes(raw)
    }
}

#[inline]
pub fn read_f64(bytes: &[u8], little_endian: bool) -> f64 {
    f64::from_bits(read_u64(bytes, little_endian))
}

//! Builds small TIFF and BigTIFF files in memory for the decoder and pipeline tests.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use ndarray::Array2;

use crate::raster::GeoKeys;
use crate::tiff_utils::{
    TAG_BITS_PER_SAMPLE, TAG_COMPRESSION, TAG_GDAL_NODATA, TAG_GEO_KEY_DIRECTORY,
    TAG_IMAGE_LENGTH, TAG_IMAGE_WIDTH, TAG_MODEL_PIXEL_SCALE, TAG_MODEL_TIEPOINT,
    TAG_MODEL_TRANSFORMATION, TAG_PHOTOMETRIC_INTERPRETATION, TAG_PLANAR_CONFIGURATION,
    TAG_PREDICTOR, TAG_ROWS_PER_STRIP, TAG_SAMPLE_FORMAT, TAG_SAMPLES_PER_PIXEL,
    TAG_STRIP_BYTE_COUNTS, TAG_STRIP_OFFSETS, TAG_TILE_BYTE_COUNTS, TAG_TILE_LENGTH,
    TAG_TILE_OFFSETS, TAG_TILE_WIDTH,
};

/// A sample type the builder can store.
pub trait Sample: Copy {
    const BITS: u16;
    const FORMAT: u16;
    fn append(self, out: &mut Vec<u8>, little_endian: bool);
}

macro_rules! impl_sample {
    ($ty:ty, $format:expr) => {
        impl Sample for $ty {
            const BITS: u16 = (std::mem::size_of::<$ty>() * 8) as u16;
            const FORMAT: u16 = $format;
            fn append(self, out: &mut Vec<u8>, little_endian: bool) {
                if little_endian {
                    out.extend_from_slice(&self.to_le_bytes());
                } else {
                    out.extend_from_slice(&self.to_be_bytes());
                }
            }
        }
    };
}

impl_sample!(u8, 1);
impl_sample!(u16, 1);
impl_sample!(u32, 1);
impl_sample!(u64, 1);
impl_sample!(i16, 2);
impl_sample!(i32, 2);
impl_sample!(f32, 3);
impl_sample!(f64, 3);

#[derive(Debug, Clone, Copy)]
pub enum Layout {
    Strips { rows_per_strip: usize },
    Tiles { width: usize, height: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Codec {
    None,
    Deflate,
    Lzw,
    PackBits,
    Zstd,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Predictor {
    None,
    Horizontal,
    FloatingPoint,
}

/// A raw tag value, written with the matching TIFF field type.
#[derive(Debug, Clone)]
pub enum TagValue {
    Short(Vec<u16>),
    Long(Vec<u32>),
    Long8(Vec<u64>),
    Double(Vec<f64>),
    Ascii(String),
}

impl TagValue {
    fn field_type(&self) -> u16 {
        match self {
            TagValue::Short(_) => 3,
            TagValue::Long(_) => 4,
            TagValue::Long8(_) => 16,
            TagValue::Double(_) => 12,
            TagValue::Ascii(_) => 2,
        }
    }

    fn count(&self) -> u64 {
        match self {
            TagValue::Short(v) => v.len() as u64,
            TagValue::Long(v) => v.len() as u64,
            TagValue::Long8(v) => v.len() as u64,
            TagValue::Double(v) => v.len() as u64,
            TagValue::Ascii(s) => s.len() as u64 + 1,
        }
    }

    fn bytes(&self, le: bool) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            TagValue::Short(v) => v.iter().for_each(|x| x.append(&mut out, le)),
            TagValue::Long(v) => v.iter().for_each(|x| x.append(&mut out, le)),
            TagValue::Long8(v) => v.iter().for_each(|x| x.append(&mut out, le)),
            TagValue::Double(v) => v.iter().for_each(|x| x.append(&mut out, le)),
            TagValue::Ascii(s) => {
                out.extend_from_slice(s.as_bytes());
                out.push(0);
            }
        }
        out
    }
}

pub struct TiffBuilder<T: Sample> {
    bands: Vec<Array2<T>>,
    layout: Option<Layout>,
    planar_separate: bool,
    codec: Codec,
    predictor: Predictor,
    little_endian: bool,
    big_tiff: bool,
    sparse: BTreeSet<usize>,
    /// Written last, replacing any tag the builder derives itself
    overrides: BTreeMap<u16, TagValue>,
}

impl<T: Sample> TiffBuilder<T> {
    pub fn new(bands: &[Array2<T>]) -> Self {
        Self {
            bands: bands.to_vec(),
            layout: None,
            planar_separate: false,
            codec: Codec::None,
            predictor: Predictor::None,
            little_endian: true,
            big_tiff: false,
            sparse: BTreeSet::new(),
            overrides: BTreeMap::new(),
        }
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn planar_separate(mut self) -> Self {
        self.planar_separate = true;
        self
    }

    pub fn deflate(mut self) -> Self {
        self.codec = Codec::Deflate;
        self
    }

    pub fn lzw(mut self) -> Self {
        self.codec = Codec::Lzw;
        self
    }

    pub fn packbits(mut self) -> Self {
        self.codec = Codec::PackBits;
        self
    }

    pub fn zstd(mut self) -> Self {
        self.codec = Codec::Zstd;
        self
    }

    /// Horizontal differencing (predictor 2)
    pub fn predictor(mut self) -> Self {
        self.predictor = Predictor::Horizontal;
        self
    }

    /// Floating-point byte-plane differencing (predictor 3)
    pub fn float_predictor(mut self) -> Self {
        self.predictor = Predictor::FloatingPoint;
        self
    }

    pub fn big_endian(mut self) -> Self {
        self.little_endian = false;
        self
    }

    pub fn big_tiff(mut self) -> Self {
        self.big_tiff = true;
        self
    }

    /// Leave chunk `index` out of the file (offset and byte count 0)
    pub fn sparse_chunk(mut self, index: usize) -> Self {
        self.sparse.insert(index);
        self
    }

    pub fn tag(mut self, tag: u16, value: TagValue) -> Self {
        self.overrides.insert(tag, value);
        self
    }

    pub fn samples_per_pixel_override(self, spp: u16) -> Self {
        self.tag(TAG_SAMPLES_PER_PIXEL, TagValue::Short(vec![spp]))
    }

    pub fn pixel_scale(self, scale: [f64; 3]) -> Self {
        self.tag(TAG_MODEL_PIXEL_SCALE, TagValue::Double(scale.to_vec()))
    }

    pub fn tiepoint(self, tiepoint: [f64; 6]) -> Self {
        self.tag(TAG_MODEL_TIEPOINT, TagValue::Double(tiepoint.to_vec()))
    }

    pub fn model_transformation(self, matrix: [f64; 16]) -> Self {
        self.tag(TAG_MODEL_TRANSFORMATION, TagValue::Double(matrix.to_vec()))
    }

    pub fn epsg(self, code: u16) -> Self {
        self.tag(TAG_GEO_KEY_DIRECTORY, TagValue::Short(GeoKeys::from_epsg(code).directory))
    }

    pub fn nodata(self, nodata: &str) -> Self {
        self.tag(TAG_GDAL_NODATA, TagValue::Ascii(nodata.to_string()))
    }

    pub fn build(self) -> Vec<u8> {
        let le = self.little_endian;
        let big = self.big_tiff;
        let (height, width) = self.bands[0].dim();
        let band_count = self.bands.len();
        let bps = usize::from(T::BITS / 8);
        let layout = self.layout.unwrap_or(Layout::Strips { rows_per_strip: height });
        let (chunk_w, chunk_h, tiled) = match layout {
            Layout::Strips { rows_per_strip } => (width, rows_per_strip.min(height), false),
            Layout::Tiles { width, height } => (width, height, true),
        };
        let across = width.div_ceil(chunk_w);
        let down = height.div_ceil(chunk_h);
        let (planes, spp) = if self.planar_separate { (band_count, 1) } else { (1, band_count) };

        let mut out = Vec::new();
        out.extend_from_slice(if le { b"II" } else { b"MM" });
        if big {
            43u16.append(&mut out, le);
            8u16.append(&mut out, le);
            0u16.append(&mut out, le);
            out.extend_from_slice(&[0; 8]);
        } else {
            42u16.append(&mut out, le);
            out.extend_from_slice(&[0; 4]);
        }

        let mut offsets = Vec::new();
        let mut counts = Vec::new();
        for plane in 0..planes {
            for chunk in 0..across * down {
                if self.sparse.contains(&(plane * across * down + chunk)) {
                    offsets.push(0u64);
                    counts.push(0u64);
                    continue;
                }
                let (cr, cc) = (chunk / across, chunk % across);
                let rows = if tiled { chunk_h } else { (height - cr * chunk_h).min(chunk_h) };
                let mut raw = Vec::with_capacity(rows * chunk_w * spp * bps);
                for r in 0..rows {
                    for c in 0..chunk_w {
                        let (y, x) = (cr * chunk_h + r, cc * chunk_w + c);
                        for s in 0..spp {
                            let band = if self.planar_separate { plane } else { s };
                            if y < height && x < width {
                                self.bands[band][[y, x]].append(&mut raw, le);
                            } else {
                                raw.extend(std::iter::repeat_n(0, bps));
                            }
                        }
                    }
                }
                let row_bytes = chunk_w * spp * bps;
                match self.predictor {
                    Predictor::None => {}
                    Predictor::Horizontal => difference_rows(&mut raw, row_bytes, spp, bps, le),
                    Predictor::FloatingPoint => shuffle_rows(&mut raw, row_bytes, spp, bps, le),
                }
                let encoded = match self.codec {
                    Codec::None => raw,
                    Codec::Deflate => {
                        let mut encoder = flate2::write::ZlibEncoder::new(
                            Vec::new(),
                            flate2::Compression::default(),
                        );
                        encoder.write_all(&raw).unwrap();
                        encoder.finish().unwrap()
                    }
                    Codec::Lzw => {
                        weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
                            .encode(&raw)
                            .unwrap()
                    }
                    Codec::PackBits => pack_bits(&raw),
                    Codec::Zstd => zstd::stream::encode_all(raw.as_slice(), 3).unwrap(),
                };
                offsets.push(out.len() as u64);
                counts.push(encoded.len() as u64);
                out.extend_from_slice(&encoded);
            }
        }

        let chunk_array = |values: Vec<u64>| {
            if big {
                TagValue::Long8(values)
            } else {
                TagValue::Long(values.into_iter().map(|v| v as u32).collect())
            }
        };

        let mut tags = BTreeMap::new();
        tags.insert(TAG_IMAGE_WIDTH, TagValue::Long(vec![width as u32]));
        tags.insert(TAG_IMAGE_LENGTH, TagValue::Long(vec![height as u32]));
        tags.insert(TAG_BITS_PER_SAMPLE, TagValue::Short(vec![T::BITS; band_count]));
        let compression = match self.codec {
            Codec::None => 1,
            Codec::Lzw => 5,
            Codec::Deflate => 8,
            Codec::PackBits => 32773,
            Codec::Zstd => 50000,
        };
        tags.insert(TAG_COMPRESSION, TagValue::Short(vec![compression]));
        tags.insert(TAG_PHOTOMETRIC_INTERPRETATION, TagValue::Short(vec![1]));
        tags.insert(TAG_SAMPLES_PER_PIXEL, TagValue::Short(vec![band_count as u16]));
        tags.insert(
            TAG_PLANAR_CONFIGURATION,
            TagValue::Short(vec![if self.planar_separate { 2 } else { 1 }]),
        );
        match self.predictor {
            Predictor::None => {}
            Predictor::Horizontal => {
                tags.insert(TAG_PREDICTOR, TagValue::Short(vec![2]));
            }
            Predictor::FloatingPoint => {
                tags.insert(TAG_PREDICTOR, TagValue::Short(vec![3]));
            }
        }
        tags.insert(TAG_SAMPLE_FORMAT, TagValue::Short(vec![T::FORMAT; band_count]));
        if tiled {
            tags.insert(TAG_TILE_WIDTH, TagValue::Long(vec![chunk_w as u32]));
            tags.insert(TAG_TILE_LENGTH, TagValue::Long(vec![chunk_h as u32]));
            tags.insert(TAG_TILE_OFFSETS, chunk_array(offsets));
            tags.insert(TAG_TILE_BYTE_COUNTS, chunk_array(counts));
        } else {
            tags.insert(TAG_STRIP_OFFSETS, chunk_array(offsets));
            tags.insert(TAG_ROWS_PER_STRIP, TagValue::Long(vec![chunk_h as u32]));
            tags.insert(TAG_STRIP_BYTE_COUNTS, chunk_array(counts));
        }
        tags.extend(self.overrides);

        let inline_capacity = if big { 8 } else { 4 };

        // Out-of-line values first, then the IFD
        let mut positions = BTreeMap::new();
        for (&tag, value) in &tags {
            let bytes = value.bytes(le);
            if bytes.len() > inline_capacity {
                if out.len() % 2 == 1 {
                    out.push(0);
                }
                positions.insert(tag, out.len() as u64);
                out.extend_from_slice(&bytes);
            }
        }
        if out.len() % 2 == 1 {
            out.push(0);
        }

        let ifd_offset = out.len() as u64;
        if big {
            let bytes = if le { ifd_offset.to_le_bytes() } else { ifd_offset.to_be_bytes() };
            out[8..16].copy_from_slice(&bytes);
            (tags.len() as u64).append(&mut out, le);
        } else {
            let offset = ifd_offset as u32;
            let bytes = if le { offset.to_le_bytes() } else { offset.to_be_bytes() };
            out[4..8].copy_from_slice(&bytes);
            (tags.len() as u16).append(&mut out, le);
        }

        for (&tag, value) in &tags {
            tag.append(&mut out, le);
            value.field_type().append(&mut out, le);
            if big {
                value.count().append(&mut out, le);
            } else {
                (value.count() as u32).append(&mut out, le);
            }
            match positions.get(&tag) {
                Some(&pos) if big => pos.append(&mut out, le),
                Some(&pos) => (pos as u32).append(&mut out, le),
                None => {
                    let mut inline = value.bytes(le);
                    inline.resize(inline_capacity, 0);
                    out.extend_from_slice(&inline);
                }
            }
        }
        if big {
            0u64.append(&mut out, le);
        } else {
            0u32.append(&mut out, le);
        }
        out
    }
}

fn load(bytes: &[u8], bps: usize, le: bool) -> u64 {
    let mut v = 0u64;
    for k in 0..bps {
        let byte = if le { bytes[bps - 1 - k] } else { bytes[k] };
        v = (v << 8) | u64::from(byte);
    }
    v
}

/// Inverse of predictor 2 decoding: each sample becomes its difference from
/// the same sample one pixel to the left.
fn difference_rows(data: &mut [u8], row_bytes: usize, spp: usize, bps: usize, le: bool) {
    let mask = if bps == 8 { u64::MAX } else { (1u64 << (bps * 8)) - 1 };
    for row in data.chunks_exact_mut(row_bytes) {
        let samples = row.len() / bps;
        for i in (spp..samples).rev() {
            let diff = load(&row[i * bps..], bps, le).wrapping_sub(load(&row[(i - spp) * bps..], bps, le))
                & mask;
            for k in 0..bps {
                let byte = ((diff >> (8 * k)) & 0xFF) as u8;
                let idx = if le { i * bps + k } else { i * bps + bps - 1 - k };
                row[idx] = byte;
            }
        }
    }
}

/// Inverse of predictor 3 decoding: split each row into byte planes, most
/// significant byte first, then byte-difference with a stride of one pixel.
fn shuffle_rows(data: &mut [u8], row_bytes: usize, spp: usize, bps: usize, le: bool) {
    let row_samples = row_bytes / bps;
    let mut planes = vec![0u8; row_bytes];
    for row in data.chunks_exact_mut(row_bytes) {
        for sample in 0..row_samples {
            for b in 0..bps {
                let src = if le {
                    sample * bps + (bps - 1 - b)
                } else {
                    sample * bps + b
                };
                planes[b * row_samples + sample] = row[src];
            }
        }
        for i in (spp..row_bytes).rev() {
            planes[i] = planes[i].wrapping_sub(planes[i - spp]);
        }
        row.copy_from_slice(&planes);
    }
}

/// PackBits encoding with repeat runs for two or more equal bytes
fn pack_bits(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let mut run = 1;
        while i + run < data.len() && run < 128 && data[i + run] == data[i] {
            run += 1;
        }
        if run >= 2 {
            out.push((1 - run as i16) as i8 as u8);
            out.push(data[i]);
            i += run;
            continue;
        }

        let start = i;
        let mut len = 0;
        while i < data.len() && len < 128 && !(i + 1 < data.len() && data[i + 1] == data[i]) {
            i += 1;
            len += 1;
        }
        out.push((len - 1) as u8);
        out.extend_from_slice(&data[start..start + len]);
    }
    out
}

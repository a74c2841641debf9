//! Per-request options. Every field has a default, so an empty JSON object is
//! a complete configuration.

use serde::{Deserialize, Serialize};

use crate::compression::Compression;

/// Floating-point type of the exported raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputPixelType {
    Float32,
    #[default]
    Float64,
}

impl OutputPixelType {
    #[must_use]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            OutputPixelType::Float32 => 4,
            OutputPixelType::Float64 => 8,
        }
    }
}

/// Compression of the exported raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputCompression {
    /// Reuse the input's compression, falling back to Deflate when the
    /// encoder cannot write it
    #[default]
    MatchSource,
    None,
    Deflate,
    Lzw,
}

impl OutputCompression {
    /// Concrete method for a source compressed with `source`
    #[must_use]
    pub fn resolve(self, source: Compression) -> OutputCompression {
        match self {
            OutputCompression::MatchSource => match source {
                Compression::None => OutputCompression::None,
                Compression::Lzw => OutputCompression::Lzw,
                Compression::Deflate | Compression::PackBits | Compression::Zstd => {
                    OutputCompression::Deflate
                }
            },
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub pixel_type: OutputPixelType,
    pub compression: OutputCompression,
}

impl ExportOptions {
    #[must_use]
    pub fn with_pixel_type(mut self, pixel_type: OutputPixelType) -> Self {
        self.pixel_type = pixel_type;
        self
    }

    #[must_use]
    pub fn with_compression(mut self, compression: OutputCompression) -> Self {
        self.compression = compression;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewOptions {
    /// Number of sampled values
    pub rows: usize,
    /// Fixed seed for a reproducible sample; random when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self { rows: 10, seed: None }
    }
}

impl PreviewOptions {
    #[must_use]
    pub fn with_rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BandMathOptions {
    pub export: ExportOptions,
    pub preview: PreviewOptions,
}

impl BandMathOptions {
    #[must_use]
    pub fn with_export(mut self, export: ExportOptions) -> Self {
        self.export = export;
        self
    }

    #[must_use]
    pub fn with_preview(mut self, preview: PreviewOptions) -> Self {
        self.preview = preview;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = BandMathOptions::default();
        assert_eq!(options.export.pixel_type, OutputPixelType::Float64);
        assert_eq!(options.export.compression, OutputCompression::MatchSource);
        assert_eq!(options.preview.rows, 10);
        assert_eq!(options.preview.seed, None);
    }

    #[test]
    fn test_empty_json_is_default() {
        let options: BandMathOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, BandMathOptions::default());
    }

    #[test]
    fn test_partial_json() {
        let options: BandMathOptions = serde_json::from_str(
            r#"{"export": {"pixel_type": "float32"}, "preview": {"seed": 42}}"#,
        )
        .unwrap();
        assert_eq!(options.export.pixel_type, OutputPixelType::Float32);
        assert_eq!(options.export.compression, OutputCompression::MatchSource);
        assert_eq!(options.preview, PreviewOptions::default().with_seed(42));
    }

    #[test]
    fn test_json_round_trip() {
        let options = BandMathOptions::default()
            .with_export(ExportOptions::default().with_compression(OutputCompression::Lzw))
            .with_preview(PreviewOptions::default().with_rows(3));
        let json = serde_json::to_string(&options).unwrap();
        assert!(json.contains(r#""compression":"lzw""#));
        assert!(!json.contains("seed"));
        assert_eq!(serde_json::from_str::<BandMathOptions>(&json).unwrap(), options);
    }

    #[test]
    fn test_match_source_resolution() {
        let m = OutputCompression::MatchSource;
        assert_eq!(m.resolve(Compression::None), OutputCompression::None);
        assert_eq!(m.resolve(Compression::Lzw), OutputCompression::Lzw);
        assert_eq!(m.resolve(Compression::Zstd), OutputCompression::Deflate);
        assert_eq!(OutputCompression::None.resolve(Compression::Lzw), OutputCompression::None);
    }
}

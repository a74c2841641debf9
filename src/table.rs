//! Flattened value table: the finite output values in row-major order, with
//! CSV encoding, summary statistics and a random preview.

use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::error::EncodeError;

#[derive(Debug, Serialize)]
struct ValueRow {
    value: f64,
}

/// Descriptive statistics of the finite values
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ValueSummary {
    pub count: usize,
    pub mean: Option<f64>,
    /// Sample standard deviation (n - 1 denominator)
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub q25: Option<f64>,
    pub median: Option<f64>,
    pub q75: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueTable {
    values: Vec<f64>,
    total_pixels: usize,
}

impl ValueTable {
    /// Flatten `array` row by row, keeping finite values only.
    #[must_use]
    pub fn from_array(array: &Array2<f64>) -> Self {
        let values = array.iter().copied().filter(|v| v.is_finite()).collect();
        Self {
            values,
            total_pixels: array.len(),
        }
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Pixels in the source array, finite or not
    #[must_use]
    pub fn total_pixels(&self) -> usize {
        self.total_pixels
    }

    #[must_use]
    pub fn dropped(&self) -> usize {
        self.total_pixels - self.values.len()
    }

    /// UTF-8 CSV with a single `value` column.
    pub fn to_csv(&self) -> Result<Vec<u8>, EncodeError> {
        let mut writer = csv::Writer::from_writer(Vec::with_capacity(self.values.len() * 8 + 6));
        if self.values.is_empty() {
            writer.write_record(["value"])?;
        }
        for &value in &self.values {
            writer.serialize(ValueRow { value })?;
        }
        writer
            .into_inner()
            .map_err(|e| EncodeError::Io(e.into_error()))
    }

    #[must_use]
    pub fn summary(&self) -> ValueSummary {
        let count = self.values.len();
        if count == 0 {
            return ValueSummary::default();
        }

        let mut sorted = self.values.clone();
        sorted.sort_by(f64::total_cmp);

        let n = count as f64;
        let mean = self.values.iter().sum::<f64>() / n;
        let std = (count > 1).then(|| {
            let ss: f64 = self.values.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n - 1.0)).sqrt()
        });

        ValueSummary {
            count,
            mean: Some(mean),
            std,
            min: sorted.first().copied(),
            q25: Some(quantile(&sorted, 0.25)),
            median: Some(quantile(&sorted, 0.5)),
            q75: Some(quantile(&sorted, 0.75)),
            max: sorted.last().copied(),
        }
    }

    /// Up to `rows` values drawn without replacement, in row order. Seeded
    /// draws are reproducible.
    #[must_use]
    pub fn preview(&self, rows: usize, seed: Option<u64>) -> Vec<f64> {
        let amount = rows.min(self.values.len());
        if amount == self.values.len() {
            return self.values.clone();
        }

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut picked = rand::seq::index::sample(&mut rng, self.values.len(), amount).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| self.values[i]).collect()
    }
}

/// Linear interpolation between closest ranks of a sorted, non-empty slice
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

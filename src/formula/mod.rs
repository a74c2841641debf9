//! Band-algebra formulas.
//!
//! A formula is parsed into an expression tree holding only numbers, band
//! references, negation and the binary operators `+ - * / **`. Anything else a
//! user might type, such as a call, an attribute access or a subscript, is
//! rejected by the parser, so evaluation can only ever do arithmetic.
//!
//! ```
//! use bandmath::formula::Formula;
//!
//! let formula: Formula = "(B4 - B3) / (B4 + B3)".parse().unwrap();
//! assert_eq!(formula.band_names(), vec!["B4", "B3"]);
//! assert_eq!(formula.to_string(), "((B4 - B3) / (B4 + B3))");
//! ```

mod eval;
mod lexer;
mod parser;

use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use tracing::debug;

use crate::error::EvaluationError;
use crate::raster::Bands;

pub use parser::{BinaryOp, Expr};

/// Normalized difference of bands 4 and 3
pub const DEFAULT_FORMULA: &str = "(B4 - B3) / (B4 + B3)";

/// A parsed band-algebra formula.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, EvaluationError> {
        let expr = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// The text as entered
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Referenced identifiers, each once, in order of first use
    #[must_use]
    pub fn band_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        collect_bands(&self.expr, &mut names);
        names
    }

    /// Check that every referenced identifier names a band.
    pub fn validate(&self, bands: &Bands) -> Result<(), EvaluationError> {
        match self.band_names().into_iter().find(|name| bands.get(name).is_none()) {
            Some(name) => Err(EvaluationError::UnknownBand {
                name,
                available: bands.names(),
            }),
            None => Ok(()),
        }
    }

    /// Evaluate pixel-wise in f64. The output has the shape of the bands.
    pub fn evaluate(&self, bands: &Bands) -> Result<Array2<f64>, EvaluationError> {
        let names = self.band_names();
        let resolved = eval::Resolved::new(&names, bands)?;
        let output = resolved.evaluate(&self.expr)?;

        debug!(
            formula = %self,
            bands = ?names,
            rows = output.nrows(),
            cols = output.ncols(),
            "Evaluated formula"
        );
        Ok(output)
    }
}

impl FromStr for Formula {
    type Err = EvaluationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Default for Formula {
    fn default() -> Self {
        Self {
            source: DEFAULT_FORMULA.to_string(),
            expr: default_expr(),
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.expr.fmt(f)
    }
}

fn default_expr() -> Expr {
    let band = |name: &str| Box::new(Expr::Band(name.to_string()));
    Expr::Binary(
        BinaryOp::Div,
        Box::new(Expr::Binary(BinaryOp::Sub, band("B4"), band("B3"))),
        Box::new(Expr::Binary(BinaryOp::Add, band("B4"), band("B3"))),
    )
}

fn collect_bands(expr: &Expr, names: &mut Vec<String>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Band(name) => {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        Expr::Neg(inner) => collect_bands(inner, names),
        Expr::Binary(_, lhs, rhs) => {
            collect_bands(lhs, names);
            collect_bands(rhs, names);
        }
    }
}

/// Parse and evaluate in one step.
pub fn evaluate(formula: &str, bands: &Bands) -> Result<Array2<f64>, EvaluationError> {
    Formula::parse(formula)?.evaluate(bands)
}

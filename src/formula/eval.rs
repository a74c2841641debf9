use std::collections::HashMap;

use ndarray::{Array2, Zip};

use super::parser::{BinaryOp, Expr};
use crate::error::EvaluationError;
use crate::raster::Bands;

/// Intermediate result of a sub-expression.
enum Value<'a> {
    Scalar(f64),
    Borrowed(&'a Array2<f64>),
    Owned(Array2<f64>),
}

impl Value<'_> {
    fn into_owned(self, shape: (usize, usize)) -> Array2<f64> {
        match self {
            Value::Scalar(v) => Array2::from_elem(shape, v),
            Value::Borrowed(a) => a.clone(),
            Value::Owned(a) => a,
        }
    }
}

/// Band arrays widened to f64, keyed by name. Only referenced bands are converted.
pub(crate) struct Resolved {
    shape: (usize, usize),
    arrays: HashMap<String, Array2<f64>>,
}

impl Resolved {
    /// Look up every band in `names` before any arithmetic runs.
    pub fn new(names: &[String], bands: &Bands) -> Result<Self, EvaluationError> {
        let mut arrays = HashMap::with_capacity(names.len());
        for name in names {
            let band = bands.get(name).ok_or_else(|| EvaluationError::UnknownBand {
                name: name.clone(),
                available: bands.names(),
            })?;
            arrays.entry(name.clone()).or_insert_with(|| band.to_f64());
        }
        Ok(Self {
            shape: bands.shape(),
            arrays,
        })
    }

    pub fn evaluate(&self, expr: &Expr) -> Result<Array2<f64>, EvaluationError> {
        Ok(self.eval(expr)?.into_owned(self.shape))
    }

    fn eval<'a>(&'a self, expr: &Expr) -> Result<Value<'a>, EvaluationError> {
        match expr {
            Expr::Number(n) => Ok(Value::Scalar(*n)),
            Expr::Band(name) => self
                .arrays
                .get(name)
                .map(Value::Borrowed)
                .ok_or_else(|| EvaluationError::UnknownBand {
                    name: name.clone(),
                    available: self.arrays.keys().cloned().collect(),
                }),
            Expr::Neg(inner) => Ok(match self.eval(inner)? {
                Value::Scalar(v) => Value::Scalar(-v),
                Value::Borrowed(a) => Value::Owned(a.mapv(|v| -v)),
                Value::Owned(mut a) => {
                    a.mapv_inplace(|v| -v);
                    Value::Owned(a)
                }
            }),
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                Ok(apply(*op, lhs, rhs))
            }
        }
    }
}

fn apply<'a>(op: BinaryOp, lhs: Value<'a>, rhs: Value<'a>) -> Value<'a> {
    let f = |a: f64, b: f64| op.apply(a, b);
    match (lhs, rhs) {
        (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(f(a, b)),
        (Value::Owned(mut a), Value::Scalar(b)) => {
            a.mapv_inplace(|x| f(x, b));
            Value::Owned(a)
        }
        (Value::Scalar(a), Value::Owned(mut b)) => {
            b.mapv_inplace(|x| f(a, x));
            Value::Owned(b)
        }
        (Value::Borrowed(a), Value::Scalar(b)) => Value::Owned(a.mapv(|x| f(x, b))),
        (Value::Scalar(a), Value::Borrowed(b)) => Value::Owned(b.mapv(|x| f(a, x))),
        (Value::Owned(mut a), Value::Owned(b)) => {
            a.zip_mut_with(&b, |x, &y| *x = f(*x, y));
            Value::Owned(a)
        }
        (Value::Owned(mut a), Value::Borrowed(b)) => {
            a.zip_mut_with(b, |x, &y| *x = f(*x, y));
            Value::Owned(a)
        }
        (Value::Borrowed(a), Value::Owned(mut b)) => {
            Zip::from(&mut b).and(a).for_each(|y, &x| *y = f(x, *y));
            Value::Owned(b)
        }
        (Value::Borrowed(a), Value::Borrowed(b)) => {
            Value::Owned(Zip::from(a).and(b).map_collect(|&x, &y| f(x, y)))
        }
    }
}

//! Scalar and array arithmetic on JSON token values.
//!
//! Integral traits are computed on `i64` with checked operations so that large
//! integers stay exact; everything else goes through `f64`.

use crate::core::NodeValue;
use crate::core::error::ExecutionError;
use crate::core::traits::Trait;

/// A numeric token value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Numeric<T> {
    Scalar(T),
    Array(Vec<T>),
}

impl<T: Into<NodeValue>> Numeric<T> {
    pub(crate) fn into_value(self) -> NodeValue {
        match self {
            Numeric::Scalar(x) => x.into(),
            Numeric::Array(xs) => NodeValue::Array(xs.into_iter().map(Into::into).collect()),
        }
    }
}

pub(crate) fn invalid(port: &str, reason: impl Into<String>) -> ExecutionError {
    ExecutionError::InvalidValue {
        port: port.to_string(),
        reason: reason.into(),
    }
}

pub(crate) fn scalar(port: &str, value: &NodeValue) -> Result<f64, ExecutionError> {
    value
        .as_f64()
        .ok_or_else(|| invalid(port, format!("{} is not a number", value)))
}

pub(crate) fn integer(port: &str, value: &NodeValue) -> Result<i64, ExecutionError> {
    match value.as_i64() {
        Some(n) => Ok(n),
        None if value.is_u64() => Err(invalid(port, format!("{} does not fit a 64-bit integer", value))),
        None => value
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| f as i64)
            .ok_or_else(|| invalid(port, format!("{} is not an integer", value))),
    }
}

fn parse<T>(
    port: &str,
    value: &NodeValue,
    element: impl Fn(&str, &NodeValue) -> Result<T, ExecutionError>,
) -> Result<Numeric<T>, ExecutionError> {
    match value {
        NodeValue::Array(items) => items
            .iter()
            .map(|v| element(port, v))
            .collect::<Result<Vec<_>, _>>()
            .map(Numeric::Array),
        other => element(port, other).map(Numeric::Scalar),
    }
}

pub(crate) fn numeric(port: &str, value: &NodeValue) -> Result<Numeric<f64>, ExecutionError> {
    parse(port, value, scalar)
}

pub(crate) fn integers(port: &str, value: &NodeValue) -> Result<Numeric<i64>, ExecutionError> {
    parse(port, value, integer)
}

/// Element-wise `op`, broadcasting scalars over arrays.
pub(crate) fn broadcast<T: Copy>(
    a: Numeric<T>,
    b: Numeric<T>,
    op: impl Fn(T, T) -> Result<T, ExecutionError>,
) -> Result<Numeric<T>, ExecutionError> {
    Ok(match (a, b) {
        (Numeric::Scalar(x), Numeric::Scalar(y)) => Numeric::Scalar(op(x, y)?),
        (Numeric::Scalar(x), Numeric::Array(ys)) => {
            Numeric::Array(ys.into_iter().map(|y| op(x, y)).collect::<Result<_, _>>()?)
        }
        (Numeric::Array(xs), Numeric::Scalar(y)) => {
            Numeric::Array(xs.into_iter().map(|x| op(x, y)).collect::<Result<_, _>>()?)
        }
        (Numeric::Array(xs), Numeric::Array(ys)) => {
            if xs.len() != ys.len() {
                return Err(invalid(
                    "b",
                    format!("arrays of length {} and {} cannot be combined", xs.len(), ys.len()),
                ));
            }
            Numeric::Array(xs.into_iter().zip(ys).map(|(x, y)| op(x, y)).collect::<Result<_, _>>()?)
        }
    })
}

/// Whether values of this trait are stored as integers.
pub(crate) fn is_integral(traits: &Trait) -> bool {
    match traits {
        Trait::Array(inner) => is_integral(inner),
        other => other == &Trait::INTEGER,
    }
}

pub(crate) fn number(x: f64, integral: bool) -> NodeValue {
    if integral {
        NodeValue::from(x.round() as i64)
    } else {
        NodeValue::from(x)
    }
}

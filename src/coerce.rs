//! Conversion of parsed values into the kind a slot declares.
//!
//! Strings may carry numbers and booleans; numbers may widen or narrow as
//! long as the value fits. Anything else across categories is rejected.

use crate::error::{LayerfigError, Result};
use crate::node::Node;
use crate::value::{Kind, Value};

/// Why a scalar could not be converted.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Reject {
    /// The value's category cannot become the target kind at all.
    Mismatch,
    /// Same category, but this particular value does not fit.
    Invalid(String),
}

impl Reject {
    pub fn into_error(self, key: &str, value: &Value, to: Kind) -> LayerfigError {
        match self {
            Reject::Mismatch => LayerfigError::InvalidConversion {
                key: key.to_string(),
                from: value.kind(),
                to,
            },
            Reject::Invalid(reason) => LayerfigError::Assign {
                key: key.to_string(),
                value: value.to_string(),
                reason,
            },
        }
    }
}

/// Convert `value` into a node for a slot of `kind`. `element` is the
/// observed element kind of sequence slots.
pub(crate) fn coerce(key: &str, value: Value, kind: Kind, element: Option<Kind>) -> Result<Node> {
    match kind {
        Kind::Custom => Ok(Node::Custom(value)),
        Kind::Null => Ok(Node::from(value)),
        Kind::Seq => match value {
            Value::Seq(items) => {
                let element = element.unwrap_or(Kind::Null);
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| coerce(&format!("{key}[{i}]"), item, element, None))
                    .collect::<Result<Vec<_>>>()
                    .map(Node::Seq)
            }
            other => Err(Reject::Mismatch.into_error(key, &other, kind)),
        },
        Kind::Map | Kind::Record => match value {
            Value::Map(_) => Ok(Node::from(value)),
            other => Err(Reject::Mismatch.into_error(key, &other, kind)),
        },
        _ => scalar(&value, kind)
            .map(Node::Leaf)
            .map_err(|r| r.into_error(key, &value, kind)),
    }
}

/// Convert a scalar to exactly `kind`.
pub(crate) fn scalar(value: &Value, kind: Kind) -> Result<Value, Reject> {
    Ok(match kind {
        Kind::String => Value::String(string(value)?),
        Kind::Bool => Value::Bool(boolean(value)?),
        Kind::I8 => Value::I8(integer(value, kind)? as i8),
        Kind::I16 => Value::I16(integer(value, kind)? as i16),
        Kind::I32 => Value::I32(integer(value, kind)? as i32),
        Kind::I64 => Value::I64(integer(value, kind)? as i64),
        Kind::U8 => Value::U8(integer(value, kind)? as u8),
        Kind::U16 => Value::U16(integer(value, kind)? as u16),
        Kind::U32 => Value::U32(integer(value, kind)? as u32),
        Kind::U64 => Value::U64(integer(value, kind)? as u64),
        Kind::F32 => Value::F32(float(value, kind)? as f32),
        Kind::F64 => Value::F64(float(value, kind)?),
        _ => return Err(Reject::Mismatch),
    })
}

/// Strings pass through; numbers become their decimal text.
pub(crate) fn string(value: &Value) -> Result<String, Reject> {
    match value {
        Value::String(s) => Ok(s.clone()),
        // Formatted at their own width so the text reads back to the same value.
        Value::F32(f) => Ok(f.to_string()),
        Value::F64(f) => Ok(f.to_string()),
        other => other
            .integer()
            .map(|n| n.to_string())
            .ok_or(Reject::Mismatch),
    }
}

pub(crate) fn boolean(value: &Value) -> Result<bool, Reject> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        Value::String(s) => Err(Reject::Invalid(format!("{s:?} is not a boolean"))),
        _ => Err(Reject::Mismatch),
    }
}

/// An integer that fits `kind`, which must be one of the integer kinds.
pub(crate) fn integer(value: &Value, kind: Kind) -> Result<i128, Reject> {
    let n = if let Some(n) = value.integer() {
        n
    } else if let Some(f) = value.float() {
        integral(f)?
    } else if let Value::String(s) = value {
        s.parse::<i128>()
            .map_err(|e| Reject::Invalid(format!("{s:?} is not an integer: {e}")))?
    } else {
        return Err(Reject::Mismatch);
    };

    let (min, max) = bounds(kind).ok_or(Reject::Mismatch)?;
    if n < min || n > max {
        return Err(Reject::Invalid(format!("{n} overflows {kind}")));
    }
    Ok(n)
}

/// A float that fits `kind`, which must be `F32` or `F64`.
pub(crate) fn float(value: &Value, kind: Kind) -> Result<f64, Reject> {
    let x = if let Some(f) = value.float() {
        f
    } else if let Some(n) = value.integer() {
        n as f64
    } else if let Value::String(s) = value {
        let x = s
            .parse::<f64>()
            .map_err(|e| Reject::Invalid(format!("{s:?} is not a number: {e}")))?;
        if x.is_infinite() && !s.to_ascii_lowercase().contains("inf") {
            return Err(Reject::Invalid(format!("{s:?} overflows {kind}")));
        }
        x
    } else {
        return Err(Reject::Mismatch);
    };

    if kind == Kind::F32 && x.is_finite() && x.abs() > f64::from(f32::MAX) {
        return Err(Reject::Invalid(format!("{x} overflows f32")));
    }
    Ok(x)
}

fn integral(f: f64) -> Result<i128, Reject> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e38 {
        Ok(f as i128)
    } else {
        Err(Reject::Invalid(format!("{f} is not an integer")))
    }
}

fn bounds(kind: Kind) -> Option<(i128, i128)> {
    Some(match kind {
        Kind::I8 => (i8::MIN.into(), i8::MAX.into()),
        Kind::I16 => (i16::MIN.into(), i16::MAX.into()),
        Kind::I32 => (i32::MIN.into(), i32::MAX.into()),
        Kind::I64 => (i64::MIN.into(), i64::MAX.into()),
        Kind::U8 => (0, u8::MAX.into()),
        Kind::U16 => (0, u16::MAX.into()),
        Kind::U32 => (0, u32::MAX.into()),
        Kind::U64 => (0, u64::MAX.into()),
        _ => return None,
    })
}

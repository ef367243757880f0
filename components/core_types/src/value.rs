//! Script value representation.
//!
//! The runtime core never interprets script values itself. It only carries
//! them between the script engine, native module proxies and the REPL printer,
//! so the representation is deliberately limited to primitives.

use std::fmt;

/// A primitive value produced or consumed by the script engine.
///
/// # Examples
///
/// ```
/// use core_types::Value;
///
/// let number = Value::Smi(42);
/// assert_eq!(number.to_string(), "42");
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The `undefined` value
    #[default]
    Undefined,
    /// The `null` value
    Null,
    /// A boolean
    Boolean(bool),
    /// Small integer
    Smi(i32),
    /// IEEE 754 double-precision number
    Double(f64),
    /// A string
    String(String),
}

impl Value {
    /// Builds a number, preferring the small-integer form when lossless.
    pub fn number(n: f64) -> Self {
        if n.fract() == 0.0 && n >= f64::from(i32::MIN) && n <= f64::from(i32::MAX) && !(n == 0.0 && n.is_sign_negative()) {
            Value::Smi(n as i32)
        } else {
            Value::Double(n)
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Smi(n) => write!(f, "{}", n),
            Value::Double(n) if n.is_nan() => write!(f, "NaN"),
            Value::Double(n) if n.is_infinite() => {
                write!(f, "{}", if *n > 0.0 { "Infinity" } else { "-Infinity" })
            }
            Value::Double(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

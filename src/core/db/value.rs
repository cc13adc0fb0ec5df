/// Value Marshaling Module
///
/// `Value` is the single currency between Rust callers and the engine. The
/// `From` impls below are the complete coercion table from Rust types to the
/// engine's bind kinds; `FromValue` is the reverse direction for typed reads.
///
/// | Rust type                         | Value                         |
/// |-----------------------------------|-------------------------------|
/// | `()`, `None`                      | `Null`                        |
/// | `bool`                            | `Integer(0 / 1)`              |
/// | `i8 i16 i32 i64 isize u8 u16 u32` | `Integer`                     |
/// | `u64 usize`                       | `Integer`, or `Text` above `i64::MAX` |
/// | `f32 f64`                         | `Real`                        |
/// | `&str String char`                | `Text`                        |
/// | `&[u8] Vec<u8> [u8; N]`           | `Blob`                        |
/// | `chrono::DateTime<Tz>`            | `Integer` (Unix seconds)      |
/// | `chrono::NaiveDateTime`           | `Integer` (Unix seconds, UTC) |
/// | `chrono::NaiveDate`               | `Text` (`%Y-%m-%d`)           |
/// | `uuid::Uuid`                      | `Text` (hyphenated)           |
///
/// Other types are never stringified implicitly: implement `From<T> for
/// Value`, or opt in per call with [`Value::display`].

use crate::core::{Result, SqlstepError};
use std::borrow::Cow;
use std::fmt;

/// A dynamically typed engine value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// The native bind call a value is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    Null,
    Int32,
    Int64,
    Double,
    Blob,
    Text,
}

impl Value {
    /// Stringifies any displayable value as `Text`.
    pub fn display<T: fmt::Display + ?Sized>(value: &T) -> Value {
        Value::Text(value.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the storage class, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }

    /// Integers that fit in 32 bits use the narrow bind call.
    pub fn wire_kind(&self) -> WireKind {
        match self {
            Value::Null => WireKind::Null,
            Value::Integer(i) if i32::try_from(*i).is_ok() => WireKind::Int32,
            Value::Integer(_) => WireKind::Int64,
            Value::Real(_) => WireKind::Double,
            Value::Text(_) => WireKind::Text,
            Value::Blob(_) => WireKind::Blob,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => write!(f, "<BLOB: {} bytes>", b.len()),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Integer(b as i64)
    }
}

macro_rules! from_lossless_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(i: $t) -> Self {
                Value::Integer(i as i64)
            }
        })*
    };
}

from_lossless_int!(i8, i16, i32, i64, isize, u8, u16, u32);

macro_rules! from_wide_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(i: $t) -> Self {
                match i64::try_from(i) {
                    Ok(v) => Value::Integer(v),
                    Err(_) => Value::Text(i.to_string()),
                }
            }
        })*
    };
}

from_wide_unsigned!(u64, usize);

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Real(f as f64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Real(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Text(s.clone())
    }
}

impl From<Cow<'_, str>> for Value {
    fn from(s: Cow<'_, str>) -> Self {
        Value::Text(s.into_owned())
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Text(c.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Blob(b.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

impl<const N: usize> From<[u8; N]> for Value {
    fn from(b: [u8; N]) -> Self {
        Value::Blob(b.to_vec())
    }
}

impl<Tz: chrono::TimeZone> From<chrono::DateTime<Tz>> for Value {
    fn from(dt: chrono::DateTime<Tz>) -> Self {
        Value::Integer(dt.timestamp())
    }
}

impl From<chrono::NaiveDateTime> for Value {
    fn from(dt: chrono::NaiveDateTime) -> Self {
        Value::Integer(dt.and_utc().timestamp())
    }
}

impl From<chrono::NaiveDate> for Value {
    fn from(d: chrono::NaiveDate) -> Self {
        Value::Text(d.format("%Y-%m-%d").to_string())
    }
}

impl From<uuid::Uuid> for Value {
    fn from(u: uuid::Uuid) -> Self {
        Value::Text(u.hyphenated().to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Builds a `[Value; N]` array for [`Statement::bind`](crate::core::db::Statement::bind).
///
/// ```ignore
/// stmt.bind(&params![1, "two", 3.3])?;
/// ```
#[macro_export]
macro_rules! params {
    () => {
        [] as [$crate::core::db::Value; 0]
    };
    ($($v:expr),+ $(,)?) => {
        [$($crate::core::db::Value::from($v)),+]
    };
}

/// Typed extraction of a decoded column value.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch<T>(expected: &'static str, found: &Value) -> Result<T> {
    Err(SqlstepError::TypeMismatch {
        expected,
        found: found.type_name(),
    })
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Integer(i) => Ok(i),
            other => mismatch("integer", &other),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Integer(i) => i32::try_from(i).or_else(|_| mismatch("i32", &Value::Integer(i))),
            other => mismatch("integer", &other),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Integer(i) => Ok(i != 0),
            other => mismatch("integer", &other),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Real(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            other => mismatch("real", &other),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => mismatch("text", &other),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Blob(b) => Ok(b),
            other => mismatch("blob", &other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

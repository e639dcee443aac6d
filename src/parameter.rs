//! Typed values and bind parameters.
//!
//! [`Value`] is the closed set of scalars that flow through filters, bind
//! parameters and fetched rows. [`Parameter`] pairs a value with the SQL type
//! used to bind it.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::fmt;

/// SQL types understood by the bind step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Boolean,
    Char,
    Integer,
    /// 64-bit integral numbers
    Numeric,
    Double,
    Float,
    Decimal,
    Date,
    Time,
    Timestamp,
    Varchar,
    Binary,
    /// Anything else; bound through the driver's generic setter
    Other,
}

/// A scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Binary(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The SQL type a value of this kind binds as by default.
    pub fn sql_type(&self) -> SqlType {
        match self {
            Value::Null => SqlType::Varchar,
            Value::Boolean(_) => SqlType::Boolean,
            Value::Integer(_) => SqlType::Integer,
            Value::Long(_) => SqlType::Numeric,
            Value::Float(_) => SqlType::Float,
            Value::Double(_) => SqlType::Double,
            Value::Decimal(_) => SqlType::Decimal,
            Value::String(_) => SqlType::Varchar,
            Value::Date(_) => SqlType::Date,
            Value::Time(_) => SqlType::Time,
            Value::Timestamp(_) => SqlType::Timestamp,
            Value::Binary(_) => SqlType::Binary,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::Long(i) => Some(*i != 0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "y" | "yes" => Some(true),
                "0" | "false" | "n" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn to_i32(&self) -> Option<i32> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Long(i) => i32::try_from(*i).ok(),
            Value::Decimal(d) => d.to_i32(),
            Value::Boolean(b) => Some(i32::from(*b)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(i64::from(*i)),
            Value::Long(i) => Some(*i),
            Value::Decimal(d) => d.to_i64(),
            Value::Boolean(b) => Some(i64::from(*b)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(f64::from(*i)),
            Value::Long(i) => Some(*i as f64),
            Value::Float(f) => Some(f64::from(*f)),
            Value::Double(d) => Some(*d),
            Value::Decimal(d) => d.to_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_f32(&self) -> Option<f32> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f32),
            Value::Long(i) => Some(*i as f32),
            Value::Double(d) => Some(*d as f32),
            Value::Decimal(d) => d.to_f32(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Integer(i) => Some(Decimal::from(*i)),
            Value::Long(i) => Some(Decimal::from(*i)),
            Value::Double(d) => Decimal::try_from(*d).ok(),
            Value::Float(f) => Decimal::try_from(*f).ok(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Timestamp(ts) => Some(ts.date()),
            Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
            _ => None,
        }
    }

    pub fn to_time(&self) -> Option<NaiveTime> {
        match self {
            Value::Time(t) => Some(*t),
            Value::Timestamp(ts) => Some(ts.time()),
            Value::String(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S").ok(),
            _ => None,
        }
    }

    pub fn to_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            Value::String(s) => {
                NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S").ok()
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Long(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::String(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
            Value::Binary(bytes) => {
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// One bind position of a prepared statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    value: Value,
    sql_type: SqlType,
}

impl Parameter {
    pub fn new(value: Value, sql_type: SqlType) -> Self {
        Self { value, sql_type }
    }

    /// Build a parameter whose SQL type follows the value kind.
    pub fn from_value(value: impl Into<Value>) -> Self {
        let value = value.into();
        let sql_type = value.sql_type();
        Self { value, sql_type }
    }

    /// A typed SQL NULL.
    pub fn null(sql_type: SqlType) -> Self {
        Self {
            value: Value::Null,
            sql_type,
        }
    }

    /// A text parameter.
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: Value::String(value.into()),
            sql_type: SqlType::Varchar,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn sql_type(&self) -> SqlType {
        self.sql_type
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.value, self.sql_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_value_infers_sql_type() {
        assert_eq!(Parameter::from_value("alice").sql_type(), SqlType::Varchar);
        assert_eq!(Parameter::from_value(7i32).sql_type(), SqlType::Integer);
        assert_eq!(Parameter::from_value(7i64).sql_type(), SqlType::Numeric);
        assert_eq!(Parameter::from_value(true).sql_type(), SqlType::Boolean);
        assert_eq!(Parameter::from_value(1.5f64).sql_type(), SqlType::Double);
    }

    #[test]
    fn test_null_keeps_declared_type() {
        let p = Parameter::null(SqlType::Integer);
        assert!(p.value().is_null());
        assert_eq!(p.sql_type(), SqlType::Integer);
    }

    #[test]
    fn test_option_none_becomes_null() {
        let v: Value = Option::<i32>::None.into();
        assert_eq!(v, Value::Null);
        let v: Value = Some(3).into();
        assert_eq!(v, Value::Integer(3));
    }

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(Value::from("42").to_i32(), Some(42));
        assert_eq!(Value::Long(i64::MAX).to_i32(), None);
        assert_eq!(Value::Integer(5).to_decimal(), Some(Decimal::from(5)));
        assert_eq!(Value::from("1").to_bool(), Some(true));
        assert_eq!(Value::from("maybe").to_bool(), None);
    }

    #[test]
    fn test_date_promotes_to_midnight_timestamp() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let ts = Value::Date(date).to_timestamp().unwrap();
        assert_eq!(ts.to_string(), "2024-03-01 00:00:00");
    }

    #[test]
    fn test_display_is_plain_text() {
        assert_eq!(Value::from("a*b").to_string(), "a*b");
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Binary(vec![0xde, 0xad]).to_string(), "dead");
    }
}

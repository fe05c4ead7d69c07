//! Value types for histree
//!
//! This module defines:
//! - Value: Unified enum for attribute state values
//!
//! The value model is deliberately small. Trace state providers record what
//! an attribute *was* over an interval: nothing (`Null`), a counter or pid
//! (`Int`), a ratio (`Float`), or a symbolic state name (`Str`). Different
//! types are never equal; float equality follows IEEE-754 (`NaN != NaN`).

/// Canonical value type carried by every interval.
///
/// ## Type Equality
///
/// Different types are NEVER equal, even if they contain the same "value":
/// `Int(1) != Float(1.0)`. Float comparison follows IEEE-754 semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value (the attribute was unset over the interval)
    Null,
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point (IEEE-754)
    Float(f64),
    /// UTF-8 string
    Str(String),
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Str(_) => "Str",
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the integer value, if this is an Int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the float value, if this is a Float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get the string value, if this is a Str
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Null.type_name(), "Null");
        assert_eq!(Value::Int(1).type_name(), "Int");
        assert_eq!(Value::Float(1.0).type_name(), "Float");
        assert_eq!(Value::Str("x".into()).type_name(), "Str");
    }

    #[test]
    fn test_different_types_never_equal() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Null, Value::Int(0));
        assert_ne!(Value::Str("1".into()), Value::Int(1));
    }

    #[test]
    fn test_float_ieee754_equality() {
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(Value::Float(-0.0), Value::Float(0.0));
    }

    #[test]
    fn test_accessors() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int(0).is_null());
        assert_eq!(Value::Int(7).as_int(), Some(7));
        assert_eq!(Value::Float(2.5).as_float(), Some(2.5));
        assert_eq!(Value::Str("run".into()).as_str(), Some("run"));
        assert_eq!(Value::Int(7).as_str(), None);
    }

    #[test]
    fn test_from_impls() {
        assert_eq!(Value::from(3i64), Value::Int(3));
        assert_eq!(Value::from(1.5f64), Value::Float(1.5));
        assert_eq!(Value::from("idle"), Value::Str("idle".into()));
        assert_eq!(Value::from(String::from("x")), Value::Str("x".into()));
    }
}

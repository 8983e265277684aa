//! Explicit, non-panicking value coercion (§4.1). Every conversion that can
//! fail returns a typed [`Error::TypeCoercion`](crate::Error::TypeCoercion)
//! rather than following the source's pattern of reflection-driven type
//! switches.
use super::Value;
use crate::error::{Error, Result};

/// Coerces `v` to `f64`, accepting float/int/unsigned/decimal-parseable
/// strings. Anything else is a [`Error::TypeCoercion`].
pub fn to_float(v: &Value) -> Result<f64> {
	match v {
		Value::Int(i) => Ok(*i as f64),
		Value::UInt(u) => Ok(*u as f64),
		Value::Float(f) => Ok(*f),
		Value::String(s) => {
			s.trim().parse::<f64>().map_err(|_| Error::TypeCoercion(format!("{v} is not numeric")))
		}
		Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
		_ => Err(Error::TypeCoercion(format!("{v} cannot be coerced to a number"))),
	}
}

/// As [`to_float`], but returns `default` instead of failing.
pub fn to_float_or(v: &Value, default: f64) -> f64 {
	to_float(v).unwrap_or(default)
}

/// Stringifies a scalar; serializes arrays/objects as JSON; null becomes the
/// empty string.
pub fn to_string(v: &Value) -> String {
	match v {
		Value::Null => String::new(),
		Value::Bool(b) => b.to_string(),
		Value::Int(i) => i.to_string(),
		Value::UInt(u) => u.to_string(),
		Value::Float(f) => f.to_string(),
		Value::String(s) => s.clone(),
		Value::Time(t) => t.to_rfc3339(),
		Value::Array(_) | Value::Object(_) => {
			serde_json::to_string(v).unwrap_or_else(|_| String::new())
		}
	}
}

/// Coerces `v` to `bool`: numeric `0`/`1`, and the canonical strings
/// `"true"`/`"false"`, `"yes"`/`"no"`, `"1"`/`"0"` (case-insensitive).
/// Anything else is a [`Error::TypeCoercion`].
pub fn to_bool(v: &Value) -> Result<bool> {
	match v {
		Value::Bool(b) => Ok(*b),
		Value::Int(0) | Value::UInt(0) => Ok(false),
		Value::Int(1) | Value::UInt(1) => Ok(true),
		Value::Float(f) if *f == 0.0 => Ok(false),
		Value::Float(f) if *f == 1.0 => Ok(true),
		Value::String(s) => match s.to_ascii_lowercase().as_str() {
			"true" | "yes" | "1" => Ok(true),
			"false" | "no" | "0" => Ok(false),
			_ => Err(Error::TypeCoercion(format!("{s} is not a recognized boolean"))),
		},
		_ => Err(Error::TypeCoercion(format!("{v} cannot be coerced to a boolean"))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn float_from_string() {
		assert_eq!(to_float(&Value::String("3.5".into())).unwrap(), 3.5);
	}

	#[test]
	fn float_rejects_object() {
		assert!(to_float(&Value::Object(Default::default())).is_err());
	}

	#[test]
	fn string_serializes_nested() {
		let v = Value::Array(vec![Value::Int(1), Value::Int(2)]);
		assert_eq!(to_string(&v), "[1,2]");
	}

	#[test]
	fn bool_from_canonical_strings() {
		assert!(to_bool(&Value::String("yes".into())).unwrap());
		assert!(!to_bool(&Value::String("No".into())).unwrap());
		assert!(to_bool(&Value::String("maybe".into())).is_err());
	}
}

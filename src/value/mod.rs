//! The polymorphic value type flowing through the engine, and the explicit
//! coercion functions used by aggregators and the scalar evaluator.
//!
//! Grounded on the teacher crate's `sql::value::Value` / `sql::number::Number`
//! (`examples/surrealdb-surrealdb/core/src/sql/value/value.rs`,
//! `examples/surrealdb-surrealdb/core/src/sql/number.rs`): a tagged sum type
//! with explicit, non-panicking coercion rather than runtime type switches.
mod coerce;
mod ord;

pub use coerce::{to_bool, to_float, to_string};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// A record/result field value.
///
/// Unlike the teacher's `Number`, which folds `Int`/`Float`/`Decimal` into one
/// variant, the spec calls out signed and unsigned integers as distinct
/// shapes, so they are kept apart here.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
	Null,
	Bool(bool),
	Int(i64),
	UInt(u64),
	Float(f64),
	String(String),
	Time(DateTime<Utc>),
	Array(Vec<Value>),
	Object(BTreeMap<String, Value>),
}

impl Default for Value {
	fn default() -> Self {
		Value::Null
	}
}

impl Value {
	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	pub fn is_number(&self) -> bool {
		matches!(self, Value::Int(_) | Value::UInt(_) | Value::Float(_))
	}

	/// Truthiness used by boolean operators: null and `false` are falsy,
	/// numeric zero is falsy, empty string is falsy, everything else truthy.
	pub fn is_truthy(&self) -> bool {
		match self {
			Value::Null => false,
			Value::Bool(b) => *b,
			Value::Int(i) => *i != 0,
			Value::UInt(u) => *u != 0,
			Value::Float(f) => *f != 0.0,
			Value::String(s) => !s.is_empty(),
			Value::Array(a) => !a.is_empty(),
			Value::Object(o) => !o.is_empty(),
			Value::Time(_) => true,
		}
	}

	pub fn object(map: BTreeMap<String, Value>) -> Self {
		Value::Object(map)
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Int(v)
	}
}

impl From<u64> for Value {
	fn from(v: u64) -> Self {
		Value::UInt(v)
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::Float(v)
	}
}

impl From<usize> for Value {
	fn from(v: usize) -> Self {
		Value::UInt(v as u64)
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::String(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::String(v.to_owned())
	}
}

impl<T: Into<Value>> From<Vec<T>> for Value {
	fn from(v: Vec<T>) -> Self {
		Value::Array(v.into_iter().map(Into::into).collect())
	}
}

impl From<DateTime<Utc>> for Value {
	fn from(v: DateTime<Utc>) -> Self {
		Value::Time(v)
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Value::Null => write!(f, "NULL"),
			Value::Bool(b) => write!(f, "{b}"),
			Value::Int(i) => write!(f, "{i}"),
			Value::UInt(u) => write!(f, "{u}"),
			Value::Float(v) => write!(f, "{v}"),
			Value::String(s) => write!(f, "{s}"),
			Value::Time(t) => write!(f, "{}", t.to_rfc3339()),
			Value::Array(_) | Value::Object(_) => {
				write!(f, "{}", to_string(self))
			}
		}
	}
}

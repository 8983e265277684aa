//! Dotted field paths and the resolver that walks them against a [`Value`]
//! object (§4.2). Grounded on the teacher's `sql::idiom::Idiom` /
//! `sql::part::Part` (`examples/surrealdb-surrealdb/core/src/sql/idiom.rs`,
//! `.../sql/part.rs`), trimmed to the single `Field` part kind this engine
//! needs — no graph traversal, destructuring or method parts.
use crate::value::Value;
use std::fmt::{self, Display, Formatter};

/// One segment of a dotted path.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Part(pub String);

/// A dotted field path such as `device.info.id`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct Idiom(pub Vec<Part>);

impl Idiom {
	pub fn parse(path: &str) -> Self {
		if path.is_empty() {
			return Idiom::default();
		}
		Idiom(path.split('.').map(|s| Part(s.to_owned())).collect())
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn is_wildcard(&self) -> bool {
		self.0.len() == 1 && self.0[0].0 == "*"
	}
}

impl Display for Idiom {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let joined: Vec<&str> = self.0.iter().map(|p| p.0.as_str()).collect();
		write!(f, "{}", joined.join("."))
	}
}

impl From<&str> for Idiom {
	fn from(v: &str) -> Self {
		Idiom::parse(v)
	}
}

impl From<String> for Idiom {
	fn from(v: String) -> Self {
		Idiom::parse(&v)
	}
}

/// Resolves `path` against `record`. Returns `None` when any segment is
/// absent from its parent object, which is distinct from a segment resolving
/// to an explicit [`Value::Null`].
pub fn resolve<'v>(record: &'v Value, path: &Idiom) -> Option<&'v Value> {
	if path.is_empty() {
		return None;
	}
	let mut cur = record;
	for part in &path.0 {
		match cur {
			Value::Object(map) => match map.get(&part.0) {
				Some(v) => cur = v,
				None => return None,
			},
			_ => return None,
		}
	}
	Some(cur)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap;

	fn obj(pairs: &[(&str, Value)]) -> Value {
		let mut m = BTreeMap::new();
		for (k, v) in pairs {
			m.insert((*k).to_owned(), v.clone());
		}
		Value::Object(m)
	}

	#[test]
	fn resolves_nested_path() {
		let inner = obj(&[("id", Value::Int(7))]);
		let rec = obj(&[("device", obj(&[("info", inner)]))]);
		assert_eq!(resolve(&rec, &Idiom::parse("device.info.id")), Some(&Value::Int(7)));
		assert!(resolve(&rec, &Idiom::parse("device.info")).is_some());
	}

	#[test]
	fn missing_segment_is_not_found() {
		let rec = obj(&[("a", Value::Int(1))]);
		assert!(resolve(&rec, &Idiom::parse("b")).is_none());
	}

	#[test]
	fn present_null_is_distinct_from_missing() {
		let rec = obj(&[("a", Value::Null)]);
		assert_eq!(resolve(&rec, &Idiom::parse("a")), Some(&Value::Null));
		assert_eq!(resolve(&rec, &Idiom::parse("z")), None);
	}

	#[test]
	fn empty_path_is_not_found() {
		let rec = obj(&[]);
		assert_eq!(resolve(&rec, &Idiom::parse("")), None);
	}
}

//! Total ordering, equality and hashing for [`Value`], so it can serve as a
//! `BTreeMap`/`HashMap` key (group keys, `DEDUPLICATE` sets) without the
//! delimiter-joined-string ambiguity the source left open — see the group-key
//! discussion in `SPEC_FULL.md` §9.
use super::Value;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Stable rank used to order/hash across variants. Numeric variants compare
/// by value further down, irrespective of this rank, so `1i64` and `1u64`
/// still land adjacently in a sorted group map even though they hash
/// differently (see `numeric_key` below).
fn discriminant_rank(v: &Value) -> u8 {
	match v {
		Value::Null => 0,
		Value::Bool(_) => 1,
		Value::Int(_) => 2,
		Value::UInt(_) => 2,
		Value::Float(_) => 2,
		Value::String(_) => 3,
		Value::Time(_) => 4,
		Value::Array(_) => 5,
		Value::Object(_) => 6,
	}
}

fn as_f64(v: &Value) -> Option<f64> {
	match v {
		Value::Int(i) => Some(*i as f64),
		Value::UInt(u) => Some(*u as f64),
		Value::Float(f) => Some(*f),
		_ => None,
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for Value {}

impl PartialOrd for Value {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Value {
	fn cmp(&self, other: &Self) -> Ordering {
		if let (Some(a), Some(b)) = (as_f64(self), as_f64(other)) {
			return a.total_cmp(&b);
		}
		match discriminant_rank(self).cmp(&discriminant_rank(other)) {
			Ordering::Equal => (),
			ord => return ord,
		}
		match (self, other) {
			(Value::Null, Value::Null) => Ordering::Equal,
			(Value::Bool(a), Value::Bool(b)) => a.cmp(b),
			(Value::String(a), Value::String(b)) => a.cmp(b),
			(Value::Time(a), Value::Time(b)) => a.cmp(b),
			(Value::Array(a), Value::Array(b)) => a.cmp(b),
			(Value::Object(a), Value::Object(b)) => a.cmp(b),
			_ => Ordering::Equal,
		}
	}
}

impl Hash for Value {
	fn hash<H: Hasher>(&self, state: &mut H) {
		if let Some(f) = as_f64(self) {
			2u8.hash(state);
			f.to_bits().hash(state);
			return;
		}
		discriminant_rank(self).hash(state);
		match self {
			Value::Null => {}
			Value::Bool(b) => b.hash(state),
			Value::String(s) => s.hash(state),
			Value::Time(t) => t.hash(state),
			Value::Array(a) => a.hash(state),
			Value::Object(o) => o.hash(state),
			Value::Int(_) | Value::UInt(_) | Value::Float(_) => unreachable!(),
		}
	}
}

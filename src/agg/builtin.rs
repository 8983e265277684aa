//! Built-in accumulator kinds named in §3, registered into the process-wide
//! [`super::Registry`] at construction. Grounded on the teacher's
//! `dbs/group.rs` `Aggregator` fields (`math_sum`, `math_mean`, `math_max`,
//! `math_min`, `count`, `first_val`) generalised from "one slot per shape
//! a statement used" to "one type implementing `Accumulator` per kind".
use super::{Accumulator, Registry};
use crate::value::{to_float, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

pub(super) fn register_all(reg: &Registry) {
	reg.register("sum", 0, 0, Arc::new(|_| Ok(Box::new(Sum::default()))));
	reg.register("count", 0, 0, Arc::new(|_| Ok(Box::new(Count::default()))));
	reg.register("avg", 0, 0, Arc::new(|_| Ok(Box::new(Avg::default()))));
	reg.register("min", 0, 0, Arc::new(|_| Ok(Box::new(MinMax::min()))));
	reg.register("max", 0, 0, Arc::new(|_| Ok(Box::new(MinMax::max()))));
	reg.register("stddev", 0, 0, Arc::new(|_| Ok(Box::new(Moments::stddev()))));
	reg.register("variance", 0, 0, Arc::new(|_| Ok(Box::new(Moments::variance()))));
	reg.register("median", 0, 0, Arc::new(|_| Ok(Box::new(Percentile::new(50.0)))));
	reg.register(
		"percentile",
		0,
		1,
		Arc::new(|args| {
			let p = match args.first() {
				Some(v) => to_float(v)?,
				None => 50.0,
			};
			Ok(Box::new(Percentile::new(p)) as Box<dyn Accumulator>)
		}),
	);
	reg.register("first_value", 0, 0, Arc::new(|_| Ok(Box::new(FirstLast::first()))));
	reg.register("last_value", 0, 0, Arc::new(|_| Ok(Box::new(FirstLast::last()))));
	reg.register(
		"nth_value",
		0,
		1,
		Arc::new(|args| {
			let n = match args.first() {
				Some(v) => to_float(v)? as i64,
				None => 1,
			};
			Ok(Box::new(NthValue::new(n.max(1) as usize)) as Box<dyn Accumulator>)
		}),
	);
	reg.register("collect", 0, 0, Arc::new(|_| Ok(Box::new(Collect::default()))));
	reg.register("deduplicate", 0, 0, Arc::new(|_| Ok(Box::new(Deduplicate::default()))));
	reg.register("merge_agg", 0, 0, Arc::new(|_| Ok(Box::new(MergeAgg::default()))));
	reg.register("window_start", 0, 0, Arc::new(|_| Ok(Box::new(ContextValue::new("window_start")))));
	reg.register("window_end", 0, 0, Arc::new(|_| Ok(Box::new(ContextValue::new("window_end")))));
	reg.register(
		"lag",
		0,
		2,
		Arc::new(|args| {
			let offset = match args.first() {
				Some(v) => to_float(v)? as i64,
				None => 1,
			};
			let default = args.get(1).cloned().unwrap_or(Value::Null);
			Ok(Box::new(Lag::new(offset.max(0) as usize, default)) as Box<dyn Accumulator>)
		}),
	);
	reg.register("latest", 0, 0, Arc::new(|_| Ok(Box::new(FirstLast::last()))));
	reg.register("changed_col", 0, 0, Arc::new(|_| Ok(Box::new(ChangedCol::default()))));
	reg.register("had_changed", 0, 0, Arc::new(|_| Ok(Box::new(HadChanged::default()))));
	reg.register(
		"postaggregationplaceholder",
		0,
		0,
		Arc::new(|_| Ok(Box::new(Placeholder))),
	);
}

#[derive(Debug, Default, Clone)]
pub(super) struct Sum(f64);
impl Accumulator for Sum {
	fn add(&mut self, value: &Value) {
		self.0 += to_float(value).unwrap_or(0.0);
	}
	fn result(&self) -> Value {
		Value::Float(self.0)
	}
	fn reset(&mut self) {
		self.0 = 0.0;
	}
	fn clone_box(&self) -> Box<dyn Accumulator> {
		Box::new(self.clone())
	}
	fn wants_numeric(&self) -> bool {
		true
	}
}

#[derive(Debug, Default, Clone)]
struct Count(u64);
impl Accumulator for Count {
	fn add(&mut self, _value: &Value) {
		self.0 += 1;
	}
	fn result(&self) -> Value {
		Value::UInt(self.0)
	}
	fn reset(&mut self) {
		self.0 = 0;
	}
	fn clone_box(&self) -> Box<dyn Accumulator> {
		Box::new(self.clone())
	}
}

#[derive(Debug, Default, Clone)]
struct Avg {
	sum: f64,
	count: u64,
}
impl Accumulator for Avg {
	fn add(&mut self, value: &Value) {
		self.sum += to_float(value).unwrap_or(0.0);
		self.count += 1;
	}
	fn result(&self) -> Value {
		if self.count == 0 {
			Value::Null
		} else {
			Value::Float(self.sum / self.count as f64)
		}
	}
	fn reset(&mut self) {
		self.sum = 0.0;
		self.count = 0;
	}
	fn clone_box(&self) -> Box<dyn Accumulator> {
		Box::new(self.clone())
	}
	fn wants_numeric(&self) -> bool {
		true
	}
}

/// Backs both `MIN` and `MAX`: compares raw [`Value`]s via their total
/// order (`value::ord`) rather than forcing numeric coercion, so the same
/// accumulator works over numbers, strings and timestamps alike.
#[derive(Debug, Clone)]
struct MinMax {
	want_max: bool,
	current: Option<Value>,
}
impl MinMax {
	fn min() -> Self {
		MinMax { want_max: false, current: None }
	}
	fn max() -> Self {
		MinMax { want_max: true, current: None }
	}
}
impl Accumulator for MinMax {
	fn add(&mut self, value: &Value) {
		if value.is_null() {
			return;
		}
		self.current = Some(match self.current.take() {
			None => value.clone(),
			Some(cur) => {
				let better = if self.want_max { *value > cur } else { *value < cur };
				if better {
					value.clone()
				} else {
					cur
				}
			}
		});
	}
	fn result(&self) -> Value {
		self.current.clone().unwrap_or(Value::Null)
	}
	fn reset(&mut self) {
		self.current = None;
	}
	fn clone_box(&self) -> Box<dyn Accumulator> {
		Box::new(self.clone())
	}
}

/// Welford's online algorithm, backing both sample `STDDEV` and `VARIANCE`.
#[derive(Debug, Clone)]
struct Moments {
	want_stddev: bool,
	count: u64,
	mean: f64,
	m2: f64,
}
impl Moments {
	fn stddev() -> Self {
		Moments { want_stddev: true, count: 0, mean: 0.0, m2: 0.0 }
	}
	fn variance() -> Self {
		Moments { want_stddev: false, count: 0, mean: 0.0, m2: 0.0 }
	}
}
impl Accumulator for Moments {
	fn add(&mut self, value: &Value) {
		let x = to_float(value).unwrap_or(0.0);
		self.count += 1;
		let delta = x - self.mean;
		self.mean += delta / self.count as f64;
		let delta2 = x - self.mean;
		self.m2 += delta * delta2;
	}
	fn result(&self) -> Value {
		if self.count < 2 {
			return Value::Null;
		}
		let variance = self.m2 / (self.count as f64 - 1.0);
		Value::Float(if self.want_stddev { variance.sqrt() } else { variance })
	}
	fn reset(&mut self) {
		self.count = 0;
		self.mean = 0.0;
		self.m2 = 0.0;
	}
	fn clone_box(&self) -> Box<dyn Accumulator> {
		Box::new(self.clone())
	}
	fn wants_numeric(&self) -> bool {
		true
	}
}

/// Backs `MEDIAN` (fixed at p50) and `PERCENTILE(p)`. Retains every value
/// seen and interpolates linearly between ranks on `result`, matching the
/// common "linear interpolation" percentile definition.
#[derive(Debug, Clone)]
struct Percentile {
	p: f64,
	values: Vec<f64>,
}
impl Percentile {
	fn new(p: f64) -> Self {
		Percentile { p, values: Vec::new() }
	}
}
impl Accumulator for Percentile {
	fn add(&mut self, value: &Value) {
		if let Ok(f) = to_float(value) {
			self.values.push(f);
		}
	}
	fn result(&self) -> Value {
		if self.values.is_empty() {
			return Value::Null;
		}
		let mut sorted = self.values.clone();
		sorted.sort_by(|a, b| a.total_cmp(b));
		let n = sorted.len();
		if n == 1 {
			return Value::Float(sorted[0]);
		}
		let rank = (self.p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
		let lo = rank.floor() as usize;
		let hi = rank.ceil() as usize;
		if lo == hi {
			Value::Float(sorted[lo])
		} else {
			let frac = rank - lo as f64;
			Value::Float(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
		}
	}
	fn reset(&mut self) {
		self.values.clear();
	}
	fn clone_box(&self) -> Box<dyn Accumulator> {
		Box::new(self.clone())
	}
	fn wants_numeric(&self) -> bool {
		true
	}
}

/// Backs `FIRST_VALUE` and `LAST_VALUE`/`LATEST`.
#[derive(Debug, Clone)]
struct FirstLast {
	want_last: bool,
	value: Option<Value>,
}
impl FirstLast {
	fn first() -> Self {
		FirstLast { want_last: false, value: None }
	}
	fn last() -> Self {
		FirstLast { want_last: true, value: None }
	}
}
impl Accumulator for FirstLast {
	fn add(&mut self, value: &Value) {
		if self.want_last {
			self.value = Some(value.clone());
		} else if self.value.is_none() {
			self.value = Some(value.clone());
		}
	}
	fn result(&self) -> Value {
		self.value.clone().unwrap_or(Value::Null)
	}
	fn reset(&mut self) {
		self.value = None;
	}
	fn clone_box(&self) -> Box<dyn Accumulator> {
		Box::new(self.clone())
	}
}

/// `NTH_VALUE(k)`: the k-th (1-indexed) value added, or null if fewer than
/// `k` values have been seen.
#[derive(Debug, Clone)]
struct NthValue {
	n: usize,
	seen: Vec<Value>,
}
impl NthValue {
	fn new(n: usize) -> Self {
		NthValue { n, seen: Vec::new() }
	}
}
impl Accumulator for NthValue {
	fn add(&mut self, value: &Value) {
		if self.seen.len() < self.n {
			self.seen.push(value.clone());
		}
	}
	fn result(&self) -> Value {
		self.seen.get(self.n - 1).cloned().unwrap_or(Value::Null)
	}
	fn reset(&mut self) {
		self.seen.clear();
	}
	fn clone_box(&self) -> Box<dyn Accumulator> {
		Box::new(self.clone())
	}
}

#[derive(Debug, Default, Clone)]
struct Collect(Vec<Value>);
impl Accumulator for Collect {
	fn add(&mut self, value: &Value) {
		self.0.push(value.clone());
	}
	fn result(&self) -> Value {
		Value::Array(self.0.clone())
	}
	fn reset(&mut self) {
		self.0.clear();
	}
	fn clone_box(&self) -> Box<dyn Accumulator> {
		Box::new(self.clone())
	}
}

/// `DEDUPLICATE`: the set of distinct values seen, in sorted (`Value: Ord`)
/// order.
#[derive(Debug, Default, Clone)]
struct Deduplicate(BTreeSet<Value>);
impl Accumulator for Deduplicate {
	fn add(&mut self, value: &Value) {
		self.0.insert(value.clone());
	}
	fn result(&self) -> Value {
		Value::Array(self.0.iter().cloned().collect())
	}
	fn reset(&mut self) {
		self.0.clear();
	}
	fn clone_box(&self) -> Box<dyn Accumulator> {
		Box::new(self.clone())
	}
}

/// `MERGE_AGG`: shallow-merges every object value seen, later keys
/// overwriting earlier ones. Non-object values are ignored.
#[derive(Debug, Default, Clone)]
struct MergeAgg(std::collections::BTreeMap<String, Value>);
impl Accumulator for MergeAgg {
	fn add(&mut self, value: &Value) {
		if let Value::Object(map) = value {
			for (k, v) in map {
				self.0.insert(k.clone(), v.clone());
			}
		}
	}
	fn result(&self) -> Value {
		Value::Object(self.0.clone())
	}
	fn reset(&mut self) {
		self.0.clear();
	}
	fn clone_box(&self) -> Box<dyn Accumulator> {
		Box::new(self.clone())
	}
}

/// `WINDOW_START`/`WINDOW_END`: context-sensitive accumulators fed only by
/// the window engine's [`super::GroupAggregator::put`] call (§4.5 firing
/// protocol step 1), never by a record field.
#[derive(Debug, Clone)]
struct ContextValue {
	key: &'static str,
	value: Option<Value>,
}
impl ContextValue {
	fn new(key: &'static str) -> Self {
		ContextValue { key, value: None }
	}
}
impl Accumulator for ContextValue {
	fn add(&mut self, value: &Value) {
		self.value = Some(value.clone());
	}
	fn result(&self) -> Value {
		self.value.clone().unwrap_or(Value::Null)
	}
	fn reset(&mut self) {
		self.value = None;
	}
	fn clone_box(&self) -> Box<dyn Accumulator> {
		Box::new(self.clone())
	}
	fn context_key(&self) -> Option<&'static str> {
		Some(self.key)
	}
}

/// `LAG(offset, default)`: the value seen `offset` records ago, or
/// `default` while fewer than `offset` records have been admitted.
#[derive(Debug, Clone)]
struct Lag {
	offset: usize,
	default: Value,
	history: Vec<Value>,
}
impl Lag {
	fn new(offset: usize, default: Value) -> Self {
		Lag { offset, default, history: Vec::new() }
	}
}
impl Accumulator for Lag {
	fn add(&mut self, value: &Value) {
		self.history.push(value.clone());
	}
	fn result(&self) -> Value {
		let len = self.history.len();
		if len > self.offset {
			self.history[len - 1 - self.offset].clone()
		} else {
			self.default.clone()
		}
	}
	fn reset(&mut self) {
		self.history.clear();
	}
	fn clone_box(&self) -> Box<dyn Accumulator> {
		Box::new(self.clone())
	}
}

/// `CHANGED_COL`: true iff the most recently added value differs from the
/// one before it.
#[derive(Debug, Default, Clone)]
struct ChangedCol {
	previous: Option<Value>,
	current: Option<Value>,
}
impl Accumulator for ChangedCol {
	fn add(&mut self, value: &Value) {
		self.previous = self.current.take();
		self.current = Some(value.clone());
	}
	fn result(&self) -> Value {
		match (&self.previous, &self.current) {
			(Some(p), Some(c)) => Value::Bool(p != c),
			_ => Value::Bool(false),
		}
	}
	fn reset(&mut self) {
		self.previous = None;
		self.current = None;
	}
	fn clone_box(&self) -> Box<dyn Accumulator> {
		Box::new(self.clone())
	}
}

/// `HAD_CHANGED`: true iff any two consecutive values differed anywhere in
/// the window so far.
#[derive(Debug, Default, Clone)]
struct HadChanged {
	last: Option<Value>,
	changed: bool,
}
impl Accumulator for HadChanged {
	fn add(&mut self, value: &Value) {
		if let Some(last) = &self.last {
			if last != value {
				self.changed = true;
			}
		}
		self.last = Some(value.clone());
	}
	fn result(&self) -> Value {
		Value::Bool(self.changed)
	}
	fn reset(&mut self) {
		self.last = None;
		self.changed = false;
	}
	fn clone_box(&self) -> Box<dyn Accumulator> {
		Box::new(self.clone())
	}
}

/// A no-op accumulator reachable only through the post-aggregation rewrite
/// (§9: conformance requirement only if the parser emits this kind).
#[derive(Debug, Default, Clone)]
struct Placeholder;
impl Accumulator for Placeholder {
	fn add(&mut self, _value: &Value) {}
	fn result(&self) -> Value {
		Value::Null
	}
	fn reset(&mut self) {}
	fn clone_box(&self) -> Box<dyn Accumulator> {
		Box::new(self.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sum_and_count() {
		let mut sum = Sum::default();
		let mut count = Count::default();
		for v in [Value::Float(10.0), Value::Float(20.0)] {
			sum.add(&v);
			count.add(&v);
		}
		assert_eq!(sum.result(), Value::Float(30.0));
		assert_eq!(count.result(), Value::UInt(2));
	}

	#[test]
	fn min_max_ordering() {
		let mut min = MinMax::min();
		let mut max = MinMax::max();
		for v in [Value::Float(5.0), Value::Float(1.0), Value::Float(9.0)] {
			min.add(&v);
			max.add(&v);
		}
		assert_eq!(min.result(), Value::Float(1.0));
		assert_eq!(max.result(), Value::Float(9.0));
	}

	#[test]
	fn median_of_odd_count() {
		let mut m = Percentile::new(50.0);
		for v in [Value::Float(1.0), Value::Float(3.0), Value::Float(2.0)] {
			m.add(&v);
		}
		assert_eq!(m.result(), Value::Float(2.0));
	}

	#[test]
	fn lag_returns_default_until_enough_history() {
		let mut lag = Lag::new(1, Value::Int(-1));
		assert_eq!(lag.result(), Value::Int(-1));
		lag.add(&Value::Int(10));
		assert_eq!(lag.result(), Value::Int(-1));
		lag.add(&Value::Int(20));
		assert_eq!(lag.result(), Value::Int(10));
	}

	#[test]
	fn deduplicate_keeps_unique_values() {
		let mut d = Deduplicate::default();
		for v in [Value::Int(1), Value::Int(1), Value::Int(2)] {
			d.add(&v);
		}
		match d.result() {
			Value::Array(a) => assert_eq!(a.len(), 2),
			other => panic!("expected array, got {other:?}"),
		}
	}
}

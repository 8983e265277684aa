//! The grouped aggregator (§4.4): partitions records by group key inside a
//! single window instance and routes each aggregation's input to its
//! accumulator. Grounded on the teacher's `dbs::group::GroupsCollector`
//! (`BTreeMap<Array, Vec<Aggregator>>`, one aggregator set per distinct key)
//! but generalised to an open set of named, registry-constructed
//! accumulators instead of a closed per-statement struct.
use super::{Accumulator, REGISTRY};
use crate::error::{Error, Result};
use crate::expr::{self, Expr};
use crate::idiom::{self, Idiom};
use crate::plan::{AggregationCall, AggregationInput};
use crate::value::{to_float, Value};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The tuple of group-field values identifying one group within a window
/// instance. Wraps `Vec<Value>` rather than a delimiter-joined string so it
/// never suffers the `|`-collision ambiguity left open in §9 — `Value`
/// already implements a total order (`value::ord`), so the tuple does too.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey(pub Vec<Value>);

/// A scalar expression registered for an aggregation alias instead of a raw
/// field, installed by the post-aggregation processor for nested aggregate
/// calls (§4.6 step 3).
struct RegisteredExpr {
	expr: Expr,
}

struct GroupState {
	accumulators: Vec<Box<dyn Accumulator>>,
}

/// Per-window-instance state: the group map plus the context data the
/// window engine feeds context-sensitive accumulators (§4.4, §4.5).
pub struct GroupAggregator {
	aggregations: Vec<AggregationCall>,
	group_fields: Vec<Idiom>,
	registered_exprs: BTreeMap<String, RegisteredExpr>,
	inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
	groups: BTreeMap<GroupKey, GroupState>,
	context: BTreeMap<&'static str, Value>,
}

impl GroupAggregator {
	pub fn new(group_fields: Vec<Idiom>, aggregations: Vec<AggregationCall>) -> Self {
		GroupAggregator {
			aggregations,
			group_fields,
			registered_exprs: BTreeMap::new(),
			inner: RwLock::new(Inner::default()),
		}
	}

	/// Installs a scalar expression whose value feeds the accumulator for
	/// `alias` instead of its plan-declared input (§4.4
	/// `register_expression`), used by the post-aggregation processor when
	/// an inner dependent itself contains aggregate calls.
	pub fn register_expression(&mut self, alias: &str, expr: Expr) {
		self.registered_exprs.insert(alias.to_owned(), RegisteredExpr { expr });
	}

	fn fresh_group(&self) -> Result<GroupState> {
		let mut accumulators = Vec::with_capacity(self.aggregations.len());
		for agg in &self.aggregations {
			accumulators.push(REGISTRY.create(&agg.kind, &agg.args)?);
		}
		Ok(GroupState { accumulators })
	}

	fn key_for(&self, record: &Value) -> Result<GroupKey> {
		let mut values = Vec::with_capacity(self.group_fields.len());
		for field in &self.group_fields {
			let resolved = idiom::resolve(record, field)
				.ok_or_else(|| Error::GroupFieldMissing(field.to_string()))?;
			if resolved.is_null() {
				return Err(Error::GroupFieldNull(field.to_string()));
			}
			values.push(resolved.clone());
		}
		Ok(GroupKey(values))
	}

	/// Routes `record` into its group, creating the group lazily on first
	/// sight (§4.4 `add`).
	pub fn add(&self, record: &Value) -> Result<()> {
		let key = self.key_for(record)?;
		let mut inner = self.inner.write();
		if !inner.groups.contains_key(&key) {
			let fresh = self.fresh_group()?;
			inner.groups.insert(key.clone(), fresh);
		}
		let context = inner.context.clone();
		let state = inner.groups.get_mut(&key).expect("just inserted");
		for (agg, acc) in self.aggregations.iter().zip(state.accumulators.iter_mut()) {
			route_one(agg, acc.as_mut(), record, &self.registered_exprs, &context)?;
		}
		Ok(())
	}

	/// Sets a context datum (e.g. `window_start`) visible to
	/// context-sensitive accumulators in every group of this window
	/// instance (§4.4 `put`, §4.5 firing protocol step 1).
	pub fn put(&self, key: &'static str, value: Value) {
		self.inner.write().context.insert(key, value);
	}

	/// Snapshots every group: group-key fields plus `alias → result()` for
	/// every aggregation (§4.4 `results`).
	pub fn results(&self) -> Vec<BTreeMap<String, Value>> {
		let inner = self.inner.read();
		let mut out = Vec::with_capacity(inner.groups.len());
		for (key, state) in inner.groups.iter() {
			let mut row = BTreeMap::new();
			for (field, value) in self.group_fields.iter().zip(key.0.iter()) {
				row.insert(field.to_string(), value.clone());
			}
			for (agg, acc) in self.aggregations.iter().zip(state.accumulators.iter()) {
				row.insert(agg.alias.clone(), acc.result());
			}
			out.push(row);
		}
		out
	}

	/// Drops all groups and context data (§4.4 `reset`).
	pub fn reset(&self) {
		let mut inner = self.inner.write();
		inner.groups.clear();
		inner.context.clear();
	}

	pub fn is_empty(&self) -> bool {
		self.inner.read().groups.is_empty()
	}
}

fn route_one(
	agg: &AggregationCall,
	acc: &mut dyn Accumulator,
	record: &Value,
	registered: &BTreeMap<String, RegisteredExpr>,
	context: &BTreeMap<&'static str, Value>,
) -> Result<()> {
	// Step 1: a registered expression (post-aggregation synthetic field)
	// takes priority over the plan-declared input; evaluator errors are
	// skipped rather than failing the record.
	if let Some(reg) = registered.get(&agg.alias) {
		match expr::eval(&reg.expr, record) {
			Ok(value) => return feed(acc, &value),
			Err(_) => return Ok(()),
		}
	}

	let value = match &agg.input {
		AggregationInput::Star => Value::Int(1),
		AggregationInput::Field(path) => match idiom::resolve(record, path) {
			Some(v) => v.clone(),
			None => match acc.context_key() {
				Some(key) => match context.get(key) {
					Some(v) => v.clone(),
					None => return Ok(()),
				},
				None => return Ok(()),
			},
		},
		AggregationInput::Expression(expr) => match expr::eval(expr, record) {
			Ok(v) => v,
			Err(_) => return Ok(()),
		},
	};

	feed(acc, &value)
}

fn feed(acc: &mut dyn Accumulator, value: &Value) -> Result<()> {
	if value.is_null() {
		return Ok(());
	}
	if acc.wants_numeric() {
		let f = to_float(value)?;
		acc.add(&Value::Float(f));
	} else {
		acc.add(value);
	}
	Ok(())
}

/// A thread-safe handle to a [`GroupAggregator`], shared between the worker
/// pool and the window engine.
pub type SharedGroupAggregator = Arc<GroupAggregator>;

#[cfg(test)]
mod tests {
	use super::*;
	use crate::plan::AggregationCall;

	fn obj(pairs: &[(&str, Value)]) -> Value {
		let mut m = BTreeMap::new();
		for (k, v) in pairs {
			m.insert((*k).to_owned(), v.clone());
		}
		Value::Object(m)
	}

	#[test]
	fn multi_field_group_sum() {
		let group_fields = vec![Idiom::parse("device")];
		let aggregations = vec![
			AggregationCall {
				input: AggregationInput::Field(Idiom::parse("temperature")),
				kind: "sum".into(),
				args: vec![],
				alias: "t_sum".into(),
			},
			AggregationCall {
				input: AggregationInput::Field(Idiom::parse("humidity")),
				kind: "sum".into(),
				args: vec![],
				alias: "h_sum".into(),
			},
		];
		let g = GroupAggregator::new(group_fields, aggregations);
		for (device, temp, hum) in
			[("aa", 25.5, 60.0), ("aa", 26.8, 55.0), ("bb", 22.3, 65.0), ("bb", 23.5, 70.0)]
		{
			let rec = obj(&[
				("device", Value::String(device.into())),
				("temperature", Value::Float(temp)),
				("humidity", Value::Float(hum)),
			]);
			g.add(&rec).unwrap();
		}
		let results = g.results();
		assert_eq!(results.len(), 2);
		for row in &results {
			let device = match &row["device"] {
				Value::String(s) => s.as_str(),
				_ => panic!("expected string"),
			};
			match device {
				"aa" => {
					assert_eq!(row["t_sum"], Value::Float(52.3));
					assert_eq!(row["h_sum"], Value::Float(115.0));
				}
				"bb" => {
					assert_eq!(row["t_sum"], Value::Float(45.8));
					assert_eq!(row["h_sum"], Value::Float(135.0));
				}
				other => panic!("unexpected device {other}"),
			}
		}
	}

	#[test]
	fn missing_group_field_errors() {
		let g = GroupAggregator::new(vec![Idiom::parse("device")], vec![]);
		let rec = obj(&[("other", Value::Int(1))]);
		assert!(matches!(g.add(&rec), Err(Error::GroupFieldMissing(_))));
	}

	#[test]
	fn null_group_field_errors() {
		let g = GroupAggregator::new(vec![Idiom::parse("device")], vec![]);
		let rec = obj(&[("device", Value::Null)]);
		assert!(matches!(g.add(&rec), Err(Error::GroupFieldNull(_))));
	}

	#[test]
	fn context_sensitive_window_start() {
		let aggregations = vec![AggregationCall {
			input: AggregationInput::Field(Idiom::parse("window_start")),
			kind: "window_start".into(),
			args: vec![],
			alias: "w_start".into(),
		}];
		let g = GroupAggregator::new(vec![], aggregations);
		g.put("window_start", Value::Int(1000));
		g.add(&obj(&[])).unwrap();
		let results = g.results();
		assert_eq!(results[0]["w_start"], Value::Int(1000));
	}
}

//! The window engine (§4.5): tumbling, sliding, session and counting
//! windows over the grouped aggregator, plus the firing protocol that turns
//! a closing window instance into finished result rows.
//!
//! Grounded on the teacher's `dbs/iterator.rs` control-flow shape (a
//! collector driven record-by-record that decides, per record, whether to
//! emit) generalised from "one collector for the whole query" to "a set of
//! concurrently open instances, each owning its own collector" per the
//! hierarchical-ownership design note in `SPEC_FULL.md` §9.
use crate::agg::{GroupAggregator, GroupKey};
use crate::error::Result;
use crate::idiom::{self, Idiom};
use crate::plan::{TimeUnit, WindowSpec};
use crate::postagg::{self, PostAggPlan};
use crate::value::{to_float, Value};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// One window instance: `[start, end)` for time windows, or the exact
/// target count for counting windows (§3 "Window instance").
struct Instance {
	start: i64,
	end: i64,
	count: u64,
	aggregator: GroupAggregator,
}

/// Builds a fresh, empty [`GroupAggregator`] for a new window instance,
/// wiring in the compiled post-aggregation's synthetic aggregations and
/// registered expressions (§4.6).
fn new_aggregator(group_fields: &[Idiom], post: &PostAggPlan) -> GroupAggregator {
	let mut agg = GroupAggregator::new(group_fields.to_vec(), post.aggregations.clone());
	for reg in &post.registered_exprs {
		agg.register_expression(&reg.alias, reg.expr.clone());
	}
	agg
}

/// Extracts the event time, in milliseconds since the Unix epoch, from
/// `record` according to the query's `TIMESTAMP`/`TIMEUNIT` options,
/// falling back to wall-clock time when no timestamp field was configured.
pub fn event_time_millis(
	record: &Value,
	timestamp_field: Option<&Idiom>,
	time_unit: TimeUnit,
) -> i64 {
	let Some(field) = timestamp_field else {
		return Utc::now().timestamp_millis();
	};
	let Some(raw) = idiom::resolve(record, field) else {
		return Utc::now().timestamp_millis();
	};
	match raw {
		Value::Time(t) => t.timestamp_millis(),
		other => {
			let n = to_float(other).unwrap_or(0.0);
			match time_unit {
				TimeUnit::Seconds => (n * 1000.0) as i64,
				TimeUnit::Millis => n as i64,
				TimeUnit::Micros => (n / 1_000.0) as i64,
				TimeUnit::Nanos => (n / 1_000_000.0) as i64,
			}
		}
	}
}

/// A fired window's finished rows, ready for HAVING and the result channel.
pub struct FiredWindow {
	pub rows: Vec<BTreeMap<String, Value>>,
}

enum State {
	Tumbling { size: i64, instances: BTreeMap<i64, Instance> },
	Sliding { size: i64, slide: i64, instances: BTreeMap<i64, Instance> },
	Session { gap: i64, sessions: BTreeMap<GroupKey, Instance> },
	Counting { target: u64, current: Option<Instance> },
	/// A plain `GROUP BY` with no window clause: one open-ended instance
	/// per query that accumulates indefinitely and only fires on an
	/// explicit `Trigger`/`Stop` (there is no time or count boundary to
	/// close it automatically).
	None(Option<Instance>),
}

/// Owns every open window instance for one compiled query. The engine
/// itself is the sole owner of `WindowSet`; each instance owns its
/// `GroupAggregator` (§9 ownership design note) — there are no back
/// references.
pub struct WindowEngine {
	group_fields: Vec<Idiom>,
	post: PostAggPlan,
	timestamp_field: Option<Idiom>,
	time_unit: TimeUnit,
	state: RwLock<State>,
}

impl WindowEngine {
	pub fn new(
		spec: WindowSpec,
		group_fields: Vec<Idiom>,
		post: PostAggPlan,
		timestamp_field: Option<Idiom>,
		time_unit: TimeUnit,
	) -> Self {
		let state = match spec {
			WindowSpec::None => State::None(None),
			WindowSpec::Tumbling { size } => {
				State::Tumbling { size: size.as_millis() as i64, instances: BTreeMap::new() }
			}
			WindowSpec::Sliding { size, slide } => State::Sliding {
				size: size.as_millis() as i64,
				slide: slide.as_millis() as i64,
				instances: BTreeMap::new(),
			},
			WindowSpec::Session { gap } => {
				State::Session { gap: gap.as_millis() as i64, sessions: BTreeMap::new() }
			}
			WindowSpec::Counting { count } => State::Counting { target: count, current: None },
		};
		WindowEngine { group_fields, post, timestamp_field, time_unit, state: RwLock::new(state) }
	}

	fn event_time(&self, record: &Value) -> i64 {
		event_time_millis(record, self.timestamp_field.as_ref(), self.time_unit)
	}

	fn fresh_instance(&self, start: i64, end: i64) -> Instance {
		Instance {
			start,
			end,
			count: 0,
			aggregator: new_aggregator(&self.group_fields, &self.post),
		}
	}

	/// Admits `record` into every window instance whose interval contains
	/// its event time, creating instances lazily, and fires any instance
	/// whose end the new event time crosses. Returns the finished windows,
	/// already routed through post-aggregation (§4.5 firing protocol).
	pub fn admit(&self, record: &Value) -> Result<Vec<FiredWindow>> {
		let t = self.event_time(record);
		let mut state = self.state.write();
		match &mut *state {
			State::None(current) => {
				let inst = current.get_or_insert_with(|| self.fresh_instance(0, 0));
				inst.aggregator.add(record)?;
				inst.count += 1;
				Ok(Vec::new())
			}
			State::Tumbling { size, instances } => {
				let size = *size;
				let start = align_down(t, size);
				let end = start + size;
				let inst = instances
					.entry(start)
					.or_insert_with(|| Instance { start, end, count: 0, aggregator: new_aggregator(&self.group_fields, &self.post) });
				inst.aggregator.add(record)?;
				inst.count += 1;
				let fired = drain_due(instances, t, &self.post);
				Ok(fired)
			}
			State::Sliding { size, slide, instances } => {
				let (size, slide) = (*size, *slide);
				for start in overlapping_starts(t, size, slide) {
					let end = start + size;
					let inst = instances.entry(start).or_insert_with(|| Instance {
						start,
						end,
						count: 0,
						aggregator: new_aggregator(&self.group_fields, &self.post),
					});
					inst.aggregator.add(record)?;
					inst.count += 1;
				}
				let fired = drain_due(instances, t, &self.post);
				Ok(fired)
			}
			State::Session { gap, sessions } => {
				let gap = *gap;
				let key = GroupKey(
					self.group_fields
						.iter()
						.map(|f| idiom::resolve(record, f).cloned().unwrap_or(Value::Null))
						.collect(),
				);
				let mut fired = Vec::new();
				if let Some(existing) = sessions.get(&key) {
					if t > existing.end {
						// The gap elapsed: the old session is done.
						let inst = sessions.remove(&key).expect("checked above");
						fired.push(fire_instance(inst, &self.post));
					}
				}
				let entry = sessions.entry(key).or_insert_with(|| Instance {
					start: t,
					end: t + gap,
					count: 0,
					aggregator: new_aggregator(&self.group_fields, &self.post),
				});
				entry.end = entry.end.max(t + gap);
				entry.aggregator.add(record)?;
				entry.count += 1;
				Ok(fired)
			}
			State::Counting { target, current } => {
				let target = *target;
				let inst = current.get_or_insert_with(|| {
					self.fresh_instance(t, t)
				});
				inst.aggregator.add(record)?;
				inst.count += 1;
				if inst.count >= target {
					let inst = current.take().expect("just inserted");
					Ok(vec![fire_instance(inst, &self.post)])
				} else {
					Ok(Vec::new())
				}
			}
		}
	}

	/// Forces every open instance to fire immediately, regardless of
	/// whether its end has actually been crossed (§4.5 `Trigger`, used for
	/// test determinism and shutdown).
	pub fn trigger(&self) -> Vec<FiredWindow> {
		let mut state = self.state.write();
		match &mut *state {
			State::None(current) => {
				current.take().map(|inst| vec![fire_instance(inst, &self.post)]).unwrap_or_default()
			}
			State::Tumbling { instances, .. } | State::Sliding { instances, .. } => {
				let all: Vec<i64> = instances.keys().copied().collect();
				all.into_iter()
					.filter_map(|start| instances.remove(&start))
					.map(|inst| fire_instance(inst, &self.post))
					.collect()
			}
			State::Session { sessions, .. } => {
				let keys: Vec<GroupKey> = sessions.keys().cloned().collect();
				keys.into_iter()
					.filter_map(|k| sessions.remove(&k))
					.map(|inst| fire_instance(inst, &self.post))
					.collect()
			}
			State::Counting { current, .. } => {
				current.take().map(|inst| vec![fire_instance(inst, &self.post)]).unwrap_or_default()
			}
		}
	}

	/// True if any window instance currently holds unfired data (used by
	/// the runtime's `emit-on-close` shutdown path, §5 "Cancellation").
	pub fn has_open_instances(&self) -> bool {
		let state = self.state.read();
		match &*state {
			State::None(current) => current.is_some(),
			State::Tumbling { instances, .. } | State::Sliding { instances, .. } => {
				!instances.is_empty()
			}
			State::Session { sessions, .. } => !sessions.is_empty(),
			State::Counting { current, .. } => current.is_some(),
		}
	}

	/// Fires every instance whose end wall-clock time has passed, without
	/// admitting a new record. Driven by the runtime's window-timer task
	/// (§4.5 "Fire exactly when a watermark or wall-clock tick crosses
	/// `end`") so a tumbling/sliding/session window still fires even while
	/// no further records arrive.
	pub fn tick(&self, now_millis: i64) -> Vec<FiredWindow> {
		let mut state = self.state.write();
		match &mut *state {
			State::None(_) | State::Counting { .. } => Vec::new(),
			State::Tumbling { instances, .. } | State::Sliding { instances, .. } => {
				drain_due(instances, now_millis, &self.post)
			}
			State::Session { sessions, .. } => {
				let due: Vec<GroupKey> = sessions
					.iter()
					.filter(|(_, inst)| inst.end <= now_millis)
					.map(|(k, _)| k.clone())
					.collect();
				due.into_iter()
					.filter_map(|k| sessions.remove(&k))
					.map(|inst| fire_instance(inst, &self.post))
					.collect()
			}
		}
	}
}

fn align_down(t: i64, size: i64) -> i64 {
	if size <= 0 {
		return t;
	}
	t.div_euclid(size) * size
}

/// The set of window starts, aligned to `slide`, whose `[start, start+size)`
/// interval contains `t` (§3 invariant (b) — a record enters every window
/// whose interval contains it).
fn overlapping_starts(t: i64, size: i64, slide: i64) -> Vec<i64> {
	if slide <= 0 || size <= 0 {
		return vec![align_down(t, size.max(1))];
	}
	let mut starts = Vec::new();
	let mut start = align_down(t, slide);
	while start + size > t {
		starts.push(start);
		start -= slide;
	}
	starts
}

/// Fires every instance in `instances` whose `end` has been crossed by `t`,
/// removing them and returning their finished rows in start order (§5
/// "Window firings are emitted ... in window-start order per group").
fn drain_due(instances: &mut BTreeMap<i64, Instance>, t: i64, post: &PostAggPlan) -> Vec<FiredWindow> {
	let due: Vec<i64> = instances.iter().filter(|(_, inst)| inst.end <= t).map(|(s, _)| *s).collect();
	due.into_iter()
		.filter_map(|start| instances.remove(&start))
		.map(|inst| fire_instance(inst, post))
		.collect()
}

/// Runs the firing protocol (§4.5) on a retiring instance: feeds
/// `window_start`/`window_end` context, snapshots results, and applies
/// post-aggregation.
fn fire_instance(inst: Instance, post: &PostAggPlan) -> FiredWindow {
	inst.aggregator.put("window_start", Value::Int(inst.start));
	inst.aggregator.put("window_end", Value::Int(inst.end));
	let rows = inst
		.aggregator
		.results()
		.into_iter()
		.map(|row| postagg::evaluate(post, &row))
		.collect();
	FiredWindow { rows }
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::plan::{AggregationCall, AggregationInput};
	use std::collections::BTreeMap as Map;
	use std::time::Duration;

	fn obj(pairs: &[(&str, Value)]) -> Value {
		let mut m = Map::new();
		for (k, v) in pairs {
			m.insert((*k).to_owned(), v.clone());
		}
		Value::Object(m)
	}

	fn counting_post(alias: &str) -> PostAggPlan {
		PostAggPlan {
			aggregations: vec![AggregationCall {
				input: AggregationInput::Star,
				kind: "count".into(),
				args: vec![],
				alias: alias.into(),
			}],
			registered_exprs: vec![],
			projections: vec![],
		}
	}

	#[test]
	fn counting_window_fires_after_n_records() {
		let engine = WindowEngine::new(
			WindowSpec::Counting { count: 3 },
			vec![Idiom::parse("device")],
			counting_post("n"),
			None,
			TimeUnit::Millis,
		);
		for i in 0..2 {
			let fired = engine
				.admit(&obj(&[("device", Value::String("sensor1".into()))]))
				.unwrap();
			assert!(fired.is_empty(), "unexpected fire at record {i}");
		}
		let fired =
			engine.admit(&obj(&[("device", Value::String("sensor1".into()))])).unwrap();
		assert_eq!(fired.len(), 1);
		assert_eq!(fired[0].rows.len(), 1);
		assert_eq!(fired[0].rows[0]["n"], Value::UInt(3));
	}

	#[test]
	fn tumbling_window_trigger_fires_all_groups() {
		let engine = WindowEngine::new(
			WindowSpec::Tumbling { size: Duration::from_secs(3) },
			vec![Idiom::parse("device")],
			counting_post("n"),
			None,
			TimeUnit::Millis,
		);
		for _ in 0..3 {
			engine.admit(&obj(&[("device", Value::String("sensor1".into()))])).unwrap();
		}
		for _ in 0..2 {
			engine.admit(&obj(&[("device", Value::String("sensor2".into()))])).unwrap();
		}
		let fired = engine.trigger();
		assert_eq!(fired.len(), 1);
		let rows = &fired[0].rows;
		assert_eq!(rows.len(), 2);
		for row in rows {
			let n = &row["n"];
			let device = &row["device"];
			match device {
				Value::String(s) if s == "sensor1" => assert_eq!(*n, Value::UInt(3)),
				Value::String(s) if s == "sensor2" => assert_eq!(*n, Value::UInt(2)),
				other => panic!("unexpected device {other:?}"),
			}
		}
	}

	#[test]
	fn session_window_fires_on_gap() {
		let engine = WindowEngine::new(
			WindowSpec::Session { gap: Duration::from_millis(100) },
			vec![Idiom::parse("device")],
			counting_post("n"),
			Some(Idiom::parse("ts")),
			TimeUnit::Millis,
		);
		let rec = |ts: i64| obj(&[("device", Value::String("s1".into())), ("ts", Value::Int(ts))]);
		engine.admit(&rec(0)).unwrap();
		engine.admit(&rec(50)).unwrap();
		// Gap exceeded: the first session (2 records) fires now.
		let fired = engine.admit(&rec(500)).unwrap();
		assert_eq!(fired.len(), 1);
		assert_eq!(fired[0].rows[0]["n"], Value::UInt(2));
	}
}

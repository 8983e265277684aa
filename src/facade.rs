//! The public facade (§6): a single-use query engine wrapping the parser,
//! the compiled pipeline and the stream runtime behind the lifecycle
//! `new → execute → emit*/add_sink*/trigger → stop`.
use crate::agg::REGISTRY;
use crate::error::{Error, Result};
use crate::plan::Plan;
use crate::runtime::config::Config;
use crate::runtime::stats::{PersistenceStatsSnapshot, StatsSnapshot};
use crate::runtime::{Row, Runtime, Sink};
use crate::value::Value;
use parking_lot::RwLock;
use std::sync::Arc;

enum State {
	Pending { pending_sinks: Vec<Sink> },
	Running(Arc<Runtime>),
}

/// A point-in-time view combining the plain counters with a little runtime
/// introspection (§6 `detailed_stats`).
#[derive(Clone, Debug, Default)]
pub struct DetailedStats {
	pub stats: StatsSnapshot,
	pub is_aggregating: bool,
	pub ingress_capacity: usize,
}

/// The embeddable streaming SQL engine. One instance compiles and runs
/// exactly one query (§3 "Lifecycle").
pub struct Engine {
	config: Config,
	state: RwLock<State>,
}

impl Default for Engine {
	fn default() -> Self {
		Engine::new()
	}
}

impl Engine {
	pub fn new() -> Self {
		Engine::with_config(Config::default())
	}

	/// Builds an engine whose runtime, once `execute`d, uses `config`
	/// instead of the environment-derived defaults (§AMBIENT "Per-query
	/// configuration ... is an explicit `Config` struct").
	pub fn with_config(config: Config) -> Self {
		Engine { config, state: RwLock::new(State::Pending { pending_sinks: Vec::new() }) }
	}

	fn runtime(&self) -> Result<Arc<Runtime>> {
		match &*self.state.read() {
			State::Running(rt) => Ok(Arc::clone(rt)),
			State::Pending { .. } => Err(Error::NotInitialized),
		}
	}

	/// Compiles `sql` and starts the runtime. Legal exactly once; a second
	/// call (including a concurrent racing call) fails with
	/// `AlreadyExecuted` (§5 "Exactly one `Execute` succeeds").
	pub fn execute(&self, sql: &str) -> Result<()> {
		if matches!(&*self.state.read(), State::Running(_)) {
			return Err(Error::AlreadyExecuted);
		}

		let plan = crate::parser::parse(sql)?;
		validate_aggregates(&plan)?;
		let runtime = Arc::new(Runtime::new(&plan, self.config.clone())?);

		let mut guard = self.state.write();
		if matches!(&*guard, State::Running(_)) {
			drop(guard);
			runtime.stop();
			return Err(Error::AlreadyExecuted);
		}
		let pending_sinks = match std::mem::replace(&mut *guard, State::Running(Arc::clone(&runtime)))
		{
			State::Pending { pending_sinks } => pending_sinks,
			State::Running(_) => unreachable!("checked above"),
		};
		drop(guard);
		for sink in pending_sinks {
			runtime.add_sink(sink);
		}
		Ok(())
	}

	/// Enqueues `record`, honoring the configured overflow policy (§4.9).
	pub async fn emit(&self, record: Value) -> Result<()> {
		self.runtime()?.emit(record).await
	}

	/// Runs `record` through the pipeline inline and returns its single
	/// result row, bypassing the channels. Only valid for non-aggregating
	/// queries (§4.8 `EmitSync`).
	pub fn emit_sync(&self, record: Value) -> Result<Option<Row>> {
		self.runtime()?.emit_sync(record)
	}

	/// Registers a result consumer, callable before or after `execute`
	/// (§6 `add_sink`).
	pub fn add_sink(&self, sink: Sink) {
		let mut guard = self.state.write();
		match &mut *guard {
			State::Running(rt) => rt.add_sink(sink),
			State::Pending { pending_sinks } => pending_sinks.push(sink),
		}
	}

	/// Registers the best-effort tabular diagnostic sink (§6
	/// `print_table`).
	pub fn print_table(&self) {
		self.add_sink(crate::table::print_table_sink());
	}

	/// A read-only channel of result rows (§6 `to_channel`).
	pub fn to_channel(&self) -> Result<async_channel::Receiver<Row>> {
		Ok(self.runtime()?.to_channel())
	}

	/// Forces every open window instance to fire immediately (§6
	/// `trigger`).
	pub fn trigger(&self) -> Result<()> {
		self.runtime()?.trigger();
		Ok(())
	}

	/// Shuts the engine down. Safe and idempotent before or after
	/// `execute` (§3 "Lifecycle").
	pub fn stop(&self) {
		if let State::Running(rt) = &*self.state.read() {
			rt.stop();
		}
	}

	pub fn stats(&self) -> StatsSnapshot {
		match &*self.state.read() {
			State::Running(rt) => rt.stats(),
			State::Pending { .. } => StatsSnapshot::default(),
		}
	}

	pub fn detailed_stats(&self) -> DetailedStats {
		match &*self.state.read() {
			State::Running(rt) => DetailedStats {
				stats: rt.stats(),
				is_aggregating: rt.is_aggregating(),
				ingress_capacity: rt.nominal_capacity(),
			},
			State::Pending { .. } => DetailedStats::default(),
		}
	}

	pub fn persistence_stats(&self) -> PersistenceStatsSnapshot {
		match &*self.state.read() {
			State::Running(rt) => rt.persistence_stats(),
			State::Pending { .. } => PersistenceStatsSnapshot::default(),
		}
	}

	/// Whether the compiled query aggregates (`GROUP BY`/windowed) rather
	/// than projecting per record (§6 `is_aggregation_query`).
	pub fn is_aggregation_query(&self) -> Result<bool> {
		Ok(self.runtime()?.is_aggregating())
	}
}

/// Rejects a query whose top-level aggregations name a kind the registry
/// does not recognise, surfacing `UnknownAggregate` at `execute` time
/// rather than on the first matching record (§7).
fn validate_aggregates(plan: &Plan) -> Result<()> {
	for call in &plan.aggregations {
		if !REGISTRY.contains(&call.kind) {
			return Err(Error::UnknownAggregate(call.kind.clone()));
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn execute_twice_fails() {
		let engine = Engine::new();
		engine.execute("SELECT device FROM stream").unwrap();
		assert!(matches!(engine.execute("SELECT device FROM stream"), Err(Error::AlreadyExecuted)));
	}

	#[test]
	fn emit_before_execute_fails() {
		let engine = Engine::new();
		assert!(matches!(engine.emit_sync(Value::Null), Err(Error::NotInitialized)));
	}

	#[test]
	fn unknown_aggregate_rejected_by_validation() {
		use crate::idiom::Idiom;
		use crate::plan::{AggregationCall, AggregationInput, WindowSpec, WithOptions};
		let plan = Plan {
			group_fields: vec![Idiom::parse("device")],
			window: WindowSpec::None,
			aggregations: vec![AggregationCall {
				input: AggregationInput::Star,
				kind: "not_a_real_kind".into(),
				args: vec![],
				alias: "x".into(),
			}],
			scalar_projections: vec![],
			post_projections: vec![],
			selected_aliases: vec![],
			where_clause: None,
			having: None,
			options: WithOptions::default(),
		};
		assert!(matches!(validate_aggregates(&plan), Err(Error::UnknownAggregate(_))));
	}

	#[test]
	fn stop_before_execute_is_a_noop() {
		let engine = Engine::new();
		engine.stop();
		engine.stop();
	}
}

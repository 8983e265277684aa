//! The stream runtime (§4.8): ingress/worker/results wiring, the window
//! timer, sink fan-out and overflow-policy enforcement.
//!
//! Grounded on the teacher's `dbs/iterator.rs` parallel execution shape —
//! `executor::Executor::new()`, bounded `channel`s, `e.spawn(...).detach()`
//! — generalised from "iterate one document set to completion" to "run
//! forever, admitting records until `Stop`".
pub mod admission;
pub mod config;
pub mod stats;

use crate::error::{Error, Result};
use crate::expr::{self, Expr};
use crate::idiom::Idiom;
use crate::persist::PersistenceManager;
use crate::plan::{Plan, Projection, TimeUnit};
use crate::postagg;
use crate::value::Value;
use crate::window::WindowEngine;
use admission::Admission;
use async_executor::Executor;
use config::{Config, OverflowPolicy};
use futures::pin_mut;
use parking_lot::{Mutex, RwLock};
use stats::{PersistenceStatsSnapshot, Stats, StatsSnapshot};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

pub type Row = BTreeMap<String, Value>;
pub type Sink = Box<dyn Fn(&[Row]) + Send + Sync>;

enum Mode {
	Scalar { projections: Vec<Projection> },
	Aggregating { window: WindowEngine, having: Option<Expr> },
}

struct Compiled {
	where_clause: Option<Expr>,
	mode: Mode,
}

impl Compiled {
	fn is_aggregating(&self) -> bool {
		matches!(self.mode, Mode::Aggregating { .. })
	}
}

fn compile(plan: &Plan) -> Compiled {
	let mode = if plan.is_aggregating() {
		let post = postagg::compile(plan);
		let timestamp_field = plan.options.timestamp_field.as_deref().map(Idiom::parse);
		let time_unit = plan.options.time_unit.unwrap_or(TimeUnit::Millis);
		let window = WindowEngine::new(
			plan.window.clone(),
			plan.group_fields.clone(),
			post,
			timestamp_field,
			time_unit,
		);
		Mode::Aggregating { window, having: plan.having.clone() }
	} else {
		Mode::Scalar { projections: plan.scalar_projections.clone() }
	};
	Compiled { where_clause: plan.where_clause.clone(), mode }
}

/// Applies `WHERE`, then either scalar-projects the record or admits it
/// into the window engine, applying `HAVING` to any rows a window firing
/// produces (§4.8 "per record" pipeline).
fn process_record(compiled: &Compiled, record: &Value) -> Result<Vec<Row>> {
	if let Some(pred) = &compiled.where_clause {
		if !expr::eval_predicate(pred, record) {
			return Ok(Vec::new());
		}
	}
	match &compiled.mode {
		Mode::Scalar { projections } => {
			let mut row = Row::new();
			for Projection { expr: e, alias } in projections {
				let value = expr::eval(e, record).unwrap_or(Value::Null);
				row.insert(alias.clone(), value);
			}
			Ok(vec![row])
		}
		Mode::Aggregating { window, having } => {
			let fired = window.admit(record)?;
			let mut out = Vec::new();
			for fw in fired {
				out.extend(apply_having(having.as_ref(), fw.rows));
			}
			Ok(out)
		}
	}
}

fn apply_having(having: Option<&Expr>, rows: Vec<Row>) -> Vec<Row> {
	match having {
		None => rows,
		Some(pred) => rows
			.into_iter()
			.filter(|row| expr::eval_predicate(pred, &Value::Object(row.clone())))
			.collect(),
	}
}

struct Shared {
	compiled: Compiled,
	results_tx: async_channel::Sender<Row>,
	stats: Stats,
	sinks: RwLock<Vec<Sink>>,
	sink_admission: Admission,
	executor: Arc<Executor<'static>>,
}

async fn dispatch(shared: &Arc<Shared>, rows: Vec<Row>) {
	if rows.is_empty() {
		return;
	}
	shared.stats.record_output(rows.len() as u64);
	for row in &rows {
		if shared.results_tx.send(row.clone()).await.is_err() {
			break;
		}
	}
	spawn_sinks(shared, rows).await;
}

fn dispatch_blocking(shared: &Arc<Shared>, rows: Vec<Row>) {
	if rows.is_empty() {
		return;
	}
	shared.stats.record_output(rows.len() as u64);
	for row in &rows {
		if shared.results_tx.send_blocking(row.clone()).is_err() {
			break;
		}
	}
	spawn_sinks_blocking(shared, rows);
}

async fn spawn_sinks(shared: &Arc<Shared>, rows: Vec<Row>) {
	if shared.sinks.read().is_empty() {
		return;
	}
	shared.sink_admission.acquire().await;
	let shared = Arc::clone(shared);
	shared
		.executor
		.spawn(async move {
			run_sinks(&shared, &rows);
			shared.sink_admission.release();
		})
		.detach();
}

fn spawn_sinks_blocking(shared: &Arc<Shared>, rows: Vec<Row>) {
	if shared.sinks.read().is_empty() {
		return;
	}
	shared.sink_admission.acquire_blocking();
	let shared = Arc::clone(shared);
	shared
		.executor
		.spawn(async move {
			run_sinks(&shared, &rows);
			shared.sink_admission.release();
		})
		.detach();
}

fn run_sinks(shared: &Arc<Shared>, rows: &[Row]) {
	for sink in shared.sinks.read().iter() {
		sink(rows);
	}
}

async fn worker_loop(
	shared: Arc<Shared>,
	ingress_rx: async_channel::Receiver<Value>,
	admission: Arc<Admission>,
) {
	while let Ok(record) = ingress_rx.recv().await {
		match process_record(&shared.compiled, &record) {
			Ok(rows) => dispatch(&shared, rows).await,
			Err(err) => {
				warn!(%err, "record processing failed, dropping record");
				shared.stats.record_rejected();
			}
		}
		admission.release();
	}
	debug!("worker task exiting: ingress closed");
}

/// Creates a receiver that fires once after `d` has elapsed, driven by a
/// dedicated OS thread. There is no `async-io`/timer reactor in the
/// dependency stack, so time-based waits compose with `async-channel`'s own
/// (reactor-free) waking this way instead.
fn sleep_signal(d: Duration) -> async_channel::Receiver<()> {
	let (tx, rx) = async_channel::bounded(1);
	thread::spawn(move || {
		thread::sleep(d);
		let _ = tx.try_send(());
	});
	rx
}

fn spawn_window_timer(
	shared: Arc<Shared>,
	tick: Duration,
	shutdown: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
	thread::spawn(move || {
		while !shutdown.load(Ordering::Relaxed) {
			thread::sleep(tick);
			if shutdown.load(Ordering::Relaxed) {
				break;
			}
			if let Mode::Aggregating { window, having } = &shared.compiled.mode {
				let now = chrono::Utc::now().timestamp_millis();
				let fired = window.tick(now);
				for fw in fired {
					let rows = apply_having(having.as_ref(), fw.rows);
					dispatch_blocking(&shared, rows);
				}
			}
		}
	})
}

fn spawn_flush_thread(
	manager: Arc<PersistenceManager>,
	shutdown: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
	thread::spawn(move || {
		while !shutdown.load(Ordering::Relaxed) {
			thread::sleep(manager.flush_interval());
			if let Err(err) = manager.flush() {
				warn!(%err, "persistence flush failed");
			}
		}
	})
}

/// The running instance of one compiled query: everything `Engine::execute`
/// builds and `Engine::stop` tears down.
pub struct Runtime {
	shared: Arc<Shared>,
	ingress_tx: async_channel::Sender<Value>,
	results_rx: async_channel::Receiver<Row>,
	admission: Arc<Admission>,
	persistence: Option<Arc<PersistenceManager>>,
	nominal_capacity: usize,
	overflow: OverflowPolicy,
	emit_on_close: bool,
	shutdown: Arc<AtomicBool>,
	driver_stop_tx: async_channel::Sender<()>,
	driver_thread: Mutex<Option<thread::JoinHandle<()>>>,
	window_timer_thread: Mutex<Option<thread::JoinHandle<()>>>,
	flush_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Runtime {
	pub fn new(plan: &Plan, config: Config) -> Result<Self> {
		config.validate()?;

		let compiled = compile(plan);
		let is_aggregating = compiled.is_aggregating();

		let persistence = match &config.persistence {
			Some(pc) => Some(Arc::new(PersistenceManager::new(pc.clone())?)),
			None => None,
		};

		let executor = Arc::new(Executor::new());
		let (ingress_tx, ingress_rx) = async_channel::bounded(config.ingress_capacity.max(1));
		let (results_tx, results_rx) = async_channel::bounded(config.results_capacity.max(1));

		let admission_bound = match &config.overflow {
			OverflowPolicy::Expand { max_capacity } => {
				(*max_capacity).max(config.ingress_capacity)
			}
			_ => config.ingress_capacity,
		};
		let admission = Arc::new(Admission::new(config.ingress_capacity, admission_bound));
		let sink_admission = Admission::new(config.sink_pool_size.max(1), config.sink_pool_size.max(1));

		let shared = Arc::new(Shared {
			compiled,
			results_tx,
			stats: Stats::default(),
			sinks: RwLock::new(Vec::new()),
			sink_admission,
			executor: Arc::clone(&executor),
		});

		let shutdown = Arc::new(AtomicBool::new(false));
		let (driver_stop_tx, driver_stop_rx) = async_channel::bounded::<()>(1);
		let driver_executor = Arc::clone(&executor);
		let driver_thread = thread::spawn(move || {
			futures::executor::block_on(driver_executor.run(async move {
				let _ = driver_stop_rx.recv().await;
			}));
		});

		for _ in 0..config.worker_count.max(1) {
			let shared = Arc::clone(&shared);
			let ingress_rx = ingress_rx.clone();
			let admission = Arc::clone(&admission);
			executor.spawn(worker_loop(shared, ingress_rx, admission)).detach();
		}

		let window_timer_thread = if is_aggregating {
			Some(spawn_window_timer(Arc::clone(&shared), config.window_tick, Arc::clone(&shutdown)))
		} else {
			None
		};

		let flush_thread = persistence
			.as_ref()
			.map(|mgr| spawn_flush_thread(Arc::clone(mgr), Arc::clone(&shutdown)));

		// Reprocess any records a previous run spilled to disk before
		// serving new ones, preserving their original arrival order
		// (§4.9 `LoadAndReprocessPersistedData`).
		if let Some(mgr) = &persistence {
			let ingress_tx = ingress_tx.clone();
			let stats_ref = &shared.stats;
			let replayed = mgr.load_and_reprocess(|record| {
				ingress_tx.send_blocking(record).map_err(|_| Error::Stopped)?;
				stats_ref.record_replayed();
				Ok(())
			})?;
			if replayed > 0 {
				debug!(replayed, "reprocessed persisted records from a previous run");
			}
		}

		Ok(Runtime {
			shared,
			ingress_tx,
			results_rx,
			admission,
			persistence,
			nominal_capacity: config.ingress_capacity,
			overflow: config.overflow,
			emit_on_close: config.emit_on_close,
			shutdown,
			driver_stop_tx,
			driver_thread: Mutex::new(Some(driver_thread)),
			window_timer_thread: Mutex::new(window_timer_thread),
			flush_thread: Mutex::new(flush_thread),
		})
	}

	pub fn is_aggregating(&self) -> bool {
		self.shared.compiled.is_aggregating()
	}

	async fn send_to_ingress(&self, record: Value) -> Result<()> {
		self.ingress_tx.send(record).await.map_err(|_| Error::Stopped)
	}

	/// Enqueues `record`, applying the configured overflow policy when the
	/// ingress is at capacity (§4.9).
	pub async fn emit(&self, record: Value) -> Result<()> {
		if self.shutdown.load(Ordering::Relaxed) {
			return Err(Error::Stopped);
		}
		self.shared.stats.record_input();
		match &self.overflow {
			OverflowPolicy::Drop => {
				if self.admission.try_acquire() {
					self.send_to_ingress(record).await
				} else {
					self.shared.stats.record_dropped();
					Ok(())
				}
			}
			OverflowPolicy::Block { timeout } => {
				if self.admission.try_acquire() {
					return self.send_to_ingress(record).await;
				}
				let timeout_rx = sleep_signal(*timeout);
				let acquire_fut = self.admission.recv();
				let timeout_fut = timeout_rx.recv();
				pin_mut!(acquire_fut, timeout_fut);
				match futures::future::select(acquire_fut, timeout_fut).await {
					futures::future::Either::Left((Ok(()), _)) => {
						self.send_to_ingress(record).await
					}
					futures::future::Either::Left((Err(_), _)) => Err(Error::Stopped),
					futures::future::Either::Right(_) => {
						self.shared.stats.record_backpressure_timeout();
						Err(Error::Backpressure)
					}
				}
			}
			OverflowPolicy::Expand { max_capacity } => {
				if self.admission.try_acquire() {
					return self.send_to_ingress(record).await;
				}
				self.admission.try_expand(*max_capacity, 1);
				self.admission.acquire().await;
				self.send_to_ingress(record).await
			}
			OverflowPolicy::Persist => {
				if self.admission.try_acquire() {
					return self.send_to_ingress(record).await;
				}
				match &self.persistence {
					Some(mgr) => {
						mgr.append(&record)?;
						self.shared.stats.record_persisted();
						Ok(())
					}
					None => Err(Error::ConfigInvalid(
						"overflow strategy `persist` requires a persistence directory".into(),
					)),
				}
			}
		}
	}

	/// Runs `record` through the pipeline inline, bypassing the channels
	/// (§4.8 `EmitSync`). Only valid for non-aggregating queries; returns
	/// `None` when `WHERE` rejects the record.
	pub fn emit_sync(&self, record: Value) -> Result<Option<Row>> {
		if self.is_aggregating() {
			return Err(Error::SynchronousUnsupported);
		}
		self.shared.stats.record_input();
		let mut rows = process_record(&self.shared.compiled, &record)?;
		if rows.is_empty() {
			return Ok(None);
		}
		self.shared.stats.record_output(1);
		Ok(Some(rows.remove(0)))
	}

	pub fn add_sink(&self, sink: Sink) {
		self.shared.sinks.write().push(sink);
	}

	pub fn to_channel(&self) -> async_channel::Receiver<Row> {
		self.results_rx.clone()
	}

	/// Forces every open window instance to fire immediately (§4.5
	/// `Trigger`).
	pub fn trigger(&self) {
		if let Mode::Aggregating { window, having } = &self.shared.compiled.mode {
			let fired = window.trigger();
			for fw in fired {
				let rows = apply_having(having.as_ref(), fw.rows);
				dispatch_blocking(&self.shared, rows);
			}
		}
	}

	pub fn stats(&self) -> StatsSnapshot {
		self.shared.stats.snapshot()
	}

	pub fn persistence_stats(&self) -> PersistenceStatsSnapshot {
		self.persistence.as_ref().map(|p| p.stats.snapshot()).unwrap_or_default()
	}

	pub fn nominal_capacity(&self) -> usize {
		self.nominal_capacity
	}

	/// Shuts the runtime down: closes the ingress, optionally flushes any
	/// open windows, closes the results channel and stops every background
	/// task. Idempotent (§5 "Cancellation").
	pub fn stop(&self) {
		if self.shutdown.swap(true, Ordering::SeqCst) {
			return;
		}
		self.ingress_tx.close();

		if self.emit_on_close {
			if let Mode::Aggregating { window, having } = &self.shared.compiled.mode {
				if window.has_open_instances() {
					let fired = window.trigger();
					for fw in fired {
						let rows = apply_having(having.as_ref(), fw.rows);
						dispatch_blocking(&self.shared, rows);
					}
				}
			}
		}

		self.shared.results_tx.close();
		let _ = self.driver_stop_tx.send_blocking(());

		if let Some(handle) = self.window_timer_thread.lock().take() {
			let _ = handle.join();
		}
		if let Some(handle) = self.flush_thread.lock().take() {
			let _ = handle.join();
		}
		if let Some(handle) = self.driver_thread.lock().take() {
			let _ = handle.join();
		}
	}
}

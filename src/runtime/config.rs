//! Per-query runtime configuration: overflow policy, channel capacities and
//! persistence settings (§4.9, §6). Deliberately a plain struct passed to
//! (or built by) the facade rather than a second implicit global — see
//! `SPEC_FULL.md`'s "Configuration" ambient-stack section.
use std::path::PathBuf;
use std::time::Duration;

use crate::cnf;

/// The strategy applied when the ingress channel is full (§4.9).
#[derive(Clone, Debug)]
pub enum OverflowPolicy {
	/// Block the producer until space frees up or `timeout` elapses.
	Block { timeout: Duration },
	/// Discard the record and increment `dropped`.
	Drop,
	/// Temporarily enlarge the channel up to `max_capacity`.
	Expand { max_capacity: usize },
	/// Spill the record to the persistence manager.
	Persist,
}

impl Default for OverflowPolicy {
	fn default() -> Self {
		OverflowPolicy::Block { timeout: Duration::from_millis(*cnf::DEFAULT_BACKPRESSURE_TIMEOUT_MS) }
	}
}

/// Persistence manager settings (§4.9, §6 "Persistence file format").
#[derive(Clone, Debug)]
pub struct PersistenceConfig {
	pub directory: PathBuf,
	pub max_file_size: u64,
	pub flush_interval: Duration,
	pub io_retry_count: u32,
	pub io_retry_interval: Duration,
}

impl PersistenceConfig {
	pub fn new(directory: impl Into<PathBuf>) -> Self {
		PersistenceConfig {
			directory: directory.into(),
			max_file_size: *cnf::DEFAULT_MAX_FILE_SIZE,
			flush_interval: Duration::from_millis(*cnf::DEFAULT_FLUSH_INTERVAL_MS),
			io_retry_count: *cnf::DEFAULT_IO_RETRY_COUNT,
			io_retry_interval: Duration::from_millis(*cnf::DEFAULT_IO_RETRY_INTERVAL_MS),
		}
	}
}

/// Runtime configuration for one [`crate::Engine`] instance.
#[derive(Clone, Debug)]
pub struct Config {
	pub ingress_capacity: usize,
	pub results_capacity: usize,
	pub worker_count: usize,
	pub sink_pool_size: usize,
	pub overflow: OverflowPolicy,
	pub persistence: Option<PersistenceConfig>,
	pub window_tick: Duration,
	/// Whether any window still holding unfired data should be flushed to
	/// `results` on `Stop` (§5 "Cancellation").
	pub emit_on_close: bool,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			ingress_capacity: *cnf::DEFAULT_INGRESS_CAPACITY,
			results_capacity: *cnf::DEFAULT_RESULTS_CAPACITY,
			worker_count: *cnf::DEFAULT_WORKER_COUNT,
			sink_pool_size: *cnf::DEFAULT_SINK_POOL_SIZE,
			overflow: OverflowPolicy::default(),
			persistence: None,
			window_tick: Duration::from_millis(100),
			emit_on_close: true,
		}
	}
}

impl Config {
	/// Validates cross-field invariants not expressible in the type alone
	/// (§7 `ConfigInvalid`): `overflow = persist` requires `persistence` to
	/// be configured.
	pub fn validate(&self) -> crate::error::Result<()> {
		if matches!(self.overflow, OverflowPolicy::Persist) && self.persistence.is_none() {
			return Err(crate::error::Error::ConfigInvalid(
				"overflow strategy `persist` requires a persistence directory to be configured"
					.into(),
			));
		}
		Ok(())
	}
}

//! Monotonic counters for the stream runtime (§4.8 `stats`), accessed via
//! atomics without locking (§5 "Shared-resource policy").
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Stats {
	input: AtomicU64,
	output: AtomicU64,
	dropped: AtomicU64,
	persisted: AtomicU64,
	replayed: AtomicU64,
	rejected: AtomicU64,
	backpressure_timeouts: AtomicU64,
}

/// A point-in-time snapshot of [`Stats`], returned by
/// `Engine::stats`/`detailed_stats`.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct StatsSnapshot {
	pub input: u64,
	pub output: u64,
	pub dropped: u64,
	pub persisted: u64,
	pub replayed: u64,
	pub rejected: u64,
	pub backpressure_timeouts: u64,
}

impl Stats {
	pub fn record_input(&self) {
		self.input.fetch_add(1, Ordering::Relaxed);
	}
	pub fn record_output(&self, n: u64) {
		self.output.fetch_add(n, Ordering::Relaxed);
	}
	pub fn record_dropped(&self) {
		self.dropped.fetch_add(1, Ordering::Relaxed);
	}
	pub fn record_persisted(&self) {
		self.persisted.fetch_add(1, Ordering::Relaxed);
	}
	pub fn record_replayed(&self) {
		self.replayed.fetch_add(1, Ordering::Relaxed);
	}
	pub fn record_rejected(&self) {
		self.rejected.fetch_add(1, Ordering::Relaxed);
	}
	pub fn record_backpressure_timeout(&self) {
		self.backpressure_timeouts.fetch_add(1, Ordering::Relaxed);
	}

	pub fn snapshot(&self) -> StatsSnapshot {
		StatsSnapshot {
			input: self.input.load(Ordering::Relaxed),
			output: self.output.load(Ordering::Relaxed),
			dropped: self.dropped.load(Ordering::Relaxed),
			persisted: self.persisted.load(Ordering::Relaxed),
			replayed: self.replayed.load(Ordering::Relaxed),
			rejected: self.rejected.load(Ordering::Relaxed),
			backpressure_timeouts: self.backpressure_timeouts.load(Ordering::Relaxed),
		}
	}
}

/// Persistence-manager-specific counters, reported separately via
/// `Engine::persistence_stats` (§6).
#[derive(Default)]
pub struct PersistenceStats {
	segments_written: AtomicU64,
	segments_replayed: AtomicU64,
	io_retries: AtomicU64,
	io_failures: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct PersistenceStatsSnapshot {
	pub segments_written: u64,
	pub segments_replayed: u64,
	pub io_retries: u64,
	pub io_failures: u64,
}

impl PersistenceStats {
	pub fn record_segment_written(&self) {
		self.segments_written.fetch_add(1, Ordering::Relaxed);
	}
	pub fn record_segment_replayed(&self) {
		self.segments_replayed.fetch_add(1, Ordering::Relaxed);
	}
	pub fn record_io_retry(&self) {
		self.io_retries.fetch_add(1, Ordering::Relaxed);
	}
	pub fn record_io_failure(&self) {
		self.io_failures.fetch_add(1, Ordering::Relaxed);
	}

	pub fn snapshot(&self) -> PersistenceStatsSnapshot {
		PersistenceStatsSnapshot {
			segments_written: self.segments_written.load(Ordering::Relaxed),
			segments_replayed: self.segments_replayed.load(Ordering::Relaxed),
			io_retries: self.io_retries.load(Ordering::Relaxed),
			io_failures: self.io_failures.load(Ordering::Relaxed),
		}
	}
}

//! Process-wide configuration constants, overridable through environment
//! variables. Mirrors the teacher crate's `cnf` module: lazily-parsed
//! `once_cell::sync::Lazy` statics with a hardcoded fallback default.
use once_cell::sync::Lazy;

/// Default capacity of the ingress channel when a query does not override it.
pub static DEFAULT_INGRESS_CAPACITY: Lazy<usize> =
	lazy_env_parse!("STREAMQL_INGRESS_CAPACITY", usize, 1024);

/// Default capacity of the results channel.
pub static DEFAULT_RESULTS_CAPACITY: Lazy<usize> =
	lazy_env_parse!("STREAMQL_RESULTS_CAPACITY", usize, 1024);

/// Default number of worker tasks processing the ingress channel.
pub static DEFAULT_WORKER_COUNT: Lazy<usize> =
	lazy_env_parse!("STREAMQL_WORKER_COUNT", usize, 4);

/// Maximum number of sink invocations that may be in flight concurrently.
pub static DEFAULT_SINK_POOL_SIZE: Lazy<usize> =
	lazy_env_parse!("STREAMQL_SINK_POOL_SIZE", usize, 8);

/// Upper bound an `expand` overflow strategy may grow the ingress channel to.
pub static DEFAULT_EXPAND_CAP: Lazy<usize> =
	lazy_env_parse!("STREAMQL_EXPAND_CAP", usize, 65536);

/// Default segment rollover size, in bytes, for the persistence manager.
pub static DEFAULT_MAX_FILE_SIZE: Lazy<u64> =
	lazy_env_parse!("STREAMQL_MAX_FILE_SIZE", u64, 64 * 1024 * 1024);

/// Default interval, in milliseconds, at which buffered persisted writes are flushed.
pub static DEFAULT_FLUSH_INTERVAL_MS: Lazy<u64> =
	lazy_env_parse!("STREAMQL_FLUSH_INTERVAL_MS", u64, 250);

/// Default number of retries for a failing persistence I/O operation.
pub static DEFAULT_IO_RETRY_COUNT: Lazy<u32> = lazy_env_parse!("STREAMQL_IO_RETRY_COUNT", u32, 3);

/// Default backoff, in milliseconds, between persistence I/O retries.
pub static DEFAULT_IO_RETRY_INTERVAL_MS: Lazy<u64> =
	lazy_env_parse!("STREAMQL_IO_RETRY_INTERVAL_MS", u64, 50);

/// Default timeout, in milliseconds, for the `block` overflow strategy.
pub static DEFAULT_BACKPRESSURE_TIMEOUT_MS: Lazy<u64> =
	lazy_env_parse!("STREAMQL_BACKPRESSURE_TIMEOUT_MS", u64, 5000);

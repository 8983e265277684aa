//! `streamql`: an embeddable streaming SQL engine over schemaless records.
//!
//! A [`Engine`] compiles one SQL query — a scalar `SELECT ... WHERE ...`
//! projection, or a `GROUP BY`/windowed aggregation with tumbling, sliding,
//! session or counting windows — and runs it against an unbounded sequence
//! of [`Value`] records fed through [`Engine::emit`]. Results are read back
//! either through [`Engine::to_channel`] or through sinks registered with
//! [`Engine::add_sink`].
//!
//! ```ignore
//! let engine = Engine::new();
//! engine.execute("SELECT device, AVG(temperature) AS avg_t FROM stream GROUP BY device, TumblingWindow('10s')")?;
//! let results = engine.to_channel()?;
//! engine.emit(record).await?;
//! ```
#[macro_use]
extern crate tracing;

#[macro_use]
mod mac;

mod cnf;
mod error;
mod expr;
mod idiom;
mod plan;
mod value;

mod agg;
mod facade;
mod parser;
mod persist;
mod postagg;
mod runtime;
mod table;
mod window;

pub use error::{Error, Result};
pub use expr::{BinaryOp, Expr};
pub use facade::{DetailedStats, Engine};
pub use idiom::Idiom;
pub use plan::{AggregationCall, AggregationInput, Plan, TimeUnit, WindowSpec, WithOptions};
pub use runtime::config::{Config, OverflowPolicy, PersistenceConfig};
pub use runtime::stats::{PersistenceStatsSnapshot, StatsSnapshot};
pub use runtime::Row;
pub use value::Value;

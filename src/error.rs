use thiserror::Error;

/// The error type returned by every fallible `streamql` operation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	#[error("failed to parse query: {0}")]
	Parse(String),

	#[error("invalid configuration: {0}")]
	ConfigInvalid(String),

	#[error("Execute has already been called on this engine")]
	AlreadyExecuted,

	#[error("the engine has not been initialised; call Execute first")]
	NotInitialized,

	#[error("EmitSync is not supported for aggregating queries")]
	SynchronousUnsupported,

	#[error("group field `{0}` is missing from the record")]
	GroupFieldMissing(String),

	#[error("group field `{0}` is null")]
	GroupFieldNull(String),

	#[error("could not coerce value to the required type: {0}")]
	TypeCoercion(String),

	#[error("unknown aggregate function `{0}`")]
	UnknownAggregate(String),

	#[error("ingress is full and the backpressure timeout elapsed")]
	Backpressure,

	#[error("persistence I/O failure: {0}")]
	PersistenceIO(String),

	#[error("expression evaluation failed: {0}")]
	ExpressionEval(String),

	#[error("the engine has been stopped")]
	Stopped,

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error("malformed persisted record: {0}")]
	Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error(transparent)]
	Redis(#[from] redis::RedisError),
	#[error(transparent)]
	Qdrant(#[from] Box<qdrant_client::QdrantError>),
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Already exists: {0}")]
	AlreadyExists(String),
	#[error("Operation {operation} is not supported by the {backend} backend.")]
	Unsupported { operation: &'static str, backend: &'static str },
	#[error("Embedding dimension {actual} does not match configured dimension {expected}.")]
	DimensionMismatch { expected: u32, actual: usize },
	#[error("Serialization failed: {0}")]
	Serialization(String),
	#[error("Operation {operation} timed out after {timeout_ms}ms.")]
	Timeout { operation: &'static str, timeout_ms: u64 },
	#[error("Backend error: {0}")]
	Backend(String),
}
impl Error {
	pub fn unsupported(operation: &'static str, backend: &'static str) -> Self {
		Self::Unsupported { operation, backend }
	}

	/// Whether a retry of an idempotent request could plausibly succeed.
	pub fn is_transient(&self) -> bool {
		match self {
			Self::Sqlx(err) => matches!(
				err,
				sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
			),
			Self::Redis(err) =>
				err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal(),
			Self::Qdrant(err) => {
				let message = err.to_string().to_lowercase();

				message.contains("transport")
					|| message.contains("connection")
					|| message.contains("timed out")
			},
			Self::Timeout { .. } => true,
			_ => false,
		}
	}
}
impl From<qdrant_client::QdrantError> for Error {
	fn from(err: qdrant_client::QdrantError) -> Self {
		Self::Qdrant(Box::new(err))
	}
}
impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Self::Serialization(err.to_string())
	}
}

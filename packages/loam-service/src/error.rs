pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Invalid state: {message}")]
	InvalidState { message: String },
	#[error("Transaction operation {index} failed: {message}")]
	TransactionFailed { index: usize, message: String },
	#[error("Serialization error: {message}")]
	Serialization { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl From<loam_storage::Error> for Error {
	fn from(err: loam_storage::Error) -> Self {
		match err {
			loam_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			loam_storage::Error::NotFound(message) => Self::NotFound { message },
			loam_storage::Error::Serialization(message) => Self::Serialization { message },
			other => Self::Storage { message: other.to_string() },
		}
	}
}
impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Self::Serialization { message: err.to_string() }
	}
}

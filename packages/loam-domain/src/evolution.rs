use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Append-only audit entry recording one change to a memory.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MemoryEvolution {
	pub id: String,
	pub memory_id: String,
	pub timestamp: i64,
	pub change_type: String,
	pub reason: Option<String>,
	pub details: Value,
}
impl MemoryEvolution {
	pub fn new(memory_id: &str, change_type: &str, reason: Option<&str>, timestamp: i64) -> Self {
		Self {
			id: Uuid::new_v4().to_string(),
			memory_id: memory_id.to_string(),
			timestamp,
			change_type: change_type.to_string(),
			reason: reason.map(str::to_string),
			details: Value::Object(Default::default()),
		}
	}
}

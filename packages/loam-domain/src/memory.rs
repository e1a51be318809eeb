use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clock;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
	Working,
	Episodic,
	Semantic,
	Procedural,
}
impl MemoryType {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Working => "working",
			Self::Episodic => "episodic",
			Self::Semantic => "semantic",
			Self::Procedural => "procedural",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"working" => Some(Self::Working),
			"episodic" => Some(Self::Episodic),
			"semantic" => Some(Self::Semantic),
			"procedural" => Some(Self::Procedural),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
	Active,
	Archived,
}
impl MemoryStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Active => "active",
			Self::Archived => "archived",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"active" => Some(Self::Active),
			"archived" => Some(Self::Archived),
			_ => None,
		}
	}
}

/// A typed, scored content record owned by `(user_id, agent_id)`.
///
/// Timestamps are milliseconds since the Unix epoch. `resonance` starts at 1.0
/// and is adjusted by the decay pass and by access reinforcement.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MemoryRecord {
	pub id: String,
	pub user_id: String,
	pub agent_id: String,
	pub r#type: MemoryType,
	pub content: String,
	pub importance: f32,
	pub resonance: f32,
	pub access_count: i64,
	pub created_at: i64,
	pub updated_at: i64,
	pub last_accessed_at: i64,
	pub session_id: Option<String>,
	pub token_count: Option<i32>,
	pub keywords: Vec<String>,
	pub metadata: Value,
	pub extraction_method: Option<String>,
	pub batch_id: Option<String>,
	pub source_message_ids: Vec<String>,
	pub embedding: Option<Vec<f32>>,
	pub embedding_model: Option<String>,
	pub embedding_dimension: Option<i32>,
	pub never_decay: bool,
	pub custom_half_life: Option<i64>,
	pub reinforceable: bool,
	pub status: MemoryStatus,
}
impl MemoryRecord {
	pub fn new(user_id: &str, agent_id: &str, r#type: MemoryType, content: &str) -> Self {
		let now = clock::now_ms();

		Self {
			id: Uuid::new_v4().to_string(),
			user_id: user_id.to_string(),
			agent_id: agent_id.to_string(),
			r#type,
			content: content.to_string(),
			importance: 0.5,
			resonance: 1.0,
			access_count: 0,
			created_at: now,
			updated_at: now,
			last_accessed_at: now,
			session_id: None,
			token_count: None,
			keywords: Vec::new(),
			metadata: Value::Object(Default::default()),
			extraction_method: None,
			batch_id: None,
			source_message_ids: Vec::new(),
			embedding: None,
			embedding_model: None,
			embedding_dimension: None,
			never_decay: false,
			custom_half_life: None,
			reinforceable: true,
			status: MemoryStatus::Active,
		}
	}

	/// Apply the access touch: bump counters, refresh `last_accessed_at`, and
	/// lift resonance for reinforceable records.
	pub fn touch(&mut self, now_ms: i64) {
		self.access_count = self.access_count.saturating_add(1);
		self.last_accessed_at = now_ms;

		if self.reinforceable {
			self.resonance = (self.resonance + 0.1).min(2.0);
		}
	}
}

/// Partial update applied by `update` and `batch_update_memories`. Absent
/// fields leave the stored record untouched.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MemoryUpdate {
	pub id: String,
	pub content: Option<String>,
	pub importance: Option<f32>,
	pub resonance: Option<f32>,
	pub keywords: Option<Vec<String>>,
	pub metadata: Option<Value>,
	pub status: Option<MemoryStatus>,
	pub never_decay: Option<bool>,
	pub custom_half_life: Option<i64>,
	pub reinforceable: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MemoryStats {
	pub total: i64,
	pub by_type: std::collections::HashMap<String, i64>,
	pub by_status: std::collections::HashMap<String, i64>,
	pub avg_importance: f32,
	pub avg_resonance: f32,
	pub total_tokens: i64,
}

#[cfg(test)]
mod tests {
	use crate::memory::{MemoryRecord, MemoryStatus, MemoryType};

	#[test]
	fn new_record_defaults() {
		let record = MemoryRecord::new("u1", "a1", MemoryType::Semantic, "likes dark mode");

		assert_eq!(record.resonance, 1.0);
		assert_eq!(record.access_count, 0);
		assert_eq!(record.status, MemoryStatus::Active);
		assert!(record.embedding.is_none());
		assert_eq!(record.created_at, record.last_accessed_at);
	}

	#[test]
	fn touch_reinforces_only_when_allowed() {
		let mut record = MemoryRecord::new("u1", "a1", MemoryType::Working, "scratch");

		record.resonance = 1.95;
		record.touch(record.created_at + 1_000);

		assert_eq!(record.access_count, 1);
		assert_eq!(record.resonance, 2.0);

		record.reinforceable = false;
		record.touch(record.created_at + 2_000);

		assert_eq!(record.access_count, 2);
		assert_eq!(record.resonance, 2.0);
	}

	#[test]
	fn type_round_trips_through_labels() {
		for r#type in
			[MemoryType::Working, MemoryType::Episodic, MemoryType::Semantic, MemoryType::Procedural]
		{
			assert_eq!(MemoryType::parse(r#type.as_str()), Some(r#type));
		}

		assert_eq!(MemoryType::parse("declarative"), None);
	}
}

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
	Related,
	Causes,
	PartOf,
	Similar,
	Opposite,
}
impl ConnectionType {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Related => "related",
			Self::Causes => "causes",
			Self::PartOf => "part_of",
			Self::Similar => "similar",
			Self::Opposite => "opposite",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"related" => Some(Self::Related),
			"causes" => Some(Self::Causes),
			"part_of" => Some(Self::PartOf),
			"similar" => Some(Self::Similar),
			"opposite" => Some(Self::Opposite),
			_ => None,
		}
	}
}

/// A directed edge between two memories of the same user. `(source, target)`
/// is unique; conflicting inserts merge via [`MemoryConnection::merge`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MemoryConnection {
	pub id: String,
	pub source_memory_id: String,
	pub target_memory_id: String,
	pub connection_type: ConnectionType,
	pub strength: f32,
	pub reason: Option<String>,
	pub created_at: i64,
}
impl MemoryConnection {
	/// Conflict resolution for a repeated `(source, target)` insert: strength
	/// rises to the max of both, the incoming reason wins when present.
	pub fn merge(&mut self, incoming: &MemoryConnection) {
		self.strength = self.strength.max(incoming.strength);

		if incoming.reason.is_some() {
			self.reason = incoming.reason.clone();
		}
	}
}

#[cfg(test)]
mod tests {
	use crate::connection::{ConnectionType, MemoryConnection};

	fn edge(strength: f32, reason: Option<&str>) -> MemoryConnection {
		MemoryConnection {
			id: "c1".to_string(),
			source_memory_id: "m1".to_string(),
			target_memory_id: "m2".to_string(),
			connection_type: ConnectionType::Related,
			strength,
			reason: reason.map(str::to_string),
			created_at: 0,
		}
	}

	#[test]
	fn merge_keeps_max_strength() {
		let mut stored = edge(0.4, Some("observed together"));

		stored.merge(&edge(0.9, None));

		assert_eq!(stored.strength, 0.9);
		assert_eq!(stored.reason.as_deref(), Some("observed together"));

		stored.merge(&edge(0.2, Some("updated reason")));

		assert_eq!(stored.strength, 0.9);
		assert_eq!(stored.reason.as_deref(), Some("updated reason"));
	}
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use loam_domain::{HybridWeights, MemoryConnection, MemoryRecord, MemoryType};

/// Per-operation options recognized across the provider contract.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct StorageOptions {
	/// Overrides the provider's default namespace.
	pub namespace: Option<String>,
	/// Zero or negative means no TTL.
	pub ttl_seconds: Option<i64>,
	pub metadata: Option<Value>,
	pub limit: Option<u32>,
	pub offset: Option<u32>,
}
impl StorageOptions {
	pub fn with_namespace(namespace: &str) -> Self {
		Self { namespace: Some(namespace.to_string()), ..Default::default() }
	}

	pub fn with_ttl(ttl_seconds: i64) -> Self {
		Self { ttl_seconds: Some(ttl_seconds), ..Default::default() }
	}

	pub fn effective_ttl(&self) -> Option<i64> {
		self.ttl_seconds.filter(|ttl| *ttl > 0)
	}
}

/// Outcome of an emulated batch write: per-key failures are reported, not
/// rolled back.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct BatchReport {
	pub succeeded: u64,
	pub failed: Vec<FailedKey>,
}
impl BatchReport {
	pub fn record_failure(&mut self, key: &str, message: String) {
		self.failed.push(FailedKey { key: key.to_string(), message });
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FailedKey {
	pub key: String,
	pub message: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
	Cosine,
	Euclidean,
	Dot,
}
impl DistanceMetric {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Cosine => "cosine",
			Self::Euclidean => "euclidean",
			Self::Dot => "dot",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"cosine" => Some(Self::Cosine),
			"euclidean" => Some(Self::Euclidean),
			"dot" | "inner_product" => Some(Self::Dot),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorIndexKind {
	IvfFlat,
	Hnsw,
	Flat,
}
impl VectorIndexKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::IvfFlat => "ivfflat",
			Self::Hnsw => "hnsw",
			Self::Flat => "flat",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"ivfflat" => Some(Self::IvfFlat),
			"hnsw" => Some(Self::Hnsw),
			"flat" => Some(Self::Flat),
			_ => None,
		}
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VectorIndexSpec {
	pub kind: VectorIndexKind,
	#[serde(default)]
	pub options: Value,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VectorCollectionSpec {
	pub name: String,
	pub dimension: u32,
	pub metric: DistanceMetric,
	pub index: Option<VectorIndexSpec>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VectorRecord {
	pub id: String,
	pub vector: Vec<f32>,
	#[serde(default)]
	pub metadata: Value,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VectorHit {
	pub id: String,
	pub score: f32,
	pub metadata: Value,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct VectorSearchOptions {
	pub limit: u32,
	pub offset: u32,
}
impl Default for VectorSearchOptions {
	fn default() -> Self {
		Self { limit: 10, offset: 0 }
	}
}

/// Canonical hybrid recall request scoped to one `(user_id, agent_id)` pair.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RecallRequest {
	pub user_id: String,
	pub agent_id: String,
	pub query: String,
	pub embedding: Option<Vec<f32>>,
	/// Defaults to [`HybridWeights::default`] when absent.
	pub weights: Option<HybridWeights>,
	/// ANDed type filter; empty means all types.
	#[serde(default)]
	pub types: Vec<MemoryType>,
	pub limit: u32,
	#[serde(default)]
	pub offset: u32,
}
impl RecallRequest {
	pub fn new(user_id: &str, agent_id: &str, query: &str) -> Self {
		Self {
			user_id: user_id.to_string(),
			agent_id: agent_id.to_string(),
			query: query.to_string(),
			embedding: None,
			weights: None,
			types: Vec::new(),
			limit: 10,
			offset: 0,
		}
	}
}

/// A recall/search result with its score components.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ScoredMemory {
	pub record: MemoryRecord,
	pub score: f32,
	pub vector_sim: Option<f32>,
	pub text_score: f32,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct TraversalOptions {
	pub depth: u32,
	pub min_strength: f32,
}
impl Default for TraversalOptions {
	fn default() -> Self {
		Self { depth: 2, min_strength: 0.5 }
	}
}

/// Reachable subgraph from one origin memory: the distinct memories reached
/// (origin included) and the edges whose both endpoints were reached.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ConnectedMemories {
	pub memories: Vec<MemoryRecord>,
	pub connections: Vec<MemoryConnection>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct DecayReport {
	pub processed: u64,
	pub decayed: u64,
	pub removed: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProceduralPattern {
	pub pattern: String,
	pub success_count: i64,
	pub failure_count: i64,
	pub last_used_at: Option<i64>,
}

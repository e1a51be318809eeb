use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use loam_domain::{
	DecayRules, MemoryConnection, MemoryRecord, MemoryStats, MemoryUpdate,
};

use crate::{
	Result,
	types::{
		BatchReport, ConnectedMemories, DecayReport, ProceduralPattern, RecallRequest,
		ScoredMemory, StorageOptions, TraversalOptions, VectorCollectionSpec, VectorHit,
		VectorRecord, VectorSearchOptions,
	},
};

/// The uniform storage contract. Every adapter implements the KV, batch, and
/// list sets; the memory and vector capabilities are optional and surfaced as
/// trait-object accessors. Missing capabilities fail with
/// [`Error::Unsupported`](crate::Error::Unsupported) rather than silently
/// no-opping.
///
/// The default batch implementations emulate with per-key calls; they are not
/// atomic, and partial failures are reported through [`BatchReport`]. Backends
/// with a native multi-row path override them.
#[async_trait]
pub trait StorageProvider: Send + Sync {
	fn backend(&self) -> &'static str;

	fn default_namespace(&self) -> Option<&str>;

	/// Idempotent. Providers may lazily invoke this on first use.
	async fn initialize(&self) -> Result<()>;

	/// Releases pools, handles, and background tasks. Further calls fail.
	async fn destroy(&self) -> Result<()>;

	async fn get(&self, key: &str, opts: &StorageOptions) -> Result<Option<Value>>;

	async fn set(&self, key: &str, value: &Value, opts: &StorageOptions) -> Result<()>;

	async fn delete(&self, key: &str, opts: &StorageOptions) -> Result<bool>;

	async fn exists(&self, key: &str, opts: &StorageOptions) -> Result<bool>;

	/// Keys under the effective namespace starting with `prefix`, namespace
	/// stripped.
	async fn list(&self, prefix: &str, opts: &StorageOptions) -> Result<Vec<String>>;

	/// Confined to the effective namespace; with neither prefix nor namespace
	/// the entire store is wiped. Per-key failures are counted, not raised.
	async fn clear(&self, prefix: Option<&str>, opts: &StorageOptions) -> Result<u64>;

	async fn get_many(
		&self,
		keys: &[String],
		opts: &StorageOptions,
	) -> Result<HashMap<String, Option<Value>>> {
		let mut out = HashMap::with_capacity(keys.len());

		for key in keys {
			out.insert(key.clone(), self.get(key, opts).await?);
		}

		Ok(out)
	}

	async fn set_many(
		&self,
		entries: &HashMap<String, Value>,
		opts: &StorageOptions,
	) -> Result<BatchReport> {
		let mut report = BatchReport::default();

		for (key, value) in entries {
			match self.set(key, value, opts).await {
				Ok(()) => report.succeeded += 1,
				Err(err) => report.record_failure(key, err.to_string()),
			}
		}

		Ok(report)
	}

	async fn delete_many(&self, keys: &[String], opts: &StorageOptions) -> Result<u64> {
		let mut deleted = 0;

		for key in keys {
			if self.delete(key, opts).await? {
				deleted += 1;
			}
		}

		Ok(deleted)
	}

	/// Purge entries whose TTL has lapsed, returning how many were removed.
	/// Backends with native expiry have nothing to do.
	async fn sweep_expired(&self) -> Result<u64> {
		Ok(0)
	}

	/// `end = -1` addresses the last element inclusive. A negative `start` is
	/// clamped to zero, not treated as an offset from the end.
	async fn get_list(
		&self,
		key: &str,
		start: i64,
		end: i64,
		opts: &StorageOptions,
	) -> Result<Option<Vec<Value>>>;

	/// Replaces any prior list at `key` atomically: no concurrent reader
	/// observes a partial list.
	async fn save_list(&self, key: &str, values: &[Value], opts: &StorageOptions) -> Result<()>;

	async fn delete_list(&self, key: &str, opts: &StorageOptions) -> Result<bool>;

	fn memory(&self) -> Option<&dyn MemoryStore> {
		None
	}

	fn vectors(&self) -> Option<&dyn VectorStore> {
		None
	}

	fn vector_memory(&self) -> Option<&dyn VectorMemoryStore> {
		None
	}
}

/// Typed memory records with tenancy, recall, decay, and the connection graph.
#[async_trait]
pub trait MemoryStore: Send + Sync {
	async fn store(&self, record: &MemoryRecord) -> Result<()>;

	/// Hybrid recall; falls back to lexical-only when the request carries no
	/// embedding. Returned records are touched (access stats, reinforcement).
	async fn recall(&self, request: &RecallRequest) -> Result<Vec<ScoredMemory>>;

	async fn update(&self, user_id: &str, agent_id: &str, update: &MemoryUpdate) -> Result<()>;

	async fn delete(&self, user_id: &str, agent_id: &str, id: &str) -> Result<bool>;

	/// Cross-agent read scoped by `user_id` alone.
	async fn get_by_id(&self, user_id: &str, id: &str) -> Result<Option<MemoryRecord>>;

	async fn get_stats(&self, user_id: &str, agent_id: &str) -> Result<MemoryStats>;

	async fn batch_update_memories(
		&self,
		user_id: &str,
		agent_id: &str,
		updates: &[MemoryUpdate],
	) -> Result<BatchReport>;

	/// Single batched pass over all candidate memories; at most `ceil(n/1000)`
	/// update statements plus `ceil(k/1000)` deletes.
	async fn apply_decay(
		&self,
		user_id: &str,
		agent_id: &str,
		rules: &DecayRules,
	) -> Result<DecayReport>;

	async fn create_connections(
		&self,
		user_id: &str,
		edges: &[MemoryConnection],
	) -> Result<()>;

	async fn find_connected_memories(
		&self,
		user_id: &str,
		memory_id: &str,
		opts: &TraversalOptions,
	) -> Result<ConnectedMemories>;

	async fn record_pattern(
		&self,
		user_id: &str,
		agent_id: &str,
		pattern: &str,
		success: bool,
	) -> Result<()>;

	async fn list_patterns(&self, user_id: &str, agent_id: &str)
	-> Result<Vec<ProceduralPattern>>;
}

/// Named collections of fixed-dimension vectors.
#[async_trait]
pub trait VectorStore: Send + Sync {
	/// Idempotent w.r.t. an identical configuration; a conflicting one fails
	/// with `AlreadyExists`.
	async fn create_collection(&self, spec: &VectorCollectionSpec) -> Result<()>;

	async fn drop_collection(&self, name: &str) -> Result<()>;

	async fn collection_exists(&self, name: &str) -> Result<bool>;

	async fn list_collections(&self) -> Result<Vec<String>>;

	async fn insert_vectors(&self, collection: &str, records: &[VectorRecord]) -> Result<()>;

	async fn update_vectors(&self, collection: &str, records: &[VectorRecord]) -> Result<()>;

	async fn upsert_vectors(&self, collection: &str, records: &[VectorRecord]) -> Result<()>;

	async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<u64>;

	async fn search_vectors(
		&self,
		collection: &str,
		query: &[f32],
		opts: &VectorSearchOptions,
	) -> Result<Vec<VectorHit>>;

	async fn get_vector(&self, collection: &str, id: &str) -> Result<Option<VectorRecord>>;
}

/// Memory records with attached embeddings and similarity recall.
#[async_trait]
pub trait VectorMemoryStore: Send + Sync {
	/// Rejects embeddings whose length differs from the configured dimension.
	async fn store_memory_with_embedding(
		&self,
		record: &MemoryRecord,
		embedding: &[f32],
	) -> Result<()>;

	async fn search_by_vector(
		&self,
		user_id: &str,
		agent_id: &str,
		query: &[f32],
		limit: u32,
	) -> Result<Vec<ScoredMemory>>;

	async fn find_similar_memories(
		&self,
		user_id: &str,
		agent_id: &str,
		memory_id: &str,
		limit: u32,
	) -> Result<Vec<ScoredMemory>>;

	async fn hybrid_search(&self, request: &RecallRequest) -> Result<Vec<ScoredMemory>>;

	async fn update_memory_embedding(
		&self,
		user_id: &str,
		memory_id: &str,
		embedding: &[f32],
		model: Option<&str>,
	) -> Result<()>;

	async fn get_memory_embedding(
		&self,
		user_id: &str,
		memory_id: &str,
	) -> Result<Option<Vec<f32>>>;
}

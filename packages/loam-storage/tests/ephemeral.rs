use std::{collections::HashMap, sync::Arc, time::Duration};

use serde_json::{Value, json};

use loam_domain::{
	DecayRules, HybridWeights, MemoryConnection, MemoryRecord, MemoryType, clock,
	connection::ConnectionType,
};
use loam_storage::{
	Error,
	adapter::{AdapterSettings, ephemeral::EphemeralProvider},
	provider::{MemoryStore, StorageProvider, VectorMemoryStore, VectorStore},
	types::{
		DistanceMetric, RecallRequest, StorageOptions, TraversalOptions, VectorCollectionSpec,
		VectorRecord, VectorSearchOptions,
	},
};

fn provider() -> Arc<dyn StorageProvider> {
	Arc::new(EphemeralProvider::new(AdapterSettings { dimension: 4, ..Default::default() }))
}

fn record(user_id: &str, agent_id: &str, content: &str, importance: f32) -> MemoryRecord {
	let mut record = MemoryRecord::new(user_id, agent_id, MemoryType::Semantic, content);

	record.importance = importance;

	record
}

fn edge(source: &str, target: &str, strength: f32, reason: Option<&str>) -> MemoryConnection {
	MemoryConnection {
		id: uuid::Uuid::new_v4().to_string(),
		source_memory_id: source.to_string(),
		target_memory_id: target.to_string(),
		connection_type: ConnectionType::Related,
		strength,
		reason: reason.map(str::to_string),
		created_at: clock::now_ms(),
	}
}

#[tokio::test]
async fn kv_round_trips_json() {
	let provider = provider();
	let opts = StorageOptions::default();

	for value in
		[json!(null), json!(true), json!(42), json!("text"), json!({"nested": {"x": [1, 2]}})]
	{
		provider.set("k", &value, &opts).await.unwrap();

		assert_eq!(provider.get("k", &opts).await.unwrap(), Some(value));
	}

	assert!(provider.exists("k", &opts).await.unwrap());
	assert!(provider.delete("k", &opts).await.unwrap());
	assert!(!provider.delete("k", &opts).await.unwrap());
	assert_eq!(provider.get("k", &opts).await.unwrap(), None);
}

#[tokio::test]
async fn empty_keys_are_rejected() {
	let provider = provider();
	let result = provider.set("", &json!(1), &StorageOptions::default()).await;

	assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[tokio::test]
async fn ttl_expires_entries() {
	let provider = provider();
	let opts = StorageOptions::with_ttl(1);

	provider.set("session:abc", &json!({"token": "t1"}), &opts).await.unwrap();

	assert!(provider.exists("session:abc", &StorageOptions::default()).await.unwrap());

	tokio::time::sleep(Duration::from_millis(1_200)).await;

	assert_eq!(provider.get("session:abc", &StorageOptions::default()).await.unwrap(), None);
	assert!(!provider.exists("session:abc", &StorageOptions::default()).await.unwrap());
}

#[tokio::test]
async fn zero_ttl_means_no_expiry() {
	let provider = provider();

	provider.set("k", &json!(1), &StorageOptions::with_ttl(0)).await.unwrap();
	tokio::time::sleep(Duration::from_millis(50)).await;

	assert_eq!(provider.get("k", &StorageOptions::default()).await.unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn namespaces_are_isolated() {
	let provider = provider();
	let t1 = StorageOptions::with_namespace("t1");
	let t2 = StorageOptions::with_namespace("t2");

	provider.set("shared", &json!("A"), &t1).await.unwrap();
	provider.set("shared", &json!("B"), &t2).await.unwrap();

	assert_eq!(provider.get("shared", &t1).await.unwrap(), Some(json!("A")));
	assert_eq!(provider.get("shared", &t2).await.unwrap(), Some(json!("B")));

	provider.delete("shared", &t1).await.unwrap();

	assert_eq!(provider.get("shared", &t1).await.unwrap(), None);
	assert_eq!(provider.get("shared", &t2).await.unwrap(), Some(json!("B")));
}

#[tokio::test]
async fn list_and_clear_confine_to_namespace() {
	let provider = provider();
	let t1 = StorageOptions::with_namespace("t1");
	let t2 = StorageOptions::with_namespace("t2");

	provider.set("user:1", &json!(1), &t1).await.unwrap();
	provider.set("user:2", &json!(2), &t1).await.unwrap();
	provider.set("other", &json!(3), &t1).await.unwrap();
	provider.set("user:9", &json!(9), &t2).await.unwrap();

	assert_eq!(provider.list("user:", &t1).await.unwrap(), vec!["user:1", "user:2"]);

	let removed = provider.clear(Some("user:"), &t1).await.unwrap();

	assert_eq!(removed, 2);
	assert_eq!(provider.list("", &t1).await.unwrap(), vec!["other"]);
	assert_eq!(provider.get("user:9", &t2).await.unwrap(), Some(json!(9)));
}

#[tokio::test]
async fn batch_operations_report_results() {
	let provider = provider();
	let opts = StorageOptions::default();
	let mut entries = HashMap::new();

	entries.insert("a".to_string(), json!(1));
	entries.insert("b".to_string(), json!(2));
	entries.insert("c".to_string(), json!(3));

	let report = provider.set_many(&entries, &opts).await.unwrap();

	assert_eq!(report.succeeded, 3);
	assert!(report.failed.is_empty());

	let keys: Vec<String> = vec!["a".into(), "b".into(), "missing".into()];
	let values = provider.get_many(&keys, &opts).await.unwrap();

	assert_eq!(values["a"], Some(json!(1)));
	assert_eq!(values["missing"], None);
	assert_eq!(provider.delete_many(&keys, &opts).await.unwrap(), 2);
}

#[tokio::test]
async fn lists_replace_atomically_and_slice() {
	let provider = provider();
	let opts = StorageOptions::default();
	let first: Vec<Value> = (0..5).map(|n| json!(n)).collect();

	assert_eq!(provider.get_list("l", 0, -1, &opts).await.unwrap(), None);

	provider.save_list("l", &first, &opts).await.unwrap();

	assert_eq!(provider.get_list("l", 0, -1, &opts).await.unwrap(), Some(first.clone()));
	assert_eq!(
		provider.get_list("l", 1, 3, &opts).await.unwrap(),
		Some(vec![json!(1), json!(2), json!(3)])
	);
	// A negative start clamps to zero rather than offsetting from the end.
	assert_eq!(provider.get_list("l", -2, -1, &opts).await.unwrap(), Some(first.clone()));
	assert_eq!(provider.get_list("l", 4, 2, &opts).await.unwrap(), Some(vec![]));

	let second = vec![json!("x"), json!("y")];

	provider.save_list("l", &second, &opts).await.unwrap();

	assert_eq!(provider.get_list("l", 0, -1, &opts).await.unwrap(), Some(second));
	assert!(provider.delete_list("l", &opts).await.unwrap());
	assert_eq!(provider.get_list("l", 0, -1, &opts).await.unwrap(), None);
}

#[tokio::test]
async fn destroyed_provider_rejects_calls() {
	let provider = provider();

	provider.initialize().await.unwrap();
	provider.destroy().await.unwrap();

	assert!(provider.get("k", &StorageOptions::default()).await.is_err());
	assert!(provider.destroy().await.is_err());
}

#[tokio::test]
async fn recall_is_tenant_scoped() {
	let provider = provider();
	let memory = provider.memory().unwrap();

	memory.store(&record("u1", "a1", "User prefers dark mode", 0.8)).await.unwrap();

	let mut request = RecallRequest::new("u1", "a1", "dark mode");

	request.weights =
		Some(HybridWeights { vector_weight: 0.7, text_weight: 0.3, threshold: 0.1 });

	assert_eq!(memory.recall(&request).await.unwrap().len(), 1);

	for (user_id, agent_id) in [("u2", "a1"), ("u1", "a2")] {
		let request = RecallRequest::new(user_id, agent_id, "dark mode");

		assert!(memory.recall(&request).await.unwrap().is_empty());
	}
}

#[tokio::test]
async fn hybrid_search_ranks_similar_content_first() {
	let provider = provider();
	let vector_memory = provider.vector_memory().unwrap();
	let dark = record("u1", "a1", "User prefers dark mode", 0.8);
	let jwt = record("u1", "a1", "Debugged auth by checking JWT expiration", 0.9);
	let db = record("u1", "a1", "When API returns 500 check DB timeouts", 0.85);
	let dark_id = dark.id.clone();

	vector_memory
		.store_memory_with_embedding(&dark, &[1.0, 0.0, 0.0, 0.0])
		.await
		.unwrap();
	vector_memory
		.store_memory_with_embedding(&jwt, &[0.0, 1.0, 0.0, 0.0])
		.await
		.unwrap();
	vector_memory.store_memory_with_embedding(&db, &[0.0, 0.0, 1.0, 0.0]).await.unwrap();

	let request = RecallRequest {
		embedding: Some(vec![0.97, 0.1, 0.1, 0.0]),
		weights: Some(HybridWeights {
			vector_weight: 0.7,
			text_weight: 0.3,
			threshold: 0.1,
		}),
		..RecallRequest::new("u1", "a1", "dark mode preferences")
	};
	let hits = vector_memory.hybrid_search(&request).await.unwrap();

	assert_eq!(hits[0].record.id, dark_id);
	assert!(hits[0].text_score > 0.0);
	assert!(hits[0].vector_sim.unwrap() > 0.9);
}

#[tokio::test]
async fn recall_touch_reinforces_access() {
	let provider = provider();
	let memory = provider.memory().unwrap();
	let stored = record("u1", "a1", "User prefers dark mode", 0.8);
	let id = stored.id.clone();

	memory.store(&stored).await.unwrap();

	let request = RecallRequest::new("u1", "a1", "dark mode");

	memory.recall(&request).await.unwrap();

	let touched = memory.get_by_id("u1", &id).await.unwrap().unwrap();

	// One touch from recall, one from get_by_id.
	assert_eq!(touched.access_count, 2);
	assert!(touched.resonance > 1.0);
}

#[tokio::test]
async fn embedding_dimension_is_enforced() {
	let provider = provider();
	let vector_memory = provider.vector_memory().unwrap();
	let result = vector_memory
		.store_memory_with_embedding(
			&record("u1", "a1", "short vector", 0.5),
			&[0.1, 0.2, 0.3],
		)
		.await;

	assert!(matches!(
		result,
		Err(Error::DimensionMismatch { expected: 4, actual: 3 })
	));
}

#[tokio::test]
async fn search_by_vector_blends_composite_score() {
	let provider = provider();
	let vector_memory = provider.vector_memory().unwrap();
	let important = record("u1", "a1", "deploy checklist", 0.9);
	let trivial = record("u1", "a1", "scratch note", 0.1);
	let important_id = important.id.clone();

	vector_memory
		.store_memory_with_embedding(&important, &[1.0, 0.0, 0.0, 0.0])
		.await
		.unwrap();
	vector_memory
		.store_memory_with_embedding(&trivial, &[1.0, 0.0, 0.0, 0.0])
		.await
		.unwrap();

	let hits = vector_memory
		.search_by_vector("u1", "a1", &[1.0, 0.0, 0.0, 0.0], 10)
		.await
		.unwrap();

	assert_eq!(hits.len(), 2);
	assert_eq!(hits[0].record.id, important_id);
}

#[tokio::test]
async fn decay_partitions_remove_update_skip() {
	let provider = provider();
	let memory = provider.memory().unwrap();
	let now = clock::now_ms();
	let mut stale = record("u1", "a1", "fifty days idle", 0.0);
	let mut aging = record("u1", "a1", "ten days idle", 0.0);
	let mut pinned = record("u1", "a1", "never decays", 0.0);
	let aging_id = aging.id.clone();

	stale.last_accessed_at = now - 50 * 86_400_000;
	aging.last_accessed_at = now - 10 * 86_400_000;
	pinned.last_accessed_at = now - 500 * 86_400_000;
	pinned.never_decay = true;

	memory.store(&stale).await.unwrap();
	memory.store(&aging).await.unwrap();
	memory.store(&pinned).await.unwrap();

	let rules = DecayRules {
		rate: 0.1,
		importance_weight: 0.0,
		access_boost: 0.0,
		..Default::default()
	};
	let report = memory.apply_decay("u1", "a1", &rules).await.unwrap();

	assert_eq!(report.processed, 3);
	assert_eq!(report.removed, 1);
	assert_eq!(report.decayed, 1);

	let decayed = memory.get_by_id("u1", &aging_id).await.unwrap().unwrap();

	// exp(-1) ~= 0.368; the read-back includes one access touch (+0.1).
	assert!((decayed.resonance - ((-1.0_f32).exp() + 0.1)).abs() < 1e-3);

	let stats = memory.get_stats("u1", "a1").await.unwrap();

	assert_eq!(stats.total, 2);
}

#[tokio::test]
async fn decay_respects_importance_monotonicity() {
	let provider = provider();
	let memory = provider.memory().unwrap();
	let now = clock::now_ms();
	let mut high = record("u1", "a1", "high importance", 0.9);
	let mut low = record("u1", "a1", "low importance", 0.2);
	let (high_id, low_id) = (high.id.clone(), low.id.clone());

	high.last_accessed_at = now - 10 * 86_400_000;
	low.last_accessed_at = now - 10 * 86_400_000;
	high.reinforceable = false;
	low.reinforceable = false;

	memory.store(&high).await.unwrap();
	memory.store(&low).await.unwrap();

	let rules = DecayRules {
		rate: 0.1,
		importance_weight: 0.3,
		access_boost: 0.0,
		..Default::default()
	};

	memory.apply_decay("u1", "a1", &rules).await.unwrap();

	let high = memory.get_by_id("u1", &high_id).await.unwrap().unwrap();
	let low = memory.get_by_id("u1", &low_id).await.unwrap().unwrap();

	assert!(high.resonance >= low.resonance);
}

#[tokio::test]
async fn connection_upsert_keeps_max_strength() {
	let provider = provider();
	let memory = provider.memory().unwrap();
	let a = record("u1", "a1", "memory a", 0.5);
	let b = record("u1", "a1", "memory b", 0.5);
	let (a_id, b_id) = (a.id.clone(), b.id.clone());

	memory.store(&a).await.unwrap();
	memory.store(&b).await.unwrap();
	memory
		.create_connections("u1", &[edge(&a_id, &b_id, 0.4, Some("first"))])
		.await
		.unwrap();
	memory.create_connections("u1", &[edge(&a_id, &b_id, 0.9, None)]).await.unwrap();
	memory.create_connections("u1", &[edge(&a_id, &b_id, 0.2, None)]).await.unwrap();

	let connected = memory
		.find_connected_memories("u1", &a_id, &TraversalOptions::default())
		.await
		.unwrap();

	assert_eq!(connected.connections.len(), 1);
	assert_eq!(connected.connections[0].strength, 0.9);
	assert_eq!(connected.connections[0].reason.as_deref(), Some("first"));
}

#[tokio::test]
async fn connections_require_existing_endpoints() {
	let provider = provider();
	let memory = provider.memory().unwrap();
	let a = record("u1", "a1", "memory a", 0.5);
	let a_id = a.id.clone();

	memory.store(&a).await.unwrap();

	let result = memory.create_connections("u1", &[edge(&a_id, "ghost", 0.8, None)]).await;

	assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn traversal_is_depth_bounded_and_cycle_free() {
	let provider = provider();
	let memory = provider.memory().unwrap();
	let records: Vec<MemoryRecord> =
		(0..4).map(|n| record("u1", "a1", &format!("node {n}"), 0.5)).collect();
	let ids: Vec<String> = records.iter().map(|record| record.id.clone()).collect();

	for record in &records {
		memory.store(record).await.unwrap();
	}

	// Chain 0 -> 1 -> 2 -> 3 plus a back edge 2 -> 0 and a weak edge 1 -> 3.
	memory
		.create_connections(
			"u1",
			&[
				edge(&ids[0], &ids[1], 0.9, None),
				edge(&ids[1], &ids[2], 0.9, None),
				edge(&ids[2], &ids[3], 0.9, None),
				edge(&ids[2], &ids[0], 0.9, None),
				edge(&ids[1], &ids[3], 0.2, None),
			],
		)
		.await
		.unwrap();

	let shallow = memory
		.find_connected_memories("u1", &ids[0], &TraversalOptions {
			depth: 1,
			min_strength: 0.5,
		})
		.await
		.unwrap();
	let mut shallow_ids: Vec<&str> =
		shallow.memories.iter().map(|record| record.id.as_str()).collect();

	shallow_ids.sort();

	let mut expected = [ids[0].as_str(), ids[1].as_str(), ids[2].as_str()];

	expected.sort();

	assert_eq!(shallow_ids, expected);

	let deep = memory
		.find_connected_memories("u1", &ids[0], &TraversalOptions {
			depth: 3,
			min_strength: 0.5,
		})
		.await
		.unwrap();

	assert_eq!(deep.memories.len(), 4);
	// The weak 1 -> 3 edge stays below min_strength.
	assert_eq!(deep.connections.len(), 4);
}

#[tokio::test]
async fn batch_update_reports_partial_failures() {
	let provider = provider();
	let memory = provider.memory().unwrap();
	let stored = record("u1", "a1", "memory", 0.5);
	let id = stored.id.clone();

	memory.store(&stored).await.unwrap();

	let updates = vec![
		loam_domain::MemoryUpdate {
			id: id.clone(),
			importance: Some(0.7),
			..Default::default()
		},
		loam_domain::MemoryUpdate { id: "missing".to_string(), ..Default::default() },
	];
	let report = memory.batch_update_memories("u1", "a1", &updates).await.unwrap();

	assert_eq!(report.succeeded, 1);
	assert_eq!(report.failed.len(), 1);
	assert_eq!(report.failed[0].key, "missing");
	assert_eq!(memory.get_by_id("u1", &id).await.unwrap().unwrap().importance, 0.7);
}

#[tokio::test]
async fn vector_collections_enforce_dimension_and_idempotency() {
	let provider = provider();
	let vectors = provider.vectors().unwrap();
	let spec = VectorCollectionSpec {
		name: "notes".to_string(),
		dimension: 4,
		metric: DistanceMetric::Cosine,
		index: None,
	};

	vectors.create_collection(&spec).await.unwrap();
	vectors.create_collection(&spec).await.unwrap();

	let conflicting = VectorCollectionSpec { dimension: 8, ..spec.clone() };

	assert!(matches!(
		vectors.create_collection(&conflicting).await,
		Err(Error::AlreadyExists(_))
	));

	let records = vec![
		VectorRecord {
			id: "v1".to_string(),
			vector: vec![1.0, 0.0, 0.0, 0.0],
			metadata: json!({"tag": "a"}),
		},
		VectorRecord {
			id: "v2".to_string(),
			vector: vec![0.0, 1.0, 0.0, 0.0],
			metadata: json!({"tag": "b"}),
		},
	];

	vectors.insert_vectors("notes", &records).await.unwrap();

	assert!(matches!(
		vectors.insert_vectors("notes", &records[..1]).await,
		Err(Error::AlreadyExists(_))
	));
	assert!(matches!(
		vectors
			.insert_vectors("notes", &[VectorRecord {
				id: "v3".to_string(),
				vector: vec![1.0],
				metadata: Value::Null,
			}])
			.await,
		Err(Error::DimensionMismatch { .. })
	));

	let hits = vectors
		.search_vectors("notes", &[1.0, 0.0, 0.0, 0.0], &VectorSearchOptions::default())
		.await
		.unwrap();

	assert_eq!(hits[0].id, "v1");
	assert!(hits[0].score > hits[1].score);

	assert_eq!(vectors.delete_vectors("notes", &["v1".to_string()]).await.unwrap(), 1);
	assert!(vectors.get_vector("notes", "v1").await.unwrap().is_none());

	vectors.drop_collection("notes").await.unwrap();

	assert!(!vectors.collection_exists("notes").await.unwrap());
}

#[tokio::test]
async fn procedural_patterns_accumulate() {
	let provider = provider();
	let memory = provider.memory().unwrap();

	memory.record_pattern("u1", "a1", "retry-with-backoff", true).await.unwrap();
	memory.record_pattern("u1", "a1", "retry-with-backoff", true).await.unwrap();
	memory.record_pattern("u1", "a1", "retry-with-backoff", false).await.unwrap();

	let patterns = memory.list_patterns("u1", "a1").await.unwrap();

	assert_eq!(patterns.len(), 1);
	assert_eq!(patterns[0].success_count, 2);
	assert_eq!(patterns[0].failure_count, 1);
	assert!(patterns[0].last_used_at.is_some());
}

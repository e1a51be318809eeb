use std::{collections::HashMap, sync::Arc, time::Duration};

use serde_json::{Value, json};

use loam_domain::{
	DecayRules, HybridWeights, MemoryConnection, MemoryRecord, MemoryType, clock,
	connection::ConnectionType,
};
use loam_storage::{
	Error,
	adapter::{AdapterSettings, sqlite::SqliteProvider},
	provider::{MemoryStore, StorageProvider, VectorMemoryStore},
	types::{RecallRequest, StorageOptions, TraversalOptions},
};

async fn provider(dir: &tempfile::TempDir) -> Arc<dyn StorageProvider> {
	let cfg = loam_config::Sqlite {
		path: dir.path().join("loam.db").to_string_lossy().to_string(),
		vec_extension_path: None,
	};
	let provider =
		SqliteProvider::connect(&cfg, AdapterSettings { dimension: 4, ..Default::default() })
			.await
			.expect("sqlite should open");

	provider.initialize().await.expect("schema should bootstrap");

	Arc::new(provider)
}

fn record(user_id: &str, agent_id: &str, content: &str, importance: f32) -> MemoryRecord {
	let mut record = MemoryRecord::new(user_id, agent_id, MemoryType::Semantic, content);

	record.importance = importance;

	record
}

#[tokio::test]
async fn kv_round_trips_and_upserts() {
	let dir = tempfile::tempdir().unwrap();
	let provider = provider(&dir).await;
	let opts = StorageOptions::default();

	provider.set("k", &json!({"x": 1}), &opts).await.unwrap();
	provider.set("k", &json!({"x": 2}), &opts).await.unwrap();

	assert_eq!(provider.get("k", &opts).await.unwrap(), Some(json!({"x": 2})));
	assert!(provider.exists("k", &opts).await.unwrap());
	assert!(provider.delete("k", &opts).await.unwrap());
	assert_eq!(provider.get("k", &opts).await.unwrap(), None);
}

#[tokio::test]
async fn ttl_is_checked_on_read_and_swept() {
	let dir = tempfile::tempdir().unwrap();
	let provider = provider(&dir).await;

	provider
		.set("session:abc", &json!({"token": "t1"}), &StorageOptions::with_ttl(1))
		.await
		.unwrap();

	assert!(provider.exists("session:abc", &StorageOptions::default()).await.unwrap());

	tokio::time::sleep(Duration::from_millis(1_200)).await;

	assert_eq!(provider.get("session:abc", &StorageOptions::default()).await.unwrap(), None);
	assert_eq!(provider.sweep_expired().await.unwrap(), 1);
}

#[tokio::test]
async fn namespaces_are_isolated() {
	let dir = tempfile::tempdir().unwrap();
	let provider = provider(&dir).await;
	let t1 = StorageOptions::with_namespace("t1");
	let t2 = StorageOptions::with_namespace("t2");

	provider.set("shared", &json!("A"), &t1).await.unwrap();
	provider.set("shared", &json!("B"), &t2).await.unwrap();

	assert_eq!(provider.get("shared", &t1).await.unwrap(), Some(json!("A")));
	assert_eq!(provider.get("shared", &t2).await.unwrap(), Some(json!("B")));

	provider.delete("shared", &t1).await.unwrap();

	assert_eq!(provider.get("shared", &t2).await.unwrap(), Some(json!("B")));
}

#[tokio::test]
async fn prefix_listing_escapes_like_wildcards() {
	let dir = tempfile::tempdir().unwrap();
	let provider = provider(&dir).await;
	let opts = StorageOptions::default();

	provider.set("a%b", &json!(1), &opts).await.unwrap();
	provider.set("axb", &json!(2), &opts).await.unwrap();

	assert_eq!(provider.list("a%", &opts).await.unwrap(), vec!["a%b"]);
}

#[tokio::test]
async fn set_many_is_a_single_atomic_statement() {
	let dir = tempfile::tempdir().unwrap();
	let provider = provider(&dir).await;
	let opts = StorageOptions::default();
	let mut entries = HashMap::new();

	entries.insert("a".to_string(), json!(1));
	entries.insert("b".to_string(), json!(2));

	let report = provider.set_many(&entries, &opts).await.unwrap();

	assert_eq!(report.succeeded, 2);

	let values = provider
		.get_many(&["a".to_string(), "b".to_string()], &opts)
		.await
		.unwrap();

	assert_eq!(values["a"], Some(json!(1)));
	assert_eq!(values["b"], Some(json!(2)));
}

#[tokio::test]
async fn lists_replace_atomically() {
	let dir = tempfile::tempdir().unwrap();
	let provider = provider(&dir).await;
	let opts = StorageOptions::default();
	let values: Vec<Value> = (0..4).map(|n| json!(n)).collect();

	provider.save_list("l", &values, &opts).await.unwrap();

	assert_eq!(provider.get_list("l", 0, -1, &opts).await.unwrap(), Some(values));
	assert_eq!(
		provider.get_list("l", 1, 2, &opts).await.unwrap(),
		Some(vec![json!(1), json!(2)])
	);

	provider.save_list("l", &[json!("only")], &opts).await.unwrap();

	assert_eq!(
		provider.get_list("l", 0, -1, &opts).await.unwrap(),
		Some(vec![json!("only")])
	);
	assert!(provider.delete_list("l", &opts).await.unwrap());
	assert_eq!(provider.get_list("l", 0, -1, &opts).await.unwrap(), None);
}

#[tokio::test]
async fn text_recall_uses_fts_and_scopes_tenancy() {
	let dir = tempfile::tempdir().unwrap();
	let provider = provider(&dir).await;
	let memory = provider.memory().unwrap();

	memory.store(&record("u1", "a1", "User prefers dark mode", 0.8)).await.unwrap();
	memory
		.store(&record("u1", "a1", "Debugged auth by checking JWT expiration", 0.9))
		.await
		.unwrap();
	memory.store(&record("u2", "a1", "dark mode elsewhere", 0.9)).await.unwrap();

	let mut request = RecallRequest::new("u1", "a1", "dark mode");

	request.weights =
		Some(HybridWeights { vector_weight: 0.7, text_weight: 0.3, threshold: 0.1 });

	let hits = memory.recall(&request).await.unwrap();

	assert_eq!(hits.len(), 1);
	assert!(hits[0].record.content.contains("dark mode"));
	assert!(hits[0].text_score > 0.0);

	let foreign = memory.recall(&RecallRequest::new("u2", "a2", "dark mode")).await.unwrap();

	assert!(foreign.is_empty());
}

#[tokio::test]
async fn updated_content_is_reindexed() {
	let dir = tempfile::tempdir().unwrap();
	let provider = provider(&dir).await;
	let memory = provider.memory().unwrap();
	let stored = record("u1", "a1", "original wording", 0.5);
	let id = stored.id.clone();

	memory.store(&stored).await.unwrap();
	memory
		.update("u1", "a1", &loam_domain::MemoryUpdate {
			id: id.clone(),
			content: Some("completely different phrasing".to_string()),
			..Default::default()
		})
		.await
		.unwrap();

	let request = RecallRequest::new("u1", "a1", "phrasing");
	let hits = memory.recall(&request).await.unwrap();

	assert_eq!(hits.len(), 1);
	assert_eq!(hits[0].record.id, id);
	assert!(memory.recall(&RecallRequest::new("u1", "a1", "wording")).await.unwrap().is_empty());
}

#[tokio::test]
async fn hybrid_search_blends_rust_side_without_extension() {
	let dir = tempfile::tempdir().unwrap();
	let provider = provider(&dir).await;
	let vector_memory = provider.vector_memory().unwrap();
	let dark = record("u1", "a1", "User prefers dark mode", 0.8);
	let db = record("u1", "a1", "When API returns 500 check DB timeouts", 0.85);
	let dark_id = dark.id.clone();

	vector_memory
		.store_memory_with_embedding(&dark, &[1.0, 0.0, 0.0, 0.0])
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

	let embedding = vector_memory.get_memory_embedding("u1", &dark_id).await.unwrap();

	assert_eq!(embedding, Some(vec![1.0, 0.0, 0.0, 0.0]));
}

#[tokio::test]
async fn dimension_mismatch_rejects_writes() {
	let dir = tempfile::tempdir().unwrap();
	let provider = provider(&dir).await;
	let vector_memory = provider.vector_memory().unwrap();
	let result = vector_memory
		.store_memory_with_embedding(&record("u1", "a1", "short", 0.5), &[0.1, 0.2, 0.3])
		.await;

	assert!(matches!(result, Err(Error::DimensionMismatch { expected: 4, actual: 3 })));
}

#[tokio::test]
async fn vector_collections_require_the_extension() {
	let dir = tempfile::tempdir().unwrap();
	let provider = provider(&dir).await;

	assert!(provider.vectors().is_none());
}

#[tokio::test]
async fn decay_partitions_and_cascades() {
	let dir = tempfile::tempdir().unwrap();
	let provider = provider(&dir).await;
	let memory = provider.memory().unwrap();
	let now = clock::now_ms();
	let mut stale = record("u1", "a1", "fifty days idle", 0.0);
	let mut aging = record("u1", "a1", "ten days idle", 0.0);
	let (stale_id, aging_id) = (stale.id.clone(), aging.id.clone());

	stale.last_accessed_at = now - 50 * 86_400_000;
	aging.last_accessed_at = now - 10 * 86_400_000;
	aging.reinforceable = false;

	memory.store(&stale).await.unwrap();
	memory.store(&aging).await.unwrap();
	memory
		.create_connections("u1", &[MemoryConnection {
			id: uuid::Uuid::new_v4().to_string(),
			source_memory_id: stale_id.clone(),
			target_memory_id: aging_id.clone(),
			connection_type: ConnectionType::Related,
			strength: 0.9,
			reason: None,
			created_at: now,
		}])
		.await
		.unwrap();

	let rules = DecayRules {
		rate: 0.1,
		importance_weight: 0.0,
		access_boost: 0.0,
		..Default::default()
	};
	let report = memory.apply_decay("u1", "a1", &rules).await.unwrap();

	assert_eq!(report.processed, 2);
	assert_eq!(report.removed, 1);
	assert_eq!(report.decayed, 1);
	assert!(memory.get_by_id("u1", &stale_id).await.unwrap().is_none());

	let aging = memory.get_by_id("u1", &aging_id).await.unwrap().unwrap();

	assert!((aging.resonance - (-1.0_f32).exp()).abs() < 1e-3);

	// The cascade removed the edge with its endpoint.
	let connected = memory
		.find_connected_memories("u1", &aging_id, &TraversalOptions::default())
		.await
		.unwrap();

	assert!(connected.connections.is_empty());
}

#[tokio::test]
async fn connection_upsert_merges_strength_and_reason() {
	let dir = tempfile::tempdir().unwrap();
	let provider = provider(&dir).await;
	let memory = provider.memory().unwrap();
	let a = record("u1", "a1", "memory a", 0.5);
	let b = record("u1", "a1", "memory b", 0.5);
	let (a_id, b_id) = (a.id.clone(), b.id.clone());

	memory.store(&a).await.unwrap();
	memory.store(&b).await.unwrap();

	let mut first = MemoryConnection {
		id: uuid::Uuid::new_v4().to_string(),
		source_memory_id: a_id.clone(),
		target_memory_id: b_id.clone(),
		connection_type: ConnectionType::Causes,
		strength: 0.4,
		reason: Some("observed together".to_string()),
		created_at: clock::now_ms(),
	};

	memory.create_connections("u1", std::slice::from_ref(&first)).await.unwrap();

	first.id = uuid::Uuid::new_v4().to_string();
	first.strength = 0.9;
	first.reason = None;

	memory.create_connections("u1", &[first]).await.unwrap();

	let connected = memory
		.find_connected_memories("u1", &a_id, &TraversalOptions::default())
		.await
		.unwrap();

	assert_eq!(connected.connections.len(), 1);
	assert!((connected.connections[0].strength - 0.9).abs() < 1e-6);
	assert_eq!(connected.connections[0].reason.as_deref(), Some("observed together"));
}

#[tokio::test]
async fn stats_aggregate_by_type_and_status() {
	let dir = tempfile::tempdir().unwrap();
	let provider = provider(&dir).await;
	let memory = provider.memory().unwrap();
	let mut episodic = MemoryRecord::new("u1", "a1", MemoryType::Episodic, "went hiking");

	episodic.token_count = Some(12);

	memory.store(&record("u1", "a1", "semantic one", 0.4)).await.unwrap();
	memory.store(&episodic).await.unwrap();

	let stats = memory.get_stats("u1", "a1").await.unwrap();

	assert_eq!(stats.total, 2);
	assert_eq!(stats.by_type["semantic"], 1);
	assert_eq!(stats.by_type["episodic"], 1);
	assert_eq!(stats.by_status["active"], 2);
	assert_eq!(stats.total_tokens, 12);
}

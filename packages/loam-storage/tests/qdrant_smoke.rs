use serde_json::json;

use loam_domain::{HybridWeights, MemoryRecord, MemoryType};
use loam_storage::{
	Error,
	adapter::{AdapterSettings, qdrant::QdrantProvider},
	provider::{StorageProvider, VectorMemoryStore},
	types::{RecallRequest, StorageOptions},
};

#[tokio::test]
#[ignore = "Requires external Qdrant. Set LOAM_QDRANT_URL to run."]
async fn qdrant_emulates_kv_and_rejects_lists() {
	let Some(url) = loam_testkit::env_qdrant_url() else {
		eprintln!("Skipping qdrant_emulates_kv_and_rejects_lists; set LOAM_QDRANT_URL to run this test.");
		return;
	};
	let collection = format!("loam_smoke_{}", uuid::Uuid::new_v4().simple());
	let cfg = loam_config::Qdrant { url: url.clone(), collection: collection.clone() };
	let provider =
		QdrantProvider::new(&cfg, AdapterSettings { dimension: 4, ..Default::default() })
			.expect("Failed to build Qdrant client.");

	provider.initialize().await.expect("Failed to ensure collection.");

	let ns = "smoke";
	let opts = StorageOptions::with_namespace(ns);

	provider.set("k1", &json!({"x": 1}), &opts).await.expect("Failed to set.");
	provider.set("k2", &json!("two"), &opts).await.expect("Failed to set.");

	assert_eq!(provider.get("k1", &opts).await.expect("Failed to get."), Some(json!({"x": 1})));
	assert_eq!(provider.list("k", &opts).await.expect("Failed to list."), vec!["k1", "k2"]);

	// The same key hashes to the same point; a second set overwrites.
	provider.set("k1", &json!({"x": 2}), &opts).await.expect("Failed to overwrite.");

	assert_eq!(provider.get("k1", &opts).await.expect("Failed to get."), Some(json!({"x": 2})));

	// TTL is a payload field checked on access.
	provider
		.set("ephemeral", &json!(1), &StorageOptions {
			namespace: Some(ns.to_string()),
			ttl_seconds: Some(1),
			..Default::default()
		})
		.await
		.expect("Failed to set with TTL.");
	tokio::time::sleep(std::time::Duration::from_millis(1_200)).await;

	assert_eq!(provider.get("ephemeral", &opts).await.expect("Failed to get."), None);

	assert!(matches!(
		provider.get_list("list:jobs", 0, -1, &opts).await,
		Err(Error::Unsupported { operation: "get_list", backend: "qdrant" })
	));
	assert!(matches!(
		provider.save_list("list:jobs", &[json!(1)], &opts).await,
		Err(Error::Unsupported { operation: "save_list", backend: "qdrant" })
	));

	let vector_memory = provider.vector_memory().expect("Qdrant carries vector memory.");
	let dark = MemoryRecord::new("u1", "a1", MemoryType::Semantic, "User prefers dark mode");
	let dark_id = dark.id.clone();

	vector_memory
		.store_memory_with_embedding(&dark, &[1.0, 0.0, 0.0, 0.0])
		.await
		.expect("Failed to store memory point.");

	let request = RecallRequest {
		embedding: Some(vec![0.97, 0.1, 0.1, 0.0]),
		weights: Some(HybridWeights { vector_weight: 0.7, text_weight: 0.3, threshold: 0.1 }),
		..RecallRequest::new("u1", "a1", "dark mode preferences")
	};
	let hits = vector_memory.hybrid_search(&request).await.expect("Hybrid search failed.");

	assert_eq!(hits[0].record.id, dark_id);

	provider
		.clear(None, &opts)
		.await
		.expect("Failed to clear namespace.");

	let client = qdrant_client::Qdrant::from_url(&url).build().expect("client");

	client.delete_collection(collection).await.expect("Failed to drop smoke collection.");
}

use serde_json::json;

use loam_storage::{
	adapter::{AdapterSettings, redis::RedisProvider},
	provider::StorageProvider,
	types::StorageOptions,
};

#[tokio::test]
#[ignore = "Requires external Redis. Set LOAM_REDIS_URL to run."]
async fn redis_round_trips_and_rejects_vectors() {
	let Some(url) = loam_testkit::env_redis_url() else {
		eprintln!("Skipping redis_round_trips_and_rejects_vectors; set LOAM_REDIS_URL to run this test.");
		return;
	};
	let cfg = loam_config::Redis { url };
	let provider = RedisProvider::connect(&cfg, AdapterSettings::default())
		.await
		.expect("Failed to connect to Redis.");

	provider.initialize().await.expect("PING failed.");

	let ns = format!("loam_smoke_{}", uuid::Uuid::new_v4().simple());
	let opts = StorageOptions::with_namespace(&ns);

	provider.set("k1", &json!({"x": 1}), &opts).await.expect("Failed to set.");

	assert_eq!(provider.get("k1", &opts).await.expect("Failed to get."), Some(json!({"x": 1})));
	assert_eq!(provider.list("k", &opts).await.expect("Failed to list."), vec!["k1"]);

	provider
		.save_list("list:jobs", &[json!("a"), json!("b")], &opts)
		.await
		.expect("Failed to save list.");

	assert_eq!(
		provider.get_list("list:jobs", 0, -1, &opts).await.expect("Failed to read list."),
		Some(vec![json!("a"), json!("b")])
	);

	// No memory or vector capability on the Redis backend.
	assert!(provider.memory().is_none());
	assert!(provider.vectors().is_none());

	let mut entries = std::collections::HashMap::new();

	entries.insert("t1".to_string(), json!(1));
	entries.insert("t2".to_string(), json!(2));

	let report = provider
		.set_many(&entries, &StorageOptions {
			namespace: Some(ns.clone()),
			ttl_seconds: Some(60),
			..Default::default()
		})
		.await
		.expect("Per-key TTL fallback failed.");

	assert_eq!(report.succeeded, 2);

	let removed = provider.clear(None, &opts).await.expect("Failed to clear namespace.");

	assert!(removed >= 3);
	assert_eq!(provider.get("k1", &opts).await.expect("Failed to get."), None);
}

use std::sync::{Arc, Mutex};

use serde_json::json;

use loam_service::migrate::{MigrationOptions, MigrationPhase, migrate};
use loam_storage::{
	adapter::{AdapterSettings, ephemeral::EphemeralProvider},
	provider::StorageProvider,
	types::StorageOptions,
};

fn provider() -> EphemeralProvider {
	EphemeralProvider::new(AdapterSettings::default())
}

#[tokio::test]
async fn migration_round_trips_and_verifies() {
	let source = provider();
	let destination = provider();
	let ns = StorageOptions::with_namespace("n");

	source.set("k1", &json!("v1"), &ns).await.unwrap();
	source.set("k2", &json!({"x": 1}), &ns).await.unwrap();

	let result = migrate(&source, &destination, MigrationOptions {
		namespaces: vec!["n".to_string()],
		verify: true,
		..Default::default()
	})
	.await
	.unwrap();

	assert_eq!(result.total_migrated, 2);
	assert_eq!(result.total_failed, 0);
	assert!(result.failed_keys.is_empty());
	assert_eq!(result.verification_passed, Some(true));
	assert_eq!(destination.get("k1", &ns).await.unwrap(), Some(json!("v1")));
	assert_eq!(destination.get("k2", &ns).await.unwrap(), Some(json!({"x": 1})));
}

#[tokio::test]
async fn migration_copies_lists_under_known_prefixes() {
	let source = provider();
	let destination = provider();
	let ns = StorageOptions::with_namespace("n");

	// A marker key makes the list key discoverable via the KV prefix probe.
	source.set("list:jobs", &json!("marker"), &ns).await.unwrap();
	source.save_list("list:jobs", &[json!("a"), json!("b")], &ns).await.unwrap();

	let result = migrate(&source, &destination, MigrationOptions {
		namespaces: vec!["n".to_string()],
		..Default::default()
	})
	.await
	.unwrap();

	// The marker plus the list itself.
	assert_eq!(result.total_migrated, 2);
	assert_eq!(
		destination.get_list("list:jobs", 0, -1, &ns).await.unwrap(),
		Some(vec![json!("a"), json!("b")])
	);
}

#[tokio::test]
async fn prefix_filter_narrows_the_scan() {
	let source = provider();
	let destination = provider();
	let ns = StorageOptions::with_namespace("n");

	source.set("user:1", &json!(1), &ns).await.unwrap();
	source.set("other:1", &json!(2), &ns).await.unwrap();

	let result = migrate(&source, &destination, MigrationOptions {
		namespaces: vec!["n".to_string()],
		prefix_filter: Some("user:".to_string()),
		..Default::default()
	})
	.await
	.unwrap();

	assert_eq!(result.total_migrated, 1);
	assert_eq!(destination.get("other:1", &ns).await.unwrap(), None);
}

#[tokio::test]
async fn clear_destination_wipes_before_copy() {
	let source = provider();
	let destination = provider();
	let ns = StorageOptions::with_namespace("n");

	destination.set("stale", &json!("old"), &ns).await.unwrap();
	source.set("fresh", &json!("new"), &ns).await.unwrap();

	migrate(&source, &destination, MigrationOptions {
		namespaces: vec!["n".to_string()],
		clear_destination: true,
		..Default::default()
	})
	.await
	.unwrap();

	assert_eq!(destination.get("stale", &ns).await.unwrap(), None);
	assert_eq!(destination.get("fresh", &ns).await.unwrap(), Some(json!("new")));
}

#[tokio::test]
async fn progress_callback_observes_every_phase() {
	let source = provider();
	let destination = provider();
	let ns = StorageOptions::with_namespace("n");

	source.set("k1", &json!(1), &ns).await.unwrap();

	let phases: Arc<Mutex<Vec<MigrationPhase>>> = Arc::new(Mutex::new(Vec::new()));
	let observed = Arc::clone(&phases);

	migrate(&source, &destination, MigrationOptions {
		namespaces: vec!["n".to_string()],
		verify: true,
		on_progress: Some(Arc::new(move |progress| {
			observed.lock().unwrap().push(progress.phase);
		})),
		..Default::default()
	})
	.await
	.unwrap();

	let phases = phases.lock().unwrap();

	assert!(phases.contains(&MigrationPhase::Scan));
	assert!(phases.contains(&MigrationPhase::MigrateKv));
	assert!(phases.contains(&MigrationPhase::Verify));
}

#[tokio::test]
async fn default_namespace_applies_when_none_given() {
	let source = EphemeralProvider::new(AdapterSettings {
		namespace: Some("home".to_string()),
		..Default::default()
	});
	let destination = provider();
	let home = StorageOptions::with_namespace("home");

	source.set("k1", &json!(1), &StorageOptions::default()).await.unwrap();

	let result =
		migrate(&source, &destination, MigrationOptions::default()).await.unwrap();

	assert_eq!(result.total_migrated, 1);
	assert_eq!(destination.get("k1", &home).await.unwrap(), Some(json!(1)));
}

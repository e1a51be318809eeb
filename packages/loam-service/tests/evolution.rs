use std::sync::Arc;

use loam_domain::{MemoryEvolution, clock};
use loam_service::evolution::EvolutionLog;
use loam_storage::{
	adapter::{AdapterSettings, ephemeral::EphemeralProvider},
	provider::StorageProvider,
};

fn log() -> EvolutionLog {
	let provider: Arc<dyn StorageProvider> =
		Arc::new(EphemeralProvider::new(AdapterSettings::default()));

	EvolutionLog::new(provider)
}

#[tokio::test]
async fn history_is_per_memory_and_ordered() {
	let log = log();
	let now = clock::now_ms();

	log.append(&MemoryEvolution::new("m1", "created", None, now - 2_000)).await.unwrap();
	log.append(&MemoryEvolution::new("m1", "reinforced", Some("recall hit"), now - 1_000))
		.await
		.unwrap();
	log.append(&MemoryEvolution::new("m1", "decayed", None, now)).await.unwrap();
	log.append(&MemoryEvolution::new("m2", "created", None, now)).await.unwrap();

	let history = log.list("m1").await.unwrap();

	assert_eq!(history.len(), 3);
	assert_eq!(
		history.iter().map(|entry| entry.change_type.as_str()).collect::<Vec<_>>(),
		vec!["created", "reinforced", "decayed"]
	);
	assert_eq!(log.list("m2").await.unwrap().len(), 1);
	assert!(log.list("ghost").await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_memory_ids_are_rejected() {
	let log = log();
	let result = log.append(&MemoryEvolution::new("", "created", None, 0)).await;

	assert!(result.is_err());
}

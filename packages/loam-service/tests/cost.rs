use std::sync::Arc;

use loam_domain::clock;
use loam_service::{Error, cost::CostTracker};
use loam_storage::{
	adapter::{AdapterSettings, ephemeral::EphemeralProvider},
	provider::StorageProvider,
	types::StorageOptions,
};

fn tracker() -> (Arc<EphemeralProvider>, CostTracker) {
	let provider = Arc::new(EphemeralProvider::new(AdapterSettings::default()));
	let tracker = CostTracker::new(
		Arc::clone(&provider) as Arc<dyn StorageProvider>,
		loam_config::Cost::default(),
	)
	.unwrap();

	(provider, tracker)
}

#[tokio::test]
async fn tracked_costs_accumulate_into_summaries() {
	let (_, tracker) = tracker();

	tracker.track_extraction("a1", "llm", 0.25, 5, 10).await.unwrap();
	tracker.track_extraction("a1", "llm", 0.75, 5, 10).await.unwrap();
	tracker.track_extraction("a1", "rules", 0.10, 2, 4).await.unwrap();
	tracker.track_extraction("a2", "llm", 9.99, 1, 1).await.unwrap();

	let summary = tracker.get_cost_summary("a1", "24h").await.unwrap();

	assert!((summary.total_cost - 1.10).abs() < 1e-9);
	assert_eq!(summary.total_memories, 12);
	assert!((summary.cost_by_extractor["llm"] - 1.0).abs() < 1e-9);
	assert!((summary.cost_by_extractor["rules"] - 0.10).abs() < 1e-9);
	assert!((summary.avg_cost_per_memory - 1.10 / 12.0).abs() < 1e-9);
}

#[tokio::test]
async fn budget_check_compares_period_spend() {
	let (_, tracker) = tracker();

	tracker.track_extraction("a1", "llm", 4.0, 1, 1).await.unwrap();

	assert!(tracker.check_budget("a1", 5.0, "24h").await.unwrap());
	assert!(!tracker.check_budget("a1", 3.0, "24h").await.unwrap());
	// An agent with no spend is always within budget.
	assert!(tracker.check_budget("quiet", 0.0, "24h").await.unwrap());
}

#[tokio::test]
async fn daily_totals_ride_under_their_own_keys() {
	let (provider, tracker) = tracker();

	tracker.track_extraction("a1", "llm", 0.40, 1, 1).await.unwrap();
	tracker.track_extraction("a1", "llm", 0.20, 1, 1).await.unwrap();

	let date = clock::day_key(clock::now_ms());
	let total = tracker.daily_total("a1", &date).await.unwrap();

	assert!((total - 0.60).abs() < 1e-9);

	// The running total lives at the contractual key.
	let raw = provider
		.get(&format!("cost-daily:a1:{date}"), &StorageOptions::default())
		.await
		.unwrap();

	assert!(raw.is_some());
	assert_eq!(tracker.daily_total("a1", "1970-01-01").await.unwrap(), 0.0);
}

#[tokio::test]
async fn unknown_periods_are_rejected() {
	let (_, tracker) = tracker();
	let result = tracker.get_cost_summary("a1", "90d").await;

	assert!(matches!(result, Err(Error::InvalidRequest { .. })));
}

#[tokio::test]
async fn invalid_arguments_fail_synchronously() {
	let (_, tracker) = tracker();

	assert!(tracker.track_extraction("", "llm", 0.1, 1, 1).await.is_err());
	assert!(tracker.track_extraction("a1", "llm", f64::NAN, 1, 1).await.is_err());
	assert!(tracker.track_extraction("a1", "llm", -0.5, 1, 1).await.is_err());
}

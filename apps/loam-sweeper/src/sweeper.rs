use std::{sync::Arc, time::Duration};

use color_eyre::Result;
use tracing::{error, info};

use loam_domain::DecayRules;
use loam_storage::provider::{MemoryStore, StorageProvider};

pub async fn run(provider: Arc<dyn StorageProvider>, config: &loam_config::Config) -> Result<()> {
	let rules = DecayRules {
		rate: config.decay.rate,
		importance_weight: config.decay.importance_weight,
		access_boost: config.decay.access_boost,
		removal_threshold: config.decay.removal_threshold,
		update_epsilon: config.decay.update_epsilon,
	};
	let interval = Duration::from_secs(config.sweeper.interval_secs.max(1));

	info!(
		backend = provider.backend(),
		tenants = config.sweeper.tenants.len(),
		interval_secs = interval.as_secs(),
		"Sweeper started."
	);

	loop {
		if let Err(err) = sweep_once(provider.as_ref(), &rules, config).await {
			error!(error = %err, "Sweep pass failed.");
		}

		tokio::time::sleep(interval).await;
	}
}

async fn sweep_once(
	provider: &dyn StorageProvider,
	rules: &DecayRules,
	config: &loam_config::Config,
) -> Result<()> {
	match provider.sweep_expired().await {
		Ok(0) => {},
		Ok(purged) => info!(purged, "Purged expired entries."),
		Err(err) => error!(error = %err, "TTL sweep failed."),
	}

	let Some(memory) = provider.memory() else {
		info!(backend = provider.backend(), "Backend has no memory capability; decay skipped.");

		return Ok(());
	};

	for tenant in &config.sweeper.tenants {
		match memory.apply_decay(&tenant.user_id, &tenant.agent_id, rules).await {
			Ok(report) =>
				if report.decayed > 0 || report.removed > 0 {
					info!(
						user_id = %tenant.user_id,
						agent_id = %tenant.agent_id,
						processed = report.processed,
						decayed = report.decayed,
						removed = report.removed,
						"Decay pass complete."
					);
				},
			Err(err) => {
				error!(
					user_id = %tenant.user_id,
					agent_id = %tenant.agent_id,
					error = %err,
					"Decay pass failed."
				);
			},
		}
	}

	Ok(())
}

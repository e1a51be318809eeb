use std::sync::Arc;

use serde_json::json;

use loam_domain::{
	CostRecord, CostSummary, clock,
	cost::{resolve_period, summarize},
};
use loam_storage::{keys::KeyTemplate, provider::StorageProvider, types::StorageOptions};

use crate::{Error, Result};

/// Accumulates per-agent extraction costs on top of any provider: append-only
/// cost records plus a per-day running total with a TTL.
pub struct CostTracker {
	provider: Arc<dyn StorageProvider>,
	cfg: loam_config::Cost,
	record_template: KeyTemplate,
	daily_template: KeyTemplate,
}
impl CostTracker {
	pub fn new(provider: Arc<dyn StorageProvider>, cfg: loam_config::Cost) -> Result<Self> {
		let record_template = KeyTemplate::new(&cfg.record_key_template)?;
		let daily_template = KeyTemplate::new(&cfg.daily_key_template)?;

		Ok(Self { provider, cfg, record_template, daily_template })
	}

	pub async fn track_extraction(
		&self,
		agent_id: &str,
		extractor_type: &str,
		cost: f64,
		memories_extracted: u32,
		messages_processed: u32,
	) -> Result<CostRecord> {
		if agent_id.trim().is_empty() {
			return Err(Error::InvalidRequest {
				message: "agent_id must not be empty.".to_string(),
			});
		}
		if !cost.is_finite() || cost < 0.0 {
			return Err(Error::InvalidRequest {
				message: format!("cost must be a non-negative number; got {cost}."),
			});
		}

		let now = clock::now_ms();
		let record = CostRecord::new(
			agent_id,
			extractor_type,
			cost,
			memories_extracted,
			messages_processed,
			now,
		);
		let record_key = self
			.record_template
			.render(&[("agent_id", agent_id), ("record_id", &record.id)])?;

		self.provider
			.set(&record_key, &serde_json::to_value(&record)?, &StorageOptions::default())
			.await?;

		let date = clock::day_key(now);
		let daily_key = self.daily_template.render(&[("agent_id", agent_id), ("date", &date)])?;
		let current = self
			.provider
			.get(&daily_key, &StorageOptions::default())
			.await?
			.and_then(|value| value.as_f64())
			.unwrap_or(0.0);

		self.provider
			.set(
				&daily_key,
				&json!(current + cost),
				&StorageOptions::with_ttl(self.cfg.daily_ttl_secs),
			)
			.await?;

		Ok(record)
	}

	pub async fn daily_total(&self, agent_id: &str, date: &str) -> Result<f64> {
		let daily_key = self.daily_template.render(&[("agent_id", agent_id), ("date", date)])?;

		Ok(self
			.provider
			.get(&daily_key, &StorageOptions::default())
			.await?
			.and_then(|value| value.as_f64())
			.unwrap_or(0.0))
	}

	pub async fn get_cost_summary(&self, agent_id: &str, period: &str) -> Result<CostSummary> {
		let now = clock::now_ms();
		let window =
			resolve_period(period, now, &self.cfg.periods).ok_or_else(|| Error::InvalidRequest {
				message: format!("Unknown cost period: {period}."),
			})?;
		let prefix = self.record_template.prefix(&[("agent_id", agent_id)]);
		let keys = self.provider.list(&prefix, &StorageOptions::default()).await?;
		let values = self.provider.get_many(&keys, &StorageOptions::default()).await?;
		let mut records = Vec::with_capacity(values.len());

		for value in values.into_values().flatten() {
			records.push(serde_json::from_value::<CostRecord>(value)?);
		}

		Ok(summarize(&records, window))
	}

	/// `true` while the agent's spend over the period stays within the limit.
	pub async fn check_budget(
		&self,
		agent_id: &str,
		limit_usd: f64,
		period: &str,
	) -> Result<bool> {
		let summary = self.get_cost_summary(agent_id, period).await?;

		Ok(summary.total_cost <= limit_usd)
	}
}

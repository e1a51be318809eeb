use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One extraction run billed against an agent.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CostRecord {
	pub id: String,
	pub agent_id: String,
	pub extractor_type: String,
	/// USD.
	pub cost: f64,
	pub memories_extracted: u32,
	pub messages_processed: u32,
	pub timestamp: i64,
}
impl CostRecord {
	pub fn new(
		agent_id: &str,
		extractor_type: &str,
		cost: f64,
		memories_extracted: u32,
		messages_processed: u32,
		timestamp: i64,
	) -> Self {
		Self {
			id: Uuid::new_v4().to_string(),
			agent_id: agent_id.to_string(),
			extractor_type: extractor_type.to_string(),
			cost,
			memories_extracted,
			messages_processed,
			timestamp,
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct PeriodWindow {
	pub start: i64,
	pub end: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CostSummary {
	pub total_cost: f64,
	pub cost_by_extractor: HashMap<String, f64>,
	pub total_memories: u64,
	pub avg_cost_per_memory: f64,
	pub period: PeriodWindow,
}

/// Resolve a period label against `now`, preferring configured overrides over
/// the built-in map (`1h`, `24h`, `7d`, `30d`).
pub fn resolve_period(
	label: &str,
	now_ms: i64,
	overrides: &HashMap<String, i64>,
) -> Option<PeriodWindow> {
	let seconds = overrides.get(label).copied().or(match label {
		"1h" => Some(3_600),
		"24h" => Some(86_400),
		"7d" => Some(7 * 86_400),
		"30d" => Some(30 * 86_400),
		_ => None,
	})?;

	if seconds <= 0 {
		return None;
	}

	Some(PeriodWindow { start: now_ms - seconds * 1_000, end: now_ms })
}

pub fn summarize(records: &[CostRecord], period: PeriodWindow) -> CostSummary {
	let mut total_cost = 0.0;
	let mut total_memories = 0_u64;
	let mut cost_by_extractor: HashMap<String, f64> = HashMap::new();

	for record in records {
		if record.timestamp < period.start || record.timestamp > period.end {
			continue;
		}

		total_cost += record.cost;
		total_memories += u64::from(record.memories_extracted);
		*cost_by_extractor.entry(record.extractor_type.clone()).or_insert(0.0) += record.cost;
	}

	let avg_cost_per_memory =
		if total_memories > 0 { total_cost / total_memories as f64 } else { 0.0 };

	CostSummary { total_cost, cost_by_extractor, total_memories, avg_cost_per_memory, period }
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use crate::cost::{CostRecord, PeriodWindow, resolve_period, summarize};

	#[test]
	fn period_resolution_prefers_overrides() {
		let mut overrides = HashMap::new();

		overrides.insert("24h".to_string(), 60_i64);

		let window = resolve_period("24h", 1_000_000, &overrides).expect("known period");

		assert_eq!(window, PeriodWindow { start: 940_000, end: 1_000_000 });
		assert!(resolve_period("90d", 0, &HashMap::new()).is_none());
	}

	#[test]
	fn summary_filters_by_window() {
		let records = vec![
			CostRecord::new("a1", "llm", 0.25, 5, 10, 500),
			CostRecord::new("a1", "llm", 0.75, 5, 10, 1_500),
			CostRecord::new("a1", "rules", 0.10, 2, 4, 1_800),
		];
		let summary = summarize(&records, PeriodWindow { start: 1_000, end: 2_000 });

		assert!((summary.total_cost - 0.85).abs() < 1e-9);
		assert_eq!(summary.total_memories, 7);
		assert!((summary.cost_by_extractor["llm"] - 0.75).abs() < 1e-9);
		assert!((summary.avg_cost_per_memory - 0.85 / 7.0).abs() < 1e-9);
	}
}

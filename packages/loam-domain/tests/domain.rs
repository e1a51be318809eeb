use std::cmp::Ordering;

use loam_domain::{
	DecayRules, HybridWeights, MemoryRecord, MemoryType,
	decay::{self, DecayDecision},
	scoring,
};

#[test]
fn decay_reference_values_match_the_formula() {
	let rules = DecayRules {
		rate: 0.1,
		importance_weight: 0.0,
		access_boost: 0.0,
		..Default::default()
	};

	// Fifty idle days: exp(-5) ~= 0.0067, below the removal threshold.
	assert_eq!(decay::evaluate(&rules, 1.0, 0.0, 0, 50.0, false, None), DecayDecision::Remove);

	// Ten idle days: exp(-1) ~= 0.368, an update.
	let DecayDecision::Update(new_resonance) =
		decay::evaluate(&rules, 1.0, 0.0, 0, 10.0, false, None)
	else {
		panic!("expected an update");
	};

	assert!((new_resonance - 0.3679).abs() < 1e-3);
}

#[test]
fn access_boost_lifts_frequently_used_memories() {
	let rules = DecayRules {
		rate: 0.1,
		importance_weight: 0.0,
		access_boost: 0.2,
		..Default::default()
	};
	let idle = decay::evaluate(&rules, 1.0, 0.0, 0, 10.0, false, None);
	let busy = decay::evaluate(&rules, 1.0, 0.0, 50, 10.0, false, None);
	let (DecayDecision::Update(idle), DecayDecision::Update(busy)) = (idle, busy) else {
		panic!("expected updates");
	};

	assert!(busy > idle);
	// ln(51) * 0.2 on top of the idle value.
	assert!((busy - (idle + (51.0_f32).ln() * 0.2)).abs() < 1e-4);
}

#[test]
fn hybrid_ties_break_identically_across_runs() {
	let rows = [
		(0.9_f32, 0.5_f32, 100_i64, "m-b"),
		(0.9, 0.5, 100, "m-a"),
		(0.9, 0.7, 50, "m-c"),
	];
	let mut first = rows;
	let mut second = rows;

	first.sort_by(|a, b| scoring::compare_ranked(*a, *b));
	second.sort_by(|a, b| scoring::compare_ranked(*a, *b));

	assert_eq!(first, second);
	// Higher importance wins the score tie, then recency, then id.
	assert_eq!(first.map(|row| row.3), ["m-c", "m-a", "m-b"]);
}

#[test]
fn gate_and_score_compose_for_text_only_recall() {
	let weights = HybridWeights::default();
	let text_score = scoring::lexical_score("dark mode", "User prefers dark mode");

	assert!(scoring::row_qualifies(&weights, None, text_score));

	let score = scoring::hybrid_score(&weights, None, text_score);

	assert!((score - 0.3).abs() < 1e-6);
}

#[test]
fn record_serde_round_trips() {
	let mut record = MemoryRecord::new("u1", "a1", MemoryType::Procedural, "retry on 503");

	record.keywords = vec!["retry".to_string(), "http".to_string()];
	record.embedding = Some(vec![0.1, 0.2]);
	record.embedding_dimension = Some(2);

	let raw = serde_json::to_string(&record).unwrap();
	let decoded: MemoryRecord = serde_json::from_str(&raw).unwrap();

	assert_eq!(decoded.id, record.id);
	assert_eq!(decoded.r#type, MemoryType::Procedural);
	assert_eq!(decoded.keywords, record.keywords);
	assert_eq!(decoded.embedding, record.embedding);
	assert!(raw.contains("\"type\":\"procedural\""));
}

#[test]
fn ranking_orders_wrap_total_cmp() {
	assert_eq!(
		scoring::compare_ranked((1.0, 0.0, 0, "a"), (0.5, 0.9, 9, "b")),
		Ordering::Less
	);
	assert_eq!(
		scoring::compare_ranked((0.5, 0.9, 9, "b"), (1.0, 0.0, 0, "a")),
		Ordering::Greater
	);
}

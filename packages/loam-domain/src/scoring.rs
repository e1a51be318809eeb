use std::{cmp::Ordering, collections::HashSet};

use serde::{Deserialize, Serialize};

/// Weights for the canonical hybrid recall query.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct HybridWeights {
	pub vector_weight: f32,
	pub text_weight: f32,
	/// Minimum vector similarity for an embedding-bearing row to qualify on
	/// the vector side of the gate.
	pub threshold: f32,
}
impl Default for HybridWeights {
	fn default() -> Self {
		Self { vector_weight: 0.7, text_weight: 0.3, threshold: 0.7 }
	}
}

pub fn hybrid_score(weights: &HybridWeights, vector_sim: Option<f32>, text_score: f32) -> f32 {
	weights.vector_weight * vector_sim.unwrap_or(0.0) + weights.text_weight * text_score
}

/// A row enters the result set when it matches lexically, or when it carries
/// an embedding whose similarity clears the threshold.
pub fn row_qualifies(weights: &HybridWeights, vector_sim: Option<f32>, text_score: f32) -> bool {
	if text_score > 0.0 {
		return true;
	}

	matches!(vector_sim, Some(sim) if sim > weights.threshold)
}

/// Blend used by `search_by_vector`: similarity dominates, importance and
/// resonance nudge, recency tails off as `1 / (1 + days)`.
pub fn composite_score(
	vector_sim: f32,
	importance: f32,
	resonance: f32,
	days_since_access: f32,
) -> f32 {
	let recency = 1.0 / (1.0 + days_since_access.max(0.0));

	0.6 * vector_sim + 0.2 * importance + 0.1 * resonance + 0.1 * recency
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
	if a.len() != b.len() || a.is_empty() {
		return 0.0;
	}

	let mut dot = 0.0_f32;
	let mut norm_a = 0.0_f32;
	let mut norm_b = 0.0_f32;

	for (x, y) in a.iter().zip(b) {
		dot += x * y;
		norm_a += x * x;
		norm_b += y * y;
	}

	if norm_a == 0.0 || norm_b == 0.0 {
		return 0.0;
	}

	dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Deterministic result ordering: score, then importance, then recency, then
/// id. Ties never depend on iteration order.
pub fn compare_ranked(
	a: (f32, f32, i64, &str),
	b: (f32, f32, i64, &str),
) -> Ordering {
	b.0.total_cmp(&a.0)
		.then(b.1.total_cmp(&a.1))
		.then(b.2.cmp(&a.2))
		.then(a.3.cmp(b.3))
}

pub fn tokenize(text: &str, max_terms: usize) -> Vec<String> {
	let mut normalized = String::with_capacity(text.len());

	for ch in text.chars() {
		if ch.is_ascii_alphanumeric() {
			normalized.push(ch.to_ascii_lowercase());
		} else {
			normalized.push(' ');
		}
	}

	let mut out = Vec::new();
	let mut seen = HashSet::new();

	for token in normalized.split_whitespace() {
		if token.len() < 2 {
			continue;
		}
		if seen.insert(token) {
			out.push(token.to_string());
		}
		if out.len() >= max_terms {
			break;
		}
	}

	out
}

/// Normalized lexical rank in `[0, 1]`: the fraction of query terms present
/// in the content. The ephemeral backend's stand-in for engine-side FTS.
pub fn lexical_score(query: &str, content: &str) -> f32 {
	let query_tokens = tokenize(query, 32);

	if query_tokens.is_empty() {
		return 0.0;
	}

	let content_tokens: HashSet<String> = tokenize(content, 2_048).into_iter().collect();

	if content_tokens.is_empty() {
		return 0.0;
	}

	let matched = query_tokens.iter().filter(|token| content_tokens.contains(*token)).count();

	matched as f32 / query_tokens.len() as f32
}

#[cfg(test)]
mod tests {
	use std::cmp::Ordering;

	use crate::scoring::{
		HybridWeights, compare_ranked, composite_score, cosine_similarity, hybrid_score,
		lexical_score, row_qualifies,
	};

	#[test]
	fn gate_admits_lexical_or_similar_rows() {
		let weights = HybridWeights::default();

		assert!(row_qualifies(&weights, None, 0.2));
		assert!(row_qualifies(&weights, Some(0.8), 0.0));
		assert!(!row_qualifies(&weights, Some(0.5), 0.0));
		assert!(!row_qualifies(&weights, None, 0.0));
	}

	#[test]
	fn hybrid_score_applies_default_weights() {
		let weights = HybridWeights::default();
		let score = hybrid_score(&weights, Some(1.0), 1.0);

		assert!((score - 1.0).abs() < 1e-6);
		assert!((hybrid_score(&weights, None, 1.0) - 0.3).abs() < 1e-6);
	}

	#[test]
	fn cosine_handles_degenerate_inputs() {
		assert_eq!(cosine_similarity(&[], &[]), 0.0);
		assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
		assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
		assert!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0 < 1e-6);
	}

	#[test]
	fn composite_blend_favors_recent_access() {
		let fresh = composite_score(0.5, 0.5, 1.0, 0.0);
		let stale = composite_score(0.5, 0.5, 1.0, 30.0);

		assert!(fresh > stale);
	}

	#[test]
	fn ranking_ties_break_deterministically() {
		// Same score and importance; more recent access wins, then id.
		assert_eq!(compare_ranked((0.9, 0.5, 200, "b"), (0.9, 0.5, 100, "a")), Ordering::Less);
		assert_eq!(compare_ranked((0.9, 0.5, 100, "a"), (0.9, 0.5, 100, "b")), Ordering::Less);
	}

	#[test]
	fn lexical_score_counts_query_term_coverage() {
		assert_eq!(lexical_score("dark mode", "User prefers dark mode"), 1.0);
		assert_eq!(lexical_score("dark mode", "check DB timeouts"), 0.0);
		assert!((lexical_score("dark mode settings", "dark settings panel") - 2.0 / 3.0).abs() < 1e-6);
	}
}

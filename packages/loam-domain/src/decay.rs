use serde::{Deserialize, Serialize};

const LN_2: f32 = core::f32::consts::LN_2;
const HOURS_PER_DAY: f32 = 24.0;

/// Tunables for the batched resonance decay pass.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct DecayRules {
	/// Exponential decay rate per day of inactivity.
	pub rate: f32,
	/// Weight of `importance` as an additive boost.
	pub importance_weight: f32,
	/// Coefficient on `ln(access_count + 1)` as an additive boost.
	pub access_boost: f32,
	/// Records at or below this resonance are removed.
	pub removal_threshold: f32,
	/// Changes smaller than this are skipped rather than written back.
	pub update_epsilon: f32,
}
impl Default for DecayRules {
	fn default() -> Self {
		Self {
			rate: 0.1,
			importance_weight: 0.0,
			access_boost: 0.0,
			removal_threshold: 0.01,
			update_epsilon: 0.001,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DecayDecision {
	Remove,
	Update(f32),
	Skip,
}

/// Evaluate one record against the decay rules.
///
/// `never_decay` rows are skipped outright. `custom_half_life` (hours)
/// replaces the rule rate with `ln 2 / half_life` applied to the same age.
pub fn evaluate(
	rules: &DecayRules,
	resonance: f32,
	importance: f32,
	access_count: i64,
	age_days: f32,
	never_decay: bool,
	custom_half_life: Option<i64>,
) -> DecayDecision {
	if never_decay {
		return DecayDecision::Skip;
	}

	let age_days = age_days.max(0.0);
	let decay_factor = match custom_half_life {
		Some(half_life) if half_life > 0 =>
			(-LN_2 * age_days * HOURS_PER_DAY / half_life as f32).exp(),
		_ => (-rules.rate * age_days).exp(),
	};
	let importance_boost = importance * rules.importance_weight;
	let access_boost = ((access_count.max(0) as f32) + 1.0).ln() * rules.access_boost;
	let new_resonance = (resonance * decay_factor + importance_boost + access_boost).max(0.0);

	if new_resonance <= rules.removal_threshold {
		return DecayDecision::Remove;
	}
	if (new_resonance - resonance).abs() > rules.update_epsilon {
		return DecayDecision::Update(new_resonance);
	}

	DecayDecision::Skip
}

#[cfg(test)]
mod tests {
	use crate::decay::{DecayDecision, DecayRules, evaluate};

	fn rules(rate: f32) -> DecayRules {
		DecayRules { rate, importance_weight: 0.0, access_boost: 0.0, ..Default::default() }
	}

	#[test]
	fn fifty_idle_days_fall_below_removal_threshold() {
		let decision = evaluate(&rules(0.1), 1.0, 0.0, 0, 50.0, false, None);

		// exp(-5) ~= 0.0067 <= 0.01
		assert_eq!(decision, DecayDecision::Remove);
	}

	#[test]
	fn ten_idle_days_decay_without_removal() {
		let decision = evaluate(&rules(0.1), 1.0, 0.0, 0, 10.0, false, None);
		let DecayDecision::Update(new_resonance) = decision else {
			panic!("expected an update, got {decision:?}");
		};

		// exp(-1) ~= 0.368
		assert!((new_resonance - (-1.0_f32).exp()).abs() < 1e-5);
	}

	#[test]
	fn importance_boost_is_monotonic() {
		let rules = DecayRules {
			rate: 0.1,
			importance_weight: 0.3,
			access_boost: 0.0,
			..Default::default()
		};
		let high = evaluate(&rules, 1.0, 0.9, 0, 10.0, false, None);
		let low = evaluate(&rules, 1.0, 0.2, 0, 10.0, false, None);
		let (DecayDecision::Update(high), DecayDecision::Update(low)) = (high, low) else {
			panic!("expected updates");
		};

		assert!(high >= low);
	}

	#[test]
	fn never_decay_skips() {
		assert_eq!(evaluate(&rules(10.0), 1.0, 0.0, 0, 365.0, true, None), DecayDecision::Skip);
	}

	#[test]
	fn custom_half_life_overrides_rate() {
		// Half-life of 240 hours = 10 days; after 10 idle days resonance halves.
		let decision = evaluate(&rules(0.0), 1.0, 0.0, 0, 10.0, false, Some(240));
		let DecayDecision::Update(new_resonance) = decision else {
			panic!("expected an update, got {decision:?}");
		};

		assert!((new_resonance - 0.5).abs() < 1e-4);
	}

	#[test]
	fn tiny_changes_are_skipped() {
		assert_eq!(evaluate(&rules(0.1), 1.0, 0.0, 0, 0.0, false, None), DecayDecision::Skip);
	}
}

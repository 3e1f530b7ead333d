//! Local feature attribution
//!
//! Used when there is no scoring service to ask. Each feature gets a fixed
//! pseudo-random weight; a feature's contribution is `value * weight` and the
//! five largest by magnitude are reported.

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::models::{ContributionDirection, Explanation, FeatureContribution, TransactionEvent};

pub const TOP_FEATURES: usize = 5;
pub const LOCAL_BASE_VALUE: f64 = 0.1;
const WEIGHT_SEED: u64 = 0x5eed_f00d;

pub fn feature_name(index: usize) -> String {
    format!("V{}", index + 1)
}

pub struct LocalExplainer {
    weights: Vec<f64>,
}

impl LocalExplainer {
    pub fn new(feature_count: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(WEIGHT_SEED);
        let weights = (0..feature_count)
            .map(|_| rng.gen_range(-0.3..=0.3))
            .collect();
        Self { weights }
    }

    /// Global importance: each weight's share of the total magnitude.
    pub fn importance(&self) -> BTreeMap<String, f64> {
        let total: f64 = self.weights.iter().map(|w| w.abs()).sum();
        self.weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let share = if total > 0.0 { w.abs() / total } else { 0.0 };
                (feature_name(i), share)
            })
            .collect()
    }

    pub fn explain(&self, event: &TransactionEvent) -> Explanation {
        let mut contributions: Vec<FeatureContribution> = event
            .features()
            .iter()
            .enumerate()
            .map(|(i, &value)| {
                let weight = self.weights.get(i).copied().unwrap_or(0.0);
                let contribution = value * weight;
                FeatureContribution {
                    feature: feature_name(i),
                    value,
                    contribution,
                    direction: ContributionDirection::from_contribution(contribution),
                }
            })
            .collect();

        contributions.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
        contributions.truncate(TOP_FEATURES);

        Explanation {
            base_value: LOCAL_BASE_VALUE,
            prediction: event.risk_score(),
            top_features: contributions,
        }
    }
}

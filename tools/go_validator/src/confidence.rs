//! Confidence score: a weighted sum of independent validation signals.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Validation signals for one file. `None` means the check did not run; it then scores 0 but its
/// weight still counts, so skipping checks can only lower the score.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Signals {
    pub syntax_valid: Option<bool>,
    pub compiles: Option<bool>,
    /// Pass rates and scores are fractions in `0.0..=1.0`.
    pub unit_tests: Option<f64>,
    pub integration_tests: Option<f64>,
    pub business_rules: Option<f64>,
    pub lint: Option<f64>,
}

fn flag(signal: Option<bool>) -> f64 {
    if signal == Some(true) { 1.0 } else { 0.0 }
}

fn fraction(signal: Option<f64>) -> f64 {
    signal.filter(|v| !v.is_nan()).unwrap_or(0.0).clamp(0.0, 1.0)
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Weights {
    pub syntax: f64,
    pub compiles: f64,
    pub unit_tests: f64,
    pub integration_tests: f64,
    pub business_rules: f64,
    pub lint: f64,
}

impl Default for Weights {
    fn default() -> Weights {
        Weights {
            syntax: 0.10,
            compiles: 0.15,
            unit_tests: 0.25,
            integration_tests: 0.20,
            business_rules: 0.20,
            lint: 0.10,
        }
    }
}

impl Weights {
    fn all(&self) -> [f64; 6] {
        [
            self.syntax,
            self.compiles,
            self.unit_tests,
            self.integration_tests,
            self.business_rules,
            self.lint,
        ]
    }

    pub fn validate(&self) {
        if self.all().iter().any(|w| *w < 0.0) {
            warn!("tools.go_validator.weights contains a negative weight; clamping it to 0");
        }
        let total: f64 = self.all().iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            warn!("tools.go_validator.weights sum to {total}, not 1; scores are not percentages");
        }
    }

    /// Score in percent, rounded to two decimals.
    pub fn score(&self, signals: &Signals) -> f64 {
        let values = [
            flag(signals.syntax_valid),
            flag(signals.compiles),
            fraction(signals.unit_tests),
            fraction(signals.integration_tests),
            fraction(signals.business_rules),
            fraction(signals.lint),
        ];
        let sum: f64 = self
            .all()
            .iter()
            .zip(values)
            .map(|(weight, value)| weight.max(0.0) * value)
            .sum();
        (sum * 10_000.0).round() / 100.0
    }
}

/// How much human review a translation needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewLevel {
    NoReview,
    SpotCheck,
    FocusedReview,
    FullReview,
}

/// Minimum scores (percent) for each review level.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Thresholds {
    pub no_review: f64,
    pub spot_check: f64,
    pub focused_review: f64,
}

impl Default for Thresholds {
    fn default() -> Thresholds {
        Thresholds {
            no_review: 95.0,
            spot_check: 85.0,
            focused_review: 70.0,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) {
        if !(self.no_review >= self.spot_check && self.spot_check >= self.focused_review) {
            warn!("tools.go_validator.thresholds are not in descending order");
        }
    }

    pub fn review_level(&self, score: f64) -> ReviewLevel {
        if score >= self.no_review {
            ReviewLevel::NoReview
        } else if score >= self.spot_check {
            ReviewLevel::SpotCheck
        } else if score >= self.focused_review {
            ReviewLevel::FocusedReview
        } else {
            ReviewLevel::FullReview
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Confidence {
    pub score: f64,
    pub review: ReviewLevel,
}

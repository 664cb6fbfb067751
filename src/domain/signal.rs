//! Multi-model signal fusion.
//!
//! Several independent "probability of price increase" estimates for the same
//! asset and date are combined into one fused probability, then mapped to a
//! direction class, a confidence tier, and an inter-model agreement score.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use super::error::ProbtraderError;
use super::predictor::ModelStats;
use super::series::{validate_probability, ProbabilitySeries};

/// Probabilities strictly above this count as a vote for "up".
pub const VOTE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    Average,
    Weighted,
    Voting,
}

impl FromStr for FusionMethod {
    type Err = ProbtraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "average" | "mean" => Ok(FusionMethod::Average),
            "weighted" => Ok(FusionMethod::Weighted),
            "voting" | "vote" => Ok(FusionMethod::Voting),
            other => Err(ProbtraderError::configuration(format!(
                "unknown fusion method '{other}' (expected average, weighted or voting)"
            ))),
        }
    }
}

impl fmt::Display for FusionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FusionMethod::Average => f.write_str("average"),
            FusionMethod::Weighted => f.write_str("weighted"),
            FusionMethod::Voting => f.write_str("voting"),
        }
    }
}

/// Predicted direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalClass {
    Up,
    Neutral,
    Down,
}

impl fmt::Display for SignalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalClass::Up => f.write_str("up"),
            SignalClass::Neutral => f.write_str("neutral"),
            SignalClass::Down => f.write_str("down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceTier::High => f.write_str("high"),
            ConfidenceTier::Medium => f.write_str("medium"),
            ConfidenceTier::Low => f.write_str("low"),
        }
    }
}

/// Class boundaries. Each bound is exclusive: a probability equal to `up`
/// is neutral, one equal to `neutral` is down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassThresholds {
    pub up: f64,
    pub neutral: f64,
}

impl Default for ClassThresholds {
    fn default() -> Self {
        ClassThresholds {
            up: 0.60,
            neutral: 0.50,
        }
    }
}

/// Confidence tier boundaries, exclusive like [`ClassThresholds`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceBands {
    pub high: f64,
    pub medium: f64,
}

impl Default for ConfidenceBands {
    fn default() -> Self {
        ConfidenceBands {
            high: 0.60,
            medium: 0.50,
        }
    }
}

fn validate_bounds(upper: f64, lower: f64, what: &str) -> Result<(), ProbtraderError> {
    let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
    if !in_unit(upper) || !in_unit(lower) || lower > upper {
        return Err(ProbtraderError::configuration(format!(
            "{what} bounds must satisfy 0 <= {lower} <= {upper} <= 1"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusedSignal {
    pub fused_probability: f64,
    pub predicted_class: SignalClass,
    pub confidence_tier: ConfidenceTier,
    pub agreement: f64,
    pub models_used: usize,
}

/// Fraction of models whose binarized direction matches the majority outcome.
///
/// An empty input has no majority and yields 0.
pub fn agreement(probabilities: &[f64]) -> f64 {
    if probabilities.is_empty() {
        return 0.0;
    }
    let ups = probabilities.iter().filter(|&&p| p > VOTE_THRESHOLD).count();
    let downs = probabilities.len() - ups;
    ups.max(downs) as f64 / probabilities.len() as f64
}

/// Combine one date's per-model probabilities into a single probability.
///
/// `weights` is only consulted by [`FusionMethod::Weighted`]; models present in
/// `weights` but missing from `probabilities` are excluded and the rest renormalized.
pub fn fuse(
    probabilities: &BTreeMap<String, f64>,
    weights: &BTreeMap<String, ModelStats>,
    method: FusionMethod,
) -> Result<f64, ProbtraderError> {
    for (model, &p) in probabilities {
        validate_probability(p)
            .map_err(|_| ProbtraderError::data(format!("model {model}: probability {p} outside [0, 1]")))?;
    }
    if probabilities.is_empty() {
        return Err(ProbtraderError::configuration("no model probabilities to fuse"));
    }

    let n = probabilities.len() as f64;
    match method {
        FusionMethod::Average => Ok(probabilities.values().sum::<f64>() / n),
        FusionMethod::Voting => {
            let ups = probabilities.values().filter(|&&p| p > VOTE_THRESHOLD).count();
            Ok(ups as f64 / n)
        }
        FusionMethod::Weighted => weighted_average(probabilities, weights),
    }
}

fn weighted_average(
    probabilities: &BTreeMap<String, f64>,
    weights: &BTreeMap<String, ModelStats>,
) -> Result<f64, ProbtraderError> {
    let mut usable = Vec::with_capacity(probabilities.len());
    for (model, &p) in probabilities {
        match weights.get(model).and_then(ModelStats::weight) {
            Some(w) => usable.push((w, p)),
            None => debug!(model = %model, "no usable weight, excluding from weighted fusion"),
        }
    }

    let total: f64 = usable.iter().map(|(w, _)| w).sum();
    if usable.is_empty() || total <= 0.0 {
        return Err(ProbtraderError::configuration(
            "zero usable model weights for weighted fusion",
        ));
    }

    Ok(usable.iter().map(|(w, p)| w / total * p).sum())
}

/// Fuses probabilities and labels the result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalFuser {
    pub method: FusionMethod,
    pub class_thresholds: ClassThresholds,
    pub confidence_bands: ConfidenceBands,
}

impl SignalFuser {
    pub fn new(method: FusionMethod) -> Self {
        SignalFuser {
            method,
            class_thresholds: ClassThresholds::default(),
            confidence_bands: ConfidenceBands::default(),
        }
    }

    pub fn with_class_thresholds(
        mut self,
        thresholds: ClassThresholds,
    ) -> Result<Self, ProbtraderError> {
        validate_bounds(thresholds.up, thresholds.neutral, "class")?;
        self.class_thresholds = thresholds;
        Ok(self)
    }

    pub fn with_confidence_bands(mut self, bands: ConfidenceBands) -> Result<Self, ProbtraderError> {
        validate_bounds(bands.high, bands.medium, "confidence")?;
        self.confidence_bands = bands;
        Ok(self)
    }

    /// Which direction the fused probability points.
    pub fn classify(&self, fused_probability: f64) -> SignalClass {
        let t = &self.class_thresholds;
        if fused_probability > t.up {
            SignalClass::Up
        } else if fused_probability > t.neutral {
            SignalClass::Neutral
        } else {
            SignalClass::Down
        }
    }

    /// How sure the fused probability is, independent of [`Self::classify`].
    pub fn confidence(&self, fused_probability: f64) -> ConfidenceTier {
        let b = &self.confidence_bands;
        if fused_probability > b.high {
            ConfidenceTier::High
        } else if fused_probability > b.medium {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    pub fn fuse(
        &self,
        probabilities: &BTreeMap<String, f64>,
        weights: &BTreeMap<String, ModelStats>,
    ) -> Result<FusedSignal, ProbtraderError> {
        let fused_probability = fuse(probabilities, weights, self.method)?;
        let individual: Vec<f64> = probabilities.values().copied().collect();
        Ok(self.label(fused_probability, &individual))
    }

    /// Label a probability that is already fused from `individual`.
    pub fn label(&self, fused_probability: f64, individual: &[f64]) -> FusedSignal {
        FusedSignal {
            fused_probability,
            predicted_class: self.classify(fused_probability),
            confidence_tier: self.confidence(fused_probability),
            agreement: agreement(individual),
            models_used: individual.len(),
        }
    }

    /// Align several series by date and fuse every date with at least one model.
    pub fn fuse_series(
        &self,
        series: &[ProbabilitySeries],
        weights: &BTreeMap<String, ModelStats>,
    ) -> Result<Vec<(NaiveDate, FusedSignal)>, ProbtraderError> {
        let mut by_date: BTreeMap<NaiveDate, BTreeMap<String, f64>> = BTreeMap::new();
        for s in series {
            for point in &s.points {
                by_date
                    .entry(point.date)
                    .or_default()
                    .insert(s.model.clone(), point.probability);
            }
        }

        by_date
            .into_iter()
            .map(|(date, probabilities)| {
                self.fuse(&probabilities, weights)
                    .map(|signal| (date, signal))
                    .map_err(|e| match e {
                        ProbtraderError::Data { reason } => {
                            ProbtraderError::data(format!("{date}: {reason}"))
                        }
                        other => other,
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::series::ProbabilityPoint;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn probs(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
        entries.iter().map(|(m, p)| (m.to_string(), *p)).collect()
    }

    fn stats(entries: &[(&str, f64, f64)]) -> BTreeMap<String, ModelStats> {
        entries
            .iter()
            .map(|(m, accuracy, std)| {
                (
                    m.to_string(),
                    ModelStats {
                        accuracy: *accuracy,
                        std: *std,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn fusion_method_parses_case_insensitively() {
        assert_eq!("Weighted".parse::<FusionMethod>().unwrap(), FusionMethod::Weighted);
        assert_eq!(" voting ".parse::<FusionMethod>().unwrap(), FusionMethod::Voting);
        assert_eq!("average".parse::<FusionMethod>().unwrap(), FusionMethod::Average);
    }

    #[test]
    fn unknown_fusion_method_is_configuration_error() {
        let err = "bayesian".parse::<FusionMethod>().unwrap_err();
        assert!(matches!(err, ProbtraderError::Configuration { .. }));
    }

    #[test]
    fn average_is_arithmetic_mean() {
        let p = probs(&[("a", 0.7), ("b", 0.5), ("c", 0.3)]);
        let fused = fuse(&p, &BTreeMap::new(), FusionMethod::Average).unwrap();
        assert_relative_eq!(fused, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn weighted_uses_accuracy_over_std() {
        let p = probs(&[("a", 0.8), ("b", 0.4)]);
        // weights 0.6/0.1 = 6 and 0.6/0.2 = 3 → 2/3 and 1/3
        let w = stats(&[("a", 0.6, 0.1), ("b", 0.6, 0.2)]);
        let fused = fuse(&p, &w, FusionMethod::Weighted).unwrap();
        assert_relative_eq!(fused, 0.8 * 2.0 / 3.0 + 0.4 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn weighted_renormalizes_when_model_missing() {
        let p = probs(&[("a", 0.8)]);
        let w = stats(&[("a", 0.6, 0.1), ("b", 0.9, 0.05)]);
        let fused = fuse(&p, &w, FusionMethod::Weighted).unwrap();
        assert_relative_eq!(fused, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn weighted_with_no_usable_weights_fails() {
        let p = probs(&[("a", 0.8)]);
        let w = stats(&[("b", 0.6, 0.1)]);
        let err = fuse(&p, &w, FusionMethod::Weighted).unwrap_err();
        assert!(matches!(err, ProbtraderError::Configuration { .. }));

        let w = stats(&[("a", 0.6, 0.0)]);
        assert!(fuse(&p, &w, FusionMethod::Weighted).is_err());
    }

    #[test]
    fn voting_counts_strictly_above_half() {
        let p = probs(&[("a", 0.7), ("b", 0.5), ("c", 0.51), ("d", 0.2)]);
        let fused = fuse(&p, &BTreeMap::new(), FusionMethod::Voting).unwrap();
        assert_relative_eq!(fused, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn fuse_rejects_out_of_range_probability() {
        let p = probs(&[("a", 1.5)]);
        let err = fuse(&p, &BTreeMap::new(), FusionMethod::Average).unwrap_err();
        assert!(matches!(err, ProbtraderError::Data { .. }));
    }

    #[test]
    fn fuse_empty_is_configuration_error() {
        let err = fuse(&BTreeMap::new(), &BTreeMap::new(), FusionMethod::Average).unwrap_err();
        assert!(matches!(err, ProbtraderError::Configuration { .. }));
    }

    #[test]
    fn classify_boundaries_are_exclusive() {
        let fuser = SignalFuser::new(FusionMethod::Average);
        assert_eq!(fuser.classify(0.61), SignalClass::Up);
        assert_eq!(fuser.classify(0.60), SignalClass::Neutral);
        assert_eq!(fuser.classify(0.55), SignalClass::Neutral);
        assert_eq!(fuser.classify(0.50), SignalClass::Down);
        assert_eq!(fuser.classify(0.0), SignalClass::Down);
    }

    #[test]
    fn confidence_bands_evolve_independently() {
        let fuser = SignalFuser::new(FusionMethod::Average)
            .with_confidence_bands(ConfidenceBands {
                high: 0.75,
                medium: 0.55,
            })
            .unwrap();
        assert_eq!(fuser.confidence(0.70), ConfidenceTier::Medium);
        assert_eq!(fuser.classify(0.70), SignalClass::Up);
        assert_eq!(fuser.confidence(0.55), ConfidenceTier::Low);
        assert_eq!(fuser.confidence(0.76), ConfidenceTier::High);
    }

    #[test]
    fn label_uses_configured_thresholds() {
        let fuser = SignalFuser::new(FusionMethod::Average)
            .with_class_thresholds(ClassThresholds { up: 0.8, neutral: 0.5 })
            .unwrap();
        let signal = fuser.label(0.65, &[0.65]);
        assert_eq!(signal.predicted_class, SignalClass::Neutral);
        assert_eq!(signal.confidence_tier, ConfidenceTier::High);
        assert_eq!(signal.models_used, 1);
        assert_relative_eq!(signal.agreement, 1.0);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let result = SignalFuser::new(FusionMethod::Average).with_class_thresholds(ClassThresholds {
            up: 0.4,
            neutral: 0.6,
        });
        assert!(matches!(result, Err(ProbtraderError::Configuration { .. })));
    }

    #[test]
    fn agreement_for_three_models() {
        assert_relative_eq!(agreement(&[0.7, 0.8, 0.9]), 1.0);
        assert_relative_eq!(agreement(&[0.7, 0.65, 0.3]), 2.0 / 3.0);
        assert_relative_eq!(agreement(&[0.2, 0.65, 0.3]), 2.0 / 3.0);
    }

    #[test]
    fn agreement_generalizes_to_n() {
        assert_relative_eq!(agreement(&[0.7, 0.3]), 0.5);
        assert_relative_eq!(agreement(&[0.7, 0.6, 0.8, 0.2, 0.1]), 0.6);
        assert_eq!(agreement(&[]), 0.0);
    }

    #[test]
    fn voting_scenario_three_models() {
        let fuser = SignalFuser::new(FusionMethod::Voting);
        let p = probs(&[("lgbm", 0.70), ("lstm", 0.65), ("xgb", 0.30)]);
        let signal = fuser.fuse(&p, &BTreeMap::new()).unwrap();

        assert_relative_eq!(signal.fused_probability, 2.0 / 3.0, epsilon = 1e-12);
        assert_eq!(signal.predicted_class, SignalClass::Up);
        assert_relative_eq!(signal.agreement, 2.0 / 3.0, epsilon = 1e-12);
        assert_eq!(signal.models_used, 3);
    }

    #[test]
    fn fuse_series_aligns_by_date() {
        let d1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let a = ProbabilitySeries::new(
            "a",
            "AAPL",
            5,
            vec![
                ProbabilityPoint { date: d1, probability: 0.8 },
                ProbabilityPoint { date: d2, probability: 0.6 },
            ],
        );
        let b = ProbabilitySeries::new(
            "b",
            "AAPL",
            5,
            vec![ProbabilityPoint { date: d2, probability: 0.4 }],
        );

        let fuser = SignalFuser::new(FusionMethod::Average);
        let fused = fuser.fuse_series(&[a, b], &BTreeMap::new()).unwrap();

        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].0, d1);
        assert_eq!(fused[0].1.models_used, 1);
        assert_relative_eq!(fused[1].1.fused_probability, 0.5, epsilon = 1e-12);
        assert_eq!(fused[1].1.models_used, 2);
    }

    proptest! {
        #[test]
        fn equal_weights_match_average(
            p1 in 0.0f64..=1.0,
            p2 in 0.0f64..=1.0,
            accuracy in 0.01f64..1.0,
            std in 0.001f64..0.5,
        ) {
            let p = probs(&[("a", p1), ("b", p2)]);
            let w = stats(&[("a", accuracy, std), ("b", accuracy, std)]);
            let weighted = fuse(&p, &w, FusionMethod::Weighted).unwrap();
            let average = fuse(&p, &w, FusionMethod::Average).unwrap();
            prop_assert!((weighted - average).abs() < 1e-12);
        }

        #[test]
        fn fused_probability_stays_in_unit_interval(
            values in prop::collection::vec(0.0f64..=1.0, 1..8),
        ) {
            let p: BTreeMap<String, f64> = values
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("m{i}"), *v))
                .collect();
            for method in [FusionMethod::Average, FusionMethod::Voting] {
                let fused = fuse(&p, &BTreeMap::new(), method).unwrap();
                prop_assert!((0.0..=1.0).contains(&fused));
            }
            let a = agreement(&values);
            prop_assert!((0.5..=1.0).contains(&a));
        }
    }
}

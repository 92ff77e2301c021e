use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::{RiskBand, ScoringConfig};
use crate::domain::{FusedRecord, Metric, MetricValues, RiskScores};

/// Trait for deriving risk scores from normalized metrics
pub trait RiskScorer {
    fn score(&self, normalized: &MetricValues) -> RiskScores;

    fn score_all(&self, records: &mut [FusedRecord]) {
        for record in records.iter_mut() {
            record.scores = self.score(&record.normalized);
        }
    }
}

/// Weighted hazard × vulnerability scorer driven by `ScoringConfig`.
pub struct DefaultRiskScorer {
    social_weight: f64,
    hazard_metrics: Vec<Metric>,
    environmental_metrics: Vec<Metric>,
    bands: Vec<RiskBand>,
}

impl DefaultRiskScorer {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            social_weight: config.social_weight,
            hazard_metrics: config.hazard_metrics.clone(),
            environmental_metrics: config.environmental_metrics.clone(),
            bands: config.risk_category_thresholds.clone(),
        }
    }

    pub fn categorize(&self, score: f64) -> Option<String> {
        categorize(&self.bands, score)
    }
}

impl RiskScorer for DefaultRiskScorer {
    fn score(&self, normalized: &MetricValues) -> RiskScores {
        let hazard_score = mean_of(normalized, &self.hazard_metrics);
        let social_vulnerability = normalized.get(Metric::PovertyRatio);
        let environmental_vulnerability = mean_of(normalized, &self.environmental_metrics);

        let combined_vulnerability = match (social_vulnerability, environmental_vulnerability) {
            (Some(s), Some(e)) => Some((self.social_weight * s + (1.0 - self.social_weight) * e).clamp(0.0, 1.0)),
            _ => None,
        };
        let compound_risk_score = match (hazard_score, combined_vulnerability) {
            (Some(h), Some(c)) => Some((h * c).clamp(0.0, 1.0)),
            _ => None,
        };
        let risk_category = compound_risk_score.and_then(|s| self.categorize(s));

        RiskScores {
            hazard_score,
            social_vulnerability,
            environmental_vulnerability,
            combined_vulnerability,
            compound_risk_score,
            risk_category,
        }
    }

    fn score_all(&self, records: &mut [FusedRecord]) {
        let mut distribution: BTreeMap<String, usize> = BTreeMap::new();
        let mut unscored = 0;
        for record in records.iter_mut() {
            record.scores = self.score(&record.normalized);
            match &record.scores.risk_category {
                Some(label) => *distribution.entry(label.clone()).or_default() += 1,
                None => unscored += 1,
            }
        }
        debug!(?distribution, "Risk category distribution");
        info!(records = records.len(), unscored, "Scored records");
    }
}

/// Mean of the listed metrics; `None` if any of them is null.
fn mean_of(values: &MetricValues, metrics: &[Metric]) -> Option<f64> {
    if metrics.is_empty() {
        return None;
    }
    let mut sum = 0.0;
    for metric in metrics {
        sum += values.get(*metric)?;
    }
    Some(sum / metrics.len() as f64)
}

/// Label of the first band whose upper bound is >= `score`.
pub fn categorize(bands: &[RiskBand], score: f64) -> Option<String> {
    bands.iter().find(|b| score <= b.upper).map(|b| b.label.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AdminKey;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn normalized(hazard: Option<f64>, erosion: Option<f64>, poverty: Option<f64>) -> MetricValues {
        MetricValues {
            hazard_days: hazard,
            erosion_proxy: erosion,
            poverty_ratio: poverty,
            ..MetricValues::default()
        }
    }

    #[test]
    fn test_compound_score_formula() {
        let scorer = DefaultRiskScorer::new(&ScoringConfig::default());
        let scores = scorer.score(&normalized(Some(0.8), Some(0.2), Some(0.6)));

        assert_eq!(scores.hazard_score, Some(0.8));
        assert_eq!(scores.social_vulnerability, Some(0.6));
        assert_eq!(scores.environmental_vulnerability, Some(0.2));
        let combined = scores.combined_vulnerability.unwrap();
        assert!((combined - 0.4).abs() < 1e-12);
        assert!((scores.compound_risk_score.unwrap() - 0.32).abs() < 1e-12);
        assert_eq!(scores.risk_category.as_deref(), Some("Moderate"));
    }

    #[test]
    fn test_social_weight_is_configurable() {
        let config = ScoringConfig {
            social_weight: 0.4,
            ..ScoringConfig::default()
        };
        let scores = DefaultRiskScorer::new(&config).score(&normalized(Some(1.0), Some(0.5), Some(1.0)));
        assert!((scores.combined_vulnerability.unwrap() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_null_inputs_yield_null_scores() {
        let scorer = DefaultRiskScorer::new(&ScoringConfig::default());

        let no_hazard = scorer.score(&normalized(None, Some(0.5), Some(0.5)));
        assert_eq!(no_hazard.hazard_score, None);
        assert!(no_hazard.combined_vulnerability.is_some());
        assert_eq!(no_hazard.compound_risk_score, None);
        assert_eq!(no_hazard.risk_category, None);

        let no_poverty = scorer.score(&normalized(Some(0.5), Some(0.5), None));
        assert_eq!(no_poverty.combined_vulnerability, None);
        assert_eq!(no_poverty.compound_risk_score, None);
    }

    #[test]
    fn test_hazard_mean_over_several_metrics() {
        let config = ScoringConfig {
            hazard_metrics: vec![Metric::HazardDays, Metric::ErosionProxy],
            ..ScoringConfig::default()
        };
        let scores = DefaultRiskScorer::new(&config).score(&normalized(Some(0.2), Some(0.6), Some(0.0)));
        assert!((scores.hazard_score.unwrap() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_categorize_band_edges() {
        let bands = ScoringConfig::default().risk_category_thresholds;
        assert_eq!(categorize(&bands, 0.0).as_deref(), Some("Low"));
        assert_eq!(categorize(&bands, 0.25).as_deref(), Some("Low"));
        assert_eq!(categorize(&bands, 0.26).as_deref(), Some("Moderate"));
        assert_eq!(categorize(&bands, 0.75).as_deref(), Some("High"));
        assert_eq!(categorize(&bands, 1.0).as_deref(), Some("Very High"));
    }

    #[test]
    fn test_random_scores_stay_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(7);
        let scorer = DefaultRiskScorer::new(&ScoringConfig::default());
        let mut records: Vec<FusedRecord> = (0..500)
            .map(|i| {
                let mut r = FusedRecord::new(AdminKey::new("X", "R", i.to_string()));
                let maybe = |rng: &mut StdRng| -> Option<f64> {
                    if rng.gen_bool(0.9) {
                        Some(rng.gen_range(0.0..=1.0))
                    } else {
                        None
                    }
                };
                r.normalized = normalized(maybe(&mut rng), maybe(&mut rng), maybe(&mut rng));
                r
            })
            .collect();
        scorer.score_all(&mut records);

        for r in &records {
            if let Some(score) = r.scores.compound_risk_score {
                assert!((0.0..=1.0).contains(&score));
                let expected = r.scores.hazard_score.unwrap() * r.scores.combined_vulnerability.unwrap();
                assert!((score - expected).abs() < 1e-9);
                assert!(r.scores.risk_category.is_some());
            } else {
                assert!(r.scores.risk_category.is_none());
            }
        }
    }
}

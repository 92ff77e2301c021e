use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DegenerateRangePolicy;
use crate::domain::{FusedRecord, Metric};
use crate::error::{FusionError, Result};

/// Observed range of one metric across the fused corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRange {
    pub metric: Metric,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub non_null: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizationReport {
    pub ranges: Vec<MetricRange>,
    /// Metrics with min == max, zero-filled under the `zero_fill` policy.
    pub degenerate: Vec<Metric>,
    /// Metrics with no non-null value at all.
    pub empty: Vec<Metric>,
}

/// Trait for rescaling raw metrics into the normalized columns
pub trait Normalizer {
    fn normalize(&self, records: &mut [FusedRecord]) -> Result<NormalizationReport>;
}

/// Corpus-wide min/max rescaling to [0, 1].
pub struct MinMaxNormalizer {
    pub metrics: Vec<Metric>,
    pub policy: DegenerateRangePolicy,
}

impl MinMaxNormalizer {
    pub fn new(policy: DegenerateRangePolicy) -> Self {
        Self {
            metrics: Metric::ALL.to_vec(),
            policy,
        }
    }

    fn range_of(records: &[FusedRecord], metric: Metric) -> MetricRange {
        let mut min: Option<f64> = None;
        let mut max: Option<f64> = None;
        let mut non_null = 0;
        for value in records.iter().filter_map(|r| r.raw.get(metric)) {
            non_null += 1;
            min = Some(min.map_or(value, |m| m.min(value)));
            max = Some(max.map_or(value, |m| m.max(value)));
        }
        MetricRange {
            metric,
            min,
            max,
            non_null,
        }
    }
}

impl Normalizer for MinMaxNormalizer {
    fn normalize(&self, records: &mut [FusedRecord]) -> Result<NormalizationReport> {
        let mut report = NormalizationReport::default();

        for &metric in &self.metrics {
            let range = Self::range_of(records, metric);
            match (range.min, range.max) {
                (Some(min), Some(max)) if max > min => {
                    let span = max - min;
                    for record in records.iter_mut() {
                        let normalized = record
                            .raw
                            .get(metric)
                            .map(|v| ((v - min) / span).clamp(0.0, 1.0));
                        record.normalized.set(metric, normalized);
                    }
                }
                (Some(min), Some(_)) => match self.policy {
                    DegenerateRangePolicy::Fail => {
                        return Err(FusionError::DegenerateRange { metric, value: min });
                    }
                    DegenerateRangePolicy::ZeroFill => {
                        warn!(metric = %metric, value = min, "Metric has zero variance; normalized values set to 0");
                        for record in records.iter_mut() {
                            let normalized = record.raw.get(metric).map(|_| 0.0);
                            record.normalized.set(metric, normalized);
                        }
                        report.degenerate.push(metric);
                    }
                },
                _ => {
                    warn!(metric = %metric, "Metric has no values; normalized column left null");
                    for record in records.iter_mut() {
                        record.normalized.set(metric, None);
                    }
                    report.empty.push(metric);
                }
            }
            report.ranges.push(range);
        }

        info!(
            metrics = self.metrics.len(),
            degenerate = report.degenerate.len(),
            empty = report.empty.len(),
            "Normalized metrics"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AdminKey;

    fn record(sub_region: &str, hazard: Option<f64>, population: Option<f64>) -> FusedRecord {
        let mut r = FusedRecord::new(AdminKey::new("X", "R", sub_region));
        r.raw.hazard_days = hazard;
        r.raw.population = population;
        r
    }

    #[test]
    fn test_min_max_scaling() {
        let mut records = vec![
            record("a", Some(10.0), Some(5.0)),
            record("b", Some(20.0), Some(5.0)),
            record("c", Some(60.0), None),
        ];
        let normalizer = MinMaxNormalizer {
            metrics: vec![Metric::HazardDays],
            policy: DegenerateRangePolicy::ZeroFill,
        };
        normalizer.normalize(&mut records).unwrap();

        assert_eq!(records[0].normalized.hazard_days, Some(0.0));
        assert_eq!(records[1].normalized.hazard_days, Some(0.2));
        assert_eq!(records[2].normalized.hazard_days, Some(1.0));
    }

    #[test]
    fn test_null_stays_null_and_degenerate_zero_filled() {
        let mut records = vec![
            record("a", Some(10.0), Some(5.0)),
            record("b", Some(20.0), Some(5.0)),
            record("c", None, None),
        ];
        let report = MinMaxNormalizer::new(DegenerateRangePolicy::ZeroFill)
            .normalize(&mut records)
            .unwrap();

        assert_eq!(records[2].normalized.hazard_days, None);
        assert_eq!(records[0].normalized.population, Some(0.0));
        assert_eq!(records[2].normalized.population, None);
        assert_eq!(report.degenerate, vec![Metric::Population]);
        assert!(report.empty.contains(&Metric::PovertyRatio));
    }

    #[test]
    fn test_degenerate_range_fails_under_fail_policy() {
        let mut records = vec![record("a", Some(7.0), None), record("b", Some(7.0), None)];
        let normalizer = MinMaxNormalizer {
            metrics: vec![Metric::HazardDays],
            policy: DegenerateRangePolicy::Fail,
        };
        let err = normalizer.normalize(&mut records).unwrap_err();
        assert!(matches!(err, FusionError::DegenerateRange { metric: Metric::HazardDays, .. }));
    }

    #[test]
    fn test_values_within_unit_interval() {
        let mut records: Vec<FusedRecord> = (0..50)
            .map(|i| record(&i.to_string(), Some(i as f64 * 3.7 - 20.0), Some(1e6 / (i + 1) as f64)))
            .collect();
        MinMaxNormalizer::new(DegenerateRangePolicy::ZeroFill)
            .normalize(&mut records)
            .unwrap();
        for r in &records {
            for metric in [Metric::HazardDays, Metric::Population] {
                let v = r.normalized.get(metric).unwrap();
                assert!((0.0..=1.0).contains(&v));
            }
        }
    }
}

//! Run metadata: what went in, what was filled or dropped, and a short
//! digest of the results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::constants::{HAZARD_DAYS_RANGE, POVERTY_RATIO_RANGE};
use crate::domain::{AggregateRecord, FusedRecord, Metric, SourceId};
use crate::pipeline::processing::{AggregationWarning, ImputationReport, JoinDiagnostic, NormalizationReport};

/// Keys quoted per range finding.
const RANGE_SAMPLE_SIZE: usize = 5;

pub const COMPOUND_RISK_FIELD: &str = "compound_risk_score";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source: SourceId,
    pub path: PathBuf,
    pub input_rows: usize,
    pub reduced_keys: usize,
    pub fingerprint: String,
}

/// Measured values outside a metric's plausible range. Never fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeFinding {
    pub metric: Metric,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub violations: usize,
    pub sample_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopSubRegion {
    pub rank: u32,
    pub country: String,
    pub region: String,
    pub sub_region: String,
    pub compound_risk_score: f64,
    pub risk_category: Option<String>,
    pub population: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountrySummary {
    pub country: String,
    pub region_count: usize,
    pub sub_region_count: usize,
    pub population_total: f64,
    pub agricultural_value_total: f64,
    pub risk_score_aggregate: Option<f64>,
    pub high_risk_sub_regions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub engine_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config: Config,
    pub sources: Vec<SourceSummary>,
    pub fused_records: usize,
    pub join_diagnostics: Vec<JoinDiagnostic>,
    /// Percent of fused records with a non-null value, measured before
    /// imputation; plus the compound score after scoring.
    pub completeness: BTreeMap<String, f64>,
    pub imputation: Vec<ImputationReport>,
    pub normalization: NormalizationReport,
    pub range_findings: Vec<RangeFinding>,
    pub aggregation_warnings: Vec<AggregationWarning>,
    pub risk_distribution: BTreeMap<String, usize>,
    pub top_sub_regions: Vec<TopSubRegion>,
    pub country_summaries: Vec<CountrySummary>,
}

fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

/// Non-null percentage per raw metric.
pub fn metric_completeness(records: &[FusedRecord]) -> BTreeMap<String, f64> {
    Metric::ALL
        .iter()
        .map(|m| {
            let present = records.iter().filter(|r| r.raw.get(*m).is_some()).count();
            (m.as_str().to_string(), percent(present, records.len()))
        })
        .collect()
}

pub fn score_completeness(records: &[FusedRecord]) -> f64 {
    let scored = records.iter().filter(|r| r.scores.compound_risk_score.is_some()).count();
    percent(scored, records.len())
}

fn plausible_range(metric: Metric) -> (Option<f64>, Option<f64>) {
    match metric {
        Metric::HazardDays => (Some(HAZARD_DAYS_RANGE.0), Some(HAZARD_DAYS_RANGE.1)),
        Metric::PovertyRatio => (Some(POVERTY_RATIO_RANGE.0), Some(POVERTY_RATIO_RANGE.1)),
        Metric::Population | Metric::AgriculturalValue => (Some(0.0), None),
        Metric::ErosionProxy => (None, None),
    }
}

/// Check measured values against plausible bounds, logging each finding.
pub fn validate_ranges(records: &[FusedRecord]) -> Vec<RangeFinding> {
    let mut findings = Vec::new();
    for metric in Metric::ALL {
        let (lower, upper) = plausible_range(metric);
        if lower.is_none() && upper.is_none() {
            continue;
        }
        let offending: Vec<&FusedRecord> = records
            .iter()
            .filter(|r| match r.raw.get(metric) {
                Some(v) => lower.is_some_and(|l| v < l) || upper.is_some_and(|u| v > u),
                None => false,
            })
            .collect();
        if offending.is_empty() {
            continue;
        }
        warn!(
            metric = %metric,
            violations = offending.len(),
            ?lower,
            ?upper,
            "Values outside plausible range"
        );
        findings.push(RangeFinding {
            metric,
            lower,
            upper,
            violations: offending.len(),
            sample_keys: offending
                .iter()
                .take(RANGE_SAMPLE_SIZE)
                .map(|r| r.key.to_string())
                .collect(),
        });
    }
    findings
}

/// Count of sub-regions per risk category label. Unscored records are not
/// counted.
pub fn risk_distribution(records: &[FusedRecord]) -> BTreeMap<String, usize> {
    let mut distribution = BTreeMap::new();
    for label in records.iter().filter_map(|r| r.scores.risk_category.as_ref()) {
        *distribution.entry(label.clone()).or_insert(0) += 1;
    }
    distribution
}

/// The `n` highest compound scores, by continental rank then key.
pub fn top_sub_regions(records: &[FusedRecord], n: usize) -> Vec<TopSubRegion> {
    let mut ranked: Vec<(&FusedRecord, u32, f64)> = records
        .iter()
        .filter_map(|r| Some((r, r.ranks.continental_rank?, r.scores.compound_risk_score?)))
        .collect();
    ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.key.cmp(&b.0.key)));
    ranked
        .into_iter()
        .take(n)
        .map(|(r, rank, score)| TopSubRegion {
            rank,
            country: r.key.country.clone(),
            region: r.key.region.clone(),
            sub_region: r.key.sub_region.clone(),
            compound_risk_score: score,
            risk_category: r.scores.risk_category.clone(),
            population: r.raw.population,
        })
        .collect()
}

pub fn country_summaries(
    records: &[FusedRecord],
    countries: &[AggregateRecord],
    high_risk_labels: &[String],
) -> Vec<CountrySummary> {
    countries
        .iter()
        .map(|c| {
            let members: Vec<&FusedRecord> = records.iter().filter(|r| r.key.country == c.country).collect();
            let regions: BTreeSet<&str> = members.iter().map(|r| r.key.region.as_str()).collect();
            let high = members
                .iter()
                .filter(|r| {
                    r.scores
                        .risk_category
                        .as_ref()
                        .is_some_and(|l| high_risk_labels.contains(l))
                })
                .count();
            CountrySummary {
                country: c.country.clone(),
                region_count: regions.len(),
                sub_region_count: c.sub_region_count,
                population_total: c.population_total,
                agricultural_value_total: c.agricultural_value_total,
                risk_score_aggregate: c.risk_score_aggregate,
                high_risk_sub_regions: high,
            }
        })
        .collect()
}

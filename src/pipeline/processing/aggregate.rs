//! Roll sub-region records up to region and country level.
//!
//! Totals treat a null as zero. Weighted means only use records with a
//! non-null value and a positive population; a group with no such record gets
//! a null aggregate and an `AggregationWarning`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::config::RiskBand;
use crate::domain::{AdminLevel, AggregateRecord, FusedRecord};
use crate::pipeline::processing::score::categorize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationWarning {
    pub admin_level: AdminLevel,
    pub country: String,
    pub region: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct AggregationOutcome {
    pub regions: Vec<AggregateRecord>,
    pub countries: Vec<AggregateRecord>,
    pub warnings: Vec<AggregationWarning>,
}

/// Accumulates a population-weighted mean.
#[derive(Default)]
struct WeightedMean {
    weighted_sum: f64,
    weight: f64,
}

impl WeightedMean {
    fn add(&mut self, value: Option<f64>, population: Option<f64>) {
        if let (Some(v), Some(p)) = (value, population) {
            if p > 0.0 {
                self.weighted_sum += v * p;
                self.weight += p;
            }
        }
    }

    fn value(&self) -> Option<f64> {
        (self.weight > 0.0).then(|| self.weighted_sum / self.weight)
    }
}

#[derive(Default)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

#[derive(Default)]
struct GroupAccumulator {
    sub_regions: usize,
    scored: usize,
    population: f64,
    agricultural_value: f64,
    risk: WeightedMean,
    social: WeightedMean,
    combined: WeightedMean,
    hazard: Mean,
    environmental: Mean,
}

impl GroupAccumulator {
    fn add(&mut self, record: &FusedRecord) {
        let population = record.raw.population;
        self.sub_regions += 1;
        if record.scores.compound_risk_score.is_some() {
            self.scored += 1;
        }
        self.population += population.unwrap_or(0.0);
        self.agricultural_value += record.raw.agricultural_value.unwrap_or(0.0);
        self.risk.add(record.scores.compound_risk_score, population);
        self.social.add(record.scores.social_vulnerability, population);
        self.combined.add(record.scores.combined_vulnerability, population);
        self.hazard.add(record.scores.hazard_score);
        self.environmental.add(record.scores.environmental_vulnerability);
    }

    fn finish(self, level: AdminLevel, country: String, region: Option<String>, bands: &[RiskBand]) -> AggregateRecord {
        let risk_score_aggregate = self.risk.value();
        AggregateRecord {
            admin_level: level,
            country,
            region,
            sub_region_count: self.sub_regions,
            scored_sub_region_count: self.scored,
            population_total: self.population,
            agricultural_value_total: self.agricultural_value,
            risk_score_aggregate,
            risk_category: risk_score_aggregate.and_then(|s| categorize(bands, s)),
            social_vulnerability_weighted: self.social.value(),
            combined_vulnerability_weighted: self.combined.value(),
            hazard_score_mean: self.hazard.value(),
            environmental_vulnerability_mean: self.environmental.value(),
        }
    }
}

pub struct Aggregator;

impl Aggregator {
    pub fn aggregate(records: &[FusedRecord], bands: &[RiskBand]) -> AggregationOutcome {
        let mut by_region: BTreeMap<(String, String), GroupAccumulator> = BTreeMap::new();
        let mut by_country: BTreeMap<String, GroupAccumulator> = BTreeMap::new();
        for record in records {
            by_region.entry(record.key.region_key()).or_default().add(record);
            by_country.entry(record.key.country.clone()).or_default().add(record);
        }

        let mut outcome = AggregationOutcome::default();
        for ((country, region), acc) in by_region {
            let row = acc.finish(AdminLevel::Region, country, Some(region), bands);
            check_denominator(&row, &mut outcome.warnings);
            outcome.regions.push(row);
        }
        for (country, acc) in by_country {
            let row = acc.finish(AdminLevel::Country, country, None, bands);
            check_denominator(&row, &mut outcome.warnings);
            outcome.countries.push(row);
        }

        info!(
            regions = outcome.regions.len(),
            countries = outcome.countries.len(),
            warnings = outcome.warnings.len(),
            "Aggregated records"
        );
        outcome
    }
}

fn check_denominator(row: &AggregateRecord, warnings: &mut Vec<AggregationWarning>) {
    if row.risk_score_aggregate.is_some() {
        return;
    }
    let message = if row.scored_sub_region_count == 0 {
        "no sub-region has a compound risk score".to_string()
    } else {
        "scored sub-regions have no positive population".to_string()
    };
    warn!(
        level = %row.admin_level,
        country = %row.country,
        region = row.region.as_deref().unwrap_or(""),
        "Aggregate risk is null: {}",
        message
    );
    warnings.push(AggregationWarning {
        admin_level: row.admin_level,
        country: row.country.clone(),
        region: row.region.clone(),
        message,
    });
}

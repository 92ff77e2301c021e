//! Data shapes shared across the pipeline stages.
//!
//! Raw records keep their categorical dimensions explicitly so that several
//! rows sharing one administrative key are never mistaken for duplicates.
//! Only after category reduction is a source allowed to become a one-row-per-key
//! table, and only then can it be joined.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Composite administrative identifier, ordered country → region → sub-region.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AdminKey {
    pub country: String,
    pub region: String,
    pub sub_region: String,
}

impl AdminKey {
    pub fn new(country: impl Into<String>, region: impl Into<String>, sub_region: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            region: region.into(),
            sub_region: sub_region.into(),
        }
    }

    /// Key truncated to `(country, region)`.
    pub fn region_key(&self) -> (String, String) {
        (self.country.clone(), self.region.clone())
    }
}

impl fmt::Display for AdminKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.country, self.region, self.sub_region)
    }
}

/// The five ingested sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Hazard,
    Erosion,
    Population,
    AgriculturalValue,
    Poverty,
}

impl SourceId {
    pub const ALL: [SourceId; 5] = [
        SourceId::Hazard,
        SourceId::Erosion,
        SourceId::Population,
        SourceId::AgriculturalValue,
        SourceId::Poverty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Hazard => "hazard",
            SourceId::Erosion => "erosion",
            SourceId::Population => "population",
            SourceId::AgriculturalValue => "agricultural_value",
            SourceId::Poverty => "poverty",
        }
    }

    /// The fused metric this source populates.
    pub fn metric(&self) -> Metric {
        match self {
            SourceId::Hazard => Metric::HazardDays,
            SourceId::Erosion => Metric::ErosionProxy,
            SourceId::Population => Metric::Population,
            SourceId::AgriculturalValue => Metric::AgriculturalValue,
            SourceId::Poverty => Metric::PovertyRatio,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw metrics carried by a fused record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    HazardDays,
    ErosionProxy,
    Population,
    AgriculturalValue,
    PovertyRatio,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::HazardDays,
        Metric::ErosionProxy,
        Metric::Population,
        Metric::AgriculturalValue,
        Metric::PovertyRatio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::HazardDays => "hazard_days",
            Metric::ErosionProxy => "erosion_proxy",
            Metric::Population => "population",
            Metric::AgriculturalValue => "agricultural_value",
            Metric::PovertyRatio => "poverty_ratio",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One optional value per metric. `None` means "not measured".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricValues {
    pub hazard_days: Option<f64>,
    pub erosion_proxy: Option<f64>,
    pub population: Option<f64>,
    pub agricultural_value: Option<f64>,
    pub poverty_ratio: Option<f64>,
}

impl MetricValues {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::HazardDays => self.hazard_days,
            Metric::ErosionProxy => self.erosion_proxy,
            Metric::Population => self.population,
            Metric::AgriculturalValue => self.agricultural_value,
            Metric::PovertyRatio => self.poverty_ratio,
        }
    }

    pub fn set(&mut self, metric: Metric, value: Option<f64>) {
        let slot = match metric {
            Metric::HazardDays => &mut self.hazard_days,
            Metric::ErosionProxy => &mut self.erosion_proxy,
            Metric::Population => &mut self.population,
            Metric::AgriculturalValue => &mut self.agricultural_value,
            Metric::PovertyRatio => &mut self.poverty_ratio,
        };
        *slot = value;
    }
}

/// A loaded row before category reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub key: AdminKey,
    /// Categorical columns (scenario, timeframe, item, ...) by canonical name.
    pub dimensions: BTreeMap<String, String>,
    pub value: Option<f64>,
}

impl RawRecord {
    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions.get(name).map(String::as_str)
    }
}

/// An in-memory source table as produced by the loader (and, after reduction,
/// by the reducer: same shape, one row per key).
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTable {
    pub source: SourceId,
    /// Canonical names of the categorical columns present in the file.
    pub dimension_columns: BTreeSet<String>,
    pub rows: Vec<RawRecord>,
}

impl SourceTable {
    pub fn new(source: SourceId, dimension_columns: BTreeSet<String>, rows: Vec<RawRecord>) -> Self {
        Self {
            source,
            dimension_columns,
            rows,
        }
    }

    pub fn has_dimension(&self, name: &str) -> bool {
        self.dimension_columns.contains(name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A source reduced to exactly one value per administrative key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyedTable {
    pub values: BTreeMap<AdminKey, Option<f64>>,
}

impl KeyedTable {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, key: &AdminKey) -> bool {
        self.values.contains_key(key)
    }

    /// Value for `key`; `None` when the key is absent or measured as null.
    pub fn value(&self, key: &AdminKey) -> Option<f64> {
        self.values.get(key).copied().flatten()
    }
}

/// Score components of a fused record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskScores {
    pub hazard_score: Option<f64>,
    pub social_vulnerability: Option<f64>,
    pub environmental_vulnerability: Option<f64>,
    pub combined_vulnerability: Option<f64>,
    pub compound_risk_score: Option<f64>,
    pub risk_category: Option<String>,
}

/// Rank and share columns derived after scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankInfo {
    pub national_rank: Option<u32>,
    pub continental_rank: Option<u32>,
    pub population_share: Option<f64>,
    pub agricultural_value_share: Option<f64>,
}

/// One row per sub-region after the join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedRecord {
    pub key: AdminKey,
    pub raw: MetricValues,
    pub normalized: MetricValues,
    pub scores: RiskScores,
    /// Fields whose raw value was absent for this record and got imputed.
    pub imputed: BTreeSet<Metric>,
    pub ranks: RankInfo,
}

impl FusedRecord {
    pub fn new(key: AdminKey) -> Self {
        Self {
            key,
            raw: MetricValues::default(),
            normalized: MetricValues::default(),
            scores: RiskScores::default(),
            imputed: BTreeSet::new(),
            ranks: RankInfo::default(),
        }
    }

    pub fn is_imputed(&self, metric: Metric) -> bool {
        self.imputed.contains(&metric)
    }
}

/// Coarser administrative levels produced by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminLevel {
    Region,
    Country,
}

impl fmt::Display for AdminLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminLevel::Region => f.write_str("region"),
            AdminLevel::Country => f.write_str("country"),
        }
    }
}

/// Rolled-up figures for one region or country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub admin_level: AdminLevel,
    pub country: String,
    /// Empty for country-level rows.
    pub region: Option<String>,
    pub sub_region_count: usize,
    pub scored_sub_region_count: usize,
    pub population_total: f64,
    pub agricultural_value_total: f64,
    pub risk_score_aggregate: Option<f64>,
    pub risk_category: Option<String>,
    pub social_vulnerability_weighted: Option<f64>,
    pub combined_vulnerability_weighted: Option<f64>,
    pub hazard_score_mean: Option<f64>,
    pub environmental_vulnerability_mean: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_values_get_set() {
        let mut values = MetricValues::default();
        values.set(Metric::PovertyRatio, Some(0.4));
        assert_eq!(values.get(Metric::PovertyRatio), Some(0.4));
        assert_eq!(values.get(Metric::Population), None);
    }

    #[test]
    fn test_keyed_table_distinguishes_absent_and_null() {
        let mut table = KeyedTable::default();
        let measured_null = AdminKey::new("Kenya", "Nakuru", "Njoro");
        table.values.insert(measured_null.clone(), None);

        assert!(table.contains(&measured_null));
        assert_eq!(table.value(&measured_null), None);
        assert!(!table.contains(&AdminKey::new("Kenya", "Nakuru", "Molo")));
    }

    #[test]
    fn test_source_metric_mapping_is_one_to_one() {
        let metrics: BTreeSet<Metric> = SourceId::ALL.iter().map(|s| s.metric()).collect();
        assert_eq!(metrics.len(), Metric::ALL.len());
    }
}

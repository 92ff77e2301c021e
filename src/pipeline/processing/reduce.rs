use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument};

use crate::config::{Config, ReductionPolicy};
use crate::constants::{ITEM_COLUMN, SCENARIO_COLUMN, TIMEFRAME_COLUMN};
use crate::domain::{AdminKey, KeyedTable, RawRecord, SourceId, SourceTable};
use crate::error::{FusionError, Result};

/// Everything the reducer needs to know about one source, resolved from the
/// run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionSpec {
    pub policy: ReductionPolicy,
    pub scenario: String,
    pub timeframe: String,
    pub filters: BTreeMap<String, String>,
}

impl ReductionSpec {
    pub fn from_config(config: &Config, source: SourceId) -> Self {
        let source_config = config.sources.get(source);
        Self {
            policy: source_config.reduction,
            scenario: config.scenario_for(source).to_string(),
            timeframe: config.timeframe_for(source).to_string(),
            filters: source_config.filters.clone(),
        }
    }
}

/// A reduced source: one row per key, ready to join.
#[derive(Debug, Clone)]
pub struct ReducedSource {
    pub table: SourceTable,
    pub keyed: KeyedTable,
}

/// Collapses a source's row multiplicity to exactly one row per key.
pub struct CategoryReducer;

impl CategoryReducer {
    /// Apply filters and the configured policy, then check that every key
    /// occurs once.
    #[instrument(skip(table, spec), fields(source = %table.source, policy = ?spec.policy))]
    pub fn reduce(table: &SourceTable, spec: &ReductionSpec) -> Result<ReducedSource> {
        let input_rows = table.len();
        let filtered = apply_filters(table, &spec.filters)?;
        let reduced = match spec.policy {
            ReductionPolicy::ScenarioSelection => select_scenario(&filtered, &spec.scenario, &spec.timeframe)?,
            ReductionPolicy::CategorySum => sum_categories(&filtered),
            ReductionPolicy::Passthrough => filtered,
        };
        let keyed = to_keyed(&reduced)?;
        info!(
            source = %table.source,
            input_rows,
            keys = keyed.len(),
            "Reduced source to one row per key"
        );
        Ok(ReducedSource { table: reduced, keyed })
    }
}

/// Keep rows whose dimension `column` equals `value` for every filter.
pub fn apply_filters(table: &SourceTable, filters: &BTreeMap<String, String>) -> Result<SourceTable> {
    let mut current = table.clone();
    for (column, value) in filters {
        current = retain_dimension(&current, column, value)?;
    }
    Ok(current)
}

/// Scenario selection: keep one scenario and, when the source carries a
/// timeframe column, one timeframe.
pub fn select_scenario(table: &SourceTable, scenario: &str, timeframe: &str) -> Result<SourceTable> {
    let by_scenario = retain_dimension(table, SCENARIO_COLUMN, scenario)?;
    if by_scenario.has_dimension(TIMEFRAME_COLUMN) {
        retain_dimension(&by_scenario, TIMEFRAME_COLUMN, timeframe)
    } else {
        Ok(by_scenario)
    }
}

/// Category summation: one row per key holding the sum over categories.
/// Null values add zero; a key whose values are all null sums to 0.
pub fn sum_categories(table: &SourceTable) -> SourceTable {
    let mut groups: BTreeMap<AdminKey, Vec<&RawRecord>> = BTreeMap::new();
    for row in &table.rows {
        groups.entry(row.key.clone()).or_default().push(row);
    }

    let rows = groups
        .into_iter()
        .map(|(key, members)| {
            let value: f64 = members.iter().filter_map(|r| r.value).sum();
            RawRecord {
                key,
                dimensions: shared_dimensions(&members),
                value: Some(value),
            }
        })
        .collect();

    let dimension_columns: BTreeSet<String> = table
        .dimension_columns
        .iter()
        .filter(|c| c.as_str() != ITEM_COLUMN)
        .cloned()
        .collect();

    SourceTable::new(table.source, dimension_columns, rows)
}

/// Dimensions with a single value across the whole group, minus the summed
/// category column itself.
fn shared_dimensions(members: &[&RawRecord]) -> BTreeMap<String, String> {
    let Some(first) = members.first() else {
        return BTreeMap::new();
    };
    first
        .dimensions
        .iter()
        .filter(|(name, _)| name.as_str() != ITEM_COLUMN)
        .filter(|(name, value)| members.iter().all(|m| m.dimensions.get(*name) == Some(*value)))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Convert a reduced table to its keyed form. Any key still occurring more
/// than once is a fatal error rather than a silent drop.
pub fn to_keyed(table: &SourceTable) -> Result<KeyedTable> {
    let mut keyed = KeyedTable::default();
    for row in &table.rows {
        if keyed.values.insert(row.key.clone(), row.value).is_some() {
            return Err(FusionError::DuplicateKey {
                source_id: table.source,
                key: row.key.clone(),
            });
        }
    }
    Ok(keyed)
}

fn retain_dimension(table: &SourceTable, column: &str, value: &str) -> Result<SourceTable> {
    if !table.has_dimension(column) {
        return Err(FusionError::Configuration(format!(
            "source '{}' has no '{}' column to select '{}' from",
            table.source, column, value
        )));
    }

    let rows: Vec<RawRecord> = table
        .rows
        .iter()
        .filter(|r| r.dimension(column) == Some(value))
        .cloned()
        .collect();

    if rows.is_empty() {
        let available: BTreeSet<&str> = table.rows.iter().filter_map(|r| r.dimension(column)).collect();
        return Err(FusionError::Configuration(format!(
            "{} '{}' does not exist in source '{}'; available: [{}]",
            column,
            value,
            table.source,
            available.into_iter().collect::<Vec<_>>().join(", ")
        )));
    }

    debug!(
        source = %table.source,
        column,
        value,
        kept = rows.len(),
        dropped = table.len() - rows.len(),
        "Applied dimension selection"
    );
    Ok(SourceTable::new(table.source, table.dimension_columns.clone(), rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sub_region: &str, dims: &[(&str, &str)], value: Option<f64>) -> RawRecord {
        RawRecord {
            key: AdminKey::new("Kenya", "Nakuru", sub_region),
            dimensions: dims.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            value,
        }
    }

    fn table(source: SourceId, dims: &[&str], rows: Vec<RawRecord>) -> SourceTable {
        SourceTable::new(source, dims.iter().map(|d| d.to_string()).collect(), rows)
    }

    fn hazard_table() -> SourceTable {
        table(
            SourceId::Hazard,
            &["scenario", "timeframe"],
            vec![
                record("Njoro", &[("scenario", "A"), ("timeframe", "2041_2060")], Some(10.0)),
                record("Njoro", &[("scenario", "B"), ("timeframe", "2041_2060")], Some(20.0)),
                record("Njoro", &[("scenario", "A"), ("timeframe", "2021_2040")], Some(5.0)),
            ],
        )
    }

    #[test]
    fn test_scenario_selection_keeps_selected_row() {
        let reduced = select_scenario(&hazard_table(), "A", "2041_2060").unwrap();
        assert_eq!(reduced.len(), 1);
        assert_eq!(reduced.rows[0].value, Some(10.0));

        let keyed = to_keyed(&reduced).unwrap();
        assert_eq!(keyed.value(&AdminKey::new("Kenya", "Nakuru", "Njoro")), Some(10.0));
    }

    #[test]
    fn test_unknown_scenario_is_configuration_error() {
        let err = select_scenario(&hazard_table(), "C", "2041_2060").unwrap_err();
        match err {
            FusionError::Configuration(msg) => {
                assert!(msg.contains("'C'"));
                assert!(msg.contains("A, B"));
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_timeframe_is_configuration_error() {
        assert!(matches!(
            select_scenario(&hazard_table(), "B", "2021_2040"),
            Err(FusionError::Configuration(_))
        ));
    }

    #[test]
    fn test_timeframe_skipped_when_column_absent() {
        let population = table(
            SourceId::Population,
            &["scenario"],
            vec![
                record("Njoro", &[("scenario", "ssp245")], Some(1000.0)),
                record("Njoro", &[("scenario", "ssp585")], Some(1200.0)),
            ],
        );
        let reduced = select_scenario(&population, "ssp245", "2041_2060").unwrap();
        assert_eq!(reduced.len(), 1);
        assert_eq!(reduced.rows[0].value, Some(1000.0));
    }

    #[test]
    fn test_scenario_selection_is_idempotent() {
        let once = select_scenario(&hazard_table(), "A", "2041_2060").unwrap();
        let twice = select_scenario(&once, "A", "2041_2060").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_category_sum_totals_per_key() {
        let vop = table(
            SourceId::AgriculturalValue,
            &["item", "exposure"],
            vec![
                record("Njoro", &[("item", "maize"), ("exposure", "vop")], Some(100.0)),
                record("Njoro", &[("item", "beans"), ("exposure", "vop")], Some(50.0)),
                record("Njoro", &[("item", "tea"), ("exposure", "vop")], None),
                record("Molo", &[("item", "maize"), ("exposure", "vop")], None),
            ],
        );
        let summed = sum_categories(&vop);
        let keyed = to_keyed(&summed).unwrap();

        assert_eq!(keyed.len(), 2);
        assert_eq!(keyed.value(&AdminKey::new("Kenya", "Nakuru", "Njoro")), Some(150.0));
        // All-null key stays present with a zero total
        assert!(keyed.contains(&AdminKey::new("Kenya", "Nakuru", "Molo")));
        assert_eq!(keyed.value(&AdminKey::new("Kenya", "Nakuru", "Molo")), Some(0.0));
        assert!(!summed.has_dimension("item"));
        assert_eq!(summed.rows[0].dimension("exposure"), Some("vop"));
    }

    #[test]
    fn test_category_sum_is_idempotent() {
        let vop = table(
            SourceId::AgriculturalValue,
            &["item"],
            vec![
                record("Njoro", &[("item", "maize")], Some(100.0)),
                record("Njoro", &[("item", "beans")], Some(50.0)),
                record("Molo", &[("item", "maize")], Some(7.5)),
            ],
        );
        let once = sum_categories(&vop);
        let twice = sum_categories(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_filters_select_and_reject() {
        let poverty = table(
            SourceId::Poverty,
            &["variable"],
            vec![
                record("Njoro", &[("variable", "GSAP_poor365")], Some(0.4)),
                record("Njoro", &[("variable", "GSAP_poor215")], Some(0.2)),
            ],
        );
        let mut filters = BTreeMap::new();
        filters.insert("variable".to_string(), "GSAP_poor365".to_string());
        let filtered = apply_filters(&poverty, &filters).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.rows[0].value, Some(0.4));

        filters.insert("exposure".to_string(), "vop".to_string());
        assert!(matches!(apply_filters(&poverty, &filters), Err(FusionError::Configuration(_))));
    }

    #[test]
    fn test_remaining_multiplicity_is_duplicate_key_error() {
        let spec = ReductionSpec {
            policy: ReductionPolicy::Passthrough,
            scenario: "A".to_string(),
            timeframe: "2041_2060".to_string(),
            filters: BTreeMap::new(),
        };
        let err = CategoryReducer::reduce(&hazard_table(), &spec).unwrap_err();
        assert!(matches!(err, FusionError::DuplicateKey { source_id: SourceId::Hazard, .. }));
    }

    #[test]
    fn test_reduce_applies_config() {
        let mut config = Config::default();
        config.selection.scenario = "B".to_string();
        let spec = ReductionSpec::from_config(&config, SourceId::Hazard);
        let reduced = CategoryReducer::reduce(&hazard_table(), &spec).unwrap();
        assert_eq!(reduced.keyed.value(&AdminKey::new("Kenya", "Nakuru", "Njoro")), Some(20.0));
    }

    #[test]
    fn test_default_erosion_selects_historic_aridity_index() {
        fn dims(scenario: &'static str, timeframe: &'static str, indicator: &'static str) -> [(&'static str, &'static str); 3] {
            [
                ("scenario", scenario),
                ("timeframe", timeframe),
                ("hazard_indicator_name", indicator),
            ]
        }
        let erosion = table(
            SourceId::Erosion,
            &["scenario", "timeframe", "hazard_indicator_name"],
            vec![
                record("Njoro", &dims("historic", "historic", "TAI"), Some(0.42)),
                record("Njoro", &dims("historic", "historic", "PTOT"), Some(812.0)),
                record("Njoro", &dims("ssp245", "2041_2060", "TAI"), Some(0.38)),
            ],
        );

        let spec = ReductionSpec::from_config(&Config::default(), SourceId::Erosion);
        let reduced = CategoryReducer::reduce(&erosion, &spec).unwrap();
        assert_eq!(reduced.keyed.len(), 1);
        assert_eq!(reduced.keyed.value(&AdminKey::new("Kenya", "Nakuru", "Njoro")), Some(0.42));
    }

    #[test]
    fn test_default_population_and_poverty_filters() {
        let population = table(
            SourceId::Population,
            &["scenario", "population_type"],
            vec![
                record("Njoro", &[("scenario", "ssp245"), ("population_type", "total_pop")], Some(100.0)),
                record("Njoro", &[("scenario", "ssp245"), ("population_type", "rural_pop")], Some(60.0)),
            ],
        );
        let spec = ReductionSpec::from_config(&Config::default(), SourceId::Population);
        let reduced = CategoryReducer::reduce(&population, &spec).unwrap();
        assert_eq!(reduced.keyed.value(&AdminKey::new("Kenya", "Nakuru", "Njoro")), Some(100.0));

        let poverty = table(
            SourceId::Poverty,
            &["variable"],
            vec![
                record("Njoro", &[("variable", "GSAP_poor215")], Some(0.2)),
                record("Njoro", &[("variable", "GSAP_poor365")], Some(0.4)),
            ],
        );
        let spec = ReductionSpec::from_config(&Config::default(), SourceId::Poverty);
        let reduced = CategoryReducer::reduce(&poverty, &spec).unwrap();
        assert_eq!(reduced.keyed.value(&AdminKey::new("Kenya", "Nakuru", "Njoro")), Some(0.4));
    }
}

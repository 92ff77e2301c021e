use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, instrument, warn};

use crate::config::JoinConfig;
use crate::domain::{AdminKey, FusedRecord, KeyedTable, SourceId};
use crate::error::{FusionError, Result};

/// Required sources are inner-joined into the anchor key set; optional
/// sources are left-joined onto it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPlan {
    pub required: Vec<SourceId>,
    pub optional: Vec<SourceId>,
}

impl JoinPlan {
    pub fn new(required: Vec<SourceId>, optional: Vec<SourceId>) -> Self {
        Self { required, optional }
    }

    pub fn from_config(config: &JoinConfig) -> Self {
        Self::new(config.required_sources.clone(), config.optional_sources())
    }

    fn validate(&self, tables: &BTreeMap<SourceId, KeyedTable>) -> Result<()> {
        if self.required.is_empty() {
            return Err(FusionError::Configuration("join plan has no required sources".to_string()));
        }
        if let Some(both) = self.required.iter().find(|s| self.optional.contains(s)) {
            return Err(FusionError::Configuration(format!(
                "source '{}' is listed as both required and optional",
                both
            )));
        }
        if let Some(missing) = self.required.iter().find(|s| !tables.contains_key(s)) {
            return Err(FusionError::Configuration(format!(
                "required source '{}' was not loaded",
                missing
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinRole {
    Required,
    Optional,
}

/// Per-source match counts. Diagnostics only; never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinDiagnostic {
    pub source: SourceId,
    pub role: JoinRole,
    pub source_keys: usize,
    pub matched_anchor_keys: usize,
    /// Anchor keys this source has no row for.
    pub unmatched_anchor_keys: usize,
    /// Source keys outside the anchor set, and therefore not in the output.
    pub dropped_source_keys: usize,
}

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub records: Vec<FusedRecord>,
    pub diagnostics: Vec<JoinDiagnostic>,
}

/// Builds one fused record per anchor key.
pub struct JoinEngine;

impl JoinEngine {
    #[instrument(skip_all, fields(required = ?plan.required, optional = ?plan.optional))]
    pub fn join(plan: &JoinPlan, tables: &BTreeMap<SourceId, KeyedTable>) -> Result<JoinOutcome> {
        plan.validate(tables)?;

        let mut required_tables = plan.required.iter().map(|s| (*s, &tables[s]));
        let (first_source, first_table) = required_tables
            .next()
            .ok_or_else(|| FusionError::Configuration("join plan has no required sources".to_string()))?;
        let mut anchor: BTreeSet<AdminKey> = first_table.values.keys().cloned().collect();
        info!(source = %first_source, keys = anchor.len(), "Join anchor seeded");
        for (source, table) in required_tables {
            anchor.retain(|k| table.contains(k));
            info!(source = %source, keys = anchor.len(), "After inner join");
        }

        let mut diagnostics = Vec::new();
        for source in &plan.required {
            diagnostics.push(diagnose(*source, JoinRole::Required, &tables[source], &anchor));
        }

        let mut records: Vec<FusedRecord> = anchor.iter().map(|k| FusedRecord::new(k.clone())).collect();
        for source in plan.required.iter().chain(plan.optional.iter()) {
            let Some(table) = tables.get(source) else {
                warn!(source = %source, "Optional source not loaded; its field stays null");
                continue;
            };
            let metric = source.metric();
            for record in records.iter_mut() {
                record.raw.set(metric, table.value(&record.key));
            }
        }

        for source in &plan.optional {
            if let Some(table) = tables.get(source) {
                let diagnostic = diagnose(*source, JoinRole::Optional, table, &anchor);
                if diagnostic.unmatched_anchor_keys > 0 {
                    warn!(
                        source = %source,
                        unmatched = diagnostic.unmatched_anchor_keys,
                        anchor = anchor.len(),
                        "Optional source does not cover every anchor key"
                    );
                }
                diagnostics.push(diagnostic);
            }
        }

        info!(records = records.len(), "Join complete");
        Ok(JoinOutcome { records, diagnostics })
    }
}

fn diagnose(source: SourceId, role: JoinRole, table: &KeyedTable, anchor: &BTreeSet<AdminKey>) -> JoinDiagnostic {
    let matched = anchor.iter().filter(|k| table.contains(k)).count();
    JoinDiagnostic {
        source,
        role,
        source_keys: table.len(),
        matched_anchor_keys: matched,
        unmatched_anchor_keys: anchor.len() - matched,
        dropped_source_keys: table.len() - matched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Metric;

    fn key(sub_region: &str) -> AdminKey {
        AdminKey::new("Kenya", "Nakuru", sub_region)
    }

    fn keyed(entries: &[(&str, Option<f64>)]) -> KeyedTable {
        KeyedTable {
            values: entries.iter().map(|(s, v)| (key(s), *v)).collect(),
        }
    }

    fn tables() -> BTreeMap<SourceId, KeyedTable> {
        let mut tables = BTreeMap::new();
        tables.insert(SourceId::Hazard, keyed(&[("A", Some(10.0)), ("B", Some(20.0)), ("C", Some(30.0))]));
        tables.insert(SourceId::Erosion, keyed(&[("A", Some(1.0)), ("B", Some(2.0)), ("D", Some(4.0))]));
        tables.insert(SourceId::Population, keyed(&[("A", Some(100.0)), ("Z", Some(5.0))]));
        tables.insert(SourceId::Poverty, keyed(&[("A", None), ("B", Some(0.3))]));
        tables
    }

    fn plan() -> JoinPlan {
        JoinPlan::new(
            vec![SourceId::Hazard, SourceId::Erosion],
            vec![SourceId::Population, SourceId::Poverty, SourceId::AgriculturalValue],
        )
    }

    #[test]
    fn test_inner_join_on_required_sources() {
        let outcome = JoinEngine::join(&plan(), &tables()).unwrap();
        let keys: Vec<_> = outcome.records.iter().map(|r| r.key.sub_region.as_str()).collect();
        assert_eq!(keys, vec!["A", "B"]);
    }

    #[test]
    fn test_optional_absence_is_null_not_zero() {
        let outcome = JoinEngine::join(&plan(), &tables()).unwrap();
        let b = outcome.records.iter().find(|r| r.key == key("B")).unwrap();
        assert_eq!(b.raw.get(Metric::Population), None);
        assert_eq!(b.raw.get(Metric::HazardDays), Some(20.0));
        assert_eq!(b.raw.get(Metric::ErosionProxy), Some(2.0));
        // Source that was never loaded leaves the field null everywhere
        assert!(outcome.records.iter().all(|r| r.raw.get(Metric::AgriculturalValue).is_none()));
        assert!(outcome.records.iter().all(|r| r.imputed.is_empty()));
    }

    #[test]
    fn test_diagnostics_report_misses_without_failing() {
        let outcome = JoinEngine::join(&plan(), &tables()).unwrap();
        let population = outcome
            .diagnostics
            .iter()
            .find(|d| d.source == SourceId::Population)
            .unwrap();
        assert_eq!(population.role, JoinRole::Optional);
        assert_eq!(population.matched_anchor_keys, 1);
        assert_eq!(population.unmatched_anchor_keys, 1);
        assert_eq!(population.dropped_source_keys, 1);

        let hazard = outcome.diagnostics.iter().find(|d| d.source == SourceId::Hazard).unwrap();
        assert_eq!(hazard.unmatched_anchor_keys, 0);
        assert_eq!(hazard.dropped_source_keys, 1);
    }

    #[test]
    fn test_measured_null_in_optional_source_stays_null() {
        let outcome = JoinEngine::join(&plan(), &tables()).unwrap();
        let a = outcome.records.iter().find(|r| r.key == key("A")).unwrap();
        assert_eq!(a.raw.get(Metric::PovertyRatio), None);
        let poverty = outcome.diagnostics.iter().find(|d| d.source == SourceId::Poverty).unwrap();
        assert_eq!(poverty.matched_anchor_keys, 2);
    }

    #[test]
    fn test_missing_required_source_is_configuration_error() {
        let plan = JoinPlan::new(vec![SourceId::Hazard, SourceId::AgriculturalValue], vec![]);
        assert!(matches!(JoinEngine::join(&plan, &tables()), Err(FusionError::Configuration(_))));
    }

    #[test]
    fn test_overlapping_roles_rejected() {
        let plan = JoinPlan::new(vec![SourceId::Hazard], vec![SourceId::Hazard]);
        assert!(matches!(JoinEngine::join(&plan, &tables()), Err(FusionError::Configuration(_))));
    }
}

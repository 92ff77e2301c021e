//! Hierarchical median imputation.
//!
//! The set of rows to flag is captured before any value changes and is
//! written to the records unchanged. Medians are taken over original non-null
//! values only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, instrument};

use crate::domain::{FusedRecord, Metric};
use crate::error::{FusionError, Result};

/// Outcome of imputing one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputationReport {
    pub field: Metric,
    pub imputed_rows: usize,
    pub filled_from_country_median: usize,
    pub filled_from_global_median: usize,
    pub global_median: Option<f64>,
}

/// Median of `values`; mean of the two middle values for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub struct ImputationEngine;

impl ImputationEngine {
    /// Impute each configured field in turn.
    pub fn impute_all(records: &mut [FusedRecord], fields: &[Metric]) -> Result<Vec<ImputationReport>> {
        fields.iter().map(|f| Self::impute(records, *f)).collect()
    }

    /// Fill nulls in `field` with the same-country median, falling back to the
    /// global median, and flag exactly the rows that were null.
    #[instrument(skip(records), fields(records = records.len()))]
    pub fn impute(records: &mut [FusedRecord], field: Metric) -> Result<ImputationReport> {
        // Step 1: the missingness predicate, per row, before any change
        let missing: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.raw.get(field).is_none())
            .map(|(i, _)| i)
            .collect();

        if missing.is_empty() {
            info!(field = %field, "No missing values; nothing to impute");
            return Ok(ImputationReport {
                field,
                imputed_rows: 0,
                filled_from_country_median: 0,
                filled_from_global_median: 0,
                global_median: None,
            });
        }

        let mut present_by_country: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        let mut present: Vec<f64> = Vec::with_capacity(records.len());
        for record in records.iter() {
            if let Some(v) = record.raw.get(field) {
                present_by_country.entry(record.key.country.as_str()).or_default().push(v);
                present.push(v);
            }
        }

        let global_median = median(&present).ok_or(FusionError::Imputation { field })?;
        let country_medians: BTreeMap<String, f64> = present_by_country
            .into_iter()
            .filter_map(|(country, values)| median(&values).map(|m| (country.to_string(), m)))
            .collect();

        let mut from_country = 0;
        let mut from_global = 0;
        for &i in &missing {
            let record = &mut records[i];
            let fill = match country_medians.get(&record.key.country) {
                Some(m) => {
                    from_country += 1;
                    *m
                }
                None => {
                    from_global += 1;
                    global_median
                }
            };
            record.raw.set(field, Some(fill));
            record.imputed.insert(field);
        }

        info!(
            field = %field,
            imputed = missing.len(),
            from_country,
            from_global,
            global_median,
            "Imputed missing values"
        );

        Ok(ImputationReport {
            field,
            imputed_rows: missing.len(),
            filled_from_country_median: from_country,
            filled_from_global_median: from_global,
            global_median: Some(global_median),
        })
    }
}

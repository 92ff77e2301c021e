//! Metrics for the fusion pipeline.
//!
//! Recording goes through the `metrics` facade; the binary installs a
//! Prometheus recorder whose rendered text can be written beside the outputs.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fmt;
use std::sync::OnceLock;
use tracing::info;

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Run metrics
    RunsSuccess,
    RunsError,
    RunDuration,
    StageDuration,

    // Load metrics
    RowsLoaded,
    KeysReduced,

    // Join metrics
    FusedRecords,
    JoinUnmatchedKeys,

    // Quality metrics
    ImputedRows,
    DegenerateMetrics,
    RangeViolations,
    AggregationWarnings,

    // Result metrics
    HighRiskSubRegions,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::RunsSuccess => "atlas_runs_success_total",
            MetricName::RunsError => "atlas_runs_error_total",
            MetricName::RunDuration => "atlas_run_duration_seconds",
            MetricName::StageDuration => "atlas_stage_duration_seconds",

            MetricName::RowsLoaded => "atlas_rows_loaded_total",
            MetricName::KeysReduced => "atlas_keys_reduced_total",

            MetricName::FusedRecords => "atlas_fused_records",
            MetricName::JoinUnmatchedKeys => "atlas_join_unmatched_keys_total",

            MetricName::ImputedRows => "atlas_imputed_rows_total",
            MetricName::DegenerateMetrics => "atlas_degenerate_metrics_total",
            MetricName::RangeViolations => "atlas_range_violations_total",
            MetricName::AggregationWarnings => "atlas_aggregation_warnings_total",

            MetricName::HighRiskSubRegions => "atlas_high_risk_sub_regions",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            RunsSuccess,
            RunsError,
            RunDuration,
            StageDuration,
            RowsLoaded,
            KeysReduced,
            FusedRecords,
            JoinUnmatchedKeys,
            ImputedRows,
            DegenerateMetrics,
            RangeViolations,
            AggregationWarnings,
            HighRiskSubRegions,
        ]
        .into_iter()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Calling it twice is a no-op.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    METRICS_HANDLE.set(handle).ok();
    info!("Metrics recorder installed");
    Ok(())
}

/// Prometheus text exposition of everything recorded so far, if a recorder
/// was installed.
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|handle| handle.render())
}

// ============================================================================
// Run Metrics
// ============================================================================

pub mod run {
    use super::MetricName;
    use crate::error::Stage;

    pub fn success(secs: f64) {
        ::metrics::counter!(MetricName::RunsSuccess.as_str()).increment(1);
        ::metrics::histogram!(MetricName::RunDuration.as_str()).record(secs);
    }

    pub fn error(stage: Stage) {
        ::metrics::counter!(MetricName::RunsError.as_str(), "stage" => stage.to_string()).increment(1);
    }

    pub fn stage_duration(stage: Stage, secs: f64) {
        ::metrics::histogram!(MetricName::StageDuration.as_str(), "stage" => stage.to_string()).record(secs);
    }

    pub fn high_risk_sub_regions(count: usize) {
        ::metrics::gauge!(MetricName::HighRiskSubRegions.as_str()).set(count as f64);
    }
}

// ============================================================================
// Load Metrics
// ============================================================================

pub mod load {
    use super::MetricName;
    use crate::domain::SourceId;

    pub fn rows_loaded(source: SourceId, rows: usize) {
        ::metrics::counter!(MetricName::RowsLoaded.as_str(), "source" => source.as_str()).increment(rows as u64);
    }

    pub fn keys_reduced(source: SourceId, keys: usize) {
        ::metrics::counter!(MetricName::KeysReduced.as_str(), "source" => source.as_str()).increment(keys as u64);
    }
}

// ============================================================================
// Join Metrics
// ============================================================================

pub mod join {
    use super::MetricName;
    use crate::domain::SourceId;

    pub fn fused_records(count: usize) {
        ::metrics::gauge!(MetricName::FusedRecords.as_str()).set(count as f64);
    }

    pub fn unmatched_keys(source: SourceId, count: usize) {
        ::metrics::counter!(MetricName::JoinUnmatchedKeys.as_str(), "source" => source.as_str())
            .increment(count as u64);
    }
}

// ============================================================================
// Quality Metrics
// ============================================================================

pub mod quality {
    use super::MetricName;
    use crate::domain::Metric;

    pub fn imputed_rows(field: Metric, rows: usize) {
        ::metrics::counter!(MetricName::ImputedRows.as_str(), "field" => field.as_str()).increment(rows as u64);
    }

    pub fn degenerate_metric(metric: Metric) {
        ::metrics::counter!(MetricName::DegenerateMetrics.as_str(), "metric" => metric.as_str()).increment(1);
    }

    pub fn range_violations(metric: Metric, count: usize) {
        ::metrics::counter!(MetricName::RangeViolations.as_str(), "metric" => metric.as_str())
            .increment(count as u64);
    }

    pub fn aggregation_warnings(count: usize) {
        ::metrics::counter!(MetricName::AggregationWarnings.as_str()).increment(count as u64);
    }
}

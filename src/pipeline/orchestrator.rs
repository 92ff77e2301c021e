//! Runs the stages in order over one immutable configuration.
//!
//! Loads (and per-source reductions) are independent and run in parallel on
//! the blocking pool; every load finishes before the join starts. Each later
//! stage consumes the complete output of the one before it.

use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{AggregateRecord, FusedRecord, KeyedTable, SourceId};
use crate::error::{FusionError, Result, Stage};
use crate::observability::metrics;
use crate::pipeline::ingestion::{DatasetLoader, LoadedSource, SourceSchema};
use crate::pipeline::processing::{
    Aggregator, CategoryReducer, DefaultRiskScorer, ImputationEngine, JoinEngine, JoinPlan, MinMaxNormalizer,
    Normalizer, Ranker, ReducedSource, ReductionSpec, RiskScorer,
};
use crate::pipeline::summary::{self, RunMetadata, SourceSummary, COMPOUND_RISK_FIELD};

/// A source after loading and reduction.
#[derive(Debug, Clone)]
pub struct SourceLoad {
    pub loaded: LoadedSource,
    pub reduced: ReducedSource,
}

/// Everything one run produces. Published as a whole or not at all.
#[derive(Debug, Clone)]
pub struct FusionOutput {
    pub sub_regions: Vec<FusedRecord>,
    pub regions: Vec<AggregateRecord>,
    pub countries: Vec<AggregateRecord>,
    pub high_risk: Vec<FusedRecord>,
    pub metadata: RunMetadata,
}

pub struct FusionPipeline {
    config: Config,
}

fn finish_stage(stage: Stage, started: Instant) {
    metrics::run::stage_duration(stage, started.elapsed().as_secs_f64());
}

impl FusionPipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sources the run reads: every required source, plus optional sources
    /// whose file exists.
    fn sources_to_load(&self) -> Vec<SourceId> {
        let required = &self.config.join.required_sources;
        SourceId::ALL
            .iter()
            .copied()
            .filter(|source| {
                if required.contains(source) {
                    return true;
                }
                let path = self.config.source_path(*source);
                if path.exists() {
                    true
                } else {
                    warn!(source = %source, path = %path.display(), "Optional source file not found; skipping");
                    false
                }
            })
            .collect()
    }

    /// Load and reduce every source in parallel. The first failure aborts the
    /// remaining tasks.
    #[instrument(skip(self))]
    pub async fn load_sources(&self) -> Result<BTreeMap<SourceId, SourceLoad>> {
        let mut tasks = JoinSet::new();
        for source in self.sources_to_load() {
            let schema = SourceSchema::for_source(source);
            let spec = ReductionSpec::from_config(&self.config, source);
            let path = self.config.source_path(source);
            tasks.spawn_blocking(move || -> Result<(SourceId, SourceLoad)> {
                let loaded = DatasetLoader::load_file(&schema, &path)?;
                let reduced = CategoryReducer::reduce(&loaded.table, &spec)?;
                Ok((source, SourceLoad { loaded, reduced }))
            });
        }

        let mut loads = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(FusionError::Task(format!("load task did not complete: {}", e))),
            };
            match outcome {
                Ok((source, load)) => {
                    metrics::load::rows_loaded(source, load.loaded.row_count);
                    metrics::load::keys_reduced(source, load.reduced.keyed.len());
                    loads.insert(source, load);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }
        Ok(loads)
    }

    /// Execute a full run and return its output without publishing it.
    #[instrument(skip(self), fields(scenario = %self.config.selection.scenario, timeframe = %self.config.selection.timeframe))]
    pub async fn run(&self) -> Result<FusionOutput> {
        let config = &self.config;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, "Starting fusion run");

        let started = Instant::now();
        let loads = self.load_sources().await?;
        finish_stage(Stage::Load, started);

        let started = Instant::now();
        let tables: BTreeMap<SourceId, KeyedTable> = loads
            .iter()
            .map(|(source, load)| (*source, load.reduced.keyed.clone()))
            .collect();
        let outcome = JoinEngine::join(&JoinPlan::from_config(&config.join), &tables)?;
        let mut records = outcome.records;
        for diagnostic in &outcome.diagnostics {
            metrics::join::unmatched_keys(diagnostic.source, diagnostic.unmatched_anchor_keys);
        }
        metrics::join::fused_records(records.len());
        finish_stage(Stage::Join, started);

        let mut completeness = summary::metric_completeness(&records);
        let range_findings = summary::validate_ranges(&records);
        for finding in &range_findings {
            metrics::quality::range_violations(finding.metric, finding.violations);
        }

        let started = Instant::now();
        let imputable: Vec<_> = config
            .imputation
            .fields
            .iter()
            .copied()
            .filter(|field| {
                let loaded = SourceId::ALL
                    .iter()
                    .any(|s| s.metric() == *field && loads.contains_key(s));
                if !loaded {
                    warn!(field = %field, "Source for imputable field was not loaded; field stays null");
                }
                loaded
            })
            .collect();
        let imputation = ImputationEngine::impute_all(&mut records, &imputable)?;
        for report in &imputation {
            metrics::quality::imputed_rows(report.field, report.imputed_rows);
        }
        finish_stage(Stage::Impute, started);

        let started = Instant::now();
        let normalization = MinMaxNormalizer::new(config.scoring.degenerate_range).normalize(&mut records)?;
        for metric in &normalization.degenerate {
            metrics::quality::degenerate_metric(*metric);
        }
        finish_stage(Stage::Normalize, started);

        let started = Instant::now();
        DefaultRiskScorer::new(&config.scoring).score_all(&mut records);
        Ranker::rank(&mut records);
        completeness.insert(COMPOUND_RISK_FIELD.to_string(), summary::score_completeness(&records));
        finish_stage(Stage::Score, started);

        let started = Instant::now();
        let aggregation = Aggregator::aggregate(&records, &config.scoring.risk_category_thresholds);
        metrics::quality::aggregation_warnings(aggregation.warnings.len());
        finish_stage(Stage::Aggregate, started);

        let high_risk: Vec<FusedRecord> = records
            .iter()
            .filter(|r| {
                r.scores
                    .risk_category
                    .as_ref()
                    .is_some_and(|label| config.output.high_risk_labels.contains(label))
            })
            .cloned()
            .collect();
        metrics::run::high_risk_sub_regions(high_risk.len());

        let sources = loads
            .iter()
            .map(|(source, load)| SourceSummary {
                source: *source,
                path: load.loaded.path.clone(),
                input_rows: load.loaded.row_count,
                reduced_keys: load.reduced.keyed.len(),
                fingerprint: load.loaded.fingerprint.clone(),
            })
            .collect();

        let metadata = RunMetadata {
            run_id,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at,
            finished_at: Utc::now(),
            config: config.clone(),
            sources,
            fused_records: records.len(),
            join_diagnostics: outcome.diagnostics,
            completeness,
            imputation,
            normalization,
            range_findings,
            aggregation_warnings: aggregation.warnings.clone(),
            risk_distribution: summary::risk_distribution(&records),
            top_sub_regions: summary::top_sub_regions(&records, config.output.top_n),
            country_summaries: summary::country_summaries(
                &records,
                &aggregation.countries,
                &config.output.high_risk_labels,
            ),
        };

        info!(
            %run_id,
            sub_regions = records.len(),
            regions = aggregation.regions.len(),
            countries = aggregation.countries.len(),
            high_risk = high_risk.len(),
            "Fusion run complete"
        );

        Ok(FusionOutput {
            sub_regions: records,
            regions: aggregation.regions,
            countries: aggregation.countries,
            high_risk,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants;
    use std::fs;
    use std::path::Path;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn fixture(dir: &Path) {
        write(
            dir,
            constants::HAZARD_FILE,
            "admin0_name,admin1_name,admin2_name,scenario,timeframe,hazard,value\n\
             Kenya,Nakuru,Njoro,ssp245,2041_2060,NDWS,10\n\
             Kenya,Nakuru,Njoro,ssp585,2041_2060,NDWS,99\n\
             Kenya,Nakuru,Molo,ssp245,2041_2060,NDWS,30\n\
             Uganda,Mbale,Bududa,ssp245,2041_2060,NDWS,50\n",
        );
        write(
            dir,
            constants::EROSION_FILE,
            "country,region,sub_region,scenario,timeframe,hazard_indicator_name,value\n\
             Kenya,Nakuru,Njoro,historic,historic,TAI,0.2\n\
             Kenya,Nakuru,Molo,historic,historic,TAI,0.6\n\
             Uganda,Mbale,Bududa,historic,historic,TAI,0.4\n",
        );
        write(
            dir,
            constants::AGRICULTURAL_VALUE_FILE,
            "country,region,sub_region,crop,value\n\
             Kenya,Nakuru,Njoro,maize,100\nKenya,Nakuru,Njoro,beans,50\n\
             Kenya,Nakuru,Molo,maize,80\nUganda,Mbale,Bududa,coffee,200\n",
        );
        write(
            dir,
            constants::POVERTY_FILE,
            "country,region,sub_region,variable,value\n\
             Kenya,Nakuru,Njoro,GSAP_poor365,0.3\nUganda,Mbale,Bududa,GSAP_poor365,0.5\n",
        );
    }

    fn config_for(dir: &Path) -> Config {
        let mut config = Config::default();
        config.paths.input_dir = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_run_without_population_source() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());

        let output = FusionPipeline::new(config_for(dir.path())).run().await.unwrap();

        assert_eq!(output.sub_regions.len(), 3);
        assert!(output.sub_regions.iter().all(|r| r.raw.population.is_none()));
        let molo = output.sub_regions.iter().find(|r| r.key.sub_region == "Molo").unwrap();
        assert!(molo.is_imputed(crate::domain::Metric::PovertyRatio));
        assert_eq!(molo.raw.poverty_ratio, Some(0.3));
        let njoro = output.sub_regions.iter().find(|r| r.key.sub_region == "Njoro").unwrap();
        assert_eq!(njoro.raw.hazard_days, Some(10.0));
        assert_eq!(njoro.raw.agricultural_value, Some(150.0));
        assert_eq!(output.metadata.sources.len(), 4);
        assert_eq!(output.countries.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_required_source_aborts() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());
        fs::remove_file(dir.path().join(constants::EROSION_FILE)).unwrap();

        let err = FusionPipeline::new(config_for(dir.path())).run().await.unwrap_err();
        assert!(matches!(err, FusionError::Io { .. }));
        assert_eq!(err.stage(), Stage::Load);
    }

    #[tokio::test]
    async fn test_unknown_scenario_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());
        let mut config = config_for(dir.path());
        config.selection.scenario = "ssp126".to_string();

        let err = FusionPipeline::new(config).run().await.unwrap_err();
        assert!(matches!(err, FusionError::Configuration(_)));
    }
}

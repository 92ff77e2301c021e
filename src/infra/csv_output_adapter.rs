use async_trait::async_trait;
use std::fmt::Display;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::app::ports::FusionOutputPort;
use crate::config::Config;
use crate::constants::{
    COUNTRY_OUTPUT, HIGH_RISK_OUTPUT, METADATA_OUTPUT, METRICS_OUTPUT, REGION_OUTPUT, SUB_REGION_OUTPUT,
};
use crate::domain::{AggregateRecord, FusedRecord, Metric};
use crate::error::{FusionError, Result};
use crate::pipeline::orchestrator::FusionOutput;

/// File-based implementation of FusionOutputPort.
///
/// Every file is written into a staging directory inside the output
/// directory first and moved into place once all of them were written. A
/// failed move restores the previous output set.
pub struct CsvOutputAdapter {
    output_dir: PathBuf,
    write_metrics: bool,
}

fn output_error(path: &Path, e: impl Display) -> FusionError {
    FusionError::Output(format!("{}: {}", path.display(), e))
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn rank_cell(value: Option<u32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Header of the sub-region table. One `<field>_imputed` column per
/// imputable field.
pub fn sub_region_header(imputed_fields: &[Metric]) -> Vec<String> {
    let mut header: Vec<String> = ["country", "region", "sub_region"].iter().map(|s| s.to_string()).collect();
    header.extend(Metric::ALL.iter().map(|m| m.as_str().to_string()));
    header.extend(imputed_fields.iter().map(|m| format!("{}_imputed", m)));
    header.extend(Metric::ALL.iter().map(|m| format!("normalized_{}", m)));
    header.extend(
        [
            "hazard_score",
            "social_vulnerability",
            "environmental_vulnerability",
            "combined_vulnerability",
            "compound_risk_score",
            "risk_category",
            "national_rank",
            "continental_rank",
            "population_share",
            "agricultural_value_share",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    header
}

pub fn sub_region_row(record: &FusedRecord, imputed_fields: &[Metric]) -> Vec<String> {
    let mut row = vec![
        record.key.country.clone(),
        record.key.region.clone(),
        record.key.sub_region.clone(),
    ];
    row.extend(Metric::ALL.iter().map(|m| cell(record.raw.get(*m))));
    row.extend(imputed_fields.iter().map(|m| record.is_imputed(*m).to_string()));
    row.extend(Metric::ALL.iter().map(|m| cell(record.normalized.get(*m))));
    let scores = &record.scores;
    row.extend([
        cell(scores.hazard_score),
        cell(scores.social_vulnerability),
        cell(scores.environmental_vulnerability),
        cell(scores.combined_vulnerability),
        cell(scores.compound_risk_score),
        scores.risk_category.clone().unwrap_or_default(),
        rank_cell(record.ranks.national_rank),
        rank_cell(record.ranks.continental_rank),
        cell(record.ranks.population_share),
        cell(record.ranks.agricultural_value_share),
    ]);
    row
}

/// Write sub-region records as CSV; nulls become empty cells.
pub fn write_sub_regions<W: Write>(writer: W, records: &[FusedRecord], imputed_fields: &[Metric]) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(sub_region_header(imputed_fields))?;
    for record in records {
        wtr.write_record(sub_region_row(record, imputed_fields))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_aggregates<W: Write>(writer: W, records: &[AggregateRecord]) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

impl CsvOutputAdapter {
    pub fn new(output_dir: impl Into<PathBuf>, write_metrics: bool) -> Self {
        Self {
            output_dir: output_dir.into(),
            write_metrics,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.paths.output_dir, config.output.write_metrics)
    }

    fn create_file(dir: &Path, name: &str) -> Result<(PathBuf, fs::File)> {
        let path = dir.join(name);
        let file = fs::File::create(&path).map_err(|e| output_error(&path, e))?;
        Ok((path, file))
    }

    /// Write every table and the metadata into `staging`. Returns the file
    /// names written.
    fn write_staged(&self, staging: &Path, output: &FusionOutput) -> Result<Vec<&'static str>> {
        let imputed_fields = &output.metadata.config.imputation.fields;

        let (path, file) = Self::create_file(staging, SUB_REGION_OUTPUT)?;
        write_sub_regions(file, &output.sub_regions, imputed_fields).map_err(|e| output_error(&path, e))?;

        let (path, file) = Self::create_file(staging, HIGH_RISK_OUTPUT)?;
        write_sub_regions(file, &output.high_risk, imputed_fields).map_err(|e| output_error(&path, e))?;

        let (path, file) = Self::create_file(staging, REGION_OUTPUT)?;
        write_aggregates(file, &output.regions).map_err(|e| output_error(&path, e))?;

        let (path, file) = Self::create_file(staging, COUNTRY_OUTPUT)?;
        write_aggregates(file, &output.countries).map_err(|e| output_error(&path, e))?;

        let (path, file) = Self::create_file(staging, METADATA_OUTPUT)?;
        serde_json::to_writer_pretty(file, &output.metadata).map_err(|e| output_error(&path, e))?;

        Ok(vec![
            SUB_REGION_OUTPUT,
            HIGH_RISK_OUTPUT,
            REGION_OUTPUT,
            COUNTRY_OUTPUT,
            METADATA_OUTPUT,
        ])
    }

    fn publish_blocking(&self, output: &FusionOutput) -> Result<()> {
        fs::create_dir_all(&self.output_dir).map_err(|e| output_error(&self.output_dir, e))?;
        let run_id = output.metadata.run_id;
        let staging = self.output_dir.join(format!(".staging-{}", run_id));
        let previous = self.output_dir.join(format!(".previous-{}", run_id));
        fs::create_dir_all(&staging).map_err(|e| output_error(&staging, e))?;

        let result = self.write_staged(&staging, output).and_then(|written| {
            install(&staging, &previous, &self.output_dir, &written, |from: &Path, to: &Path| {
                fs::rename(from, to)
            })
            .map(|()| written)
        });

        if let Err(e) = fs::remove_dir_all(&staging) {
            warn!(path = %staging.display(), "Failed to remove staging directory: {}", e);
        }
        if previous.exists() {
            // After a failed install the directory only empties if every
            // previous file was restored; keep it otherwise.
            let removed = if result.is_ok() {
                fs::remove_dir_all(&previous)
            } else {
                fs::remove_dir(&previous)
            };
            if let Err(e) = removed {
                warn!(path = %previous.display(), "Failed to remove previous-output directory: {}", e);
            }
        }

        let written = result?;
        info!(
            output_dir = %self.output_dir.display(),
            files = written.len(),
            "Run output published"
        );
        Ok(())
    }

    fn write_metrics_blocking(&self, rendered: &str) -> Result<()> {
        fs::create_dir_all(&self.output_dir).map_err(|e| output_error(&self.output_dir, e))?;
        let target = self.output_dir.join(METRICS_OUTPUT);
        let tmp = self.output_dir.join(format!(".{}.tmp", METRICS_OUTPUT));
        fs::write(&tmp, rendered).map_err(|e| output_error(&tmp, e))?;
        fs::rename(&tmp, &target).map_err(|e| output_error(&target, e))?;
        info!(path = %target.display(), "Published metrics snapshot");
        Ok(())
    }
}

/// Move the staged files `names` into `output_dir`. Existing targets are
/// moved into `previous` first. When any move fails, the files already
/// installed are removed and the previous ones put back before the error is
/// returned.
fn install<F>(staging: &Path, previous: &Path, output_dir: &Path, names: &[&'static str], mut rename: F) -> Result<()>
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    for name in names {
        let target = output_dir.join(name);
        if target.is_dir() {
            return Err(output_error(&target, "existing output is a directory"));
        }
    }
    fs::create_dir_all(previous).map_err(|e| output_error(previous, e))?;

    let mut moved_aside = Vec::new();
    let mut installed = Vec::new();
    for name in names {
        let target = output_dir.join(name);
        let step = (|| {
            if target.exists() {
                rename(&target, &previous.join(name))?;
                moved_aside.push(*name);
            }
            rename(&staging.join(name), &target)?;
            installed.push(*name);
            Ok::<(), io::Error>(())
        })();
        if let Err(e) = step {
            roll_back(previous, output_dir, &moved_aside, &installed);
            return Err(output_error(&target, e));
        }
    }
    for name in &installed {
        debug!(path = %output_dir.join(name).display(), "Installed output file");
    }
    Ok(())
}

fn roll_back(previous: &Path, output_dir: &Path, moved_aside: &[&'static str], installed: &[&'static str]) {
    for name in installed.iter().rev() {
        let target = output_dir.join(name);
        if let Err(e) = fs::remove_file(&target) {
            warn!(path = %target.display(), "Failed to remove partially published file: {}", e);
        }
    }
    for name in moved_aside.iter().rev() {
        let target = output_dir.join(name);
        if let Err(e) = fs::rename(previous.join(name), &target) {
            warn!(path = %target.display(), "Failed to restore previous output: {}", e);
        }
    }
    warn!(
        output_dir = %output_dir.display(),
        restored = moved_aside.len(),
        "Publication rolled back"
    );
}

#[async_trait]
impl FusionOutputPort for CsvOutputAdapter {
    async fn publish(&self, output: &FusionOutput) -> Result<()> {
        let adapter = CsvOutputAdapter::new(self.output_dir.clone(), self.write_metrics);
        let output = output.clone();
        tokio::task::spawn_blocking(move || adapter.publish_blocking(&output))
            .await
            .map_err(|e| FusionError::Task(format!("publish task did not complete: {}", e)))?
    }

    async fn publish_metrics(&self, rendered: &str) -> Result<()> {
        if !self.write_metrics {
            debug!("Metrics output disabled; skipping {}", METRICS_OUTPUT);
            return Ok(());
        }
        let adapter = CsvOutputAdapter::new(self.output_dir.clone(), self.write_metrics);
        let rendered = rendered.to_string();
        tokio::task::spawn_blocking(move || adapter.write_metrics_blocking(&rendered))
            .await
            .map_err(|e| FusionError::Task(format!("metrics task did not complete: {}", e)))?
    }
}

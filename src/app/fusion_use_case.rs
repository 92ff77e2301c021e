use std::time::Instant;
use tracing::{error, info, warn};

use crate::app::ports::FusionOutputPort;
use crate::config::Config;
use crate::error::{Result, Stage};
use crate::pipeline::orchestrator::{FusionOutput, FusionPipeline};

/// Use case for running the fusion pipeline and publishing its output
pub struct FusionUseCase {
    pipeline: FusionPipeline,
    output: Box<dyn FusionOutputPort>,
}

impl FusionUseCase {
    pub fn new(pipeline: FusionPipeline, output: Box<dyn FusionOutputPort>) -> Self {
        Self { pipeline, output }
    }

    pub fn with_config(config: Config, output: Box<dyn FusionOutputPort>) -> Self {
        Self::new(FusionPipeline::new(config), output)
    }

    /// Run the pipeline and publish the result. Nothing is published when any
    /// stage fails.
    pub async fn execute(&self) -> Result<FusionOutput> {
        let started = Instant::now();

        let output = match self.pipeline.run().await {
            Ok(output) => output,
            Err(e) => {
                error!(stage = %e.stage(), "Fusion run failed: {}", e);
                crate::observability::metrics::run::error(e.stage());
                return Err(e);
            }
        };

        let publish_started = Instant::now();
        if let Err(e) = self.output.publish(&output).await {
            error!(stage = %Stage::Publish, "Publishing failed: {}", e);
            crate::observability::metrics::run::error(Stage::Publish);
            return Err(e);
        }
        crate::observability::metrics::run::stage_duration(Stage::Publish, publish_started.elapsed().as_secs_f64());

        let elapsed = started.elapsed().as_secs_f64();
        crate::observability::metrics::run::success(elapsed);
        if let Some(rendered) = crate::observability::metrics::render() {
            if let Err(e) = self.output.publish_metrics(&rendered).await {
                warn!("Failed to publish metrics snapshot: {}", e);
            }
        }
        info!(
            run_id = %output.metadata.run_id,
            elapsed_secs = elapsed,
            "Run published"
        );
        Ok(output)
    }
}

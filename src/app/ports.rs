use async_trait::async_trait;

use crate::error::Result;
use crate::pipeline::orchestrator::FusionOutput;

/// Destination for a finished run. Implementations publish every table of the
/// output or none of them.
#[async_trait]
pub trait FusionOutputPort: Send + Sync {
    async fn publish(&self, output: &FusionOutput) -> Result<()>;

    /// Store a rendered metrics snapshot, taken once the run outcome was
    /// recorded. Discarded by default.
    async fn publish_metrics(&self, _rendered: &str) -> Result<()> {
        Ok(())
    }
}

//! The ordered boot phase: config fetch, asset staging, filesystem mounts.
//!
//! Runs as a table-driven pipeline so the ordering guarantees live in one
//! plan: configuration happens-before staging, staging happens-before any
//! mount (the staged helper is the mount actuator), pseudo mounts
//! happen-before block and share mounts.

mod tasks;

use std::sync::Arc;

use tokio::sync::Mutex;
use vmlite_shared::{VmConfig, VmliteError, VmliteResult};

use crate::hostapi::HostClient;
use crate::pipeline::{self, ExecutionPlan, Stage};
use tasks::{
    BlockMountsTask, FetchConfigTask, PseudoMountsTask, ShareMountsTask, StageAssetsTask,
};

/// Shared context of the boot pipeline.
pub struct BootState {
    pub client: HostClient,
    pub config: Option<VmConfig>,
}

pub type BootCtx = Arc<Mutex<BootState>>;

/// Run the full boot sequence and return the loaded configuration.
pub async fn run(client: HostClient) -> VmliteResult<VmConfig> {
    let ctx: BootCtx = Arc::new(Mutex::new(BootState {
        client,
        config: None,
    }));

    let plan = ExecutionPlan::new(vec![
        Stage::sequential(vec![Box::new(FetchConfigTask)]),
        Stage::sequential(vec![Box::new(StageAssetsTask)]),
        Stage::sequential(vec![Box::new(PseudoMountsTask)]),
        Stage::sequential(vec![Box::new(BlockMountsTask), Box::new(ShareMountsTask)]),
    ]);

    let timings = pipeline::execute(plan, Arc::clone(&ctx)).await?;
    let total_ms: u64 = timings.iter().map(|t| t.duration_ms).sum();
    tracing::info!(total_ms, "boot sequence complete");

    let mut state = ctx.lock().await;
    state
        .config
        .take()
        .ok_or_else(|| VmliteError::Internal("boot finished without a config".into()))
}

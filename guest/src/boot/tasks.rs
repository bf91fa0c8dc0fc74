//! The individual boot tasks.

use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;

use async_trait::async_trait;
use vmlite_shared::constants::{CONFIG_ENDPOINT, VMCONFIG_PATH};
use vmlite_shared::{VmConfig, VmliteError, VmliteResult};

use super::BootCtx;
use crate::pipeline::BootTask;
use crate::{assets, mounts};

/// Fetch the configuration from the host, validate it, and persist it for
/// ad-hoc guest tooling. The raw bytes are written as received; the guest
/// never rewrites the host's document.
pub struct FetchConfigTask;

#[async_trait]
impl BootTask<BootCtx> for FetchConfigTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> VmliteResult<()> {
        let client = ctx.lock().await.client.clone();

        let raw = client.get_json(CONFIG_ENDPOINT).await?;
        let config: VmConfig = serde_json::from_slice(&raw)
            .map_err(|err| VmliteError::Config(format!("decode {CONFIG_ENDPOINT}: {err}")))?;
        config.validate()?;

        persist_config(&raw)?;
        tracing::info!(
            run_mode = ?config.run_mode,
            network_mode = ?config.virtual_network_mode,
            "configuration loaded from host"
        );

        ctx.lock().await.config = Some(config);
        Ok(())
    }

    fn name(&self) -> &str {
        "fetch_config"
    }
}

fn persist_config(raw: &[u8]) -> VmliteResult<()> {
    fs::write(VMCONFIG_PATH, raw)?;
    fs::set_permissions(VMCONFIG_PATH, Permissions::from_mode(0o644))?;
    Ok(())
}

/// Stage the embedded helper binaries into their tmpfs.
pub struct StageAssetsTask;

#[async_trait]
impl BootTask<BootCtx> for StageAssetsTask {
    async fn run(self: Box<Self>, _ctx: BootCtx) -> VmliteResult<()> {
        assets::stage().await
    }

    fn name(&self) -> &str {
        "stage_assets"
    }
}

/// Mount the fixed pseudo-filesystem table.
pub struct PseudoMountsTask;

#[async_trait]
impl BootTask<BootCtx> for PseudoMountsTask {
    async fn run(self: Box<Self>, _ctx: BootCtx) -> VmliteResult<()> {
        mounts::mount_pseudo_all().await
    }

    fn name(&self) -> &str {
        "pseudo_mounts"
    }
}

/// Mount every configured block device, in config order.
pub struct BlockMountsTask;

#[async_trait]
impl BootTask<BootCtx> for BlockMountsTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> VmliteResult<()> {
        let devices = {
            let state = ctx.lock().await;
            let config = state
                .config
                .as_ref()
                .ok_or_else(|| VmliteError::Internal("block mounts before config".into()))?;
            config.blk_devs.clone()
        };

        for dev in &devices {
            mounts::mount_block(dev).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "block_mounts"
    }
}

/// Mount every configured virtiofs share, in config order.
pub struct ShareMountsTask;

#[async_trait]
impl BootTask<BootCtx> for ShareMountsTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> VmliteResult<()> {
        let shares = {
            let state = ctx.lock().await;
            let config = state
                .config
                .as_ref()
                .ok_or_else(|| VmliteError::Internal("share mounts before config".into()))?;
            config.mounts.clone()
        };

        for share in &shares {
            mounts::mount_share(share).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "share_mounts"
    }
}

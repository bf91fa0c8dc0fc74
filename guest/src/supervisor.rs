//! Guest lifecycle: boot, service scope, shutdown propagation.
//!
//! After the boot pipeline, the mode-specific service set runs in parallel
//! under one cancellation token. First-error-wins: the first task that comes
//! back with an error (the workload sentinel included) or the first host
//! signal becomes the cause, the token is cancelled, and the supervisor
//! drains every remaining task before returning. Errors surfacing from
//! already-cancelled siblings are discarded.

use std::future::Future;
use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use vmlite_shared::config::RunMode;
use vmlite_shared::{VmConfig, VmliteError, VmliteResult};

use crate::hostapi::HostClient;
use crate::services::{command, podman, ssh, timesync};
use crate::{boot, network};

/// Run the guest to completion. `Ok(())` means the guest did its job (the
/// workload finished cleanly); any `Err` is the first fatal cause.
pub async fn run() -> VmliteResult<()> {
    let config = boot::run(HostClient::new()).await?;
    run_services(Arc::new(config)).await
}

async fn run_services(config: Arc<VmConfig>) -> VmliteResult<()> {
    let cancel = CancellationToken::new();
    let mut services: JoinSet<VmliteResult<()>> = JoinSet::new();

    spawn_service(&mut services, "network", {
        let config = Arc::clone(&config);
        let cancel = cancel.clone();
        async move { network::configure(&config, &cancel).await }
    });
    spawn_service(&mut services, "ssh", {
        let config = Arc::clone(&config);
        let cancel = cancel.clone();
        async move { ssh::run(&config, &cancel).await }
    });
    spawn_service(&mut services, "timesync", {
        let cancel = cancel.clone();
        async move { timesync::run(&cancel).await }
    });
    match config.run_mode {
        RunMode::Rootfs => {
            spawn_service(&mut services, "command", {
                let config = Arc::clone(&config);
                let cancel = cancel.clone();
                async move { command::run(&config, &cancel).await }
            });
        }
        RunMode::Container => {
            spawn_service(&mut services, "podman", {
                let config = Arc::clone(&config);
                let cancel = cancel.clone();
                async move { podman::run(&config, &cancel).await }
            });
        }
    }

    tracing::info!(run_mode = ?config.run_mode, "all services started, guest is ready");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut cause: Option<VmliteError> = None;

    loop {
        tokio::select! {
            joined = services.join_next() => match joined {
                None => break,
                Some(Ok(Ok(()))) => {
                    // A finite service completed, or a sibling observed
                    // cancellation; neither changes the cause.
                }
                Some(Ok(Err(err))) => {
                    if cause.is_none() {
                        cause = Some(err);
                        cancel.cancel();
                    } else {
                        tracing::debug!(error = %err, "discarding error from cancelled sibling");
                    }
                }
                Some(Err(join_err)) => {
                    if cause.is_none() {
                        cause = Some(VmliteError::Internal(format!(
                            "service task aborted: {join_err}"
                        )));
                        cancel.cancel();
                    }
                }
            },
            _ = sigterm.recv(), if cause.is_none() => {
                cause = Some(VmliteError::Shutdown("SIGTERM".into()));
                cancel.cancel();
            }
            _ = sigint.recv(), if cause.is_none() => {
                cause = Some(VmliteError::Shutdown("SIGINT".into()));
                cancel.cancel();
            }
        }
    }

    // Every task has returned; flush block devices before the VM goes away.
    for dev in config.blk_devs.iter().rev() {
        crate::mounts::unmount(&dev.mount_to).await;
    }

    resolve_cause(cause)
}

/// Map the recorded cause to the process outcome: only the workload
/// sentinel (or no cause at all) is success.
fn resolve_cause(cause: Option<VmliteError>) -> VmliteResult<()> {
    match cause {
        None => Ok(()),
        Some(err) if err.is_graceful() => {
            tracing::info!("workload finished, shutting down");
            Ok(())
        }
        Some(err) => Err(err),
    }
}

fn spawn_service<F>(services: &mut JoinSet<VmliteResult<()>>, name: &'static str, fut: F)
where
    F: Future<Output = VmliteResult<()>> + Send + 'static,
{
    services.spawn(async move {
        tracing::debug!(service = name, "starting");
        let result = fut.await;
        match &result {
            Ok(()) => tracing::debug!(service = name, "finished"),
            Err(err) if err.is_graceful() => {
                tracing::info!(service = name, "workload complete");
            }
            Err(err) => tracing::error!(service = name, error = %err, "failed"),
        }
        result
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_resolves_to_success() {
        assert!(resolve_cause(Some(VmliteError::WorkloadDone)).is_ok());
        assert!(resolve_cause(None).is_ok());
    }

    #[test]
    fn failures_and_signals_resolve_to_errors() {
        assert!(resolve_cause(Some(VmliteError::Shutdown("SIGTERM".into()))).is_err());
        assert!(resolve_cause(Some(VmliteError::Service("dropbear exited".into()))).is_err());
    }
}

//! Long-running guest services, each a task under the shared cancellation
//! scope.
//!
//! Contract: a service returns `Err` when it can no longer do its job (which
//! brings the guest down), `Err(WorkloadDone)` when the workload finished
//! cleanly, and `Ok(())` only after observing cancellation or completing a
//! finite job (network setup). Services never talk to each other; the only
//! thing they share is the immutable config.

pub mod command;
pub mod podman;
pub mod ssh;
pub mod timesync;

use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use vmlite_shared::{VmliteError, VmliteResult};

/// Wait on a service process, treating its exit as a failure of the service.
///
/// On cancellation the child is killed and reaped before returning, so the
/// supervisor's drain sees no orphans.
pub(crate) async fn wait_child(
    name: &str,
    mut child: Child,
    cancel: &CancellationToken,
) -> VmliteResult<()> {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => Err(VmliteError::Service(format!("{name} exited: {status}"))),
            Err(err) => Err(VmliteError::Service(format!("wait on {name}: {err}"))),
        },
        _ = cancel.cancelled() => {
            child.start_kill().ok();
            let _ = child.wait().await;
            tracing::debug!(service = name, "stopped on cancellation");
            Ok(())
        }
    }
}

//! Container-engine API server, the workload in container run mode.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use vmlite_shared::constants::CONTAINER_STORAGE_DIR;
use vmlite_shared::{VmConfig, VmliteError, VmliteResult};

use crate::services::wait_child;
use crate::{helper, mounts};

pub async fn run(config: &VmConfig, cancel: &CancellationToken) -> VmliteResult<()> {
    let info = config
        .podman_info
        .as_ref()
        .ok_or_else(|| VmliteError::Config("container mode without podmanInfo".into()))?;

    // Podman writes image and container state here; without the host-provided
    // mount it would fill the guest's RAM-backed rootfs.
    if !mounts::is_mount_point(CONTAINER_STORAGE_DIR).await {
        return Err(VmliteError::Service(format!(
            "container storage {CONTAINER_STORAGE_DIR} is not mounted"
        )));
    }

    let endpoint = format!("tcp://0.0.0.0:{}", info.guest_podman_api_port);
    let child = helper::spawn_daemon(
        Path::new("podman"),
        &["system", "service", "--time=0", &endpoint],
    )?;

    tracing::info!(endpoint = %endpoint, "podman API service started");
    wait_child("podman system service", child, cancel).await
}

//! Filesystem mounting, actuated through the staged helper.
//!
//! Three variants: pseudo filesystems selected by type, block devices
//! selected by UUID, and virtiofs shares selected by tag. All three go
//! through `busybox mount` so the logic stays uniform; targets are created
//! first and existing mount points are skipped.

use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;

use vmlite_shared::config::{BlockDevice, Mount};
use vmlite_shared::{VmliteError, VmliteResult};

use crate::helper;

/// One entry of the fixed early-boot mount table.
pub struct PseudoMount {
    pub source: &'static str,
    pub target: &'static str,
    pub fstype: &'static str,
    pub opts: &'static str,
}

/// The fixed pseudo-filesystem table, executed unconditionally during init.
///
/// Order matters: `/dev`, `/proc` and `/sys` must exist before their
/// sub-filesystems, and everything here must exist before any helper that
/// expects a populated hierarchy runs.
pub const PSEUDO_MOUNTS: &[PseudoMount] = &[
    PseudoMount { source: "tmpfs", target: "/tmp", fstype: "tmpfs", opts: "nosuid,nodev,mode=1777" },
    PseudoMount { source: "tmpfs", target: "/run", fstype: "tmpfs", opts: "nosuid,nodev,mode=0755" },
    PseudoMount { source: "tmpfs", target: "/var/tmp", fstype: "tmpfs", opts: "nosuid,nodev,mode=1777" },
    PseudoMount { source: "tmpfs", target: "/disk_mnt", fstype: "tmpfs", opts: "nosuid,nodev,mode=0755" },
    PseudoMount { source: "devtmpfs", target: "/dev", fstype: "devtmpfs", opts: "nosuid,mode=0755" },
    PseudoMount { source: "devpts", target: "/dev/pts", fstype: "devpts", opts: "nosuid,noexec,mode=0620,ptmxmode=000" },
    PseudoMount { source: "shm", target: "/dev/shm", fstype: "tmpfs", opts: "nosuid,nodev,mode=1777" },
    PseudoMount { source: "proc", target: "/proc", fstype: "proc", opts: "nosuid,nodev,noexec" },
    PseudoMount { source: "binfmt_misc", target: "/proc/sys/fs/binfmt_misc", fstype: "binfmt_misc", opts: "nosuid,nodev,noexec" },
    PseudoMount { source: "sysfs", target: "/sys", fstype: "sysfs", opts: "nosuid,nodev,noexec" },
    PseudoMount { source: "fusectl", target: "/sys/fs/fuse/connections", fstype: "fusectl", opts: "nosuid,nodev,noexec" },
    PseudoMount { source: "cgroup2", target: "/sys/fs/cgroup", fstype: "cgroup2", opts: "nosuid,nodev,noexec,nsdelegate" },
    PseudoMount { source: "bpf", target: "/sys/fs/bpf", fstype: "bpf", opts: "nosuid,nodev,noexec,mode=0700" },
    PseudoMount { source: "configfs", target: "/sys/kernel/config", fstype: "configfs", opts: "nosuid,nodev,noexec" },
];

/// Whether `target` is already a mount point, tested via the staged helper.
pub async fn is_mount_point(target: &str) -> bool {
    match helper::busybox("mountpoint", &["-q", target]).await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

fn ensure_target(target: &str) -> VmliteResult<()> {
    fs::create_dir_all(target)
        .map_err(|err| VmliteError::Mount(format!("create {target}: {err}")))?;
    fs::set_permissions(target, Permissions::from_mode(0o755))
        .map_err(|err| VmliteError::Mount(format!("chmod {target}: {err}")))?;
    Ok(())
}

pub fn pseudo_mount_args(entry: &PseudoMount) -> Vec<String> {
    vec![
        "-t".into(),
        entry.fstype.into(),
        "-o".into(),
        entry.opts.into(),
        entry.source.into(),
        entry.target.into(),
    ]
}

pub fn block_mount_args(fs_type: &str, device: &str, target: &str) -> Vec<String> {
    vec![
        "-t".into(),
        fs_type.into(),
        device.into(),
        target.into(),
    ]
}

pub fn findfs_args(uuid: &str) -> Vec<String> {
    vec![format!("UUID={uuid}")]
}

pub fn share_mount_args(share: &Mount) -> Vec<String> {
    let mut opts = share.opts.clone();
    if share.read_only {
        opts.push("ro".into());
    }

    let mut args: Vec<String> = vec!["-t".into(), share.fs_type.clone()];
    if !opts.is_empty() {
        args.push("-o".into());
        args.push(opts.join(","));
    }
    args.push(share.tag.clone());
    args.push(share.target.clone());
    args
}

async fn run_mount(args: &[String]) -> VmliteResult<std::process::Output> {
    let argv: Vec<&str> = args.iter().map(String::as_str).collect();
    helper::busybox("mount", &argv).await
}

/// Mount the entire pseudo table in order.
///
/// "Already mounted" is the one tolerated failure: a previous incarnation or
/// the kernel itself may have some of these up, and remounting them is not
/// worth failing the boot over. Everything else is fatal.
pub async fn mount_pseudo_all() -> VmliteResult<()> {
    for entry in PSEUDO_MOUNTS {
        ensure_target(entry.target)?;
        if is_mount_point(entry.target).await {
            tracing::debug!(path = entry.target, "already a mount point, skipping");
            continue;
        }

        let output = run_mount(&pseudo_mount_args(entry)).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_lowercase().contains("busy") {
                tracing::warn!(path = entry.target, "already mounted, skipping");
                continue;
            }
            return Err(VmliteError::Mount(format!(
                "{} on {}: {}",
                entry.fstype,
                entry.target,
                stderr.trim()
            )));
        }
        tracing::debug!(path = entry.target, fstype = entry.fstype, "mounted");
    }

    Ok(())
}

/// Mount one block device, resolving its UUID at mount time.
pub async fn mount_block(dev: &BlockDevice) -> VmliteResult<()> {
    ensure_target(&dev.mount_to)?;
    if is_mount_point(&dev.mount_to).await {
        tracing::debug!(path = %dev.mount_to, "already a mount point, skipping");
        return Ok(());
    }

    let selector = findfs_args(&dev.uuid);
    let argv: Vec<&str> = selector.iter().map(String::as_str).collect();
    let resolved = helper::busybox("findfs", &argv).await?;
    if !resolved.status.success() {
        return Err(VmliteError::Mount(format!(
            "no block device with UUID {}",
            dev.uuid
        )));
    }
    let device = String::from_utf8_lossy(&resolved.stdout).trim().to_string();
    if device.is_empty() {
        return Err(VmliteError::Mount(format!(
            "no block device with UUID {}",
            dev.uuid
        )));
    }

    let output = run_mount(&block_mount_args(&dev.fs_type, &device, &dev.mount_to)).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VmliteError::Mount(format!(
            "{device} (UUID {}) on {}: {}",
            dev.uuid,
            dev.mount_to,
            stderr.trim()
        )));
    }

    tracing::info!(device = %device, path = %dev.mount_to, "block device mounted");
    Ok(())
}

/// Best-effort unmount, used at shutdown to flush block devices before the
/// VM disappears.
pub async fn unmount(target: &str) {
    match helper::busybox("umount", &[target]).await {
        Ok(output) if output.status.success() => {
            tracing::debug!(path = target, "unmounted");
        }
        Ok(output) => {
            tracing::warn!(path = target, status = %output.status, "umount failed");
        }
        Err(err) => {
            tracing::warn!(path = target, error = %err, "umount failed");
        }
    }
}

/// Mount one virtiofs share by tag.
pub async fn mount_share(share: &Mount) -> VmliteResult<()> {
    ensure_target(&share.target)?;
    if is_mount_point(&share.target).await {
        tracing::debug!(path = %share.target, "already a mount point, skipping");
        return Ok(());
    }

    let output = run_mount(&share_mount_args(share)).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VmliteError::Mount(format!(
            "virtiofs tag {:?} on {}: {}",
            share.tag,
            share.target,
            stderr.trim()
        )));
    }

    tracing::info!(tag = %share.tag, path = %share.target, "share mounted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_table_is_in_boot_order() {
        let targets: Vec<&str> = PSEUDO_MOUNTS.iter().map(|m| m.target).collect();
        assert_eq!(
            targets,
            vec![
                "/tmp",
                "/run",
                "/var/tmp",
                "/disk_mnt",
                "/dev",
                "/dev/pts",
                "/dev/shm",
                "/proc",
                "/proc/sys/fs/binfmt_misc",
                "/sys",
                "/sys/fs/fuse/connections",
                "/sys/fs/cgroup",
                "/sys/fs/bpf",
                "/sys/kernel/config",
            ]
        );
    }

    #[test]
    fn pseudo_args_spell_out_type_and_options() {
        let entry = &PSEUDO_MOUNTS[7]; // /proc
        assert_eq!(
            pseudo_mount_args(entry),
            vec!["-t", "proc", "-o", "nosuid,nodev,noexec", "proc", "/proc"]
        );
    }

    #[test]
    fn block_args_mount_the_resolved_device() {
        assert_eq!(
            block_mount_args("ext4", "/dev/vdb", "/data"),
            vec!["-t", "ext4", "/dev/vdb", "/data"]
        );
    }

    #[test]
    fn findfs_args_select_by_uuid() {
        assert_eq!(
            findfs_args("3c8e2a6d-9e4f-4a31-b1a0-1f2d3c4b5a69"),
            vec!["UUID=3c8e2a6d-9e4f-4a31-b1a0-1f2d3c4b5a69"]
        );
    }

    #[test]
    fn share_args_use_the_tag_as_source() {
        let share = Mount {
            tag: "share0".into(),
            target: "/mnt/share0".into(),
            fs_type: "virtiofs".into(),
            opts: vec!["noatime".into()],
            read_only: true,
        };
        assert_eq!(
            share_mount_args(&share),
            vec!["-t", "virtiofs", "-o", "noatime,ro", "share0", "/mnt/share0"]
        );
    }

    #[test]
    fn share_args_omit_empty_options() {
        let share = Mount {
            tag: "work".into(),
            target: "/work".into(),
            fs_type: "virtiofs".into(),
            opts: vec![],
            read_only: false,
        };
        assert_eq!(
            share_mount_args(&share),
            vec!["-t", "virtiofs", "work", "/work"]
        );
    }
}

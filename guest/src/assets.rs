//! Embedded helper binaries, staged into a RAM-backed directory.
//!
//! The guest rootfs is arbitrary; it may contain nothing the bootstrap
//! needs. Two multi-call binaries are compiled into the agent and written
//! to a tmpfs before anything else runs: a BusyBox build (mount, umount,
//! mountpoint, findfs, ntpd) and a Dropbear build (dropbear, dropbearkey).
//! Everything downstream actuates through these staged tools.
//!
//! The tmpfs is mounted directly via `nix::mount`; the helper that normally
//! performs mounts cannot mount itself into existence.

use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::mount::{MsFlags, mount};
use tokio::sync::OnceCell;
use vmlite_shared::constants::STAGE_DIR;
use vmlite_shared::{VmliteError, VmliteResult};

static BUSYBOX: &[u8] = include_bytes!("../assets/busybox");
static DROPBEAR_MULTI: &[u8] = include_bytes!("../assets/dropbearmulti");

static STAGED: OnceCell<()> = OnceCell::const_new();

/// Absolute path of the staged BusyBox multi-call binary.
pub fn busybox_path() -> PathBuf {
    Path::new(STAGE_DIR).join("busybox")
}

/// Absolute path of the staged Dropbear multi-call binary.
pub fn dropbear_path() -> PathBuf {
    Path::new(STAGE_DIR).join("dropbearmulti")
}

/// Stage the embedded binaries. Idempotent; the work happens at most once
/// per process and is never retried after a failure.
pub async fn stage() -> VmliteResult<()> {
    STAGED
        .get_or_try_init(|| async { stage_once() })
        .await
        .map(|_| ())
}

fn stage_once() -> VmliteResult<()> {
    fs::create_dir_all(STAGE_DIR)
        .map_err(|err| VmliteError::Staging(format!("create {STAGE_DIR}: {err}")))?;
    fs::set_permissions(STAGE_DIR, Permissions::from_mode(0o755))
        .map_err(|err| VmliteError::Staging(format!("chmod {STAGE_DIR}: {err}")))?;

    mount(
        Some("tmpfs"),
        STAGE_DIR,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        Some("mode=0755"),
    )
    .map_err(|err| VmliteError::Staging(format!("mount tmpfs at {STAGE_DIR}: {err}")))?;

    write_blobs(Path::new(STAGE_DIR))?;
    tracing::info!(dir = STAGE_DIR, "helper binaries staged");
    Ok(())
}

fn write_blobs(dir: &Path) -> VmliteResult<()> {
    write_blob(&dir.join("busybox"), BUSYBOX)?;
    write_blob(&dir.join("dropbearmulti"), DROPBEAR_MULTI)?;
    Ok(())
}

fn write_blob(path: &Path, bytes: &[u8]) -> VmliteResult<()> {
    fs::write(path, bytes)
        .map_err(|err| VmliteError::Staging(format!("write {}: {err}", path.display())))?;
    fs::set_permissions(path, Permissions::from_mode(0o755))
        .map_err(|err| VmliteError::Staging(format!("chmod {}: {err}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blobs_are_written_executable() {
        let dir = tempfile::tempdir().unwrap();
        write_blobs(dir.path()).unwrap();

        for name in ["busybox", "dropbearmulti"] {
            let path = dir.path().join(name);
            let meta = fs::metadata(&path).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o755, "{name} mode");
            assert!(meta.len() > 0, "{name} is empty");
        }
    }

    #[test]
    fn staged_paths_live_under_the_stage_dir() {
        assert!(busybox_path().starts_with(STAGE_DIR));
        assert!(dropbear_path().starts_with(STAGE_DIR));
    }
}

//! In-guest SSH access via the staged Dropbear suite.
//!
//! Three steps: generate a fresh host key, install the host-provided
//! authorized key, run the daemon in the foreground. The daemon lives as
//! long as the guest; its exit is a fatal service error.

use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use vmlite_shared::constants::{DROPBEAR_RUNTIME_DIR, SSH_PORT};
use vmlite_shared::{VmConfig, VmliteError, VmliteResult};

use crate::services::wait_child;
use crate::{assets, helper};

fn host_key_path() -> PathBuf {
    Path::new(DROPBEAR_RUNTIME_DIR).join("host_key")
}

fn authorized_keys_path(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join("authorized_keys")
}

pub async fn run(config: &VmConfig, cancel: &CancellationToken) -> VmliteResult<()> {
    let runtime_dir = Path::new(DROPBEAR_RUNTIME_DIR);
    prepare_runtime_dir(runtime_dir)?;
    generate_host_key().await?;
    install_authorized_key(runtime_dir, &config.ssh_info.host_ssh_public_key)?;

    let host_key = host_key_path();
    let authorized = authorized_keys_path(runtime_dir);
    let listen = format!("0.0.0.0:{SSH_PORT}");
    // -F foreground, -E log to stderr, -s no password logins, ever.
    let child = helper::spawn_daemon(
        &assets::dropbear_path(),
        &[
            "dropbear",
            "-F",
            "-E",
            "-s",
            "-p",
            &listen,
            "-r",
            host_key.to_str().unwrap_or_default(),
            "-D",
            authorized.to_str().unwrap_or_default(),
        ],
    )?;

    tracing::info!(listen = %listen, "SSH daemon started");
    wait_child("dropbear", child, cancel).await
}

fn prepare_runtime_dir(dir: &Path) -> VmliteResult<()> {
    fs::create_dir_all(dir)
        .map_err(|err| VmliteError::Service(format!("create {}: {err}", dir.display())))?;
    fs::set_permissions(dir, Permissions::from_mode(0o755))
        .map_err(|err| VmliteError::Service(format!("chmod {}: {err}", dir.display())))?;
    Ok(())
}

async fn generate_host_key() -> VmliteResult<()> {
    let host_key = host_key_path();
    // dropbearkey refuses to overwrite; the runtime dir is a tmpfs but a
    // restarted agent in the same boot would hit the stale file.
    if host_key.exists() {
        fs::remove_file(&host_key).map_err(|err| {
            VmliteError::Service(format!("remove stale {}: {err}", host_key.display()))
        })?;
    }

    let output = helper::run_tool(
        &assets::dropbear_path(),
        "dropbearkey",
        &[
            "-t",
            "ed25519",
            "-f",
            host_key.to_str().unwrap_or_default(),
        ],
    )
    .await?;
    helper::expect_success("dropbearkey", &output)
}

/// Write the authorized key exactly as the host sent it, mode 0600,
/// truncating any prior content. No newline is appended.
fn install_authorized_key(runtime_dir: &Path, public_key: &str) -> VmliteResult<()> {
    let path = authorized_keys_path(runtime_dir);
    fs::write(&path, public_key.as_bytes())
        .map_err(|err| VmliteError::Service(format!("write {}: {err}", path.display())))?;
    fs::set_permissions(&path, Permissions::from_mode(0o600))
        .map_err(|err| VmliteError::Service(format!("chmod {}: {err}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorized_key_is_byte_exact() {
        let dir = tempfile::tempdir().unwrap();
        let key = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIB6C5rzm test@host";

        install_authorized_key(dir.path(), key).unwrap();

        let path = authorized_keys_path(dir.path());
        let written = fs::read(&path).unwrap();
        assert_eq!(written, key.as_bytes());

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn install_truncates_prior_content() {
        let dir = tempfile::tempdir().unwrap();
        install_authorized_key(dir.path(), "ssh-ed25519 OLDKEYOLDKEYOLDKEY old@host").unwrap();
        install_authorized_key(dir.path(), "ssh-ed25519 NEW new@host").unwrap();

        let written = fs::read(authorized_keys_path(dir.path())).unwrap();
        assert_eq!(written, b"ssh-ed25519 NEW new@host");
    }

    #[test]
    fn trailing_newline_is_preserved_not_invented() {
        let dir = tempfile::tempdir().unwrap();

        install_authorized_key(dir.path(), "ssh-ed25519 AAAA a@b").unwrap();
        let written = fs::read(authorized_keys_path(dir.path())).unwrap();
        assert!(!written.ends_with(b"\n"));

        install_authorized_key(dir.path(), "ssh-ed25519 AAAA a@b\n").unwrap();
        let written = fs::read(authorized_keys_path(dir.path())).unwrap();
        assert!(written.ends_with(b"\n"));
    }
}

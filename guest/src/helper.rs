//! The single subprocess seam for the staged toolchain.
//!
//! Mounting, time sync and the SSH daemon are all delegated to the staged
//! multi-call binaries rather than direct syscalls; this module is the one
//! place a helper process is built and spawned. Children are spawned with
//! `kill_on_drop` so a dropped or cancelled task cannot leak them.

use std::path::Path;
use std::process::{Output, Stdio};

use tokio::process::{Child, Command};
use vmlite_shared::{VmliteError, VmliteResult};

use crate::assets;

/// Run a BusyBox applet to completion, capturing its output.
pub async fn busybox(applet: &str, args: &[&str]) -> VmliteResult<Output> {
    run_tool(&assets::busybox_path(), applet, args).await
}

/// Run an applet of a staged multi-call binary to completion.
pub async fn run_tool(bin: &Path, applet: &str, args: &[&str]) -> VmliteResult<Output> {
    tracing::trace!(bin = %bin.display(), applet, ?args, "running helper");
    Command::new(bin)
        .arg(applet)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| {
            VmliteError::Service(format!("spawn {} {applet}: {err}", bin.display()))
        })
}

/// Map a captured non-success exit to an error carrying the tool's stderr.
pub fn expect_success(what: &str, output: &Output) -> VmliteResult<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(VmliteError::Service(format!(
        "{what} failed ({}): {}",
        output.status,
        stderr.trim()
    )))
}

/// Spawn a long-running foreground service. Stdout and stderr inherit the
/// guest console; stdin is closed.
pub fn spawn_daemon(program: &Path, args: &[&str]) -> VmliteResult<Child> {
    tracing::debug!(program = %program.display(), ?args, "starting service process");
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| VmliteError::Service(format!("spawn {}: {err}", program.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn output(code: i32, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn expect_success_passes_zero_exits() {
        assert!(expect_success("mount /proc", &output(0, "")).is_ok());
    }

    #[test]
    fn expect_success_carries_stderr() {
        let err = expect_success("mount /data", &output(32, "mount: unknown filesystem\n"))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("mount /data"));
        assert!(msg.contains("unknown filesystem"));
    }
}

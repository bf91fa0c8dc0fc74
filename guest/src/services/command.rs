//! The user command, run as the workload in rootfs mode.
//!
//! The command is the reason the guest exists: its clean exit is the guest's
//! graceful-shutdown signal, reported through the `WorkloadDone` sentinel so
//! the supervisor can tell it apart from every failure.

use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use vmlite_shared::{VmConfig, VmliteError, VmliteResult};

pub async fn run(config: &VmConfig, cancel: &CancellationToken) -> VmliteResult<()> {
    let cmdline = config
        .cmdline
        .as_ref()
        .ok_or_else(|| VmliteError::Config("rootfs mode without cmdline".into()))?;

    let mut cmd = Command::new(&cmdline.bin);
    cmd.args(&cmdline.args)
        .current_dir(&cmdline.work_dir)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    for (key, value) in parse_envs(&cmdline.envs) {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|err| {
        VmliteError::Service(format!("spawn workload {}: {err}", cmdline.bin))
    })?;
    tracing::info!(bin = %cmdline.bin, args = ?cmdline.args, "workload started");

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => Err(VmliteError::WorkloadDone),
            Ok(status) => Err(VmliteError::Service(format!(
                "workload {} exited with {status}",
                cmdline.bin
            ))),
            Err(err) => Err(VmliteError::Service(format!(
                "wait on workload {}: {err}",
                cmdline.bin
            ))),
        },
        _ = cancel.cancelled() => {
            child.start_kill().ok();
            let _ = child.wait().await;
            tracing::debug!("workload stopped on cancellation");
            Ok(())
        }
    }
}

/// Split `KEY=VALUE` entries; malformed ones are dropped with a warning
/// rather than failing the workload.
fn parse_envs(envs: &[String]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(envs.len());
    for entry in envs {
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                pairs.push((key.to_string(), value.to_string()));
            }
            _ => tracing::warn!(entry = %entry, "ignoring malformed env entry"),
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmlite_shared::config::{Cmdline, RunMode, SshInfo, VirtualNetworkMode};

    fn config_for(bin: &str, args: &[&str]) -> VmConfig {
        VmConfig {
            run_mode: RunMode::Rootfs,
            blk_devs: vec![],
            mounts: vec![],
            ssh_info: SshInfo {
                host_ssh_public_key: "ssh-ed25519 AAAA t@h".into(),
            },
            cmdline: Some(Cmdline {
                bin: bin.into(),
                args: args.iter().map(|s| s.to_string()).collect(),
                envs: vec![],
                work_dir: "/".into(),
            }),
            podman_info: None,
            virtual_network_mode: VirtualNetworkMode::Tsi,
        }
    }

    #[test]
    fn envs_split_on_the_first_equals() {
        let envs = vec![
            "PATH=/usr/bin:/bin".to_string(),
            "EMPTY=".to_string(),
            "EQ=a=b".to_string(),
            "malformed".to_string(),
            "=novar".to_string(),
        ];
        let pairs = parse_envs(&envs);
        assert_eq!(
            pairs,
            vec![
                ("PATH".to_string(), "/usr/bin:/bin".to_string()),
                ("EMPTY".to_string(), String::new()),
                ("EQ".to_string(), "a=b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn clean_exit_is_the_sentinel() {
        let cancel = CancellationToken::new();
        let err = run(&config_for("/bin/true", &[]), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_graceful());
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_service_error() {
        let cancel = CancellationToken::new();
        let err = run(&config_for("/bin/sh", &["-c", "exit 5"]), &cancel)
            .await
            .unwrap_err();
        assert!(!err.is_graceful());
        assert!(err.to_string().contains("/bin/sh"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_workload_promptly() {
        let cancel = CancellationToken::new();
        let task = {
            let config = config_for("/bin/sleep", &["30"]);
            let cancel = cancel.clone();
            tokio::spawn(async move { run(&config, &cancel).await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .expect("workload did not observe cancellation in time")
            .unwrap();
        assert!(result.is_ok());
    }
}

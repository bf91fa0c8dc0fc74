//! VM configuration transmitted from host to guest.
//!
//! The host serializes this record to JSON and serves it at the config
//! endpoint; the guest deserializes, validates and persists it. Wire names
//! follow the host's camelCase convention, with explicit renames where the
//! host spells acronyms in full caps. The record is immutable once loaded.

use serde::{Deserialize, Serialize};

use crate::errors::{VmliteError, VmliteResult};

/// What workload the guest exists to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Run the user command from `cmdline` as the workload.
    Rootfs,
    /// Run the container-engine API server as the workload.
    Container,
}

/// Who configures the guest's network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VirtualNetworkMode {
    /// Host runs a user-mode network stack; the guest does DHCP over virtio-net.
    Gvisor,
    /// Host intercepts the guest's socket API transparently; no in-guest setup.
    Tsi,
}

/// A virtio block device, selected by filesystem UUID at mount time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDevice {
    pub uuid: String,
    pub fs_type: String,
    pub mount_to: String,
}

/// A host directory shared into the guest over virtiofs, selected by tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    pub tag: String,
    pub target: String,
    #[serde(rename = "type")]
    pub fs_type: String,
    #[serde(default)]
    pub opts: Vec<String>,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshInfo {
    /// Public key authorized for guest SSH access, installed verbatim.
    #[serde(rename = "hostSSHPublicKey")]
    pub host_ssh_public_key: String,
}

/// The user command run as the workload in rootfs mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cmdline {
    pub bin: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// `KEY=VALUE` entries appended to the inherited environment.
    #[serde(default)]
    pub envs: Vec<String>,
    pub work_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodmanInfo {
    #[serde(rename = "guestPodmanAPIPort")]
    pub guest_podman_api_port: u16,
}

/// Root record describing everything the guest bootstrap does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmConfig {
    pub run_mode: RunMode,
    #[serde(default)]
    pub blk_devs: Vec<BlockDevice>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    pub ssh_info: SshInfo,
    #[serde(default)]
    pub cmdline: Option<Cmdline>,
    #[serde(default)]
    pub podman_info: Option<PodmanInfo>,
    pub virtual_network_mode: VirtualNetworkMode,
}

impl VmConfig {
    /// Check well-formedness before anything acts on the record.
    ///
    /// The transport is trusted (the host is the threat-model root), so this
    /// is shape validation only: required fields, absolute paths, enum-mode
    /// cross-field requirements.
    pub fn validate(&self) -> VmliteResult<()> {
        for dev in &self.blk_devs {
            if dev.uuid.is_empty() {
                return Err(VmliteError::Config("block device with empty uuid".into()));
            }
            if dev.fs_type.is_empty() {
                return Err(VmliteError::Config(format!(
                    "block device {} has empty fsType",
                    dev.uuid
                )));
            }
            if !dev.mount_to.starts_with('/') {
                return Err(VmliteError::Config(format!(
                    "block device {} mountTo {:?} is not absolute",
                    dev.uuid, dev.mount_to
                )));
            }
        }

        for mount in &self.mounts {
            if mount.fs_type != "virtiofs" {
                return Err(VmliteError::Config(format!(
                    "share {:?} has type {:?}, only virtiofs is supported",
                    mount.tag, mount.fs_type
                )));
            }
            if mount.tag.is_empty() || mount.target.is_empty() {
                return Err(VmliteError::Config(
                    "share with empty tag or target".into(),
                ));
            }
        }

        match self.run_mode {
            RunMode::Container => {
                let port = self
                    .podman_info
                    .as_ref()
                    .map(|info| info.guest_podman_api_port)
                    .unwrap_or(0);
                if port == 0 {
                    return Err(VmliteError::Config(
                        "container mode requires podmanInfo with a nonzero guestPodmanAPIPort"
                            .into(),
                    ));
                }
            }
            RunMode::Rootfs => {
                let cmdline = self.cmdline.as_ref().ok_or_else(|| {
                    VmliteError::Config("rootfs mode requires cmdline".into())
                })?;
                if cmdline.bin.is_empty() {
                    return Err(VmliteError::Config("cmdline.bin is empty".into()));
                }
                if !cmdline.work_dir.starts_with('/') {
                    return Err(VmliteError::Config(format!(
                        "cmdline.workDir {:?} is not absolute",
                        cmdline.work_dir
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rootfs_config() -> VmConfig {
        VmConfig {
            run_mode: RunMode::Rootfs,
            blk_devs: vec![BlockDevice {
                uuid: "3c8e2a6d-9e4f-4a31-b1a0-1f2d3c4b5a69".into(),
                fs_type: "ext4".into(),
                mount_to: "/data".into(),
            }],
            mounts: vec![Mount {
                tag: "share0".into(),
                target: "/mnt/share0".into(),
                fs_type: "virtiofs".into(),
                opts: vec!["noatime".into()],
                read_only: true,
            }],
            ssh_info: SshInfo {
                host_ssh_public_key: "ssh-ed25519 AAAA test@host".into(),
            },
            cmdline: Some(Cmdline {
                bin: "/bin/sh".into(),
                args: vec!["-c".into(), "true".into()],
                envs: vec!["FOO=bar".into()],
                work_dir: "/".into(),
            }),
            podman_info: None,
            virtual_network_mode: VirtualNetworkMode::Gvisor,
        }
    }

    #[test]
    fn round_trip_preserves_the_record() {
        let config = rootfs_config();
        let json = serde_json::to_string(&config).unwrap();
        let back: VmConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn wire_names_match_the_host() {
        let json = serde_json::to_value(rootfs_config()).unwrap();
        assert_eq!(json["runMode"], "rootfs");
        assert_eq!(json["virtualNetworkMode"], "gvisor");
        assert!(json["blkDevs"][0]["fsType"].is_string());
        assert!(json["blkDevs"][0]["mountTo"].is_string());
        assert_eq!(json["mounts"][0]["type"], "virtiofs");
        assert_eq!(json["mounts"][0]["readOnly"], true);
        assert!(json["sshInfo"]["hostSSHPublicKey"].is_string());
        assert!(json["cmdline"]["workDir"].is_string());
    }

    #[test]
    fn podman_port_uses_the_host_spelling() {
        let config = VmConfig {
            run_mode: RunMode::Container,
            cmdline: None,
            podman_info: Some(PodmanInfo {
                guest_podman_api_port: 7777,
            }),
            ..rootfs_config()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["podmanInfo"]["guestPodmanAPIPort"], 7777);
    }

    #[test]
    fn defaults_cover_optional_fields() {
        let json = r#"{
            "runMode": "rootfs",
            "sshInfo": {"hostSSHPublicKey": "ssh-ed25519 AAAA"},
            "cmdline": {"bin": "/bin/true", "workDir": "/"},
            "virtualNetworkMode": "tsi"
        }"#;
        let config: VmConfig = serde_json::from_str(json).unwrap();
        assert!(config.blk_devs.is_empty());
        assert!(config.mounts.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_relative_mount_target() {
        let mut config = rootfs_config();
        config.blk_devs[0].mount_to = "data".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_virtiofs_share() {
        let mut config = rootfs_config();
        config.mounts[0].fs_type = "9p".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_container_mode_without_port() {
        let mut config = rootfs_config();
        config.run_mode = RunMode::Container;
        config.podman_info = None;
        assert!(config.validate().is_err());

        config.podman_info = Some(PodmanInfo {
            guest_podman_api_port: 0,
        });
        assert!(config.validate().is_err());

        config.podman_info = Some(PodmanInfo {
            guest_podman_api_port: 8888,
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_rootfs_mode_without_cmdline() {
        let mut config = rootfs_config();
        config.cmdline = None;
        assert!(config.validate().is_err());
    }
}

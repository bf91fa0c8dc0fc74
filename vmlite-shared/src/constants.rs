//! Guest paths and ports both sides must agree on.
//!
//! The host manager provisions or connects to these; the guest agent creates
//! them. Changing any value here is a host/guest protocol change.

/// Where the fetched configuration is persisted inside the guest, mode 0644.
pub const VMCONFIG_PATH: &str = "/vmconfig.json";

/// Path served by the host config server over the paravirtual socket.
pub const CONFIG_ENDPOINT: &str = "/vmconfig";

/// Paravirtual socket port of the host config server (host side is CID 2).
pub const CONFIG_VSOCK_PORT: u32 = 10240;

/// Fixed TCP port the in-guest SSH daemon listens on.
pub const SSH_PORT: u16 = 25883;

/// RAM-backed directory the embedded helper binaries are staged into.
pub const STAGE_DIR: &str = "/stage_bin";

/// Runtime directory for the SSH host key and authorized_keys file.
pub const DROPBEAR_RUNTIME_DIR: &str = "/run/dropbear";

/// Mount target that must be present before the container API may start.
pub const CONTAINER_STORAGE_DIR: &str = "/var/lib/containers";

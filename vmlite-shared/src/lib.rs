//! Types shared between the vmlite host manager and the guest agent.
//!
//! The host serializes a [`VmConfig`] and serves it over the paravirtual
//! socket; the guest fetches, validates and persists it. Keeping the schema,
//! the error taxonomy and the guest-path constants in one crate is what keeps
//! both sides in agreement.

pub mod config;
pub mod constants;
pub mod errors;

pub use config::{
    BlockDevice, Cmdline, Mount, PodmanInfo, RunMode, SshInfo, VirtualNetworkMode, VmConfig,
};
pub use errors::{VmliteError, VmliteResult};

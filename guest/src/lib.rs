//! Guest bootstrap agent for vmlite VMs.
//!
//! The `vmlite-init` binary is the kernel's user-space entry point inside the
//! guest. It makes no assumptions about the rootfs it wakes up in: the
//! configuration comes from the host over the paravirtual socket, the
//! toolchain is staged from bytes embedded in the agent itself, and every
//! mount is actuated through that staged toolchain. Once the filesystem
//! hierarchy is up, a fixed set of services runs in parallel under one
//! cancellation scope; the first error (or the workload finishing) brings the
//! whole guest down.
//!
//! Only the Linux modules do real work; other targets compile the binary to
//! an error stub.

pub mod logging;
pub mod pipeline;

#[cfg(target_os = "linux")]
pub mod assets;
#[cfg(target_os = "linux")]
pub mod boot;
#[cfg(target_os = "linux")]
pub mod helper;
#[cfg(target_os = "linux")]
pub mod hostapi;
#[cfg(target_os = "linux")]
pub mod mounts;
#[cfg(target_os = "linux")]
pub mod network;
#[cfg(target_os = "linux")]
pub mod services;
#[cfg(target_os = "linux")]
pub mod supervisor;

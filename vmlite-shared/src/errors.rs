//! Error taxonomy for the guest bootstrap.
//!
//! Every fatal condition the supervisor can observe has its own variant so
//! the first error reaching the cancellation scope names its origin. The one
//! non-failure variant is [`VmliteError::WorkloadDone`]: the command runner
//! uses it to signal "the workload finished cleanly" through the same channel
//! every other task reports through.

use thiserror::Error;

pub type VmliteResult<T> = Result<T, VmliteError>;

#[derive(Debug, Error)]
pub enum VmliteError {
    /// The paravirtual socket to the host config server could not be dialed.
    #[error("failed to dial host config endpoint: {0}")]
    Dial(String),

    /// The host config server answered with a non-200 status.
    #[error("host config endpoint returned HTTP {0}")]
    HttpStatus(u16),

    /// The response body could not be read to completion.
    #[error("failed to read host response body: {0}")]
    HttpBody(String),

    /// The configuration failed to decode or validate.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The embedded helper binaries could not be staged.
    #[error("failed to stage embedded binaries: {0}")]
    Staging(String),

    /// A block, share or pseudo filesystem mount failed.
    #[error("mount failed: {0}")]
    Mount(String),

    /// Link bring-up or DHCP acquisition failed.
    #[error("network setup failed: {0}")]
    Network(String),

    /// A supervised service failed to start or exited.
    #[error("service failed: {0}")]
    Service(String),

    /// Sentinel: the user workload exited with status 0.
    #[error("workload exited normally")]
    WorkloadDone,

    /// The host delivered a termination signal.
    #[error("shutdown signal received: {0}")]
    Shutdown(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VmliteError {
    /// True for the one completion that means the guest did its job.
    pub fn is_graceful(&self) -> bool {
        matches!(self, VmliteError::WorkloadDone)
    }
}

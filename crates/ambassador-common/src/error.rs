use thiserror::Error;

/// Error taxonomy for the ambassador sidecar.
///
/// Transport-level failures (`Timeout`, `Transport`) count towards host-pool
/// exhaustion and are retried against the remaining hosts of one logical
/// call. `Http` is a definitive application-level answer from a reachable
/// host and is never retried. `Inspection` and `Store` are transient from the
/// publisher's point of view: the heartbeat loop absorbs them and tries again
/// on its next iteration.
#[derive(Error, Debug)]
pub enum AmbassadorError {
    #[error("container inspection failed: {0}")]
    Inspection(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("no hosts available for {0}")]
    NoHostsAvailable(String),

    #[error("all hosts unreachable for {0}")]
    HostsUnreachable(String),

    #[error("request timeout after {0}ms")]
    Timeout(u64),

    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AmbassadorError {
    /// Whether this error is a connectivity failure for host-pool purposes.
    ///
    /// A connectivity failure consumes the current host and moves the call
    /// on to the next host in the pool. Anything else terminates the call.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            AmbassadorError::Timeout(_) | AmbassadorError::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AmbassadorError>;

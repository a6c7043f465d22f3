use privexec_protocol::ErrorCode;
use thiserror::Error;

/// Failure of a single [`run`](crate::PrivilegedProcessLauncher::run) call.
///
/// Nothing here is recovered by the launcher; retry and fallback decisions
/// belong to the caller. See [`LaunchError::is_retryable`].
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(#[source] BrokerError),

    /// The running broker does not expose the hidden capability with the
    /// expected signature. Only a broker upgrade or downgrade fixes this.
    #[error("Broker does not expose capability `{name}` with the expected signature")]
    CapabilityNotFound { name: String },

    /// The capability was reached but the call failed or produced no handle.
    #[error("Invocation of `{capability}` failed: {reason}")]
    InvocationFailed { capability: String, reason: String },

    /// The caller interrupted the wait. The remote process may still be
    /// running or may have exited; its outcome is unknown.
    #[error("Wait for remote process was interrupted; outcome unknown")]
    WaitInterrupted,

    /// The broker connection broke while waiting. Outcome unknown.
    #[error("Lost remote process while waiting: {0}")]
    WaitFailed(#[source] BrokerError),
}

impl LaunchError {
    /// Whether trying the same request again can reasonably succeed.
    ///
    /// `CapabilityNotFound` and `InvalidCommand` never will. The wait
    /// failures are retryable only in the sense that the caller may decide to
    /// re-run; the first attempt may have had side effects.
    pub fn is_retryable(&self) -> bool {
        match self {
            LaunchError::InvalidCommand(_) | LaunchError::CapabilityNotFound { .. } => false,
            LaunchError::InvocationFailed { .. }
            | LaunchError::BrokerUnavailable(_)
            | LaunchError::WaitInterrupted
            | LaunchError::WaitFailed(_) => true,
        }
    }

    /// Whether the remote process may have run with an unknown result.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, LaunchError::WaitInterrupted | LaunchError::WaitFailed(_))
    }
}

/// Errors raised by a [`PrivilegedBroker`](crate::PrivilegedBroker) implementation.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out connecting to broker at {0}")]
    ConnectTimeout(String),

    #[error("Broker did not answer {0} in time")]
    ResponseTimeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The broker answered with an error response.
    #[error("Broker rejected request ({code}): {message}")]
    Rejected { code: ErrorCode, message: String },
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        BrokerError::Protocol(e.to_string())
    }
}

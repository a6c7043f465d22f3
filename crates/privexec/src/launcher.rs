//! Run a command under the broker and report how it ended.
//!
//! Each [`PrivilegedProcessLauncher::run`] call goes through
//!
//! ```text
//! Idle -> CapabilityResolved -> Invoked -> Waiting -> Completed
//!   \____________\_________________\__________\______> Failed
//! ```
//!
//! with no retries in between. The resolved capability is the only state that
//! outlives a call.
//!
//! The handle is released after every wait. The release is bounded by the
//! launcher's release timeout so a stalled broker cannot hold up the result.

use std::time::Duration;

use privexec_protocol::{NEW_PROCESS_CAPABILITY, Signature};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broker::{Capability, PrivilegedBroker, RemoteProcess};
use crate::error::LaunchError;
use crate::request::ProcessRequest;

/// Caller-side interruption signal for a pending wait.
///
/// Cancel it from another task (a deadline timer, a signal handler) to make
/// the matching `run_until` call return [`LaunchError::WaitInterrupted`].
pub type Interrupt = CancellationToken;

const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

/// Launches processes through a [`PrivilegedBroker`] and waits for them.
///
/// Safe to share between tasks; concurrent `run` calls each own their own
/// remote process.
pub struct PrivilegedProcessLauncher<B: PrivilegedBroker> {
    broker: B,
    capability_name: String,
    capability: OnceCell<Capability>,
    release_timeout: Duration,
}

impl<B: PrivilegedBroker> PrivilegedProcessLauncher<B> {
    pub fn new(broker: B) -> Self {
        Self::with_capability_name(broker, NEW_PROCESS_CAPABILITY)
    }

    /// Look the process-creation capability up under a different name.
    pub fn with_capability_name(broker: B, name: impl Into<String>) -> Self {
        Self {
            broker,
            capability_name: name.into(),
            capability: OnceCell::new(),
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
        }
    }

    /// How long to wait for the broker to confirm a release before giving
    /// up on it. An abandoned release is left to the process handle's own
    /// cleanup, if it has any.
    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn capability_name(&self) -> &str {
        &self.capability_name
    }

    /// Resolve the hidden capability, or return the cached one.
    ///
    /// Concurrent first callers are serialized so the broker is asked at most
    /// once. Failures are not cached.
    pub async fn resolve(&self) -> Result<&Capability, LaunchError> {
        self.capability
            .get_or_try_init(|| async {
                let signature = Signature::new_process();
                match self
                    .broker
                    .resolve_capability(&self.capability_name, &signature)
                    .await
                {
                    Ok(Some(capability)) => {
                        debug!("Resolved broker capability '{}'", capability.name());
                        Ok(capability)
                    }
                    Ok(None) => Err(LaunchError::CapabilityNotFound {
                        name: self.capability_name.clone(),
                    }),
                    Err(e) => Err(LaunchError::BrokerUnavailable(e)),
                }
            })
            .await
    }

    /// Run `request` and return the remote exit code. The wait cannot be
    /// interrupted; use [`run_until`](Self::run_until) for that.
    pub async fn run(&self, request: &ProcessRequest) -> Result<i32, LaunchError> {
        self.run_until(request, &Interrupt::new()).await
    }

    /// Run `request`, giving up the wait when `interrupt` is cancelled.
    pub async fn run_until(
        &self,
        request: &ProcessRequest,
        interrupt: &Interrupt,
    ) -> Result<i32, LaunchError> {
        let capability = self.resolve().await?;

        let mut process = match self.broker.create_process(capability, request).await {
            Ok(Some(process)) => process,
            Ok(None) => {
                return Err(LaunchError::InvocationFailed {
                    capability: capability.name().to_string(),
                    reason: "broker returned no process handle".to_string(),
                });
            }
            Err(e) => {
                return Err(LaunchError::InvocationFailed {
                    capability: capability.name().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let id = process.id();
        debug!("Waiting for remote process {} ({})", id, request.program());

        // Prefer a completed wait over a simultaneous interrupt
        let outcome = tokio::select! {
            biased;
            result = process.wait_for() => result.map_err(LaunchError::WaitFailed),
            _ = interrupt.cancelled() => Err(LaunchError::WaitInterrupted),
        };

        match tokio::time::timeout(self.release_timeout, process.release()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to release remote process {}: {}", id, e),
            Err(_) => warn!(
                "Broker did not confirm release of remote process {} within {:?}",
                id, self.release_timeout
            ),
        }

        match &outcome {
            Ok(code) => debug!("Remote process {} exited with {}", id, code),
            Err(e) => debug!("Remote process {} ended without a status: {}", id, e),
        }
        outcome
    }
}

impl<B: PrivilegedBroker + std::fmt::Debug> std::fmt::Debug for PrivilegedProcessLauncher<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivilegedProcessLauncher")
            .field("broker", &self.broker)
            .field("capability_name", &self.capability_name)
            .field("resolved", &self.capability.initialized())
            .field("release_timeout", &self.release_timeout)
            .finish()
    }
}

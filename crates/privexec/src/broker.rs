//! Seam between the launcher and whatever privileged broker creates processes.
//!
//! The broker keeps its process-creation capability off its public
//! interface, so a [`PrivilegedBroker`] implementation first has to locate it
//! ([`PrivilegedBroker::resolve_capability`]) before it can call it. How that
//! lookup works is entirely up to the adapter; the launcher only sees the
//! resulting [`Capability`] token.

use async_trait::async_trait;
use privexec_protocol::Signature;

use crate::error::BrokerError;
use crate::request::ProcessRequest;

/// A resolved broker capability.
///
/// Only obtainable from [`PrivilegedBroker::resolve_capability`] and safe to
/// share between concurrent calls once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    name: String,
    signature: Signature,
}

impl Capability {
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        Self {
            name: name.into(),
            signature,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

/// A privileged service able to create OS processes on the caller's behalf.
#[async_trait]
pub trait PrivilegedBroker: Send + Sync {
    /// Handle type for processes created by this broker.
    type Process: RemoteProcess;

    /// Locate a capability by name and signature, including hidden ones.
    ///
    /// `Ok(None)` means the broker is reachable but has no such capability.
    async fn resolve_capability(
        &self,
        name: &str,
        signature: &Signature,
    ) -> Result<Option<Capability>, BrokerError>;

    /// Call the process-creation capability.
    ///
    /// `Ok(None)` means the broker accepted the call but handed back no
    /// process.
    async fn create_process(
        &self,
        capability: &Capability,
        request: &ProcessRequest,
    ) -> Result<Option<Self::Process>, BrokerError>;
}

/// Broker-side process owned by exactly one launcher call.
#[async_trait]
pub trait RemoteProcess: Send {
    /// Broker-assigned identifier, for logging.
    fn id(&self) -> u64;

    /// Wait for the process to terminate and return its exit code.
    async fn wait_for(&mut self) -> Result<i32, BrokerError>;

    /// Drop the broker-side handle. Called exactly once, after the wait,
    /// whether or not the wait completed. The launcher stops awaiting it
    /// after its release timeout; implementations that need the release to
    /// happen anyway should finish it on drop.
    async fn release(self) -> Result<(), BrokerError>;
}

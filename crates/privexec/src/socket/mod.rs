//! [`PrivilegedBroker`] adapter for brokers listening on a Unix socket.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   Unix Socket   ┌──────────────────────┐
//! │   calling app        │ ──────────────▶ │   privileged broker  │
//! │  (unprivileged)      │  JSON lines     │  (root or shell uid) │
//! └──────────────────────┘                 └──────────┬───────────┘
//!                                                     │
//!                                                     ▼
//!                                              ┌─────────────┐
//!                                              │   command   │
//!                                              └─────────────┘
//! ```
//!
//! The process-creation capability is hidden, so resolution asks the broker
//! to describe its capabilities including hidden ones and picks the one whose
//! name and signature match. A broker too old to describe its capabilities
//! rejects the request; that counts as the capability being absent.

pub mod client;

use async_trait::async_trait;
use privexec_protocol::{ErrorCode, HandleId, Signature};
use tracing::{debug, warn};

use crate::broker::{Capability, PrivilegedBroker, RemoteProcess};
use crate::config::{BridgeConfig, ConfigError};
use crate::error::BrokerError;
use crate::request::ProcessRequest;

pub use client::BrokerClient;

/// Broker reached over its Unix socket.
#[derive(Debug, Clone)]
pub struct SocketBroker {
    client: BrokerClient,
}

impl SocketBroker {
    pub fn new(client: BrokerClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: &BridgeConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(BrokerClient::from_config(config)?))
    }

    pub fn client(&self) -> &BrokerClient {
        &self.client
    }
}

#[async_trait]
impl PrivilegedBroker for SocketBroker {
    type Process = SocketProcess;

    async fn resolve_capability(
        &self,
        name: &str,
        signature: &Signature,
    ) -> Result<Option<Capability>, BrokerError> {
        let capabilities = match self.client.describe_capabilities(true).await {
            Ok(capabilities) => capabilities,
            Err(BrokerError::Rejected {
                code: ErrorCode::InvalidRequest | ErrorCode::CapabilityNotFound,
                message,
            }) => {
                debug!("Broker cannot describe its capabilities: {}", message);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        debug!(
            "Broker at {:?} lists {} capabilities",
            self.client.socket_path(),
            capabilities.len()
        );

        Ok(capabilities
            .into_iter()
            .find(|c| c.matches(name, signature))
            .map(|c| Capability::new(c.name, c.signature)))
    }

    async fn create_process(
        &self,
        capability: &Capability,
        request: &ProcessRequest,
    ) -> Result<Option<SocketProcess>, BrokerError> {
        let handle = self
            .client
            .invoke(capability.name(), request.to_args())
            .await?;

        Ok(handle.map(|handle| {
            debug!("Broker created process {} for {:?}", handle, request.command());
            SocketProcess::new(self.client.clone(), handle)
        }))
    }
}

/// Process created by a [`SocketBroker`].
///
/// If dropped without a completed [`release`](RemoteProcess::release) (for
/// example when the surrounding future is cancelled, including a release
/// that was itself abandoned), the release is sent from a background task on
/// the current runtime.
#[derive(Debug)]
pub struct SocketProcess {
    client: BrokerClient,
    handle: HandleId,
    released: bool,
}

impl SocketProcess {
    fn new(client: BrokerClient, handle: HandleId) -> Self {
        Self {
            client,
            handle,
            released: false,
        }
    }
}

#[async_trait]
impl RemoteProcess for SocketProcess {
    fn id(&self) -> u64 {
        self.handle
    }

    async fn wait_for(&mut self) -> Result<i32, BrokerError> {
        self.client.wait_for(self.handle).await
    }

    async fn release(mut self) -> Result<(), BrokerError> {
        let result = self.client.release(self.handle).await;
        self.released = true;
        match result {
            // Already gone on the broker side
            Err(BrokerError::Rejected {
                code: ErrorCode::HandleNotFound,
                ..
            }) => Ok(()),
            other => other,
        }
    }
}

impl Drop for SocketProcess {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Leaking remote process {}: no runtime to release it", self.handle);
            return;
        };
        let client = self.client.clone();
        let handle = self.handle;
        runtime.spawn(async move {
            if let Err(e) = client.release(handle).await {
                warn!("Failed to release dropped remote process {}: {}", handle, e);
            }
        });
    }
}

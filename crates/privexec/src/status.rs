//! Broker reachability and privilege checks.

use privexec_protocol::Signature;

use crate::broker::PrivilegedBroker;
use crate::socket::SocketBroker;

/// Uid of the `shell` user on Android-style systems.
pub const SHELL_UID: u32 = 2000;

/// What the broker is allowed to do, judged by the uid it runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeLevel {
    Root,
    Shell,
    User(u32),
}

impl PrivilegeLevel {
    pub fn from_uid(uid: u32) -> Self {
        match uid {
            0 => PrivilegeLevel::Root,
            SHELL_UID => PrivilegeLevel::Shell,
            other => PrivilegeLevel::User(other),
        }
    }
}

impl std::fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrivilegeLevel::Root => f.write_str("root"),
            PrivilegeLevel::Shell => f.write_str("shell"),
            PrivilegeLevel::User(uid) => write!(f, "uid {uid}"),
        }
    }
}

/// Snapshot of what a broker offers this client.
#[derive(Debug, Clone, Default)]
pub struct BrokerStatus {
    pub reachable: bool,
    pub version: Option<String>,
    pub privilege: Option<PrivilegeLevel>,
    pub authorized: bool,
    /// Whether the hidden process capability resolves. `None` if the broker
    /// could not be asked.
    pub capability_available: Option<bool>,
    /// First error hit while probing.
    pub error: Option<String>,
}

impl BrokerStatus {
    /// True when a `run` has a chance of succeeding.
    pub fn is_ready(&self) -> bool {
        self.reachable && self.authorized && self.capability_available == Some(true)
    }
}

/// Probe a broker without launching anything. Never fails; problems end up
/// in [`BrokerStatus::error`].
pub async fn probe(broker: &SocketBroker, capability_name: &str) -> BrokerStatus {
    let mut status = BrokerStatus::default();

    if let Err(e) = broker.client().ping().await {
        status.error = Some(e.to_string());
        return status;
    }
    status.reachable = true;

    match broker.client().identity().await {
        Ok(identity) => {
            status.version = Some(identity.version);
            status.privilege = Some(PrivilegeLevel::from_uid(identity.uid));
            status.authorized = identity.authorized;
        }
        Err(e) => {
            status.error = Some(e.to_string());
            return status;
        }
    }

    match broker
        .resolve_capability(capability_name, &Signature::new_process())
        .await
    {
        Ok(found) => status.capability_available = Some(found.is_some()),
        Err(e) => status.error = Some(e.to_string()),
    }

    status
}

//! Broker RPC protocol types.
//!
//! Defines the request/response types exchanged between privexec and the
//! privileged broker daemon. The protocol uses JSON over Unix sockets with
//! newline-delimited messages: one request and one response per connection.
//!
//! ## Message Categories
//!
//! ### Discovery
//! - Ping, Identity, DescribeCapabilities
//!
//! ### Process Capability
//! - Invoke, WaitFor, Release

pub mod capability;

pub use capability::{
    CapabilityDescriptor, NEW_PROCESS_CAPABILITY, ParamType, ReturnType, Signature,
};

use serde::{Deserialize, Serialize};

/// Opaque broker-side process reference.
pub type HandleId = u64;

/// Request sent from privexec to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerRequest {
    // ========================================================================
    // Discovery
    // ========================================================================
    /// Health check.
    Ping,

    /// Who the broker runs as and whether this client is authorized.
    Identity,

    /// List the capabilities the broker exposes.
    DescribeCapabilities(DescribeCapabilitiesRequest),

    // ========================================================================
    // Process Capability
    // ========================================================================
    /// Call a capability by name.
    Invoke(InvokeRequest),

    /// Block until the process behind a handle exits.
    /// The broker answers only once the process has terminated.
    WaitFor(WaitForRequest),

    /// Drop a handle on the broker side.
    Release(ReleaseRequest),
}

/// Response from the broker to privexec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerResponse {
    /// Reply to `Ping`.
    Pong,

    /// Reply to `Identity`.
    Identity(IdentityResponse),

    /// Reply to `DescribeCapabilities`.
    Capabilities(CapabilitiesResponse),

    /// Reply to `Invoke` on the process-creation capability.
    ProcessCreated(ProcessCreatedResponse),

    /// Reply to `WaitFor`.
    ProcessExited(ProcessExitedResponse),

    /// Reply to `Release`.
    Released(ReleasedResponse),

    /// Any request can fail with this.
    Error(ErrorResponse),
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescribeCapabilitiesRequest {
    /// Also list capabilities the broker keeps off its public interface.
    #[serde(default)]
    pub include_hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Capability name as advertised by `DescribeCapabilities`.
    pub capability: String,
    pub args: NewProcessArgs,
}

/// Arguments of the process-creation capability, in signature order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProcessArgs {
    /// argv, first element is the executable.
    pub cmd: Vec<String>,
    /// `KEY=VALUE` entries; absent means the broker's default environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    /// Absent means the broker's default working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitForRequest {
    pub handle: HandleId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub handle: HandleId,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityResponse {
    /// Uid the broker process runs as.
    pub uid: u32,
    /// Broker version string.
    pub version: String,
    /// Whether the connecting client has been granted access.
    pub authorized: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    pub capabilities: Vec<CapabilityDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessCreatedResponse {
    /// Handle of the new process. Brokers are not supposed to omit it, but
    /// some do when the spawn silently failed.
    #[serde(default)]
    pub handle: Option<HandleId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessExitedResponse {
    pub handle: HandleId,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleasedResponse {
    pub handle: HandleId,
}

// ============================================================================
// Error Types
// ============================================================================

/// Error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Client is not (or no longer) authorized.
    PermissionDenied,
    /// No capability with that name.
    CapabilityNotFound,
    /// Arguments do not fit the capability.
    InvalidArguments,
    /// The broker tried and failed to create the process.
    SpawnFailed,
    /// Unknown or already released handle.
    HandleNotFound,
    /// Malformed request.
    InvalidRequest,
    /// Internal error.
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::CapabilityNotFound => "capability_not_found",
            ErrorCode::InvalidArguments => "invalid_arguments",
            ErrorCode::SpawnFailed => "spawn_failed",
            ErrorCode::HandleNotFound => "handle_not_found",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::Internal => "internal",
        };
        f.write_str(s)
    }
}

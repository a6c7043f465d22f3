//! Low-level client for the broker socket.
//!
//! One connection per request: connect, write the request as a JSON line,
//! read one JSON line back. Every request except `wait_for` must be answered
//! within the response timeout; `wait_for` is answered when the process exits.

use std::path::{Path, PathBuf};
use std::time::Duration;

use privexec_protocol::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::config::{BridgeConfig, ConfigError};
use crate::error::BrokerError;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the broker daemon's Unix socket.
#[derive(Clone)]
pub struct BrokerClient {
    socket_path: PathBuf,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl BrokerClient {
    /// Create a client for the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Upper bound for the broker's answer to anything but `wait_for`.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn from_config(config: &BridgeConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.resolved_socket_path()?)
            .with_connect_timeout(config.connect_timeout())
            .with_response_timeout(config.response_timeout()))
    }

    /// Get the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn connect(&self) -> Result<UnixStream, BrokerError> {
        match tokio::time::timeout(self.connect_timeout, UnixStream::connect(&self.socket_path))
            .await
        {
            Ok(stream) => Ok(stream?),
            Err(_) => Err(BrokerError::ConnectTimeout(
                self.socket_path.display().to_string(),
            )),
        }
    }

    /// Send a request and receive a response.
    ///
    /// Error responses are turned into [`BrokerError::Rejected`]. A broker
    /// that does not answer within the response timeout yields
    /// [`BrokerError::ResponseTimeout`], except for `wait_for`, which waits
    /// as long as the process runs.
    pub async fn request(&self, req: &BrokerRequest) -> Result<BrokerResponse, BrokerError> {
        if matches!(req, BrokerRequest::WaitFor(_)) {
            return self.exchange(req).await;
        }
        match tokio::time::timeout(self.response_timeout, self.exchange(req)).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::ResponseTimeout(request_name(req).to_string())),
        }
    }

    async fn exchange(&self, req: &BrokerRequest) -> Result<BrokerResponse, BrokerError> {
        let mut stream = self.connect().await?;

        // Send request as JSON line
        let mut json = serde_json::to_string(req)?;
        json.push('\n');
        stream.write_all(json.as_bytes()).await?;

        // Read response line
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            return Err(BrokerError::Protocol(
                "broker closed the connection without a response".to_string(),
            ));
        }

        let resp: BrokerResponse = serde_json::from_str(&line)?;

        // Check for error response
        if let BrokerResponse::Error(e) = resp {
            return Err(BrokerError::Rejected {
                code: e.code,
                message: e.message,
            });
        }

        Ok(resp)
    }

    /// Health check.
    pub async fn ping(&self) -> Result<(), BrokerError> {
        match self.request(&BrokerRequest::Ping).await? {
            BrokerResponse::Pong => Ok(()),
            _ => Err(unexpected("ping")),
        }
    }

    /// Broker uid, version and whether we are authorized.
    pub async fn identity(&self) -> Result<IdentityResponse, BrokerError> {
        match self.request(&BrokerRequest::Identity).await? {
            BrokerResponse::Identity(i) => Ok(i),
            _ => Err(unexpected("identity")),
        }
    }

    pub async fn describe_capabilities(
        &self,
        include_hidden: bool,
    ) -> Result<Vec<CapabilityDescriptor>, BrokerError> {
        let req = BrokerRequest::DescribeCapabilities(DescribeCapabilitiesRequest { include_hidden });
        match self.request(&req).await? {
            BrokerResponse::Capabilities(c) => Ok(c.capabilities),
            _ => Err(unexpected("describe_capabilities")),
        }
    }

    /// Invoke a process-creation capability. Returns the handle, if the
    /// broker handed one back.
    pub async fn invoke(
        &self,
        capability: &str,
        args: NewProcessArgs,
    ) -> Result<Option<HandleId>, BrokerError> {
        let req = BrokerRequest::Invoke(InvokeRequest {
            capability: capability.to_string(),
            args,
        });
        match self.request(&req).await? {
            BrokerResponse::ProcessCreated(p) => Ok(p.handle),
            _ => Err(unexpected("invoke")),
        }
    }

    /// Block until the process behind `handle` exits.
    pub async fn wait_for(&self, handle: HandleId) -> Result<i32, BrokerError> {
        let req = BrokerRequest::WaitFor(WaitForRequest { handle });
        match self.request(&req).await? {
            BrokerResponse::ProcessExited(e) if e.handle == handle => Ok(e.exit_code),
            BrokerResponse::ProcessExited(e) => Err(BrokerError::Protocol(format!(
                "wait_for({handle}) answered for handle {}",
                e.handle
            ))),
            _ => Err(unexpected("wait_for")),
        }
    }

    pub async fn release(&self, handle: HandleId) -> Result<(), BrokerError> {
        let req = BrokerRequest::Release(ReleaseRequest { handle });
        match self.request(&req).await? {
            BrokerResponse::Released(_) => Ok(()),
            _ => Err(unexpected("release")),
        }
    }
}

fn request_name(req: &BrokerRequest) -> &'static str {
    match req {
        BrokerRequest::Ping => "ping",
        BrokerRequest::Identity => "identity",
        BrokerRequest::DescribeCapabilities(_) => "describe_capabilities",
        BrokerRequest::Invoke(_) => "invoke",
        BrokerRequest::WaitFor(_) => "wait_for",
        BrokerRequest::Release(_) => "release",
    }
}

fn unexpected(op: &str) -> BrokerError {
    BrokerError::Protocol(format!("unexpected response to {op}"))
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("socket_path", &self.socket_path)
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

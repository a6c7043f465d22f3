//! Test brokers.
//!
//! - [`StubBroker`]: in-memory [`PrivilegedBroker`] with call counters.
//! - [`FakeBroker`]: broker daemon on a temporary Unix socket that spawns
//!   real processes, for exercising [`privexec::SocketBroker`].
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use privexec::{BrokerError, Capability, PrivilegedBroker, ProcessRequest, RemoteProcess};
use privexec_protocol::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::{Child, Command};

// ============================================================================
// In-memory stub
// ============================================================================

/// What a stub process does once waited on.
#[derive(Debug, Clone, Copy)]
pub enum StubBehavior {
    /// Exit immediately with the code.
    Exit(i32),
    /// Run for the duration, then exit with the code.
    ExitAfter(Duration, i32),
    /// Never exit.
    Hang,
    /// Refuse to create the process.
    Deny,
    /// Accept the call but return no handle.
    NoHandle,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub resolves: AtomicUsize,
    pub creates: AtomicUsize,
    pub waits: AtomicUsize,
    pub releases: AtomicUsize,
    /// Handles created minus handles released.
    pub live: AtomicI64,
    /// Set when a stub process terminates.
    pub terminated: AtomicBool,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct StubBroker {
    has_capability: bool,
    behavior: StubBehavior,
    resolve_delay: Duration,
    stall_release: bool,
    counters: Arc<Counters>,
    requests: Mutex<Vec<ProcessRequest>>,
    next_id: AtomicU64,
}

impl StubBroker {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            has_capability: true,
            behavior,
            resolve_delay: Duration::ZERO,
            stall_release: false,
            counters: Arc::new(Counters::default()),
            requests: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn exiting(code: i32) -> Self {
        Self::new(StubBehavior::Exit(code))
    }

    /// A broker whose interface version lacks the hidden capability.
    pub fn without_capability() -> Self {
        Self {
            has_capability: false,
            ..Self::exiting(0)
        }
    }

    pub fn with_resolve_delay(mut self, delay: Duration) -> Self {
        self.resolve_delay = delay;
        self
    }

    /// Processes whose release never completes.
    pub fn with_stalled_release(mut self) -> Self {
        self.stall_release = true;
        self
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    pub fn requests(&self) -> Vec<ProcessRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrivilegedBroker for StubBroker {
    type Process = StubProcess;

    async fn resolve_capability(
        &self,
        name: &str,
        signature: &Signature,
    ) -> Result<Option<Capability>, BrokerError> {
        self.counters.resolves.fetch_add(1, Ordering::SeqCst);
        if !self.resolve_delay.is_zero() {
            tokio::time::sleep(self.resolve_delay).await;
        }
        Ok(self
            .has_capability
            .then(|| Capability::new(name, signature.clone())))
    }

    async fn create_process(
        &self,
        _capability: &Capability,
        request: &ProcessRequest,
    ) -> Result<Option<StubProcess>, BrokerError> {
        self.counters.creates.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        match self.behavior {
            StubBehavior::Deny => Err(BrokerError::Rejected {
                code: ErrorCode::PermissionDenied,
                message: "authorization revoked".to_string(),
            }),
            StubBehavior::NoHandle => Ok(None),
            behavior => {
                self.counters.live.fetch_add(1, Ordering::SeqCst);
                Ok(Some(StubProcess {
                    id: self.next_id.fetch_add(1, Ordering::SeqCst),
                    behavior,
                    stall_release: self.stall_release,
                    counters: Arc::clone(&self.counters),
                }))
            }
        }
    }
}

pub struct StubProcess {
    id: u64,
    behavior: StubBehavior,
    stall_release: bool,
    counters: Arc<Counters>,
}

#[async_trait]
impl RemoteProcess for StubProcess {
    fn id(&self) -> u64 {
        self.id
    }

    async fn wait_for(&mut self) -> Result<i32, BrokerError> {
        self.counters.waits.fetch_add(1, Ordering::SeqCst);
        let code = match self.behavior {
            StubBehavior::Exit(code) => code,
            StubBehavior::ExitAfter(delay, code) => {
                tokio::time::sleep(delay).await;
                code
            }
            _ => std::future::pending::<i32>().await,
        };
        self.counters.terminated.store(true, Ordering::SeqCst);
        Ok(code)
    }

    async fn release(self) -> Result<(), BrokerError> {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
        if self.stall_release {
            std::future::pending::<()>().await;
        }
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Socket broker daemon
// ============================================================================

#[derive(Debug, Clone)]
pub struct FakeOptions {
    /// List the process capability at all.
    pub expose_capability: bool,
    /// Advertise the capability as `(string[], string[])`, without a
    /// directory parameter.
    pub legacy_signature: bool,
    /// Whether the test client has been granted access.
    pub authorized: bool,
    /// Answer invocations with no handle.
    pub omit_handle: bool,
    /// Reject `describe_capabilities` as an unknown request, like a broker
    /// that predates capability discovery.
    pub no_discovery: bool,
    /// Close `wait_for` connections without answering.
    pub drop_waits: bool,
    /// Never answer `release`.
    pub stall_release: bool,
    pub uid: u32,
}

impl Default for FakeOptions {
    fn default() -> Self {
        Self {
            expose_capability: true,
            legacy_signature: false,
            authorized: true,
            omit_handle: false,
            no_discovery: false,
            drop_waits: false,
            stall_release: false,
            uid: 2000,
        }
    }
}

#[derive(Default)]
struct FakeState {
    invocations: AtomicUsize,
    next_handle: AtomicU64,
    children: Mutex<HashMap<HandleId, Arc<tokio::sync::Mutex<Child>>>>,
    released: Mutex<Vec<HandleId>>,
}

/// Broker daemon listening on a socket in a temporary directory.
pub struct FakeBroker {
    pub socket_path: PathBuf,
    options: FakeOptions,
    state: Arc<FakeState>,
    _dir: tempfile::TempDir,
    task: tokio::task::JoinHandle<()>,
}

impl FakeBroker {
    pub async fn start() -> Self {
        Self::start_with(FakeOptions::default()).await
    }

    pub async fn start_with(options: FakeOptions) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = dir.path().join("broker.sock");
        let listener = UnixListener::bind(&socket_path).expect("bind broker socket");

        let state = Arc::new(FakeState::default());
        let task = {
            let state = Arc::clone(&state);
            let options = options.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let state = Arc::clone(&state);
                    let options = options.clone();
                    tokio::spawn(handle_connection(stream, state, options));
                }
            })
        };

        Self {
            socket_path,
            options,
            state,
            _dir: dir,
            task,
        }
    }

    pub fn invocations(&self) -> usize {
        self.state.invocations.load(Ordering::SeqCst)
    }

    pub fn live_handles(&self) -> usize {
        self.state.children.lock().unwrap().len()
    }

    pub fn released(&self) -> Vec<HandleId> {
        self.state.released.lock().unwrap().clone()
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_connection(stream: UnixStream, state: Arc<FakeState>, options: FakeOptions) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let Ok(Some(line)) = lines.next_line().await else {
        return;
    };

    let response = match serde_json::from_str::<BrokerRequest>(&line) {
        Ok(req) => match dispatch(req, &state, &options).await {
            Some(response) => response,
            // Hang up without an answer
            None => return,
        },
        Err(e) => error(ErrorCode::InvalidRequest, format!("invalid request: {e}")),
    };

    let mut json = serde_json::to_string(&response).expect("serialize response");
    json.push('\n');
    let _ = writer.write_all(json.as_bytes()).await;
}

async fn dispatch(
    req: BrokerRequest,
    state: &FakeState,
    options: &FakeOptions,
) -> Option<BrokerResponse> {
    let response = match req {
        BrokerRequest::Ping => BrokerResponse::Pong,
        BrokerRequest::Identity => BrokerResponse::Identity(IdentityResponse {
            uid: options.uid,
            version: "fake-1.0".to_string(),
            authorized: options.authorized,
        }),
        BrokerRequest::DescribeCapabilities(_) if options.no_discovery => {
            error(ErrorCode::InvalidRequest, "unknown request type")
        }
        BrokerRequest::DescribeCapabilities(d) => {
            let mut capabilities = vec![CapabilityDescriptor {
                name: "get_uid".to_string(),
                signature: Signature {
                    params: vec![],
                    returns: ReturnType::Int,
                },
                hidden: false,
            }];
            if options.expose_capability && d.include_hidden {
                let mut signature = Signature::new_process();
                if options.legacy_signature {
                    signature.params.pop();
                }
                capabilities.push(CapabilityDescriptor {
                    name: NEW_PROCESS_CAPABILITY.to_string(),
                    signature,
                    hidden: true,
                });
            }
            BrokerResponse::Capabilities(CapabilitiesResponse { capabilities })
        }
        BrokerRequest::Invoke(invoke) => {
            state.invocations.fetch_add(1, Ordering::SeqCst);
            if !options.authorized {
                return Some(error(ErrorCode::PermissionDenied, "client is not authorized"));
            }
            if !options.expose_capability || invoke.capability != NEW_PROCESS_CAPABILITY {
                return Some(error(
                    ErrorCode::CapabilityNotFound,
                    format!("no capability {}", invoke.capability),
                ));
            }
            if options.omit_handle {
                return Some(BrokerResponse::ProcessCreated(ProcessCreatedResponse {
                    handle: None,
                }));
            }
            match spawn(&invoke.args) {
                Ok(child) => {
                    let handle = state.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
                    state
                        .children
                        .lock()
                        .unwrap()
                        .insert(handle, Arc::new(tokio::sync::Mutex::new(child)));
                    BrokerResponse::ProcessCreated(ProcessCreatedResponse {
                        handle: Some(handle),
                    })
                }
                Err(e) => error(ErrorCode::SpawnFailed, e.to_string()),
            }
        }
        BrokerRequest::WaitFor(w) => {
            let child = state.children.lock().unwrap().get(&w.handle).cloned();
            let Some(child) = child else {
                return Some(error(ErrorCode::HandleNotFound, format!("no handle {}", w.handle)));
            };
            if options.drop_waits {
                return None;
            }
            let status = child.lock().await.wait().await;
            match status {
                Ok(status) => BrokerResponse::ProcessExited(ProcessExitedResponse {
                    handle: w.handle,
                    exit_code: status.code().unwrap_or(-1),
                }),
                Err(e) => error(ErrorCode::Internal, e.to_string()),
            }
        }
        BrokerRequest::Release(_) if options.stall_release => {
            std::future::pending::<BrokerResponse>().await
        }
        BrokerRequest::Release(r) => {
            let removed = state.children.lock().unwrap().remove(&r.handle);
            match removed {
                Some(_) => {
                    state.released.lock().unwrap().push(r.handle);
                    BrokerResponse::Released(ReleasedResponse { handle: r.handle })
                }
                None => error(ErrorCode::HandleNotFound, format!("no handle {}", r.handle)),
            }
        }
    };
    Some(response)
}

fn spawn(args: &NewProcessArgs) -> std::io::Result<Child> {
    let (program, rest) = args
        .cmd
        .split_first()
        .ok_or_else(|| std::io::Error::other("empty command"))?;

    let mut cmd = Command::new(program);
    cmd.args(rest);
    if let Some(env) = &args.env {
        cmd.env_clear();
        for entry in env {
            if let Some((key, value)) = entry.split_once('=') {
                cmd.env(key, value);
            }
        }
    }
    if let Some(dir) = &args.dir {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}

fn error(code: ErrorCode, message: impl Into<String>) -> BrokerResponse {
    BrokerResponse::Error(ErrorResponse {
        code,
        message: message.into(),
    })
}

//! Launch processes through a privileged broker and wait for their exit code.
//!
//! The broker can create processes on our behalf but keeps that capability
//! off its public interface. [`PrivilegedProcessLauncher`] resolves the
//! hidden capability once, invokes it, waits for the remote process and
//! returns its exit status:
//!
//! ```no_run
//! # async fn demo() -> Result<(), privexec::LaunchError> {
//! use privexec::{BridgeConfig, PrivilegedProcessLauncher, ProcessRequest, SocketBroker};
//!
//! let config = BridgeConfig::default();
//! let broker = SocketBroker::from_config(&config).expect("valid socket path");
//! let launcher = PrivilegedProcessLauncher::new(broker);
//!
//! let request = ProcessRequest::new(["echo", "hi"])?.with_working_dir("/tmp")?;
//! let code = launcher.run(&request).await?;
//! assert_eq!(code, 0);
//! # Ok(())
//! # }
//! ```
//!
//! Output streams are not captured.

pub mod broker;
pub mod config;
pub mod error;
pub mod launcher;
pub mod request;
pub mod socket;
pub mod status;

pub use broker::{Capability, PrivilegedBroker, RemoteProcess};
pub use config::BridgeConfig;
pub use error::{BrokerError, LaunchError};
pub use launcher::{Interrupt, PrivilegedProcessLauncher};
pub use request::ProcessRequest;
pub use socket::{BrokerClient, SocketBroker, SocketProcess};
pub use status::{BrokerStatus, PrivilegeLevel};

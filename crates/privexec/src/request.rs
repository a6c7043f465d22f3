//! Validated process creation parameters.

use std::path::Path;

use privexec_protocol::NewProcessArgs;

use crate::error::LaunchError;

/// What to run on the broker side.
///
/// Built through [`ProcessRequest::new`], which rejects an empty command.
/// Empty environment lists and empty working directories are normalized to
/// `None`, meaning "use the broker's default". Everything is kept as UTF-8
/// text since that is what goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    command: Vec<String>,
    env: Option<Vec<String>>,
    working_dir: Option<String>,
}

impl ProcessRequest {
    /// Create a request for the given argv. The first element is the
    /// executable path or name.
    pub fn new<I, S>(command: I) -> Result<Self, LaunchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command: Vec<String> = command.into_iter().map(Into::into).collect();
        match command.first() {
            None => Err(LaunchError::InvalidCommand("command is empty".to_string())),
            Some(exe) if exe.is_empty() => Err(LaunchError::InvalidCommand(
                "executable name is empty".to_string(),
            )),
            Some(_) => Ok(Self {
                command,
                env: None,
                working_dir: None,
            }),
        }
    }

    /// Set the environment as `KEY=VALUE` entries. An empty list keeps the
    /// broker's default environment. Duplicates are passed through as-is.
    pub fn with_env<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let env: Vec<String> = env.into_iter().map(Into::into).collect();
        self.env = if env.is_empty() { None } else { Some(env) };
        self
    }

    /// Set the working directory. An empty path keeps the broker's default.
    ///
    /// Fails with [`LaunchError::InvalidCommand`] if the path is not valid
    /// UTF-8.
    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Result<Self, LaunchError> {
        let dir = dir.as_ref();
        let Some(dir) = dir.to_str() else {
            return Err(LaunchError::InvalidCommand(format!(
                "working directory {dir:?} is not valid UTF-8"
            )));
        };
        self.working_dir = (!dir.is_empty()).then(|| dir.to_string());
        Ok(self)
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn program(&self) -> &str {
        // Non-empty by construction
        &self.command[0]
    }

    pub fn env(&self) -> Option<&[String]> {
        self.env.as_deref()
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref().map(Path::new)
    }

    /// Arguments for the process-creation capability, in signature order.
    pub fn to_args(&self) -> NewProcessArgs {
        NewProcessArgs {
            cmd: self.command.clone(),
            env: self.env.clone(),
            dir: self.working_dir.clone(),
        }
    }
}

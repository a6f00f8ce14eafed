//! Byte-stream connections to a tool server.
//!
//! The client never cares where the bytes come from. Production spawns the
//! server as a child process and talks over its stdio; tests hand the client
//! an in-memory pipe.

use async_trait::async_trait;
use refdesk_core::TransportError;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An open, not yet initialized connection.
pub struct Connection {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,

    /// The server process, when we own one. Killed when dropped.
    pub child: Option<Child>,
}

impl Connection {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }
}

/// Opens fresh connections. Called once at start and once per reconnect.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection, TransportError>;

    /// Short label for logs.
    fn describe(&self) -> String;
}

/// Spawns the tool server and speaks over its stdin/stdout.
#[derive(Debug, Clone)]
pub struct StdioConnector {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    inherit_env: bool,
}

impl StdioConnector {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: None,
            inherit_env: true,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }
}

#[async_trait]
impl Connector for StdioConnector {
    async fn connect(&self) -> Result<Connection, TransportError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !self.inherit_env {
            cmd.env_clear();
            if let Ok(path) = std::env::var("PATH") {
                cmd.env("PATH", path);
            }
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| TransportError::Spawn {
            command: self.describe(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| TransportError::Spawn {
            command: self.describe(),
            reason: "stdin not captured".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| TransportError::Spawn {
            command: self.describe(),
            reason: "stdout not captured".into(),
        })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "refdesk::tool_server", "{line}");
                }
            });
        }

        info!(command = %self.describe(), pid = ?child.id(), "Spawned tool server");

        Ok(Connection {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

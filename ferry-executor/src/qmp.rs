//! Minimal QMP client over a Unix domain socket.
//!
//! QMP is line-delimited JSON. After connecting, the VM sends a greeting;
//! the client answers with `qmp_capabilities` to leave negotiation mode.
//! Every command gets exactly one `return` or `error` reply, possibly
//! preceded by asynchronous events, which are kept in an event log.

use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::fd_channel::{send_scm_rights, DescriptorChannel};
use crate::ExecutorError;

/// An asynchronous event emitted by the VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QmpEvent {
    /// Event name, e.g. `MIGRATION` or `STOP`.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

/// One decoded line from the monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The initial `{"QMP": {...}}` banner.
    Greeting(Value),
    /// A successful command result.
    Return(Value),
    /// A failed command.
    Error { class: String, desc: String },
    /// An asynchronous event.
    Event(QmpEvent),
}

#[derive(Deserialize)]
struct ErrorBody {
    class: String,
    #[serde(default)]
    desc: String,
}

/// Decode one QMP line.
///
/// # Errors
/// Returns [`ExecutorError::Protocol`] if the line is not a JSON object of
/// a known QMP shape.
pub fn parse_reply(line: &str) -> Result<Reply, ExecutorError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| ExecutorError::Protocol(format!("invalid JSON from monitor: {e}")))?;
    let Value::Object(mut map) = value else {
        return Err(ExecutorError::Protocol(format!("expected a JSON object, got {line}")));
    };

    if let Some(ret) = map.remove("return") {
        return Ok(Reply::Return(ret));
    }
    if let Some(err) = map.remove("error") {
        let body: ErrorBody = serde_json::from_value(err)
            .map_err(|e| ExecutorError::Protocol(format!("malformed error reply: {e}")))?;
        return Ok(Reply::Error { class: body.class, desc: body.desc });
    }
    if map.contains_key("event") {
        let event: QmpEvent = serde_json::from_value(Value::Object(map))
            .map_err(|e| ExecutorError::Protocol(format!("malformed event: {e}")))?;
        return Ok(Reply::Event(event));
    }
    if let Some(greeting) = map.remove("QMP") {
        return Ok(Reply::Greeting(greeting));
    }

    Err(ExecutorError::Protocol(format!("unrecognised monitor message: {line}")))
}

/// Render a command as a single QMP line, including the trailing newline.
#[must_use]
pub fn encode_command(command: &str, arguments: Option<&Value>) -> String {
    let mut map = Map::new();
    map.insert("execute".to_owned(), Value::String(command.to_owned()));
    if let Some(args) = arguments {
        map.insert("arguments".to_owned(), args.clone());
    }
    let mut line = Value::Object(map).to_string();
    line.push('\n');
    line
}

/// A negotiated QMP connection.
///
/// Requests are strictly sequential: one command is written, then lines
/// are read until its reply arrives. A command that times out leaves its
/// reply (or part of it) in flight, so the client refuses every later
/// command instead of pairing that reply with the wrong request.
#[derive(Debug)]
pub struct QmpClient {
    stream: BufReader<UnixStream>,
    command_timeout: Duration,
    events: Vec<QmpEvent>,
    desynced: Option<String>,
}

impl QmpClient {
    /// Connect to a monitor listening at `path` and negotiate capabilities.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Io`] if the socket cannot be reached, or
    /// [`ExecutorError::Protocol`] if the handshake fails.
    pub async fn connect(path: &Path, command_timeout: Duration) -> Result<Self, ExecutorError> {
        let stream = UnixStream::connect(path).await?;
        Self::handshake(stream, command_timeout).await
    }

    /// Negotiate capabilities on an already-connected monitor stream.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Protocol`] if the greeting is missing or
    /// `qmp_capabilities` is rejected.
    pub async fn handshake(
        stream: UnixStream,
        command_timeout: Duration,
    ) -> Result<Self, ExecutorError> {
        let mut client = Self {
            stream: BufReader::new(stream),
            command_timeout,
            events: Vec::new(),
            desynced: None,
        };

        let greeting = tokio::time::timeout(command_timeout, client.read_reply())
            .await
            .map_err(|_| ExecutorError::Protocol("no QMP greeting".to_owned()))??;
        match greeting {
            Reply::Greeting(banner) => {
                tracing::debug!(version = %banner["version"]["qemu"], "QMP greeting received");
            }
            other => {
                return Err(ExecutorError::Protocol(format!("expected QMP greeting, got {other:?}")));
            }
        }

        client.execute("qmp_capabilities", None).await?;
        Ok(client)
    }

    /// Execute a command and return its `return` payload.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Qmp`] on an error reply,
    /// [`ExecutorError::Protocol`] on timeout, EOF or malformed input, and
    /// for any command issued after an earlier one timed out.
    pub async fn execute(
        &mut self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<Value, ExecutorError> {
        if let Some(cause) = &self.desynced {
            return Err(ExecutorError::Protocol(format!(
                "monitor out of sync after {cause}; refusing '{command}'"
            )));
        }

        tracing::debug!(%command, "QMP request");
        let limit = self.command_timeout;
        let outcome = tokio::time::timeout(limit, self.round_trip(command, arguments.as_ref())).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                let reason = format!("no reply to '{command}' within {limit:?}");
                tracing::warn!(%command, timeout = ?limit, "QMP command timed out; refusing further commands");
                self.desynced = Some(reason.clone());
                Err(ExecutorError::Protocol(reason))
            }
        }
    }

    /// Whether an earlier timeout left the connection unusable.
    #[must_use]
    pub fn is_desynced(&self) -> bool {
        self.desynced.is_some()
    }

    async fn round_trip(
        &mut self,
        command: &str,
        arguments: Option<&Value>,
    ) -> Result<Value, ExecutorError> {
        let line = encode_command(command, arguments);
        self.stream.get_mut().write_all(line.as_bytes()).await?;

        loop {
            match self.read_reply().await? {
                Reply::Return(value) => return Ok(value),
                Reply::Error { class, desc } => {
                    return Err(ExecutorError::Qmp { command: command.to_owned(), class, desc });
                }
                Reply::Event(event) => {
                    tracing::debug!(event = %event.event, "QMP event");
                    self.events.push(event);
                }
                Reply::Greeting(_) => {
                    return Err(ExecutorError::Protocol("unexpected second greeting".to_owned()));
                }
            }
        }
    }

    async fn read_reply(&mut self) -> Result<Reply, ExecutorError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.stream.read_line(&mut line).await? == 0 {
                return Err(ExecutorError::Protocol("monitor connection closed".to_owned()));
            }
            if !line.trim().is_empty() {
                return parse_reply(&line);
            }
        }
    }

    /// Pass a descriptor to the VM over the monitor socket.
    ///
    /// The VM holds it until a following `getfd` names it.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Io`] if `sendmsg` fails, or
    /// [`ExecutorError::Protocol`] if the connection is out of sync.
    pub async fn send_fd(&mut self, fd: BorrowedFd<'_>) -> Result<(), ExecutorError> {
        if let Some(cause) = &self.desynced {
            return Err(ExecutorError::Protocol(format!(
                "monitor out of sync after {cause}; refusing descriptor"
            )));
        }
        send_scm_rights(self.stream.get_ref(), b" ", fd.as_raw_fd()).await?;
        Ok(())
    }

    /// Events received so far, oldest first.
    #[must_use]
    pub fn events(&self) -> &[QmpEvent] {
        &self.events
    }
}

#[async_trait]
impl DescriptorChannel for QmpClient {
    async fn send(&mut self, fd: BorrowedFd<'_>, tag: &str) -> Result<(), ExecutorError> {
        self.send_fd(fd).await?;
        self.execute("getfd", Some(serde_json::json!({ "fdname": tag }))).await?;
        tracing::debug!(fdname = %tag, "descriptor registered");
        Ok(())
    }

    async fn receive(&mut self) -> Result<(std::os::fd::OwnedFd, String), ExecutorError> {
        Err(ExecutorError::DescriptorTransferUnsupported(
            "the monitor never sends descriptors to the client".to_owned(),
        ))
    }
}

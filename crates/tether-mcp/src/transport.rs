//! Stdio transport for MCP server communication.
//!
//! Spawns a provider process and turns its stdout into a stream of
//! newline-delimited messages. stderr is forwarded to the log and never
//! parsed. Process exit is reported as the last event on the stream.

use crate::error::McpError;
use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long to keep reading stdout after the process has exited.
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Outbound messages buffered ahead of a provider that is slow to read.
const WRITE_QUEUE_CAPACITY: usize = 64;

/// Something observed on a provider process.
#[derive(Debug)]
pub enum TransportEvent {
    /// One complete line from stdout, without its terminator.
    Line(String),
    /// The process is gone. Always the final event.
    Exited(Option<ExitStatus>),
}

/// Async stdio transport owning one provider process.
///
/// Writes go through a bounded queue drained by a writer task, so a provider
/// that stops reading stalls only that task and callers waiting for room.
pub struct StdioTransport {
    command: String,
    write_tx: mpsc::Sender<String>,
    kill: CancellationToken,
}

impl StdioTransport {
    /// Split `command`, spawn it, and start the background stdout, stderr and
    /// exit watchers. Must be called from within a Tokio runtime.
    pub fn launch(
        command: &str,
        env: &HashMap<String, String>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), McpError> {
        let argv = split_command(command)?;
        let (program, args) = argv.split_first().ok_or_else(|| McpError::Spawn {
            command: command.to_string(),
            reason: "empty command".to_string(),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::Spawn {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| McpError::Spawn {
            command: command.to_string(),
            reason: "stdout is not available".to_string(),
        })?;
        let stdin = child.stdin.take().ok_or_else(|| McpError::Spawn {
            command: command.to_string(),
            reason: "stdin is not available".to_string(),
        })?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_lines(stdout, events_tx.clone()));
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(command.to_string(), stderr));
        }

        let exited = CancellationToken::new();
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let writer = tokio::spawn(write_lines(
            stdin,
            write_rx,
            exited.clone(),
            command.to_string(),
        ));

        let kill = CancellationToken::new();
        tokio::spawn(supervise(
            child,
            Tasks { reader, writer },
            kill.clone(),
            exited,
            events_tx,
            command.to_string(),
        ));

        tracing::debug!(server = %command, "spawned MCP server process");

        Ok((
            Self {
                command: command.to_string(),
                write_tx,
                kill,
            },
            events_rx,
        ))
    }

    /// Queue one message for the process stdin, waiting for room if the
    /// queue is full. Fails once the writer has stopped.
    ///
    /// Cancelling the returned future never leaves a partial line behind.
    pub async fn write(&self, message: &str) -> Result<(), McpError> {
        self.write_tx
            .send(message.to_string())
            .await
            .map_err(|_| self.write_error("stdin is closed"))
    }

    /// Queue one message without waiting. A full queue is a `Write` error.
    pub fn try_write(&self, message: &str) -> Result<(), McpError> {
        self.write_tx
            .try_send(message.to_string())
            .map_err(|e| match e {
                TrySendError::Full(_) => self.write_error("write queue is full"),
                TrySendError::Closed(_) => self.write_error("stdin is closed"),
            })
    }

    /// Request termination without waiting for the process to exit.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// The launch command this transport was created from.
    pub fn command(&self) -> &str {
        &self.command
    }

    fn write_error(&self, reason: &str) -> McpError {
        McpError::Write {
            command: self.command.clone(),
            reason: reason.to_string(),
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.kill.cancel();
    }
}

/// Emit every complete stdout line. Lines of any length are assembled in
/// full; invalid UTF-8 is replaced rather than ending the stream.
async fn read_lines<R: AsyncRead + Unpin>(
    stdout: R,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if line.trim().is_empty() {
                    continue;
                }
                if events.send(TransportEvent::Line(line.to_string())).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Failed to read MCP server stdout: {e}");
                break;
            }
        }
    }
}

/// Drain the write queue into stdin, one newline-terminated line per
/// message. Stops on the first write failure or once the process is gone,
/// which closes the queue for every sender.
async fn write_lines(
    mut stdin: ChildStdin,
    mut queue: mpsc::Receiver<String>,
    exited: CancellationToken,
    command: String,
) {
    loop {
        let message = tokio::select! {
            biased;
            () = exited.cancelled() => break,
            message = queue.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let result = async {
            stdin.write_all(message.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::debug!(server = %command, "stdin write failed: {e}");
            break;
        }
    }
    queue.close();
}

async fn forward_stderr(command: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(server = %command, "stderr: {line}");
    }
}

struct Tasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Own the child until it exits, killing it on request, then report the exit
/// once the writer has stopped and stdout has been drained.
async fn supervise(
    mut child: Child,
    tasks: Tasks,
    kill: CancellationToken,
    exited: CancellationToken,
    events: mpsc::UnboundedSender<TransportEvent>,
    command: String,
) {
    let Tasks { mut reader, mut writer } = tasks;
    let status = tokio::select! {
        status = child.wait() => status,
        () = kill.cancelled() => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(server = %command, "kill failed: {e}");
            }
            child.wait().await
        }
    };

    let status = match status {
        Ok(status) => {
            tracing::debug!(server = %command, %status, "MCP server process exited");
            Some(status)
        }
        Err(e) => {
            tracing::warn!(server = %command, "Failed to wait for MCP server process: {e}");
            None
        }
    };

    // Writes from here on fail instead of queueing for a dead process.
    exited.cancel();
    if tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        // Something else still holds the pipe open; drop our end anyway.
        tracing::debug!(server = %command, "stdin writer did not stop after exit");
        writer.abort();
    }

    if tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, &mut reader)
        .await
        .is_err()
    {
        tracing::debug!(server = %command, "stdout still open after exit; abandoning it");
        reader.abort();
    }

    let _ = events.send(TransportEvent::Exited(status));
}

/// Split a launch command into program and arguments.
///
/// Words are separated by whitespace. Single quotes group literally; double
/// quotes group and honor backslash escapes, as does bare text.
pub fn split_command(command: &str) -> Result<Vec<String>, McpError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some('\'') => {
                if c == '\'' {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            Some(q) => match c {
                _ if c == q => quote = None,
                '\\' => current.push(chars.next().unwrap_or('\\')),
                _ => current.push(c),
            },
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_word = true;
                }
                '\\' => {
                    current.push(chars.next().unwrap_or('\\'));
                    in_word = true;
                }
                _ if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }

    if quote.is_some() {
        return Err(McpError::Spawn {
            command: command.to_string(),
            reason: "unterminated quote".to_string(),
        });
    }
    if in_word {
        words.push(current);
    }
    if words.is_empty() {
        return Err(McpError::Spawn {
            command: command.to_string(),
            reason: "empty command".to_string(),
        });
    }
    Ok(words)
}

//! Process transport: newline-delimited JSON-RPC over a child's pipes.

use super::jsonrpc::{ClientInfo, Outbound, RpcRouter};
use crate::tool_registry::{
    domain::{
        ConnectionId, McpServerName, McpToolDefinition, McpTransport, ServerDescriptor,
        StdioTransportConfig, ToolCallRequest, TransportKind,
    },
    ports::{
        CallConcurrency, InvocationStream, ListToolsError, TransportAdapter, TransportConnection,
        TransportError, TransportFailure, TransportResult,
    },
};
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const KIND: TransportKind = TransportKind::Stdio;

/// Spawns MCP servers as local processes.
#[derive(Debug, Clone)]
pub struct StdioTransportAdapter {
    client: ClientInfo,
    shutdown_grace: Duration,
}

impl StdioTransportAdapter {
    /// Creates an adapter announcing `client` and waiting `shutdown_grace`
    /// for processes to exit before killing them.
    #[must_use]
    pub const fn new(client: ClientInfo, shutdown_grace: Duration) -> Self {
        Self {
            client,
            shutdown_grace,
        }
    }
}

fn build_command(config: &StdioTransportConfig) -> Command {
    let mut command = Command::new(config.command());
    command
        .args(config.args())
        .envs(config.env())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(directory) = config.working_directory() {
        command.current_dir(directory);
    }
    command
}

fn missing_pipe(name: &str) -> TransportError {
    TransportError::io(KIND, std::io::Error::other(format!("child {name} was not piped")))
}

#[async_trait]
impl TransportAdapter for StdioTransportAdapter {
    fn kind(&self) -> TransportKind {
        KIND
    }

    async fn open(
        &self,
        descriptor: &ServerDescriptor,
    ) -> TransportResult<Arc<dyn TransportConnection>> {
        let McpTransport::Stdio(config) = descriptor.transport() else {
            return Err(TransportError::protocol(
                KIND,
                format!("server '{}' is not a process server", descriptor.name()),
            ));
        };

        let mut child = build_command(config).spawn().map_err(|err| {
            TransportError::new(
                KIND,
                TransportFailure::Spawn {
                    command: config.command().to_owned(),
                    cause: Arc::new(err),
                },
            )
        })?;
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        let connection_id = ConnectionId::new();
        info!(
            server = %descriptor.name(),
            connection_id = %connection_id,
            command = config.command(),
            pid = ?child.id(),
            "spawned MCP server process"
        );

        let session = LineSession::spawn(stdout, stdin);
        let stderr_task = forward_stderr(descriptor.name().clone(), connection_id, stderr);
        let connection = StdioConnection {
            id: connection_id,
            server: descriptor.name().clone(),
            session,
            stderr_task,
            child: Mutex::new(Some(child)),
            shutdown_grace: self.shutdown_grace,
        };

        if let Err(err) = connection.session.router.initialize(&self.client).await {
            warn!(
                server = %descriptor.name(),
                connection_id = %connection_id,
                error = %err,
                "initialize handshake failed"
            );
            connection.close().await;
            return Err(err);
        }
        Ok(Arc::new(connection))
    }
}

/// Router plus the reader and writer tasks serving one pair of pipes.
pub(crate) struct LineSession {
    pub(crate) router: Arc<RpcRouter>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl LineSession {
    /// Starts framing `reader` and `writer` as newline-delimited JSON-RPC.
    pub(crate) fn spawn<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (router, outbound) = RpcRouter::new(KIND);
        let writer_task = tokio::spawn(write_frames(writer, outbound, Arc::clone(&router)));
        let reader_task = tokio::spawn(read_frames(reader, Arc::clone(&router)));
        Self {
            router,
            reader_task,
            writer_task,
        }
    }

    /// Stops both tasks; dropping the writer closes the peer's input.
    pub(crate) fn shutdown(&self) {
        self.router.close(&TransportError::closed(KIND));
        self.writer_task.abort();
        self.reader_task.abort();
    }
}

impl Drop for LineSession {
    fn drop(&mut self) {
        self.writer_task.abort();
        self.reader_task.abort();
    }
}

async fn write_frames<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    router: Arc<RpcRouter>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = outbound.recv().await {
        let mut line = item.message.to_string();
        line.push('\n');
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = written {
            router.close(&TransportError::io(KIND, err));
            return;
        }
    }
}

async fn read_frames<R>(reader: R, router: Arc<RpcRouter>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let failure = loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => {
                let routed = serde_json::from_str::<Value>(&line)
                    .map_err(|err| {
                        TransportError::protocol(KIND, format!("invalid JSON frame: {err}"))
                    })
                    .and_then(|frame| router.route(frame));
                if let Err(err) = routed {
                    break err;
                }
            }
            Ok(None) => break TransportError::closed(KIND),
            Err(err) => break TransportError::io(KIND, err),
        }
    };
    debug!(error = %failure, "process output ended");
    router.close(&failure);
}

fn forward_stderr<R>(
    server: McpServerName,
    connection_id: ConnectionId,
    stderr: R,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(server = %server, connection_id = %connection_id, line = %line, "server stderr");
        }
    })
}

struct StdioConnection {
    id: ConnectionId,
    server: McpServerName,
    session: LineSession,
    stderr_task: JoinHandle<()>,
    child: Mutex<Option<Child>>,
    shutdown_grace: Duration,
}

impl StdioConnection {
    async fn stop_child(&self, mut child: Child) {
        request_termination(&child);
        match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(
                    server = %self.server,
                    connection_id = %self.id,
                    %status,
                    "MCP server process exited"
                );
            }
            Ok(Err(err)) => {
                warn!(
                    server = %self.server,
                    connection_id = %self.id,
                    error = %err,
                    "failed to wait for MCP server process"
                );
            }
            Err(_) => {
                warn!(
                    server = %self.server,
                    connection_id = %self.id,
                    "MCP server process ignored shutdown; killing"
                );
                if let Err(err) = child.kill().await {
                    warn!(
                        server = %self.server,
                        connection_id = %self.id,
                        error = %err,
                        "failed to kill MCP server process"
                    );
                }
            }
        }
    }
}

#[cfg(unix)]
fn request_termination(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|raw| i32::try_from(raw).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, error = %err, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn request_termination(_child: &Child) {}

#[async_trait]
impl TransportConnection for StdioConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn kind(&self) -> TransportKind {
        KIND
    }

    fn concurrency(&self) -> CallConcurrency {
        CallConcurrency::Exclusive
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, ListToolsError> {
        self.session.router.list_tools().await
    }

    fn invoke(&self, request: ToolCallRequest) -> InvocationStream {
        self.session.router.invoke(&request)
    }

    async fn close(&self) {
        self.session.shutdown();
        let child = self.child.lock().await.take();
        if let Some(running) = child {
            self.stop_child(running).await;
        }
        self.stderr_task.abort();
    }
}

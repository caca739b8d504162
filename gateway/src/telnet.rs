//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Telnet acceptor and connection task
//!
//! Each accepted socket gets one task that owns its [`Connection`] and runs
//! the read, process, dispatch, write cycle. The task only suspends on the
//! socket and on its outbound queue; protocol handling in between is
//! synchronous.

use crate::connection::{Connection, ConnectionHandle, Outbound};
use crate::context::ServerContext;
use crate::error::GatewayResult;
use crate::pool::SHUTDOWN_MESSAGE;
use crate::session::SessionState;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub mod format;
pub mod protocol;

/// Sent to a client turned away because the registry is full
pub const SERVER_FULL_MESSAGE: &str = "The server is full. Please try again later.\n";

const READ_BUFFER_SIZE: usize = 4096;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Telnet server
pub struct TelnetServer {
    context: ServerContext,
    shutdown_timeout: Duration,
    tracker: TaskTracker,
}

impl TelnetServer {
    /// Create a new telnet server
    pub fn new(context: ServerContext, shutdown_timeout: Duration) -> Self {
        Self {
            context,
            shutdown_timeout,
            tracker: TaskTracker::new(),
        }
    }

    /// Accept connections until `shutdown` fires, then close every connection
    /// and wait up to the shutdown timeout for their tasks to finish.
    pub async fn run_until(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> GatewayResult<()> {
        tracing::info!(
            "Telnet server accepting connections on {}",
            listener.local_addr()?
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tracing::info!("New telnet connection from {}", addr);
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!("Unable to set TCP_NODELAY for {}: {}", addr, e);
                        }
                        let context = self.context.clone();
                        self.tracker.spawn(async move {
                            if let Err(e) = serve_connection(stream, addr.to_string(), context).await {
                                tracing::warn!("Telnet connection from {} rejected: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Error accepting telnet connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        self.tracker.close();
        self.context.begin_shutdown();
        let signalled = self
            .context
            .connection_pool()
            .close_all(SHUTDOWN_MESSAGE)
            .await;
        tracing::info!(connections = signalled, "Telnet server shutting down");

        if tokio::time::timeout(self.shutdown_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.tracker.len(),
                "Connections still open after shutdown timeout"
            );
        }
        tracing::info!("Telnet server stopped");
        Ok(())
    }
}

/// Releases a registered connection if its task is torn down before the
/// normal cleanup runs, such as when a handler panics.
struct RegistrationGuard {
    handle: ConnectionHandle,
    context: ServerContext,
    armed: bool,
}

impl RegistrationGuard {
    fn new(handle: ConnectionHandle, context: ServerContext) -> Self {
        Self {
            handle,
            context,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let id = self.handle.id();
        tracing::error!(session_id = %id, "Telnet session aborted, releasing connection");
        self.handle.close(None);
        self.handle.set_state(SessionState::Closed);

        let pool = self.context.connection_pool().clone();
        let handler = self.context.handler().clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    pool.unregister(id).await;
                    handler.on_disconnect(id).await;
                });
            }
            Err(_) => {
                tracing::warn!(session_id = %id, "No runtime left to release aborted connection")
            }
        }
    }
}

/// How the active phase of a connection ended
enum Exit {
    /// The peer closed its side or the transport failed
    Disconnected,
    /// The connection entered `Closing` or was told to close
    Closing,
}

/// Serve one client stream until it disconnects or is closed.
///
/// Fails only when the connection cannot be registered, after the client has
/// been told why.
pub async fn serve_connection<S>(stream: S, host: String, context: ServerContext) -> GatewayResult<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let settings = *context.settings();
    let pool = context.connection_pool().clone();
    let (handle, mut outbound) = ConnectionHandle::new(host, settings.outbound_queue);
    let (mut reader, mut writer) = tokio::io::split(stream);

    if let Err(e) = pool.register(handle.clone()).await {
        let notice = format::format_outgoing(SERVER_FULL_MESSAGE, false);
        let _ = tokio::time::timeout(settings.shutdown_grace, async {
            writer.write_all(&notice).await?;
            writer.shutdown().await
        })
        .await;
        return Err(e);
    }
    if context.is_shutting_down() {
        handle.close(Some(SHUTDOWN_MESSAGE.to_string()));
    }

    let mut guard = RegistrationGuard::new(handle.clone(), context.clone());
    let id = handle.id();
    tracing::info!(session_id = %id, host = %handle.host(), "Telnet session started");
    let mut connection = Connection::new(handle.clone(), settings.default_color);

    let exit = match drive(&mut connection, &handle, &mut reader, &mut writer, &mut outbound, &context).await {
        Ok(exit) => exit,
        Err(e) => {
            tracing::debug!(session_id = %id, "Transport error: {}", e);
            Exit::Disconnected
        }
    };

    if let Exit::Closing = exit {
        while let Ok(message) = outbound.try_recv() {
            connection.deliver(message);
        }
        if let Some(message) = handle.take_close_message() {
            connection.send(&message);
        }
        if let Err(e) = connection.set_state(SessionState::Closing) {
            tracing::debug!(session_id = %id, "{}", e);
        }
        let output = connection.take_output();
        let flushed = tokio::time::timeout(settings.shutdown_grace, async {
            writer.write_all(&output).await?;
            writer.flush().await?;
            writer.shutdown().await
        })
        .await;
        match flushed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(session_id = %id, "Error flushing closing connection: {}", e),
            Err(_) => tracing::debug!(session_id = %id, "Closing connection did not flush in time"),
        }
    }

    guard.disarm();
    connection.mark_closed();
    pool.unregister(id).await;
    context.handler().on_disconnect(id).await;
    tracing::info!(session_id = %id, "Telnet session ended");
    Ok(())
}

async fn drive<R, W>(
    connection: &mut Connection,
    handle: &ConnectionHandle,
    reader: &mut R,
    writer: &mut W,
    outbound: &mut mpsc::Receiver<Outbound>,
    context: &ServerContext,
) -> std::io::Result<Exit>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let settings = context.settings();
    let handler = context.handler();

    connection.begin_negotiation(settings.negotiate_naws, settings.negotiate_ttype);
    handler.on_connect(connection).await;

    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        if connection.state().is_closing() || handle.is_closing() {
            return Ok(Exit::Closing);
        }

        tokio::select! {
            biased;
            _ = handle.closed() => return Ok(Exit::Closing),
            written = write_output(connection, writer) => written?,
        }

        tokio::select! {
            _ = handle.closed() => return Ok(Exit::Closing),
            message = outbound.recv() => match message {
                Some(message) => connection.deliver(message),
                None => return Ok(Exit::Closing),
            },
            read = reader.read(&mut buffer) => {
                let count = read?;
                if count == 0 {
                    return Ok(Exit::Disconnected);
                }

                let input = connection.process_incoming(&buffer[..count]);
                if input.truncated {
                    tracing::debug!(session_id = %connection.id(), "Input line truncated");
                }
                for line in input.lines {
                    if !connection.state().accepts_input() {
                        break;
                    }
                    let line = connection.recall(line);
                    handler.on_command(connection, line).await;
                }
                if input.should_close {
                    tracing::warn!(session_id = %connection.id(), "Unrecoverable telnet stream, closing");
                    if let Err(e) = connection.set_state(SessionState::Closing) {
                        tracing::debug!(session_id = %connection.id(), "{}", e);
                    }
                }
            }
        }
    }
}

/// Write queued output, consuming only what the socket accepted so a
/// cancelled write leaves the remainder for the closing flush.
async fn write_output<W>(connection: &mut Connection, writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if !connection.has_output() {
        return Ok(());
    }
    while connection.has_output() {
        let written = writer.write(connection.pending_output()).await?;
        if written == 0 {
            return Err(std::io::ErrorKind::WriteZero.into());
        }
        connection.consume_output(written);
    }
    writer.flush().await
}

//! TCP accept loop for the SSH decoy
//!
//! Each accepted socket gets its own task, its own [`DecoySession`] and its
//! own russh transport. A failure in one connection never reaches the loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use russh::server::{Config as ServerConfig, Handle};
use russh::{Channel, Disconnect};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Notify};
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::emulator::DecoySession;
use super::shell::{Shell, ShellExit};
use super::transport::{load_host_key, server_config, SshHandler};
use crate::config::SshConfig;
use crate::event_log::EventSink;
use crate::models::Event;

/// How long a connection may sit in each pre-shell phase
#[derive(Debug, Clone, Copy)]
pub struct SessionWaits {
    pub channel: Duration,
    pub shell: Duration,
}

impl From<&SshConfig> for SessionWaits {
    fn from(config: &SshConfig) -> Self {
        Self {
            channel: config.channel_timeout(),
            shell: config.shell_timeout(),
        }
    }
}

/// How a connection ended after the transport came up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    NoChannel,
    NoShell,
    Shell(ShellExit),
}

struct ConnectionContext {
    server_config: Arc<ServerConfig>,
    sink: Arc<dyn EventSink>,
    banner: String,
    echo_input: bool,
    waits: SessionWaits,
}

/// Disconnects the client when the connection handler returns, whichever
/// path it leaves by
struct TransportGuard {
    handle: Handle,
    session_id: String,
}

impl Drop for TransportGuard {
    fn drop(&mut self) {
        let handle = self.handle.clone();
        let session_id = std::mem::take(&mut self.session_id);
        tokio::spawn(async move {
            let closed = handle
                .disconnect(
                    Disconnect::ByApplication,
                    "session closed".to_string(),
                    "en".to_string(),
                )
                .await;
            if closed.is_err() {
                debug!("Transport for session {} already gone", session_id);
            }
        });
    }
}

/// The SSH decoy listener
pub struct SshDecoy {
    config: SshConfig,
    ctx: Arc<ConnectionContext>,
}

impl SshDecoy {
    /// Load the host key and prepare the transport configuration
    pub fn new(config: SshConfig, sink: Arc<dyn EventSink>) -> crate::error::Result<Self> {
        let host_key = load_host_key(&config.host_key_path)?;
        let server_config = server_config(&config, host_key);
        Ok(Self::with_server_config(config, server_config, sink))
    }

    pub fn with_server_config(
        config: SshConfig,
        server_config: ServerConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let ctx = Arc::new(ConnectionContext {
            server_config: Arc::new(server_config),
            sink,
            banner: config.banner.clone(),
            echo_input: config.echo_input,
            waits: SessionWaits::from(&config),
        });
        Self { config, ctx }
    }

    /// Bind the configured address and accept forever
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind SSH decoy on {}", addr))?;

        info!("SSH decoy listening on {}", addr);
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let ctx = self.ctx.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer_addr, ctx).await;
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Drive one client connection to completion
async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<ConnectionContext>) {
    let session = DecoySession::new(peer, ctx.sink.clone());
    let recorder = session.recorder();
    let shell_ready = session.shell_ready();
    recorder.record(Event::connection(peer));

    let session = Arc::new(Mutex::new(session));
    let (channel_tx, channel_rx) = oneshot::channel::<Channel<russh::server::Msg>>();
    let handler = SshHandler::new(session.clone(), channel_tx);

    // Identification exchange counts against the channel wait
    let handshake = russh::server::run_stream(ctx.server_config.clone(), stream, handler);
    let running = match timeout(ctx.waits.channel, handshake).await {
        Ok(Ok(running)) => running,
        Ok(Err(e)) => {
            recorder.record_error(&e.to_string());
            session.lock().close();
            return;
        }
        Err(_) => {
            debug!("No SSH identification from {} within {:?}", peer, ctx.waits.channel);
            session.lock().close();
            return;
        }
    };

    let _transport = TransportGuard {
        handle: running.handle(),
        session_id: recorder.session_id().to_string(),
    };
    let session_id = recorder.session_id().to_string();
    tokio::spawn(async move {
        if let Err(e) = running.await {
            debug!("Transport for session {} ended: {}", session_id, e);
        }
    });

    let channel = async move {
        channel_rx
            .await
            .ok()
            .map(|channel| Box::pin(channel.into_stream()))
    };
    let shell = Shell::new(recorder.clone(), ctx.banner.clone(), ctx.echo_input);
    let outcome = serve_channel(&session, channel, shell_ready, ctx.waits, &shell).await;

    debug!(
        "Session {} from {} finished: {:?}",
        recorder.session_id(),
        peer,
        outcome
    );
}

/// Wait for a session channel and a shell request, then run the shell.
/// The session is closed on every path out.
pub async fn serve_channel<S, F>(
    session: &Mutex<DecoySession>,
    channel: F,
    shell_ready: Arc<Notify>,
    waits: SessionWaits,
    shell: &Shell,
) -> SessionOutcome
where
    F: Future<Output = Option<S>>,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = match timeout(waits.channel, channel).await {
        Ok(Some(stream)) => stream,
        Ok(None) | Err(_) => {
            session.lock().close();
            return SessionOutcome::NoChannel;
        }
    };

    if timeout(waits.shell, shell_ready.notified()).await.is_err() {
        session.lock().close();
        return SessionOutcome::NoShell;
    }

    let exit = shell.run(&mut stream).await;
    if exit != ShellExit::Eof {
        let _ = stream.shutdown().await;
    }
    session.lock().close();
    SessionOutcome::Shell(exit)
}

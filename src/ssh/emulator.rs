//! Per-connection SSH session state machine
//!
//! ```text
//! AwaitAuth ──authenticate──▶ AwaitChannel ──open_channel("session")──▶ AwaitShellRequest
//!                                                                            │
//!                                       Closed ◀──exit / EOF / error── ShellActive ◀──request_shell
//! ```
//!
//! Authentication is never granted. Every attempt is written to the event
//! log before the denial goes back to the transport.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::event_log::EventSink;
use crate::models::{AuthMethod, Event, EventType};

/// Methods advertised to every client, to collect as much as possible
pub const ALLOWED_METHODS: &[AuthMethod] = &[AuthMethod::Password, AuthMethod::Publickey];

/// Lifecycle of one decoy session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitAuth,
    AwaitChannel,
    AwaitShellRequest,
    ShellActive,
    Closed,
}

/// Credential material presented by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    PublicKey { key_type: String, fingerprint: String },
}

impl Credential {
    pub fn method(&self) -> AuthMethod {
        match self {
            Credential::Password(_) => AuthMethod::Password,
            Credential::PublicKey { .. } => AuthMethod::Publickey,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelDecision {
    Accept,
    /// Refused with SSH_OPEN_ADMINISTRATIVELY_PROHIBITED
    Prohibited,
}

/// Terminal parameters from a pty-req
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

/// Capabilities a transport asks of a server-side session
pub trait SessionHandler {
    fn authenticate(&mut self, username: &str, credential: Credential) -> AuthDecision;

    fn list_allowed_methods(&self, username: &str) -> &'static [AuthMethod];

    fn open_channel(&mut self, kind: &str) -> ChannelDecision;

    fn request_pty(&mut self, request: &PtyRequest) -> bool;

    fn request_shell(&mut self) -> bool;
}

/// Stamps events with the session's identity before handing them to the sink
#[derive(Clone)]
pub struct SessionRecorder {
    session_id: String,
    peer: SocketAddr,
    sink: Arc<dyn EventSink>,
}

impl SessionRecorder {
    pub fn new(peer: SocketAddr, sink: Arc<dyn EventSink>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            peer,
            sink,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write an event tagged with this session's id and client address
    pub fn record(&self, mut event: Event) {
        event.session_id = Some(self.session_id.clone());
        if event.src_ip.is_none() {
            event.src_ip = Some(self.peer.ip().to_string());
        }
        self.sink.record(&event);
    }

    pub fn record_error(&self, message: &str) {
        self.record(Event::new(EventType::Error).with_message(message));
    }
}

/// The decoy's server-side session
pub struct DecoySession {
    recorder: SessionRecorder,
    state: SessionState,
    auth_attempts: u32,
    pty: Option<PtyRequest>,
    shell_ready: Arc<Notify>,
}

impl DecoySession {
    pub fn new(peer: SocketAddr, sink: Arc<dyn EventSink>) -> Self {
        Self {
            recorder: SessionRecorder::new(peer, sink),
            state: SessionState::AwaitAuth,
            auth_attempts: 0,
            pty: None,
            shell_ready: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn recorder(&self) -> SessionRecorder {
        self.recorder.clone()
    }

    pub fn auth_attempts(&self) -> u32 {
        self.auth_attempts
    }

    pub fn pty(&self) -> Option<&PtyRequest> {
        self.pty.as_ref()
    }

    /// Signalled once when the client requests a shell
    pub fn shell_ready(&self) -> Arc<Notify> {
        self.shell_ready.clone()
    }

    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            debug!(
                "Session {} closed in state {:?}",
                self.recorder.session_id(),
                self.state
            );
        }
        self.state = SessionState::Closed;
    }
}

impl SessionHandler for DecoySession {
    fn authenticate(&mut self, username: &str, credential: Credential) -> AuthDecision {
        let mut event = Event::new(EventType::LoginAttempt);
        event.username = Some(username.to_string());
        event.auth_method = Some(credential.method());
        match credential {
            Credential::Password(password) => event.password = Some(password),
            Credential::PublicKey {
                key_type,
                fingerprint,
            } => {
                event.key_type = Some(key_type);
                event.key_fingerprint = Some(fingerprint);
            }
        }
        self.recorder.record(event);

        self.auth_attempts += 1;
        if self.state == SessionState::AwaitAuth {
            self.state = SessionState::AwaitChannel;
        }
        AuthDecision::Reject
    }

    fn list_allowed_methods(&self, _username: &str) -> &'static [AuthMethod] {
        ALLOWED_METHODS
    }

    fn open_channel(&mut self, kind: &str) -> ChannelDecision {
        let open = matches!(
            self.state,
            SessionState::AwaitAuth | SessionState::AwaitChannel
        );
        if kind == "session" && open {
            self.state = SessionState::AwaitShellRequest;
            ChannelDecision::Accept
        } else {
            debug!(
                "Refusing {} channel for session {} in state {:?}",
                kind,
                self.recorder.session_id(),
                self.state
            );
            ChannelDecision::Prohibited
        }
    }

    fn request_pty(&mut self, request: &PtyRequest) -> bool {
        if self.state != SessionState::AwaitShellRequest {
            return false;
        }
        self.pty = Some(request.clone());
        true
    }

    fn request_shell(&mut self) -> bool {
        if self.state != SessionState::AwaitShellRequest {
            return false;
        }
        self.state = SessionState::ShellActive;
        self.shell_ready.notify_one();
        true
    }
}

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Discriminator shared by every event the suite writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Connection,
    LoginAttempt,
    Command,
    FtpCommand,
    FtpLoginAttempt,
    FtpActivity,
    ConnectionAccept,
    ConnectionClose,
    Error,
    NoActivity,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Connection => "connection",
            EventType::LoginAttempt => "login_attempt",
            EventType::Command => "command",
            EventType::FtpCommand => "ftp_command",
            EventType::FtpLoginAttempt => "ftp_login_attempt",
            EventType::FtpActivity => "ftp_activity",
            EventType::ConnectionAccept => "connection_accept",
            EventType::ConnectionClose => "connection_close",
            EventType::Error => "error",
            EventType::NoActivity => "no_activity",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Authentication method offered by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Password,
    Publickey,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Password => write!(f, "password"),
            AuthMethod::Publickey => write!(f, "publickey"),
        }
    }
}

/// Render a UTC instant the way every event log labels it
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A captured session event as written to a protocol event log.
///
/// Fields that do not apply to an event type are left out of the JSON line,
/// so lines in one log have different shapes. The normalizer reconciles them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: String,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<AuthMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Self {
            timestamp: iso_timestamp(Utc::now()),
            event_type,
            session_id: None,
            src_ip: None,
            src_port: None,
            username: None,
            password: None,
            auth_method: None,
            key_type: None,
            key_fingerprint: None,
            command: None,
            message: None,
        }
    }

    /// Connection accepted from a peer
    pub fn connection(peer: SocketAddr) -> Self {
        Self::new(EventType::Connection).with_peer(peer)
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.src_ip = Some(peer.ip().to_string());
        self.src_port = Some(peer.port());
        self
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.command = Some(command.to_string());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Serialize as a single JSON line (no trailing newline)
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

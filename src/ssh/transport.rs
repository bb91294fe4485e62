//! russh server adapter
//!
//! Translates russh's handler callbacks into [`SessionHandler`] calls on the
//! shared [`DecoySession`]. The accepted session channel is handed to the
//! connection task through a oneshot.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use russh::server::{Auth, Config as ServerConfig, Handler, Msg, Session};
use russh::{Channel, ChannelId, MethodSet, Pty, SshId};
use russh_keys::key::{KeyPair, PublicKey};
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::emulator::{
    AuthDecision, ChannelDecision, Credential, DecoySession, PtyRequest, SessionHandler,
    ALLOWED_METHODS,
};
use crate::config::SshConfig;
use crate::error::{DecoyError, Result};
use crate::models::AuthMethod;

/// Load the persistent host key so every connection sees the same identity
pub fn load_host_key<P: AsRef<Path>>(path: P) -> Result<KeyPair> {
    let path = path.as_ref();
    let key = russh_keys::load_secret_key(path, None)
        .map_err(|e| DecoyError::HostKey(format!("{}: {}", path.display(), e)))?;
    info!("Loaded {} host key from {}", key.name(), path.display());
    Ok(key)
}

/// Build the russh server configuration
pub fn server_config(ssh: &SshConfig, host_key: KeyPair) -> ServerConfig {
    ServerConfig {
        server_id: SshId::Standard(ssh.server_id.clone()),
        methods: method_set(ALLOWED_METHODS),
        keys: vec![host_key],
        auth_rejection_time: Duration::from_secs(1),
        ..Default::default()
    }
}

fn method_set(methods: &[AuthMethod]) -> MethodSet {
    let mut set = MethodSet::empty();
    for method in methods {
        set |= match method {
            AuthMethod::Password => MethodSet::PASSWORD,
            AuthMethod::Publickey => MethodSet::PUBLICKEY,
        };
    }
    set
}

pub struct SshHandler {
    session: Arc<Mutex<DecoySession>>,
    channel_tx: Option<oneshot::Sender<Channel<Msg>>>,
}

impl SshHandler {
    pub fn new(
        session: Arc<Mutex<DecoySession>>,
        channel_tx: oneshot::Sender<Channel<Msg>>,
    ) -> Self {
        Self {
            session,
            channel_tx: Some(channel_tx),
        }
    }

    fn attempt(&self, user: &str, credential: Credential) -> Auth {
        let mut session = self.session.lock();
        let allowed = session.list_allowed_methods(user);
        match session.authenticate(user, credential) {
            AuthDecision::Accept => Auth::Accept,
            AuthDecision::Reject => Auth::Reject {
                proceed_with_methods: Some(method_set(allowed)),
            },
        }
    }
}

#[async_trait]
impl Handler for SshHandler {
    type Error = DecoyError;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth> {
        Ok(self.attempt(user, Credential::Password(password.to_string())))
    }

    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth> {
        let credential = Credential::PublicKey {
            key_type: public_key.name().to_string(),
            fingerprint: public_key.fingerprint(),
        };
        Ok(self.attempt(user, credential))
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool> {
        let decision = self.session.lock().open_channel("session");
        if decision != ChannelDecision::Accept {
            return Ok(false);
        }
        match self.channel_tx.take() {
            Some(tx) => Ok(tx.send(channel).is_ok()),
            None => Ok(false),
        }
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool> {
        debug!("direct-tcpip to {}:{} requested", host_to_connect, port_to_connect);
        let decision = self.session.lock().open_channel("direct-tcpip");
        Ok(decision == ChannelDecision::Accept)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<()> {
        let request = PtyRequest {
            term: term.to_string(),
            cols: col_width,
            rows: row_height,
        };
        let granted = self.session.lock().request_pty(&request);
        reply(session, channel, granted);
        Ok(())
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<()> {
        let granted = self.session.lock().request_shell();
        reply(session, channel, granted);
        Ok(())
    }
}

fn reply(session: &mut Session, channel: ChannelId, granted: bool) {
    if granted {
        session.channel_success(channel);
    } else {
        session.channel_failure(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::MemorySink;
    use crate::models::EventType;
    use std::net::SocketAddr;

    fn handler() -> (SshHandler, Arc<MemorySink>, oneshot::Receiver<Channel<Msg>>) {
        let sink = Arc::new(MemorySink::default());
        let peer: SocketAddr = "192.0.2.44:60000".parse().unwrap();
        let session = Arc::new(Mutex::new(DecoySession::new(peer, sink.clone())));
        let (tx, rx) = oneshot::channel();
        (SshHandler::new(session, tx), sink, rx)
    }

    #[test]
    fn test_method_set_covers_both_methods() {
        let set = method_set(ALLOWED_METHODS);
        assert!(set.contains(MethodSet::PASSWORD));
        assert!(set.contains(MethodSet::PUBLICKEY));
        assert!(!set.contains(MethodSet::KEYBOARD_INTERACTIVE));
    }

    #[tokio::test]
    async fn test_password_auth_is_rejected_and_logged() {
        let (mut handler, sink, _rx) = handler();

        let auth = handler.auth_password("root", "123456").await.unwrap();
        assert!(matches!(auth, Auth::Reject { proceed_with_methods: Some(_) }));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::LoginAttempt);
        assert_eq!(events[0].password.as_deref(), Some("123456"));
    }

    #[test]
    fn test_missing_host_key_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = load_host_key(dir.path().join("missing_key")).unwrap_err();
        assert!(matches!(err, DecoyError::HostKey(_)));
    }
}

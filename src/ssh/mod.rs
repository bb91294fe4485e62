//! SSH decoy
//!
//! Speaks enough SSH to capture credentials and commands from automated
//! clients without ever granting access.
//!
//! ```text
//! TcpListener ──accept──▶ handle_connection ──run_stream──▶ SshHandler (russh)
//!                               │                                │
//!                               │◀── session channel (oneshot) ──┤
//!                               │                                ▼
//!                               └──────▶ Shell ◀──────────── DecoySession
//! ```

pub mod acceptor;
pub mod emulator;
pub mod shell;
pub mod transport;

pub use acceptor::{serve_channel, SessionOutcome, SessionWaits, SshDecoy};
pub use emulator::{
    AuthDecision, ChannelDecision, Credential, DecoySession, PtyRequest, SessionHandler,
    SessionRecorder, SessionState, ALLOWED_METHODS,
};
pub use shell::{respond, Reply, Shell, ShellExit};
pub use transport::{load_host_key, server_config, SshHandler};

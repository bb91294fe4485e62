//! Fake interactive shell
//!
//! Runs over any byte stream once the client has a session channel and has
//! asked for a shell. Input is read one byte at a time and assembled into
//! lines. Every non-empty line is logged as a `command` event and answered
//! from a small canned vocabulary. Nothing is ever executed.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::emulator::SessionRecorder;
use crate::error::{DecoyError, Result};
use crate::models::{Event, EventType};

const PROMPT: &[u8] = b"$ ";
const ERASE: &[u8] = b"\x08 \x08";

/// What the shell says back to one command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Text(&'static str),
    Exit,
}

/// Canned reply for a trimmed command line
pub fn respond(command: &str) -> Reply {
    match command {
        "exit" | "logout" => Reply::Exit,
        "ls" => Reply::Text("Desktop  Documents  Downloads  Pictures"),
        "whoami" => Reply::Text("root"),
        "pwd" => Reply::Text("/root"),
        "id" => Reply::Text("uid=0(root) gid=0(root) groups=0(root)"),
        "uname" => Reply::Text("Linux"),
        "hostname" => Reply::Text("ubuntu-server"),
        cmd if cmd.starts_with("cat") => Reply::Text("Permission denied"),
        _ => Reply::Text("command not found"),
    }
}

/// How a shell loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellExit {
    /// Client typed `exit`
    Exit,
    /// Client closed its side
    Eof,
    /// Transport failed; an error event was recorded
    Failed(String),
}

pub struct Shell {
    recorder: SessionRecorder,
    banner: String,
    echo_input: bool,
}

impl Shell {
    pub fn new(recorder: SessionRecorder, banner: impl Into<String>, echo_input: bool) -> Self {
        Self {
            recorder,
            banner: banner.into(),
            echo_input,
        }
    }

    /// Drive the shell until exit, EOF, or a transport failure
    pub async fn run<S>(&self, stream: &mut S) -> ShellExit
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.drive(stream).await {
            Ok(exit) => exit,
            Err(e) => {
                let message = e.to_string();
                debug!("Shell for session {} failed: {}", self.recorder.session_id(), message);
                self.recorder.record_error(&message);
                ShellExit::Failed(message)
            }
        }
    }

    async fn drive<S>(&self, stream: &mut S) -> Result<ShellExit>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let greeting = format!("{}\r\n\r\n", self.banner);
        send(stream, greeting.as_bytes()).await?;
        send(stream, PROMPT).await?;

        let mut line: Vec<u8> = Vec::new();
        let mut byte = [0u8; 1];
        let mut after_cr = false;

        loop {
            let n = stream.read(&mut byte).await.map_err(transport)?;
            if n == 0 {
                return Ok(ShellExit::Eof);
            }

            match byte[0] {
                // CRLF counts as one terminator
                b'\n' if after_cr => after_cr = false,
                b @ (b'\r' | b'\n') => {
                    after_cr = b == b'\r';
                    let command = String::from_utf8_lossy(&line).trim().to_string();
                    line.clear();

                    if !command.is_empty() {
                        self.recorder
                            .record(Event::new(EventType::Command).with_command(&command));
                        match respond(&command) {
                            Reply::Exit => return Ok(ShellExit::Exit),
                            Reply::Text(text) => {
                                let out = format!("\r\n{}\r\n", text);
                                send(stream, out.as_bytes()).await?;
                            }
                        }
                    }
                    send(stream, PROMPT).await?;
                }
                0x08 | 0x7f => {
                    after_cr = false;
                    if line.pop().is_some() && self.echo_input {
                        send(stream, ERASE).await?;
                    }
                }
                b => {
                    after_cr = false;
                    line.push(b);
                    if self.echo_input && !b.is_ascii_control() {
                        send(stream, &[b]).await?;
                    }
                }
            }
        }
    }
}

async fn send<S: AsyncWrite + Unpin>(stream: &mut S, bytes: &[u8]) -> Result<()> {
    stream.write_all(bytes).await.map_err(transport)?;
    stream.flush().await.map_err(transport)
}

fn transport(e: std::io::Error) -> DecoyError {
    DecoyError::Transport(e.to_string())
}

//! FTP decoy log parser and correlator
//!
//! Converts the external FTP decoy's unstructured text log into
//! connection-correlated JSON events:
//!
//! ```text
//! raw text log → FtpLineParser (per line) → correlate_lines (per pass) → NDJSON
//! ```
//!
//! # Example
//!
//! ```ignore
//! use hivetrap::ftp::{parse_log, FtpLineParser, TimestampFormat};
//!
//! let parser = FtpLineParser::new(TimestampFormat::Auto);
//! for event in parse_log(&parser, "/opt/dionaea/var/log/dionaea/dionaea.log") {
//!     println!("{} {:?}", event.event_type, event.username);
//! }
//! ```

pub mod correlator;
pub mod parser;

pub use correlator::{correlate_lines, parse_log, parse_reader, CredentialMap, Credentials};
pub use parser::{FtpLineParser, ParsedLine, TimestampFormat, FTP_VERBS};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::models::{iso_timestamp, EventType};

/// One correlated FTP event. Every field is always present so the
/// parsed stream has a fixed shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtpEvent {
    pub timestamp: String,
    pub event_type: EventType,
    pub protocol: String,
    pub component: Option<String>,
    pub connection_id: Option<String>,
    pub src_ip: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub command: Option<String>,
    pub message: Option<String>,
    pub count: u32,
}

impl FtpEvent {
    fn from_line(
        parsed: ParsedLine,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            timestamp: parsed.timestamp,
            event_type: parsed.event_type,
            protocol: "ftp".to_string(),
            component: Some(parsed.component),
            connection_id: parsed.connection_id,
            src_ip: parsed.src_ip,
            username,
            password,
            command: parsed.command,
            message: Some(parsed.raw),
            count: 1,
        }
    }

    /// Placeholder emitted when a pass finds nothing
    pub fn no_activity() -> Self {
        Self {
            timestamp: iso_timestamp(Utc::now()),
            event_type: EventType::NoActivity,
            protocol: "ftp".to_string(),
            component: None,
            connection_id: None,
            src_ip: None,
            username: None,
            password: None,
            command: None,
            message: Some("No FTP activity detected yet".to_string()),
            count: 0,
        }
    }
}

/// Write events as newline-delimited JSON, replacing the file
pub fn write_ndjson<P: AsRef<Path>>(path: P, events: &[FtpEvent]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut out = Vec::new();
    for event in events {
        serde_json::to_writer(&mut out, event)?;
        out.push(b'\n');
    }

    let mut file = std::fs::File::create(path)?;
    file.write_all(&out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_placeholder_shape() {
        let value = serde_json::to_value(FtpEvent::no_activity()).unwrap();
        assert_eq!(value["event_type"], "no_activity");
        assert_eq!(value["count"], 0);
        assert!(value["username"].is_null());
        assert!(value.as_object().unwrap().contains_key("password"));
    }

    #[test]
    fn test_write_ndjson_in_source_order() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("dionaea").join("ftp_parsed.json");
        let parser = FtpLineParser::default();
        let events = correlate_lines(
            &parser,
            [
                "[02122025 11:53:15] ftp con 0x9 USER root",
                "[02122025 11:53:16] ftp con 0x9 QUIT",
            ],
            &mut CredentialMap::new(),
        );

        write_ndjson(&out, &events).unwrap();

        let content = std::fs::read_to_string(&out).unwrap();
        let parsed: Vec<FtpEvent> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed, events);
        assert_eq!(parsed[1].command.as_deref(), Some("QUIT"));
        assert_eq!(parsed[1].username.as_deref(), Some("root"));
    }
}

//! Connection-keyed credential correlation
//!
//! USER and PASS for one login show up on separate lines that share only the
//! `con 0x..` token. A [`CredentialMap`] is built fresh for every parse pass
//! and handed to [`correlate_lines`] explicitly, so results never leak
//! between passes. Matching is exact equality on the identifier.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, warn};

use super::parser::FtpLineParser;
use super::FtpEvent;

/// Last known credentials for one connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Connection identifier to most recently seen credentials
#[derive(Debug, Default)]
pub struct CredentialMap {
    by_connection: HashMap<String, Credentials>,
}

impl CredentialMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the values seen on one line into the map and return the
    /// connection's credentials as they stand now
    pub fn observe(
        &mut self,
        connection_id: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Credentials {
        let entry = self
            .by_connection
            .entry(connection_id.to_string())
            .or_default();
        if let Some(username) = username {
            entry.username = Some(username.to_string());
        }
        if let Some(password) = password {
            entry.password = Some(password.to_string());
        }
        entry.clone()
    }

    pub fn get(&self, connection_id: &str) -> Option<&Credentials> {
        self.by_connection.get(connection_id)
    }

    pub fn len(&self) -> usize {
        self.by_connection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }
}

/// Turn raw lines into events, stamping each with its connection's
/// credentials at the moment it is emitted
pub fn correlate_lines<I, S>(
    parser: &FtpLineParser,
    lines: I,
    credentials: &mut CredentialMap,
) -> Vec<FtpEvent>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut events = Vec::new();

    for line in lines {
        let Some(parsed) = parser.parse_line(line.as_ref()) else {
            continue;
        };

        let (username, password) = match parsed.connection_id.as_deref() {
            Some(id) => {
                let current =
                    credentials.observe(id, parsed.username.as_deref(), parsed.password.as_deref());
                (current.username, current.password)
            }
            None => (parsed.username.clone(), parsed.password.clone()),
        };

        events.push(FtpEvent::from_line(parsed, username, password));
    }

    events
}

/// One full pass over a reader. Never returns an empty batch.
pub fn parse_reader<R: BufRead>(parser: &FtpLineParser, reader: R) -> Vec<FtpEvent> {
    let mut lines = Vec::new();
    for chunk in reader.split(b'\n') {
        match chunk {
            Ok(bytes) => lines.push(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                warn!("Stopped reading FTP log early: {}", e);
                break;
            }
        }
    }

    let mut credentials = CredentialMap::new();
    let mut events = correlate_lines(parser, &lines, &mut credentials);
    debug!(
        "Parsed {} FTP events from {} lines ({} connections)",
        events.len(),
        lines.len(),
        credentials.len()
    );

    if events.is_empty() {
        events.push(FtpEvent::no_activity());
    }
    events
}

/// One full pass over the raw log file. A missing file is empty input.
pub fn parse_log<P: AsRef<Path>>(parser: &FtpLineParser, path: P) -> Vec<FtpEvent> {
    let path = path.as_ref();
    match File::open(path) {
        Ok(file) => parse_reader(parser, BufReader::new(file)),
        Err(e) => {
            debug!("FTP log {} unavailable ({}), treating as empty", path.display(), e);
            parse_reader(parser, std::io::empty())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_username_carries_to_password_line() {
        let parser = FtpLineParser::default();
        let lines = [
            r#"[02122025 11:53:15] ftp con 0x1a "USER admin""#,
            r#"[02122025 11:53:16] ftp con 0x2b "LIST""#,
            r#"[02122025 11:53:17] ftp con 0x1a "PASS secret""#,
        ];

        let mut credentials = CredentialMap::new();
        let events = correlate_lines(&parser, lines, &mut credentials);
        assert_eq!(events.len(), 3);

        assert_eq!(events[0].username.as_deref(), Some("admin"));
        assert_eq!(events[0].password, None);

        assert_eq!(events[1].connection_id.as_deref(), Some("0x2b"));
        assert_eq!(events[1].username, None);
        assert_eq!(events[1].password, None);

        assert_eq!(events[2].username.as_deref(), Some("admin"));
        assert_eq!(events[2].password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_later_updates_do_not_rewrite_earlier_events() {
        let parser = FtpLineParser::default();
        let lines = [
            "[02122025 11:53:15] ftp con 0x1a USER first",
            "[02122025 11:53:16] ftp con 0x1a USER second",
        ];

        let mut credentials = CredentialMap::new();
        let events = correlate_lines(&parser, lines, &mut credentials);
        assert_eq!(events[0].username.as_deref(), Some("first"));
        assert_eq!(events[1].username.as_deref(), Some("second"));
        assert_eq!(
            credentials.get("0x1a").and_then(|c| c.username.as_deref()),
            Some("second")
        );
    }

    #[test]
    fn test_identifier_match_is_exact() {
        let parser = FtpLineParser::default();
        let lines = [
            "[02122025 11:53:15] ftp con 0x1a USER admin",
            "[02122025 11:53:16] ftp con 0x1a0 LIST",
        ];

        let mut credentials = CredentialMap::new();
        let events = correlate_lines(&parser, lines, &mut credentials);
        assert_eq!(events[1].username, None);
    }

    #[test]
    fn test_identifier_case_is_significant() {
        let parser = FtpLineParser::default();
        let lines = [
            "[02122025 11:53:15] ftp con 0x1A USER admin",
            "[02122025 11:53:16] ftp con 0x1a LIST",
        ];

        let mut credentials = CredentialMap::new();
        let events = correlate_lines(&parser, lines, &mut credentials);
        assert_eq!(events[0].connection_id.as_deref(), Some("0x1A"));
        assert_eq!(events[1].connection_id.as_deref(), Some("0x1a"));
        assert_eq!(events[1].username, None);
        assert_eq!(credentials.len(), 2);
    }

    #[test]
    fn test_lines_without_identifier_keep_own_values() {
        let parser = FtpLineParser::default();
        let lines = ["[02122025 11:53:15] ftp USER loner"];

        let mut credentials = CredentialMap::new();
        let events = correlate_lines(&parser, lines, &mut credentials);
        assert_eq!(events[0].username.as_deref(), Some("loner"));
        assert!(credentials.is_empty());
    }

    #[test]
    fn test_no_parseable_lines_yields_placeholder() {
        let parser = FtpLineParser::default();
        let input = "garbage\n[notatime] ftp\nsmb noise\n";

        let events = parse_reader(&parser, Cursor::new(input));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::NoActivity);
        assert_eq!(events[0].count, 0);
    }

    #[test]
    fn test_bad_lines_do_not_stop_the_pass() {
        let parser = FtpLineParser::default();
        let mut input = b"[02122025 11:53:15] ftp con 0x1 USER a\n".to_vec();
        input.extend_from_slice(b"\xff\xfe broken bytes\n");
        input.extend_from_slice(b"[02122025 11:53:16] ftp con 0x1 PASS b\n");

        let events = parse_reader(&parser, Cursor::new(input));
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].username.as_deref(), Some("a"));
        assert_eq!(events[1].password.as_deref(), Some("b"));
    }

    #[test]
    fn test_missing_file_is_empty_input() {
        let dir = TempDir::new().unwrap();
        let parser = FtpLineParser::default();

        let events = parse_log(&parser, dir.path().join("absent.log"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::NoActivity);
    }

    #[test]
    fn test_each_pass_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dionaea.log");
        let parser = FtpLineParser::default();

        std::fs::write(&path, "[02122025 11:53:15] ftp con 0x1 USER admin\n").unwrap();
        let first = parse_log(&parser, &path);
        assert_eq!(first[0].username.as_deref(), Some("admin"));

        std::fs::write(&path, "[02122025 11:54:15] ftp con 0x1 LIST\n").unwrap();
        let second = parse_log(&parser, &path);
        assert_eq!(second[0].username, None);
    }
}

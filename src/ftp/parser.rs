//! Line-level extraction for raw FTP decoy logs
//!
//! The external FTP decoy writes free-form debug lines such as
//!
//! ```text
//! [02122025 11:53:15] ftp /dionaea/ftp.py:214-debug: con 0x7f3a b'USER anonymous\r\n'
//! ```
//!
//! Nothing frames a logical event: the username and password of one login
//! usually arrive on different lines. This module only pulls the facts out of
//! a single line; joining lines is the correlator's job.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::models::EventType;

/// FTP verbs in classification precedence order
pub const FTP_VERBS: &[&str] = &[
    "USER", "PASS", "LIST", "RETR", "STOR", "DELE", "MKD", "RMD", "CWD", "PWD", "SYST", "QUIT",
];

const MONTHS: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Bracketed timestamp encodings seen in decoy logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampFormat {
    /// `[MMDDYYYY HH:MM:SS]` first, then `[DDMonYYYY HH:MM:SS]`
    #[default]
    Auto,
    /// `[MMDDYYYY HH:MM:SS]` only
    Numeric,
    /// `[DDMonYYYY HH:MM:SS]` only
    Abbreviated,
}

/// Facts pulled from one raw line, before correlation
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    /// ISO-8601 shaped, `Z` suffix is a label only (no zone conversion)
    pub timestamp: String,
    pub event_type: EventType,
    pub component: String,
    pub connection_id: Option<String>,
    pub src_ip: Option<String>,
    pub command: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub raw: String,
}

/// Outcome of keyword classification
#[derive(Debug, Clone, PartialEq)]
struct Classification {
    event_type: EventType,
    command: Option<&'static str>,
    username: Option<String>,
    password: Option<String>,
}

impl Classification {
    fn bare(event_type: EventType) -> Self {
        Self {
            event_type,
            command: None,
            username: None,
            password: None,
        }
    }
}

/// Parser for single lines of the raw FTP decoy log
pub struct FtpLineParser {
    format: TimestampFormat,
    numeric_ts: Regex,
    abbreviated_ts: Regex,
    component: Regex,
    connection: Regex,
    ipv4: Regex,
    verb: Regex,
    user_arg: Regex,
    pass_arg: Regex,
}

impl FtpLineParser {
    pub fn new(format: TimestampFormat) -> Self {
        let verbs = FTP_VERBS.join("|");

        Self {
            format,
            numeric_ts: Regex::new(r"\[(\d{2})(\d{2})(\d{4})\s+(\d{2}):(\d{2}):(\d{2})\]")
                .expect("numeric timestamp regex"),
            abbreviated_ts: Regex::new(
                r"\[(\d{2})([A-Za-z]{3})(\d{4})\s+(\d{2}):(\d{2}):(\d{2})\]",
            )
            .expect("abbreviated timestamp regex"),
            component: Regex::new(r"\]\s+(\w+)\s+").expect("component regex"),
            connection: Regex::new(r"\bcon\s+(0x[0-9a-fA-F]+)").expect("connection regex"),
            ipv4: Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})\b").expect("ipv4 regex"),
            verb: Regex::new(&format!(r"\b({})\b", verbs)).expect("verb regex"),
            user_arg: Regex::new(r#"\bUSER\s+([^\r\n'"\\]+)"#).expect("USER argument regex"),
            pass_arg: Regex::new(r#"\bPASS\s+([^\r\n'"\\]+)"#).expect("PASS argument regex"),
        }
    }

    pub fn format(&self) -> TimestampFormat {
        self.format
    }

    /// Parse one line. `None` means the line is skipped.
    pub fn parse_line(&self, line: &str) -> Option<ParsedLine> {
        let timestamp = self.parse_timestamp(line)?;
        let class = self.classify(line)?;

        let component = self
            .component
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let connection_id = self
            .connection
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        let src_ip = self
            .ipv4
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        Some(ParsedLine {
            timestamp,
            event_type: class.event_type,
            component,
            connection_id,
            src_ip,
            command: class.command.map(String::from),
            username: class.username,
            password: class.password,
            raw: line.trim().to_string(),
        })
    }

    /// Extract the bracketed timestamp and relabel it as `YYYY-MM-DDTHH:MM:SSZ`
    pub fn parse_timestamp(&self, line: &str) -> Option<String> {
        let parsed = match self.format {
            TimestampFormat::Numeric => self.numeric(line),
            TimestampFormat::Abbreviated => self.abbreviated(line),
            TimestampFormat::Auto => self.numeric(line).or_else(|| self.abbreviated(line)),
        }?;
        Some(parsed.format("%Y-%m-%dT%H:%M:%SZ").to_string())
    }

    fn numeric(&self, line: &str) -> Option<NaiveDateTime> {
        let caps = self.numeric_ts.captures(line)?;
        let month: u32 = caps[1].parse().ok()?;
        let day: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        Some(date.and_time(time_of_day(&caps)?))
    }

    fn abbreviated(&self, line: &str) -> Option<NaiveDateTime> {
        let caps = self.abbreviated_ts.captures(line)?;
        let day: u32 = caps[1].parse().ok()?;
        let month_name = caps[2].to_ascii_lowercase();
        let month = MONTHS.iter().position(|m| *m == month_name)? as u32 + 1;
        let year: i32 = caps[3].parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        Some(date.and_time(time_of_day(&caps)?))
    }

    /// Keyword precedence: FTP verbs, then a bare `ftp` mention, then
    /// connection lifecycle words. Anything else is dropped.
    fn classify(&self, line: &str) -> Option<Classification> {
        let verb = self
            .verb
            .find_iter(line)
            .filter_map(|m| FTP_VERBS.iter().position(|v| *v == m.as_str()))
            .min()
            .map(|idx| FTP_VERBS[idx]);

        if let Some(verb) = verb {
            let class = match verb {
                "USER" => match argument(&self.user_arg, line) {
                    Some(username) => Classification {
                        event_type: EventType::FtpLoginAttempt,
                        command: Some(verb),
                        username: Some(username),
                        password: None,
                    },
                    None => Classification {
                        command: Some(verb),
                        ..Classification::bare(EventType::FtpCommand)
                    },
                },
                "PASS" => match argument(&self.pass_arg, line) {
                    Some(password) => Classification {
                        event_type: EventType::FtpLoginAttempt,
                        command: Some(verb),
                        username: None,
                        password: Some(password),
                    },
                    None => Classification {
                        command: Some(verb),
                        ..Classification::bare(EventType::FtpCommand)
                    },
                },
                _ => Classification {
                    command: Some(verb),
                    ..Classification::bare(EventType::FtpCommand)
                },
            };
            return Some(class);
        }

        let lower = line.to_lowercase();
        if lower.contains("ftp") {
            return Some(Classification::bare(EventType::FtpActivity));
        }

        if lower.contains("connection") {
            let event_type = if lower.contains("accept") {
                EventType::ConnectionAccept
            } else if lower.contains("close") || lower.contains("disconnect") {
                EventType::ConnectionClose
            } else {
                EventType::Connection
            };
            return Some(Classification::bare(event_type));
        }

        None
    }
}

impl Default for FtpLineParser {
    fn default() -> Self {
        Self::new(TimestampFormat::default())
    }
}

fn time_of_day(caps: &Captures) -> Option<NaiveTime> {
    let hour: u32 = caps[4].parse().ok()?;
    let minute: u32 = caps[5].parse().ok()?;
    let second: u32 = caps[6].parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, second)
}

fn argument(regex: &Regex, line: &str) -> Option<String> {
    let value = regex.captures(line)?.get(1)?.as_str().trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

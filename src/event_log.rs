//! Append-only JSON-Lines event log
//!
//! Every protocol surface writes its captures to one NDJSON file. Sessions
//! run concurrently, so the writer holds a lock while appending and each
//! line (JSON plus newline) goes out in a single write on an `O_APPEND`
//! handle. Readers never see interleaved partial lines.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::Result;
use crate::models::Event;

/// Destination for captured events
pub trait EventSink: Send + Sync {
    /// Record one event. Failures are logged, never propagated to the session.
    fn record(&self, event: &Event);
}

/// NDJSON file writer shared by all sessions of one decoy
pub struct EventLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl EventLog {
    /// Open (or create) the log for appending
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("Event log opened at {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &Event) -> Result<String> {
        let mut line = event.to_json_line()?;
        line.push('\n');

        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        line.pop();
        Ok(line)
    }
}

impl EventSink for EventLog {
    fn record(&self, event: &Event) {
        match self.append(event) {
            Ok(line) => info!("{}", line),
            Err(e) => warn!(
                "Failed to append {} event to {}: {}",
                event.event_type,
                self.path.display(),
                e
            ),
        }
    }
}

/// In-memory sink for tests
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemorySink {
    events: Mutex<Vec<Event>>,
}

#[cfg(test)]
impl MemorySink {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

#[cfg(test)]
impl EventSink for MemorySink {
    fn record(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_lines_are_appended() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ssh").join("events.json");

        let log = EventLog::open(&path).unwrap();
        log.record(&Event::new(EventType::Connection).with_message("first"));
        log.record(&Event::new(EventType::Command).with_command("ls"));
        drop(log);

        // Reopening must not truncate
        let log = EventLog::open(&path).unwrap();
        log.record(&Event::new(EventType::Command).with_command("pwd"));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].contains("\"pwd\""));
    }

    #[test]
    fn test_concurrent_writers_keep_lines_whole() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.json");
        let log = Arc::new(EventLog::open(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let cmd = format!("worker-{}-{}", worker, "x".repeat(i * 10));
                        log.record(&Event::new(EventType::Command).with_command(&cmd));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let mut count = 0;
        for line in content.lines() {
            let parsed: Event = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.event_type, EventType::Command);
            count += 1;
        }
        assert_eq!(count, 400);
    }
}

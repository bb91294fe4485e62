use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ftp::TimestampFormat;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub ftp: FtpConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub normalizer: NormalizerConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/hivetrap/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("hivetrap/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.is_file() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Path of the SSH decoy's event log
    pub fn ssh_event_log(&self) -> PathBuf {
        self.general.log_dir.join(&self.ssh.event_log)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory holding the per-protocol event logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Address to bind
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Non-privileged port the decoy listens on
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Fixed host identity presented to every client
    #[serde(default = "default_host_key_path")]
    pub host_key_path: PathBuf,

    /// Event log file name, relative to `general.log_dir`
    #[serde(default = "default_ssh_event_log")]
    pub event_log: String,

    /// Identification string sent during version exchange
    #[serde(default = "default_server_id")]
    pub server_id: String,

    /// Banner written when the fake shell starts
    #[serde(default = "default_banner")]
    pub banner: String,

    /// Seconds to wait for the client to open a channel
    #[serde(default = "default_channel_timeout")]
    pub channel_timeout_secs: u64,

    /// Seconds to wait for a shell request once the channel is open
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,

    /// Echo typed characters back to the client
    #[serde(default = "default_true")]
    pub echo_input: bool,
}

impl SshConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.listen_addr, self.port)
            .parse()
            .with_context(|| format!("Invalid SSH listen address: {}:{}", self.listen_addr, self.port))
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_timeout_secs)
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_secs)
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_ssh_port(),
            host_key_path: default_host_key_path(),
            event_log: default_ssh_event_log(),
            server_id: default_server_id(),
            banner: default_banner(),
            channel_timeout_secs: default_channel_timeout(),
            shell_timeout_secs: default_shell_timeout(),
            echo_input: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpConfig {
    /// Raw text log written by the external FTP decoy
    #[serde(default = "default_ftp_raw_log")]
    pub raw_log_path: PathBuf,

    /// Logical path under which parsed FTP events are delivered
    #[serde(default = "default_ftp_logical_path")]
    pub logical_path: String,

    /// Accepted bracketed timestamp encoding
    #[serde(default)]
    pub timestamp_format: TimestampFormat,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            raw_log_path: default_ftp_raw_log(),
            logical_path: default_ftp_logical_path(),
            timestamp_format: TimestampFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_delivery_port")]
    pub port: u16,
}

impl DeliveryConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.listen_addr, self.port)
            .parse()
            .with_context(|| {
                format!("Invalid delivery listen address: {}:{}", self.listen_addr, self.port)
            })
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_delivery_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Maximum records held for one batch; older records beyond this are dropped
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
        }
    }
}

// Default value functions
fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/hivetrap")
}

fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_ssh_port() -> u16 {
    2222
}

fn default_host_key_path() -> PathBuf {
    PathBuf::from("/etc/hivetrap/ssh_host_ed25519_key")
}

fn default_ssh_event_log() -> String {
    "ssh_honeypot.json".to_string()
}

fn default_server_id() -> String {
    "SSH-2.0-OpenSSH_8.2p1 Ubuntu-4ubuntu0.3".to_string()
}

fn default_banner() -> String {
    "Welcome to Ubuntu 20.04.3 LTS (GNU/Linux 5.4.0-42-generic x86_64)".to_string()
}

fn default_channel_timeout() -> u64 {
    20
}

fn default_shell_timeout() -> u64 {
    10
}

fn default_ftp_raw_log() -> PathBuf {
    PathBuf::from("/opt/dionaea/var/log/dionaea/dionaea.log")
}

fn default_ftp_logical_path() -> String {
    "dionaea/ftp_parsed.json".to_string()
}

fn default_delivery_port() -> u16 {
    8080
}

fn default_max_records() -> usize {
    50_000
}

fn default_true() -> bool {
    true
}

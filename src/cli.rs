use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use hivetrap::config::Config;
use hivetrap::delivery;
use hivetrap::event_log::EventLog;
use hivetrap::ftp::{parse_log, write_ndjson, FtpLineParser};
use hivetrap::normalize::Normalizer;
use hivetrap::ssh::SshDecoy;

#[derive(Parser)]
#[command(name = "hivetrap")]
#[command(author, version, about = "Decoy services that capture attacker activity")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the SSH decoy
    Ssh,

    /// Serve normalized event logs over HTTP
    Serve,

    /// Parse the FTP decoy's text log into NDJSON events
    ParseFtp {
        /// Raw log to read (default: ftp.raw_log_path)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// File to write (default: <log_dir>/<ftp.logical_path>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print an NDJSON event log as a normalized JSON array
    Normalize {
        /// NDJSON file to normalize
        file: PathBuf,
    },

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::Ssh => cmd_ssh(config).await,
        Commands::Serve => delivery::serve(&config).await,
        Commands::ParseFtp { input, output } => cmd_parse_ftp(config, input, output),
        Commands::Normalize { file } => cmd_normalize(config, file),
        Commands::GenConfig { output } => cmd_gen_config(output),
    }
}

async fn cmd_ssh(config: Config) -> Result<()> {
    let log_path = config.ssh_event_log();
    let event_log = EventLog::open(&log_path)
        .with_context(|| format!("Failed to open event log {}", log_path.display()))?;
    info!("Recording SSH events to {}", log_path.display());

    let decoy = SshDecoy::new(config.ssh.clone(), Arc::new(event_log))?;
    decoy.run().await
}

fn cmd_parse_ftp(config: Config, input: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let input = input.unwrap_or_else(|| config.ftp.raw_log_path.clone());
    let output =
        output.unwrap_or_else(|| config.general.log_dir.join(&config.ftp.logical_path));

    let parser = FtpLineParser::new(config.ftp.timestamp_format);
    let events = parse_log(&parser, &input);
    write_ndjson(&output, &events)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Wrote {} FTP events from {} to {}",
        events.len(),
        input.display(),
        output.display()
    );
    Ok(())
}

fn cmd_normalize(config: Config, file: PathBuf) -> Result<()> {
    let bytes =
        std::fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
    let normalizer = Normalizer::new(config.normalizer.max_records);
    let rows = normalizer.normalize_ndjson(&String::from_utf8_lossy(&bytes));

    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();

    match output {
        Some(path) => {
            config.save(&path)?;
            println!("Configuration written to {}", path.display());
        }
        None => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

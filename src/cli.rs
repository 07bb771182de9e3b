use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tabled::{Table, Tabled};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use wlatency::app::{self, DryRunSummary};
use wlatency::config::{Config, PacketType, RxMode};
use wlatency::session::{CaptureCounts, SessionCommand, SessionOutcome, SessionReport};

#[derive(Parser)]
#[command(name = "wlatency")]
#[command(author, version, about = "Wi-Fi end-to-end latency measurement")]
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
    /// Run the sending endpoint
    Tx {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Run the receiving endpoint
    Rx {
        #[command(flatten)]
        overrides: Overrides,

        /// How the receiver attaches to the radio
        #[arg(long, value_enum)]
        mode: Option<RxModeArg>,
    },

    /// Run one raw session through an in-memory loopback
    DryRun {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Print the effective configuration, or write it to a file
    Config {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
pub struct Overrides {
    /// Wireless interface
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Test unit type
    #[arg(short, long, value_enum)]
    pub packet: Option<PacketArg>,

    /// Session duration in milliseconds
    #[arg(long)]
    pub duration: Option<u64>,

    /// Inter-packet interval in milliseconds
    #[arg(long)]
    pub interval: Option<u64>,

    /// Wireless channel for raw roles
    #[arg(long)]
    pub channel: Option<u8>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum PacketArg {
    Raw,
    Udp,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RxModeArg {
    Monitor,
    Promiscuous,
    SoftAp,
    Station,
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if let Some(interface) = &self.interface {
            config.general.interface = Some(interface.clone());
        }
        if let Some(packet) = self.packet {
            config.general.packet_type = match packet {
                PacketArg::Raw => PacketType::Raw,
                PacketArg::Udp => PacketType::Udp,
            };
        }
        if let Some(duration) = self.duration {
            config.test.duration_ms = duration;
        }
        if let Some(interval) = self.interval {
            config.test.interval_ms = interval;
        }
        if let Some(channel) = self.channel {
            config.raw.channel = channel;
        }
    }
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::Tx { overrides } => cmd_tx(config, overrides).await,
        Commands::Rx { overrides, mode } => cmd_rx(config, overrides, mode).await,
        Commands::DryRun { overrides } => cmd_dry_run(config, overrides).await,
        Commands::Config { output } => cmd_config(config, output),
    }
}

async fn cmd_tx(mut config: Config, overrides: Overrides) -> Result<()> {
    overrides.apply(&mut config);
    config.validate()?;

    let (tx, rx) = mpsc::channel(8);
    spawn_command_sources(tx);

    println!(
        "{} {:?} units every {} ms for {} ms (Enter = start, 'stop' = stop, 'quit' = exit)",
        "Sending".green().bold(),
        config.general.packet_type,
        config.test.interval_ms,
        config.test.duration_ms
    );
    let report = app::run_tx(&config, rx).await.context("Sender failed")?;
    match report {
        Some(report) => print_report(&report),
        None => println!("{}", "No session ran".yellow()),
    }
    Ok(())
}

async fn cmd_rx(mut config: Config, overrides: Overrides, mode: Option<RxModeArg>) -> Result<()> {
    overrides.apply(&mut config);
    if let Some(mode) = mode {
        config.general.rx_mode = match mode {
            RxModeArg::Monitor => RxMode::Monitor,
            RxModeArg::Promiscuous => RxMode::Promiscuous,
            RxModeArg::SoftAp => RxMode::SoftAp,
            RxModeArg::Station => RxMode::Station,
        };
    }
    config.validate()?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, stopping receiver");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    println!(
        "{} {:?} units ({:?})",
        "Receiving".green().bold(),
        config.general.packet_type,
        config.general.rx_mode
    );
    let counts = app::run_rx(&config, stop).await.context("Receiver failed")?;
    print_counts(&counts);
    Ok(())
}

async fn cmd_dry_run(mut config: Config, overrides: Overrides) -> Result<()> {
    overrides.apply(&mut config);
    config.validate()?;

    let summary = app::dry_run(&config).await.context("Dry run failed")?;
    print_summary(&summary);
    Ok(())
}

fn cmd_config(config: Config, output: Option<PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            config.save(&path)?;
            println!("{} {}", "Configuration written to".green(), path.display());
        }
        None => print!("{}", toml::to_string_pretty(&config)?),
    }
    Ok(())
}

/// Keyboard command for one input line; `None` for quit
fn parse_command(line: &str) -> Option<Result<SessionCommand, String>> {
    match line.trim() {
        "" | "s" | "start" => Some(Ok(SessionCommand::Start)),
        "x" | "stop" => Some(Ok(SessionCommand::Stop)),
        "q" | "quit" => None,
        other => Some(Err(other.to_string())),
    }
}

/// Keyboard lines and Ctrl-C feed the session command channel. The task owns
/// the only sender: quit or Ctrl-C drop it, which lets the sender wind down.
fn spawn_command_sources(tx: mpsc::Sender<SessionCommand>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        loop {
            let line = tokio::select! {
                line = lines.next_line(), if stdin_open => line,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, stopping session");
                    let _ = tx.send(SessionCommand::Stop).await;
                    break;
                }
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    // No keyboard; only Ctrl-C ends the run
                    stdin_open = false;
                    continue;
                }
                Err(e) => {
                    warn!("Failed reading stdin: {}", e);
                    stdin_open = false;
                    continue;
                }
            };

            match parse_command(&line) {
                Some(Ok(command)) => {
                    if tx.send(command).await.is_err() {
                        break;
                    }
                }
                Some(Err(other)) => warn!("Unknown command: {}", other),
                None => break,
            }
        }
    });
}

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "Counter")]
    name: &'static str,
    #[tabled(rename = "Value")]
    value: u64,
}

fn count_rows(counts: &CaptureCounts) -> Vec<CountRow> {
    vec![
        CountRow { name: "frames", value: counts.frames },
        CountRow { name: "matches", value: counts.matches },
        CountRow { name: "truncated", value: counts.truncated },
        CountRow { name: "malformed", value: counts.malformed },
        CountRow { name: "other", value: counts.other },
    ]
}

fn print_counts(counts: &CaptureCounts) {
    println!("{}", Table::new(count_rows(counts)));
}

fn print_report(report: &SessionReport) {
    let outcome = match &report.outcome {
        SessionOutcome::Completed => "completed".green(),
        SessionOutcome::Stopped => "stopped".yellow(),
        SessionOutcome::Error(e) => format!("error: {}", e).red(),
    };
    println!(
        "Session {} at {} after {} ms: {} sent, {} dropped",
        outcome,
        report.started_at.format("%Y-%m-%d %H:%M:%S"),
        report.elapsed_ms,
        report.sent,
        report.dropped
    );
}

fn print_summary(summary: &DryRunSummary) {
    let report = &summary.report;
    print_report(report);

    let mut rows = vec![
        CountRow { name: "sent", value: report.sent },
        CountRow { name: "dropped", value: report.dropped },
        CountRow { name: "tx pulses", value: summary.tx_pulses },
        CountRow { name: "rx pulses", value: summary.rx_pulses },
    ];
    rows.extend(count_rows(&summary.capture));
    println!("{}", Table::new(rows));

    if summary.capture.matches == report.sent {
        println!("{}", "All frames matched".green().bold());
    } else {
        println!(
            "{}",
            format!("{} of {} frames matched", summary.capture.matches, report.sent).red().bold()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command(""), Some(Ok(SessionCommand::Start)));
        assert_eq!(parse_command(" start "), Some(Ok(SessionCommand::Start)));
        assert_eq!(parse_command("x"), Some(Ok(SessionCommand::Stop)));
        assert_eq!(parse_command("quit"), None);
        assert_eq!(parse_command("jump"), Some(Err("jump".to_string())));
    }
}

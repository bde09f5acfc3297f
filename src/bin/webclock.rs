//! webclock - command-line client for the webclock daemon
//!
//! Shows where browsing time went and manages settings and daily limits.
//!
//! # Usage
//!
//! ```text
//! webclock stats                      # Today's time per domain
//! webclock report --range 7days       # Totals over a range
//! webclock pause | resume             # Toggle tracking
//! webclock settings get
//! webclock settings set idle_timeout_seconds=120
//! webclock export --format csv > usage.csv
//! webclock import backup.json
//! webclock limits set youtube.com 30 minutes
//! webclock limits status
//! ```

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use webclock_core::{format_hms, Constraint, LimitUnit, Settings, UsageRange};
use webclock_protocol::{DaemonMessage, MessageType};
use webclockd::client::DaemonClient;
use webclockd::config::DaemonConfig;

// ============================================================================
// CLI Arguments
// ============================================================================

/// webclock - per-domain browsing time tracker
#[derive(Parser, Debug)]
#[command(name = "webclock", version, about)]
struct Args {
    /// Daemon socket path (defaults to the configured socket)
    #[arg(long, global = true, value_name = "PATH")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show today's time per domain
    Stats,
    /// Show totals over a range of days
    Report {
        /// today, 7days, 30days or all
        #[arg(long, default_value = "7days", value_parser = parse_range)]
        range: UsageRange,
    },
    /// Pause tracking
    Pause,
    /// Resume tracking
    Resume,
    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Export all usage data
    Export {
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
    },
    /// Import a JSON snapshot produced by `export`
    Import { file: PathBuf },
    /// Manage daily time limits
    Limits {
        #[command(subcommand)]
        action: LimitsAction,
    },
    /// Show the session currently being timed
    Current,
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Get,
    /// Set one or more `key=value` pairs
    Set {
        #[arg(required = true, value_name = "KEY=VALUE")]
        pairs: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum LimitsAction {
    List,
    /// Add or replace the limit for a domain
    Set {
        domain: String,
        limit: u32,
        #[arg(default_value = "minutes", value_parser = parse_unit)]
        unit: LimitUnit,
        /// Store the limit without enforcing it
        #[arg(long)]
        disabled: bool,
    },
    Remove {
        domain: String,
    },
    /// Today's usage against each limit
    Status,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ExportFormat {
    Json,
    Csv,
}

fn parse_range(s: &str) -> Result<UsageRange, String> {
    UsageRange::parse(s).map_err(|e| e.to_string())
}

fn parse_unit(s: &str) -> Result<LimitUnit, String> {
    LimitUnit::parse(s).map_err(|e| e.to_string())
}

/// Parses `key=value`; the value is JSON when it parses as JSON, else a string.
fn parse_pairs(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{pair}'"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.trim().to_string(), value);
    }
    Ok(map)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let socket = match args.socket {
        Some(path) => path,
        None => {
            DaemonConfig::load()
                .context("Failed to load configuration")?
                .socket_path
        }
    };

    let mut client = DaemonClient::connect(&socket)
        .await
        .with_context(|| format!("Is webclockd running? (socket {})", socket.display()))?;

    let result = run(&mut client, args.command).await;
    let _ = client.disconnect().await;
    result
}

async fn run(client: &mut DaemonClient, command: Command) -> Result<()> {
    match command {
        Command::Stats => {
            let reply = client.request(MessageType::GetTodayStats).await?;
            let DaemonMessage::TodayStats {
                day_key,
                usage,
                settings,
            } = reply
            else {
                bail!("unexpected reply: {reply:?}");
            };

            println!("{day_key}{}", paused_note(&settings));
            let mut rows: Vec<_> = usage
                .day(&day_key)
                .map(|day| day.iter().collect())
                .unwrap_or_default();
            rows.sort_by(|a, b| b.1.seconds.cmp(&a.1.seconds).then_with(|| a.0.cmp(b.0)));

            if rows.is_empty() {
                println!("No time recorded yet.");
            }
            for (domain, record) in rows {
                println!(
                    "  {:<32} {}  ({} visits)",
                    domain,
                    format_hms(record.seconds),
                    record.visits
                );
            }
        }
        Command::Report { range } => {
            let reply = client.request(MessageType::GetTotals { range }).await?;
            let DaemonMessage::Totals { totals } = reply else {
                bail!("unexpected reply: {reply:?}");
            };
            println!("{}: {}", totals.range, format_hms(totals.total_seconds));
            for (domain, entry) in totals.ranked() {
                println!(
                    "  {:<32} {}  ({} visits)",
                    domain,
                    format_hms(entry.seconds),
                    entry.visits
                );
            }
        }
        Command::Pause | Command::Resume => {
            let paused = matches!(command, Command::Pause);
            let reply = client.request(MessageType::SetPaused { paused }).await?;
            let settings = expect_settings(reply)?;
            println!(
                "Tracking {}",
                if settings.tracking_paused {
                    "paused"
                } else {
                    "resumed"
                }
            );
        }
        Command::Settings { action } => {
            let message = match action {
                SettingsAction::Get => MessageType::GetSettings,
                SettingsAction::Set { pairs } => MessageType::SetSettings {
                    settings: parse_pairs(&pairs)?,
                },
            };
            let settings = expect_settings(client.request(message).await?)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::Export { format } => match format {
            ExportFormat::Json => {
                let reply = client.request(MessageType::ExportAll).await?;
                let DaemonMessage::Snapshot { snapshot } = reply else {
                    bail!("unexpected reply: {reply:?}");
                };
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
            ExportFormat::Csv => {
                let reply = client.request(MessageType::ExportCsv).await?;
                let DaemonMessage::Csv { csv } = reply else {
                    bail!("unexpected reply: {reply:?}");
                };
                println!("{csv}");
            }
        },
        Command::Import { file } => {
            let contents = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let data: Value = serde_json::from_str(&contents)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;
            let reply = client.request(MessageType::Import { data }).await?;
            let DaemonMessage::Imported { records } = reply else {
                bail!("unexpected reply: {reply:?}");
            };
            println!("Imported {records} record(s)");
        }
        Command::Limits { action } => run_limits(client, action).await?,
        Command::Current => {
            let reply = client.request(MessageType::CurrentSession).await?;
            let DaemonMessage::CurrentSession { session } = reply else {
                bail!("unexpected reply: {reply:?}");
            };
            match session {
                Some(s) => println!("{} since {} ({})", s.domain, s.start_time, s.resource),
                None => println!("No open session"),
            }
        }
    }
    Ok(())
}

async fn run_limits(client: &mut DaemonClient, action: LimitsAction) -> Result<()> {
    let message = match action {
        LimitsAction::Status => {
            let reply = client.request(MessageType::GetLimitStatus).await?;
            let DaemonMessage::LimitStatus { reports } = reply else {
                bail!("unexpected reply: {reply:?}");
            };
            if reports.is_empty() {
                println!("No limits set.");
            }
            for r in reports {
                println!(
                    "  {:<32} {} / {}  {:>3}%  {}",
                    r.domain,
                    format_hms(r.used_seconds),
                    format_hms(r.limit_seconds),
                    r.percent,
                    r.status
                );
            }
            return Ok(());
        }
        LimitsAction::List => MessageType::GetConstraints,
        LimitsAction::Set {
            domain,
            limit,
            unit,
            disabled,
        } => {
            let mut constraint = Constraint::new(domain, limit, unit);
            constraint.enabled = !disabled;
            MessageType::SetConstraint { constraint }
        }
        LimitsAction::Remove { domain } => MessageType::RemoveConstraint { domain },
    };

    let reply = client.request(message).await?;
    let DaemonMessage::Constraints { constraints } = reply else {
        bail!("unexpected reply: {reply:?}");
    };
    if constraints.is_empty() {
        println!("No limits set.");
    }
    for c in constraints.values() {
        println!(
            "  {:<32} {} {}{}",
            c.domain,
            c.limit,
            c.unit,
            if c.enabled { "" } else { "  (disabled)" }
        );
    }
    Ok(())
}

fn expect_settings(reply: DaemonMessage) -> Result<Settings> {
    match reply {
        DaemonMessage::Settings { settings } => Ok(settings),
        other => bail!("unexpected reply: {other:?}"),
    }
}

fn paused_note(settings: &Settings) -> &'static str {
    if settings.tracking_paused {
        "  [paused]"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs_json_and_string_values() {
        let map = parse_pairs(&[
            "idle_timeout_seconds=120".to_string(),
            "timezone=Europe/Berlin".to_string(),
            "tracking_paused=true".to_string(),
        ])
        .unwrap();
        assert_eq!(map["idle_timeout_seconds"], Value::from(120));
        assert_eq!(map["timezone"], Value::from("Europe/Berlin"));
        assert_eq!(map["tracking_paused"], Value::Bool(true));
    }

    #[test]
    fn test_parse_pairs_requires_equals() {
        assert!(parse_pairs(&["idle".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_limits_set() {
        let args =
            Args::try_parse_from(["webclock", "limits", "set", "a.example", "2", "hours"]).unwrap();
        match args.command {
            Command::Limits {
                action: LimitsAction::Set { limit, unit, .. },
            } => {
                assert_eq!(limit, 2);
                assert_eq!(unit, LimitUnit::Hours);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}

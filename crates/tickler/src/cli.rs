//! Command-line interface definition.

use std::path::PathBuf;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tickler", version, about = "Scheduled reminder mailer")]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "TICKLER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deliver due reminders on a fixed cadence until interrupted
    Run,
    /// Run a single dispatch scan now
    Scan {
        /// Pretend the current time is this instant
        #[arg(long, value_parser = parse_when)]
        at: Option<DateTime<Utc>>,
    },
    /// List campaigns with pending/failed/sent counts
    Campaigns {
        /// Refresh every SECS seconds
        #[arg(short, long, value_name = "SECS")]
        watch: Option<u64>,

        /// Print JSON instead of a table
        #[arg(long, default_value_t = false, conflicts_with = "watch")]
        json: bool,
    },
    /// Schedule a new reminder campaign
    Compose {
        /// Subject line
        #[arg(short, long)]
        subject: String,

        /// Plain text body
        #[arg(short, long)]
        body: String,

        /// Delivery time: RFC 3339, or "YYYY-MM-DD HH:MM" in local time
        #[arg(long, value_parser = parse_when)]
        at: DateTime<Utc>,

        /// Recipient ids
        #[arg(long = "to", value_name = "ID", num_args = 1.., required_unless_present = "all")]
        to: Vec<i64>,

        /// Send to every registered recipient
        #[arg(long, default_value_t = false, conflicts_with = "to")]
        all: bool,
    },
    /// Show per-recipient delivery state of a campaign
    Status {
        /// Campaign (message) id
        message_id: i64,
    },
    /// Manage recipients
    Recipients {
        #[command(subcommand)]
        command: RecipientCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum RecipientCommand {
    /// List recipients
    List,
    /// Register a recipient
    Add {
        /// Display name
        #[arg(short, long)]
        name: String,

        /// E-mail address
        #[arg(short, long)]
        address: String,
    },
    /// Remove a recipient without delivery history
    Remove {
        /// Recipient id
        id: i64,
    },
}

/// Parses a delivery time given as RFC 3339 or as local `YYYY-MM-DD HH:MM`.
pub fn parse_when(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M").map_err(|_| {
        format!("{value:?} is neither RFC 3339 nor \"YYYY-MM-DD HH:MM\"")
    })?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|time| time.with_timezone(&Utc))
        .ok_or_else(|| format!("{value:?} does not exist in the local time zone"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compose_to_ids() {
        let cli = Cli::parse_from([
            "tickler",
            "compose",
            "--subject",
            "Invoice Due",
            "--body",
            "Pay today",
            "--at",
            "2024-01-01T09:00:00Z",
            "--to",
            "1",
            "3",
        ]);
        match cli.command {
            Commands::Compose {
                subject, at, to, all, ..
            } => {
                assert_eq!(subject, "Invoice Due");
                assert_eq!(at, Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
                assert_eq!(to, vec![1, 3]);
                assert!(!all);
            }
            _ => panic!("Expected compose subcommand"),
        }
    }

    #[test]
    fn test_parse_compose_all() {
        let cli = Cli::parse_from([
            "tickler", "compose", "-s", "Hola", "-b", "Cuerpo", "--at", "2024-01-01 09:00", "--all",
        ]);
        match cli.command {
            Commands::Compose { to, all, .. } => {
                assert!(all);
                assert!(to.is_empty());
            }
            _ => panic!("Expected compose subcommand"),
        }
    }

    #[test]
    fn test_compose_requires_recipients() {
        let result = Cli::try_parse_from([
            "tickler", "compose", "-s", "x", "-b", "y", "--at", "2024-01-01T09:00:00Z",
        ]);
        assert!(result.is_err());

        let both = Cli::try_parse_from([
            "tickler", "compose", "-s", "x", "-b", "y", "--at", "2024-01-01T09:00:00Z", "--to",
            "1", "--all",
        ]);
        assert!(both.is_err());
    }

    #[test]
    fn test_parse_global_config_after_subcommand() {
        let cli = Cli::parse_from(["tickler", "scan", "--config", "/etc/tickler.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/tickler.json")));
        assert!(matches!(cli.command, Commands::Scan { at: None }));
    }

    #[test]
    fn test_parse_recipient_add() {
        let cli = Cli::parse_from([
            "tickler", "recipients", "add", "--name", "Ana", "--address", "ana@example.com",
        ]);
        match cli.command {
            Commands::Recipients {
                command: RecipientCommand::Add { name, address },
            } => {
                assert_eq!(name, "Ana");
                assert_eq!(address, "ana@example.com");
            }
            _ => panic!("Expected recipients add subcommand"),
        }
    }

    #[test]
    fn test_parse_when_formats() {
        assert_eq!(
            parse_when("2024-01-01T10:00:00+01:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
        );
        assert!(parse_when("2024-01-01 09:00").is_ok());
        assert!(parse_when("tomorrow").is_err());
    }
}

use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "rulegate", version, about = "Policy decision engine for agent actions")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "rulegate.yaml")]
    pub config: PathBuf,

    /// Path to the policy file (overrides config file setting)
    #[arg(short, long)]
    pub policy: Option<PathBuf>,

    /// Log level or filter directive (overrides config file setting)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Start with emergency mode active; every request is denied
    #[arg(long)]
    pub emergency: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decide a single request and print the decision as JSON
    Check(CheckArgs),

    /// Decide a stream of JSON-lines requests from a file (or `-` for stdin)
    Batch {
        input: PathBuf,

        /// Print aggregate statistics after the last decision
        #[arg(long)]
        stats: bool,
    },

    /// List the loaded rules in evaluation order
    Rules {
        /// Print per-category counts instead of the rules
        #[arg(long)]
        summary: bool,
    },

    /// Validate a policy file without deciding anything
    Validate { policy: PathBuf },

    /// Aggregate statistics over a JSON-lines audit file
    Stats {
        audit_file: PathBuf,

        /// Only consider entries from the last N seconds
        #[arg(long, default_value_t = 86_400)]
        window_secs: u64,
    },
}

#[derive(clap::Args, Debug)]
pub struct CheckArgs {
    #[arg(long)]
    pub subject: String,

    #[arg(long)]
    pub action: String,

    #[arg(long)]
    pub resource: String,

    /// Request id (generated when absent)
    #[arg(long)]
    pub id: Option<uuid::Uuid>,

    /// Caller IPv4 address
    #[arg(long)]
    pub origin: Option<String>,

    /// RFC 3339 request time; its offset is the wall clock for time windows
    #[arg(long, value_parser = parse_timestamp)]
    pub at: Option<DateTime<FixedOffset>>,

    #[arg(long)]
    pub session: Option<String>,

    /// Request attribute as KEY=VALUE; VALUE is read as JSON when it parses
    #[arg(long = "attr", value_parser = parse_attribute)]
    pub attributes: Vec<(String, serde_json::Value)>,
}

fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>, String> {
    DateTime::parse_from_rfc3339(value).map_err(|e| format!("invalid RFC 3339 timestamp: {e}"))
}

pub(crate) fn parse_attribute(value: &str) -> Result<(String, serde_json::Value), String> {
    let (key, raw) = value
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{value}'"))?;
    if key.is_empty() {
        return Err("attribute key must not be empty".to_string());
    }
    let parsed = serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((key.to_string(), parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn attributes_parse_as_json_or_string() {
        assert_eq!(
            parse_attribute("amount=1500").unwrap(),
            ("amount".to_string(), serde_json::json!(1500))
        );
        assert_eq!(
            parse_attribute("data_type=personal").unwrap(),
            ("data_type".to_string(), serde_json::json!("personal"))
        );
        assert_eq!(
            parse_attribute("note=a=b").unwrap(),
            ("note".to_string(), serde_json::json!("a=b"))
        );
        assert!(parse_attribute("novalue").is_err());
        assert!(parse_attribute("=x").is_err());
    }

    #[test]
    fn check_arguments() {
        let cli = Cli::try_parse_from([
            "rulegate",
            "--emergency",
            "check",
            "--subject",
            "u1",
            "--action",
            "read",
            "--resource",
            "user.u1.profile",
            "--at",
            "2025-06-01T10:30:00+02:00",
            "--attr",
            "amount=10",
        ])
        .unwrap();
        assert!(cli.emergency);
        let Command::Check(args) = cli.command else {
            panic!("expected check");
        };
        assert_eq!(args.subject, "u1");
        assert_eq!(args.at.unwrap().offset().local_minus_utc(), 7200);
        assert_eq!(args.attributes.len(), 1);
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let result = Cli::try_parse_from([
            "rulegate", "check", "--subject", "u1", "--action", "read", "--resource", "x",
            "--at", "yesterday",
        ]);
        assert!(result.is_err());
    }
}

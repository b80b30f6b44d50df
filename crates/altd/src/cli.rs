//! Command-line interface for the alt daemon.
//!
//! Options given here override the matching settings from the configuration
//! file.

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

/// Parsed command-line options
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    /// Path to the TOML configuration file
    pub config_path: PathBuf,
    /// Optional override for the log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Optional override for the store's data file
    pub data_file: Option<PathBuf>,
    /// Keep everything in memory and never write the data file
    pub dry_run: bool,
}

impl CliArgs {
    /// Parses the process arguments
    pub fn parse() -> Self {
        Self::from_matches(command().get_matches())
    }

    #[cfg(test)]
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_matches(command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: clap::ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("altd.toml")),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            data_file: matches.get_one::<String>("data").map(PathBuf::from),
            dry_run: matches.get_flag("dry-run"),
        }
    }
}

fn command() -> Command {
    Command::new("altd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Supervises unattended game-client alts and tracks nearby players")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("altd.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("data")
                .short('d')
                .long("data")
                .value_name("FILE")
                .help("JSON data file for alts, trackers and watch-lists"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Run against an in-memory store without touching the data file")
                .action(ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["altd"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("altd.toml"));
        assert_eq!(args.log_level, None);
        assert!(!args.json_logs);
        assert!(!args.dry_run);
        assert_eq!(args.data_file, None);
    }

    #[test]
    fn test_overrides() {
        let args = CliArgs::try_parse_from([
            "altd",
            "--config",
            "custom.toml",
            "-l",
            "debug",
            "--json-logs",
            "--data",
            "/tmp/alts.json",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.config_path, PathBuf::from("custom.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert_eq!(args.data_file, Some(PathBuf::from("/tmp/alts.json")));
        assert!(args.dry_run);
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(CliArgs::try_parse_from(["altd", "--bind", "0.0.0.0:1"]).is_err());
    }
}

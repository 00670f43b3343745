//! Command-line interface definitions for oob-probe.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

/// Ephemeral capture listeners for out-of-band interaction testing.
///
/// oob-probe opens short-lived TCP and HTTP listeners on request, records
/// everything that reaches them, and answers control requests as
/// newline-delimited JSON on stdin/stdout. Diagnostics go to stderr.
#[derive(Parser, Debug)]
#[command(name = "oob-probe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to additional config file.
    ///
    /// This config file is merged on top of the user config, giving it the
    /// highest priority (except for CLI flags). It must exist.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Address listeners bind to (default 127.0.0.1).
    #[arg(long = "bind", value_name = "HOST")]
    pub bind: Option<IpAddr>,

    /// Maximum bytes each listener log retains (0 = unbounded).
    #[arg(long = "log-max-bytes", value_name = "N")]
    pub log_max_bytes: Option<usize>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_basic() {
        let cli = Cli::parse_from(["oob-probe"]);
        assert!(cli.config.is_none());
        assert!(cli.bind.is_none());
        assert!(cli.log_max_bytes.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_parse_with_options() {
        let cli = Cli::parse_from([
            "oob-probe",
            "-c",
            "/etc/probe.toml",
            "--bind",
            "0.0.0.0",
            "--log-max-bytes",
            "4096",
            "-vv",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("/etc/probe.toml")));
        assert_eq!(cli.bind, Some(IpAddr::from([0, 0, 0, 0])));
        assert_eq!(cli.log_max_bytes, Some(4096));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_rejects_bad_bind() {
        let result = Cli::try_parse_from(["oob-probe", "--bind", "not-an-ip"]);
        assert!(result.is_err());
    }
}

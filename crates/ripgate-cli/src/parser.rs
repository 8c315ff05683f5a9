//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// HTTP/HTTPS gateway in front of OpenAI-compatible inference APIs.
///
/// Upstreams, ports and certificates are configured through the
/// environment (optionally loaded from a `.env` file).
#[derive(Debug, Parser)]
#[command(name = "ripgate")]
#[command(about = "Serve the ripgate LLM gateway", version)]
pub struct Cli {
    /// Load variables from this file instead of `./.env`
    #[arg(long = "env-file", value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Directory for the daily rolling log file
    #[arg(long = "log-dir", env = "LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Log to stdout only
    #[arg(long = "no-file-log")]
    pub no_file_log: bool,

    /// JSON file with probe rules, overriding `PROBE_RULES_FILE`
    #[arg(long = "probe-rules", value_name = "PATH")]
    pub probe_rules: Option<PathBuf>,
}

impl Cli {
    /// Directory for file logging, if enabled.
    pub fn file_log_dir(&self) -> Option<&PathBuf> {
        (!self.no_file_log).then_some(&self.log_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["ripgate"]);
        assert_eq!(cli.env_file, None);
        assert_eq!(cli.probe_rules, None);
        assert_eq!(cli.file_log_dir(), Some(&PathBuf::from("logs")));
    }

    #[test]
    fn test_no_file_log_disables_log_dir() {
        let cli = Cli::parse_from(["ripgate", "--log-dir", "/var/log/ripgate", "--no-file-log"]);
        assert_eq!(cli.log_dir, PathBuf::from("/var/log/ripgate"));
        assert_eq!(cli.file_log_dir(), None);
    }

    #[test]
    fn test_paths() {
        let cli = Cli::parse_from([
            "ripgate",
            "--env-file",
            "/etc/ripgate.env",
            "--probe-rules",
            "rules.json",
        ]);
        assert_eq!(cli.env_file, Some(PathBuf::from("/etc/ripgate.env")));
        assert_eq!(cli.probe_rules, Some(PathBuf::from("rules.json")));
    }
}

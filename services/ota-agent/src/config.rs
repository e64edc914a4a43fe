//! Configuration for the update agent.
//!
//! Every flag can also be set through an `OTA_*` environment variable.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::command::CommandLine;
use crate::reconciler::ReconcilerConfig;
use crate::supervisor::RestartPolicy;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable single-line output.
    Compact,
}

/// ota-agent - keeps local files in step with a remote manifest.
#[derive(Debug, Clone, Parser)]
#[command(name = "ota-agent")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// URL of the remote manifest.
    #[arg(long, env = "OTA_CONFIG_URL")]
    pub config_url: String,

    /// Path of the aggregate version file. Per-file markers sit next to it.
    #[arg(long, env = "OTA_VERSION_FILE", default_value = "version")]
    pub version_file: PathBuf,

    /// HTTP timeout per request, in seconds.
    #[arg(long, env = "OTA_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Attempts per HTTP request.
    #[arg(long, env = "OTA_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Interval between update checks in daemon mode, in seconds.
    #[arg(long, env = "OTA_CHECK_INTERVAL_SECS", default_value_t = 300)]
    pub check_interval_secs: u64,

    /// Run a single update check and exit.
    #[arg(long, env = "OTA_ONCE")]
    pub once: bool,

    /// Command to start and keep running (whitespace-split, no quoting).
    #[arg(long, env = "OTA_START_CMD")]
    pub start_cmd: Option<String>,

    /// Restart limit for the managed process; negative is unlimited.
    #[arg(long, env = "OTA_MAX_RESTARTS", default_value_t = -1, allow_negative_numbers = true)]
    pub max_restarts: i64,

    /// Delay before relaunching the managed process, in milliseconds.
    #[arg(long, env = "OTA_RESTART_DELAY_MS", default_value_t = 3000)]
    pub restart_delay_ms: u64,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, env = "OTA_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, env = "OTA_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Config {
    /// HTTP timeout per request.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Reconciler settings.
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            check_interval: Duration::from_secs(self.check_interval_secs.max(1)),
        }
    }

    /// Restart policy for the managed process.
    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy::from_signed_limit(
            self.max_restarts,
            Duration::from_millis(self.restart_delay_ms),
        )
    }

    /// The managed process command, if one is configured and non-blank.
    pub fn managed_command(&self) -> Option<CommandLine> {
        self.start_cmd.as_deref().and_then(CommandLine::parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["ota-agent", "--config-url", "http://h/v.yaml"]).unwrap();
        assert_eq!(config.config_url, "http://h/v.yaml");
        assert_eq!(config.version_file, PathBuf::from("version"));
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.reconciler_config().check_interval, Duration::from_secs(300));
        assert!(!config.once);
        assert_eq!(config.managed_command(), None);
        assert_eq!(config.restart_policy().max_restarts, None);
        assert_eq!(config.restart_policy().restart_delay, Duration::from_secs(3));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_missing_url_is_rejected() {
        let err = Config::try_parse_from(["ota-agent"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_overrides() {
        let config = Config::try_parse_from([
            "ota-agent",
            "--config-url",
            "http://h/v.yaml",
            "--once",
            "--start-cmd",
            "/opt/demo/app --port 8080",
            "--max-restarts",
            "2",
            "--restart-delay-ms",
            "50",
            "--log-format",
            "compact",
        ])
        .unwrap();

        assert!(config.once);
        let cmd = config.managed_command().unwrap();
        assert_eq!(cmd.program(), "/opt/demo/app");
        assert_eq!(cmd.args(), ["--port", "8080"]);
        assert_eq!(config.restart_policy().max_restarts, Some(2));
        assert_eq!(config.restart_policy().restart_delay, Duration::from_millis(50));
        assert_eq!(config.log_format, LogFormat::Compact);
    }

    #[test]
    fn test_negative_restart_limit() {
        let config = Config::try_parse_from([
            "ota-agent",
            "--config-url",
            "http://h",
            "--max-restarts",
            "-1",
        ])
        .unwrap();
        assert_eq!(config.restart_policy().max_restarts, None);
    }
}

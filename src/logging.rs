//! Logging setup for the `devops-pacer` binary.
//!
//! The library only emits `tracing` events; nothing is printed unless the
//! binary installs a subscriber here. Logging is off unless a level is given
//! through `--log-level` or `DEVOPS_PACER_LOG_LEVEL`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event, for log shippers.
    Json,
}

impl LogFormat {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct LogConfig {
    /// `None` disables logging.
    pub level: Option<LogLevel>,
    /// `None` logs to stderr.
    pub file: Option<PathBuf>,
    pub format: LogFormat,
}

impl LogConfig {
    /// Only this crate's events pass; dependency noise (hyper, rustls) is dropped.
    fn filter(level: LogLevel) -> EnvFilter {
        EnvFilter::new(format!("devops_pacer={}", level.as_filter_str()))
    }
}

/// Keeps the background writer alive. Pending events are flushed on drop,
/// so hold this until the process exits.
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Installs the global subscriber.
///
/// Returns `Ok(None)` when logging is disabled.
///
/// # Errors
///
/// Fails if the log file cannot be opened for appending.
///
/// # Example
///
/// ```rust,no_run
/// use devops_pacer::logging::{LogConfig, LogFormat, LogLevel, init_logging};
///
/// let _guard = init_logging(LogConfig {
///     level: Some(LogLevel::Debug),
///     file: None,
///     format: LogFormat::Json,
/// })
/// .unwrap();
/// ```
#[must_use = "the returned guard must be held until application exit"]
pub fn init_logging(config: LogConfig) -> Result<Option<LogGuard>> {
    let Some(level) = config.level else {
        return Ok(None);
    };
    let filter = LogConfig::filter(level);

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };
    let to_file = config.file.is_some();

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .with_writer(writer)
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_file(to_file)
                .with_line_number(to_file);
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
        LogFormat::Text => {
            let layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_level(true)
                .with_ansi(!to_file)
                .compact();
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
    }

    Ok(Some(LogGuard { _guard: guard }))
}

/// Reads logging flags before clap runs, so that config loading can log.
///
/// Precedence: CLI args > `DEVOPS_PACER_LOG_*` environment variables.
#[must_use]
pub fn parse_early_log_config(args: &[String]) -> LogConfig {
    let level = extract_arg_value(args, "--log-level")
        .or_else(|| std::env::var("DEVOPS_PACER_LOG_LEVEL").ok());
    let file = extract_arg_value(args, "--log-file")
        .or_else(|| std::env::var("DEVOPS_PACER_LOG_FILE").ok());
    let format = extract_arg_value(args, "--log-format")
        .or_else(|| std::env::var("DEVOPS_PACER_LOG_FORMAT").ok());

    LogConfig {
        level: level.and_then(|s| LogLevel::parse(&s)),
        file: file.filter(|s| !s.is_empty()).map(PathBuf::from),
        format: format.and_then(|s| LogFormat::parse(&s)).unwrap_or_default(),
    }
}

/// Value of `--flag value` or `--flag=value`.
fn extract_arg_value(args: &[String], flag: &str) -> Option<String> {
    let prefix = format!("{flag}=");
    args.iter().enumerate().find_map(|(i, arg)| {
        if arg == flag {
            args.get(i + 1).cloned()
        } else {
            arg.strip_prefix(&prefix).map(str::to_string)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::file_serial;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// # Log Level Parsing
    ///
    /// Verifies that log levels are parsed case-insensitively.
    ///
    /// ## Expected Outcome
    /// - Known names map to levels, `warning` is an alias, anything else is None
    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::parse("TRACE"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("Debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("error"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("verbose"), None);
        assert_eq!(LogLevel::Info.as_filter_str(), "info");
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("yaml"), None);
    }

    /// # Early Config From Args
    ///
    /// Verifies both `--flag value` and `--flag=value` forms are read.
    ///
    /// ## Test Scenario
    /// - Mixes both forms in one argument list
    ///
    /// ## Expected Outcome
    /// - All three settings are extracted
    #[test]
    #[file_serial(env_tests)]
    fn test_early_config_from_args() {
        let config = parse_early_log_config(&args(&[
            "devops-pacer",
            "--log-level",
            "debug",
            "--log-file=/tmp/pacer.log",
            "--log-format",
            "json",
            "check",
        ]));
        assert_eq!(
            config,
            LogConfig {
                level: Some(LogLevel::Debug),
                file: Some(PathBuf::from("/tmp/pacer.log")),
                format: LogFormat::Json,
            }
        );
    }

    /// # Environment Fallback
    ///
    /// Verifies env vars apply when flags are absent and flags win when present.
    #[test]
    #[file_serial(env_tests)]
    fn test_early_config_env_fallback() {
        unsafe {
            std::env::set_var("DEVOPS_PACER_LOG_LEVEL", "warn");
            std::env::set_var("DEVOPS_PACER_LOG_FORMAT", "json");
        }

        let from_env = parse_early_log_config(&args(&["devops-pacer", "check"]));
        assert_eq!(from_env.level, Some(LogLevel::Warn));
        assert_eq!(from_env.format, LogFormat::Json);

        let from_cli =
            parse_early_log_config(&args(&["devops-pacer", "--log-level", "trace", "check"]));
        assert_eq!(from_cli.level, Some(LogLevel::Trace));

        unsafe {
            std::env::remove_var("DEVOPS_PACER_LOG_LEVEL");
            std::env::remove_var("DEVOPS_PACER_LOG_FORMAT");
        }
    }

    #[test]
    #[file_serial(env_tests)]
    fn test_logging_disabled_without_level() {
        let config = parse_early_log_config(&args(&["devops-pacer", "list", "_apis/projects"]));
        assert_eq!(config.level, None);
        assert!(init_logging(config).unwrap().is_none());
    }

    #[test]
    fn test_extract_arg_value() {
        let list = args(&["cmd", "--flag", "value"]);
        assert_eq!(extract_arg_value(&list, "--flag"), Some("value".into()));
        assert_eq!(extract_arg_value(&list, "--other"), None);
        assert_eq!(extract_arg_value(&args(&["cmd", "--flag"]), "--flag"), None);
    }
}

use clap::Args;
use strum::{Display, EnumString};

use crate::defaults::DEFAULT_LOG_FILTER;

/// Supported logging output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    #[default]
    Json,
    /// Human-readable single line output.
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

/// Telemetry settings shared by every command.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `tracing` filter expression applied to orchestrator logs.
    #[arg(
        long = "log-filter",
        env = "KEEPER_LOG_FILTER",
        default_value = DEFAULT_LOG_FILTER
    )]
    pub filter: String,
    /// Output format for orchestrator logs.
    #[arg(
        long = "log-format",
        env = "KEEPER_LOG_FORMAT",
        default_value_t = LogFormat::Json
    )]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_owned(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Filter expression handed to the subscriber.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.filter
    }

    /// Selected output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("json", LogFormat::Json)]
    #[case("COMPACT", LogFormat::Compact)]
    fn parses_formats_case_insensitively(#[case] text: &str, #[case] expected: LogFormat) {
        assert_eq!(LogFormat::from_str(text).expect("format parses"), expected);
    }

    #[test]
    fn default_format_renders_as_flag_value() {
        assert_eq!(LogFormat::default().to_string(), "json");
        assert_eq!(LogFormat::Compact.to_string(), "compact");
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(LogFormat::from_str("yaml").is_err());
    }
}

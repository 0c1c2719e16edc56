use serde::{Deserialize, Serialize};

/// The maximum level of log messages that are emitted.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Disables logging entirely.
    Off,
    /// Only errors.
    Error,
    /// Errors and warnings.
    Warn,
    /// Informational messages and above.
    #[default]
    Info,
    /// Debug messages and above.
    Debug,
    /// All messages.
    Trace,
}

impl LogLevel {
    /// Returns the directive name understood by `tracing` filters.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controls the log format.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    #[default]
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO tally_outlet::service: acquired outlet lease partition=3
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2024-01-10T12:10:32.123Z  INFO tally_outlet::service: acquired outlet lease partition=3
    /// ```
    Simplified,

    /// Dump out JSON lines.
    ///
    /// ```text
    /// {"timestamp":"2024-01-10T12:11:08.729716Z","level":"INFO","message":"acquired outlet lease","partition":3,"target":"tally_outlet::service"}
    /// ```
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level for tally's own crates.
    ///
    /// Third-party crates always log at `info`. Both can be overridden with `RUST_LOG`.
    pub level: LogLevel,

    /// Controls the log output format.
    ///
    /// Defaults to [`LogFormat::Auto`], which detects the best format based on the TTY.
    pub format: LogFormat,
}

//! Logging Module
//!
//! The library only emits `tracing` events. The binary picks one of the
//! presets below from its flags and installs the subscriber once.

use std::fmt;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Subscriber settings
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub timestamps: bool,
    /// Print the module path of each event
    pub include_target: bool,
    pub include_thread_ids: bool,
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    /// Info and above, timestamped, colored
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            timestamps: true,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// `--verbose`: debug events with module paths and thread ids, which
    /// tells the decode workers apart from the training thread
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ..Self::default()
        }
    }

    /// `--quiet`: errors only, without timestamps
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            timestamps: false,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }
}

/// Minimum severity that reaches the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Case-insensitive; `warning` is accepted and anything unknown is `Info`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the global compact subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let builder = FmtSubscriber::builder()
        .with_max_level(Level::from(config.level))
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact();

    let installed = if config.timestamps {
        tracing::subscriber::set_global_default(builder.finish())
    } else {
        tracing::subscriber::set_global_default(builder.without_time().finish())
    };
    installed.map_err(|e| format!("Failed to initialize logging: {}", e))?;

    tracing::debug!("Logging at {} and above", config.level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse(" INFO "), LogLevel::Info);
        assert_eq!(LogLevel::parse("Warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("verbose"), LogLevel::Info);
    }

    #[test]
    fn test_presets() {
        let default = LogConfig::default();
        assert_eq!(default.level, LogLevel::Info);
        assert!(default.timestamps);

        let verbose = LogConfig::verbose();
        assert_eq!(verbose.level, LogLevel::Debug);
        assert!(verbose.include_thread_ids);

        let quiet = LogConfig::quiet();
        assert_eq!(quiet.level, LogLevel::Error);
        assert!(!quiet.timestamps);

        assert_eq!(LogConfig::quiet().with_level(LogLevel::Warn).level, LogLevel::Warn);
    }

    #[test]
    fn test_level_conversions() {
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
    }
}

//! Diagnostic logging for xbm.
//!
//! Built on `tracing`. Logs go to stderr so that `--format json` output on
//! stdout stays machine-readable. `RUST_LOG`, when set, replaces the
//! computed filter entirely.
//!
//! ```rust
//! use xbm::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default());
//! tracing::info!(pages = 3, "Crawl finished");
//! ```

use std::time::Instant;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub timestamps: bool,
    /// Include the module path.
    pub target: bool,
    /// Log span enter/exit.
    pub spans: bool,
    pub colors: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-oriented.
    Pretty,
    /// One line per event.
    Compact,
    /// Adds thread ids, file and line.
    Full,
}

impl Default for LogConfig {
    /// Warnings only: the CLI reports progress itself, so routine `info!`
    /// events stay hidden unless asked for.
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            format: LogFormat::Compact,
            timestamps: false,
            target: false,
            spans: false,
            colors: true,
        }
    }
}

impl LogConfig {
    /// Errors only.
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            ..Self::default()
        }
    }

    /// Debug level with timestamps and targets.
    #[must_use]
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            timestamps: true,
            target: true,
            ..Self::default()
        }
    }

    /// Everything, including span transitions.
    #[must_use]
    pub fn trace() -> Self {
        Self {
            level: LogLevel::Trace,
            format: LogFormat::Full,
            spans: true,
            ..Self::verbose()
        }
    }

    #[must_use]
    pub const fn with_colors(mut self, colors: bool) -> Self {
        self.colors = colors;
        self
    }

    /// Filter used when `RUST_LOG` is unset.
    #[must_use]
    pub fn filter_directive(&self) -> String {
        format!("xbm={}", self.level.as_str())
    }
}

impl LogLevel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
            Self::Off => "off",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" | "e" => Ok(Self::Error),
            "warn" | "warning" | "w" => Ok(Self::Warn),
            "info" | "i" => Ok(Self::Info),
            "debug" | "d" => Ok(Self::Debug),
            "trace" | "t" => Ok(Self::Trace),
            "off" | "none" | "quiet" => Ok(Self::Off),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "p" => Ok(Self::Pretty),
            "compact" | "c" => Ok(Self::Compact),
            "full" | "f" => Ok(Self::Full),
            _ => Err(format!("Invalid log format: {s}")),
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(config: &LogConfig) {
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.filter_directive())
    };

    let span_events = if config.spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.colors)
        .with_target(config.target)
        .with_span_events(span_events);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => base.pretty().boxed(),
        (LogFormat::Pretty, false) => base.pretty().without_time().boxed(),
        (LogFormat::Compact, true) => base.compact().boxed(),
        (LogFormat::Compact, false) => base.compact().without_time().boxed(),
        (LogFormat::Full, _) => base
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .ok();
}

/// Silent logging for tests.
pub fn init_test_logging() {
    init_logging(&LogConfig {
        level: LogLevel::Off,
        ..LogConfig::default()
    });
}

/// Logging for the `xbm` binary: `-q` wins over `-v`, `-vv` enables trace.
pub fn init_cli_logging(quiet: bool, verbosity: u8, colors: bool) {
    let config = match (quiet, verbosity) {
        (true, _) => LogConfig::quiet(),
        (false, 0) => LogConfig::default(),
        (false, 1) => LogConfig::verbose(),
        (false, _) => LogConfig::trace(),
    };
    init_logging(&config.with_colors(colors));
}

/// Logs start and end of a long-running operation with its duration.
#[must_use = "call complete() or fail() when the operation ends"]
pub struct OperationGuard {
    name: &'static str,
    start: Instant,
}

impl OperationGuard {
    pub fn new(name: &'static str) -> Self {
        tracing::info!(operation = name, "Starting operation");
        Self {
            name,
            start: Instant::now(),
        }
    }

    pub fn complete(self) {
        tracing::info!(
            operation = self.name,
            duration_ms = self.elapsed_ms(),
            "Operation completed"
        );
    }

    pub fn fail(self, error: &dyn std::fmt::Display) {
        tracing::error!(
            operation = self.name,
            duration_ms = self.elapsed_ms(),
            error = %error,
            "Operation failed"
        );
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

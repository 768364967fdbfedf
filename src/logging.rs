//! Logging setup
//!
//! The runtime emits `tracing` events under the `trellis` target: module and
//! provider registration and route composition at DEBUG, per-request dispatch
//! at TRACE, recovered panics and serializer failures at ERROR.
//!
//! # Features
//!
//! - `logging` - emit events (default)
//! - `logging-json` - JSON subscriber, for log aggregation
//! - `logging-pretty` - human-readable subscriber, for development
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis::logging;
//!
//! logging::init();
//!
//! logging::builder()
//!     .info()
//!     .trellis_only()
//!     .pretty()
//!     .init();
//! ```

#[cfg(feature = "logging")]
use tracing::Level;

/// Target of every event the runtime emits
pub const TARGET: &str = "trellis";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    /// Single line per event
    Compact,
}

#[cfg(feature = "logging")]
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    from_env: bool,
    with_file: bool,
    with_line_number: bool,
    with_thread_ids: bool,
}

#[cfg(feature = "logging")]
impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Json,
            target: None,
            from_env: false,
            with_file: false,
            with_line_number: false,
            with_thread_ids: false,
        }
    }
}

#[cfg(feature = "logging")]
impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Per-request dispatch events become visible at this level
    pub fn trace(self) -> Self {
        self.with_level(Level::TRACE)
    }

    pub fn debug(self) -> Self {
        self.with_level(Level::DEBUG)
    }

    pub fn info(self) -> Self {
        self.with_level(Level::INFO)
    }

    /// Only show events from `target`
    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Only show events from the runtime itself
    pub fn trellis_only(self) -> Self {
        self.with_target_filter(TARGET)
    }

    /// Let `RUST_LOG` override the configured level and target
    pub fn from_env(mut self) -> Self {
        self.from_env = true;
        self
    }

    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    pub fn with_thread_ids(mut self) -> Self {
        self.with_thread_ids = true;
        self
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    fn directive(&self) -> String {
        match self.target {
            Some(target) => format!("{}={}", target, self.level),
            None => self.level.to_string(),
        }
    }

    /// Install the subscriber. Returns false if one was already installed.
    ///
    /// JSON output needs the `logging-json` feature and falls back to the
    /// plain formatter without it.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn init(self) -> bool {
        use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

        let filter = if self.from_env {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()))
        } else {
            EnvFilter::new(self.directive())
        };

        let base = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_thread_ids(self.with_thread_ids)
            .with_target(true);

        let layer: Box<dyn Layer<Registry> + Send + Sync> = match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => base.json().boxed(),
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => base.boxed(),
            LogFormat::Pretty => base.pretty().boxed(),
            LogFormat::Compact => base.compact().boxed(),
        };

        tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .try_init()
            .is_ok()
    }

    /// No subscriber available without `logging-json` or `logging-pretty`
    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn init(self) -> bool {
        false
    }
}

#[cfg(feature = "logging")]
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// JSON when `logging-json` is enabled, pretty otherwise
#[cfg(feature = "logging")]
pub fn init() -> bool {
    if cfg!(feature = "logging-json") {
        init_json()
    } else {
        init_pretty()
    }
}

/// ```json
/// {"timestamp":"2026-01-01T00:00:00.000Z","level":"DEBUG","target":"trellis","fields":{"message":"Building module","module":"app"}}
/// ```
#[cfg(feature = "logging")]
pub fn init_json() -> bool {
    builder().json().debug().from_env().init()
}

#[cfg(feature = "logging")]
pub fn init_pretty() -> bool {
    builder().pretty().debug().from_env().init()
}

/// Runtime events only, filtering out every other crate
#[cfg(feature = "logging")]
pub fn init_trellis_only() -> bool {
    builder().trellis_only().debug().init()
}

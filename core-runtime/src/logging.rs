//! # Logging
//!
//! [`init_logging`] installs the process-wide `tracing` subscriber used by
//! every engine crate. It is made of three layers:
//!
//! - an `EnvFilter` built from the configured level (engine crates only,
//!   dependencies stay at `warn`) or from explicit directives
//! - one stdout formatter (`pretty`, `json` or `compact`)
//! - an optional forwarder that mirrors each event into a host
//!   [`LoggerSink`], masking credential fields first
//!
//! ```ignore
//! use bridge_traits::time::LogLevel;
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//!
//! init_logging(
//!     LoggingConfig::from_env()
//!         .with_format(LogFormat::Json)
//!         .with_level(LogLevel::Debug),
//! )?;
//! tracing::info!(target: "core_sync", pending = 3, "Replay scheduled");
//! ```

use crate::error::{Error, Result};

use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Filter directives, e.g. `core_sync=trace,core_cache=debug`.
pub const LOG_ENV: &str = "FOLIO_LOG";
/// `pretty`, `json` or `compact`.
pub const LOG_FORMAT_ENV: &str = "FOLIO_LOG_FORMAT";

const MASK: &str = "[REDACTED]";

const ENGINE_TARGETS: &[&str] = &[
    "core_runtime",
    "core_library",
    "core_network",
    "core_cache",
    "core_sync",
    "core_service",
    "provider_folio_api",
    "bridge_desktop",
];

const CREDENTIAL_FIELDS: &[&str] = &["token", "bearer", "authorization", "secret", "password"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(Error::Config(format!("unknown log format '{}'", other))),
        }
    }
}

#[derive(Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level applied to the engine crates when no directives are given.
    pub level: LogLevel,
    /// Raw `EnvFilter` directives; override `level` entirely.
    pub directives: Option<String>,
    pub sink: Option<Arc<dyn LoggerSink>>,
    /// Mask credential fields before they reach the sink.
    pub redact: bool,
    /// Log span enter/exit (pretty) or include the span list (json).
    pub spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            directives: None,
            sink: None,
            redact: true,
            spans: false,
        }
    }
}

impl LoggingConfig {
    /// Defaults overridden by `FOLIO_LOG` and `FOLIO_LOG_FORMAT`.
    ///
    /// An unparseable format falls back to the default one.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(directives) = std::env::var(LOG_ENV) {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }
        if let Some(format) = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|raw| raw.parse().ok())
        {
            config.format = format;
        }
        config
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_redaction(mut self, redact: bool) -> Self {
        self.redact = redact;
        self
    }

    pub fn with_spans(mut self, spans: bool) -> Self {
        self.spans = spans;
        self
    }

    fn filter(&self) -> Result<EnvFilter> {
        let directives = match &self.directives {
            Some(directives) => directives.clone(),
            None => {
                let level = level_name(self.level);
                std::iter::once("warn".to_string())
                    .chain(ENGINE_TARGETS.iter().map(|t| format!("{}={}", t, level)))
                    .collect::<Vec<_>>()
                    .join(",")
            }
        };
        EnvFilter::try_new(&directives)
            .map_err(|e| Error::Config(format!("invalid log directives '{}': {}", directives, e)))
    }
}

/// Install the global subscriber. A second call fails with
/// [`Error::Config`].
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = config.filter()?;

    let output = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_span_events(if config.spans {
                FmtSpan::ACTIVE
            } else {
                FmtSpan::NONE
            })
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(config.spans)
            .with_span_list(config.spans)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
    };

    let forwarder = config.sink.clone().map(|sink| SinkForwarder {
        sink,
        redact: config.redact,
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .with(forwarder)
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {}", e)))
}

fn level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn from_tracing(level: &tracing::Level) -> LogLevel {
    match *level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

/// Mask `value` when `field` names a credential or the value is a bearer
/// header.
///
/// ```
/// use core_runtime::logging::redact_if_sensitive;
///
/// assert_eq!(redact_if_sensitive("bearer_token", "abc"), "[REDACTED]");
/// assert_eq!(redact_if_sensitive("book_id", "42"), "42");
/// ```
pub fn redact_if_sensitive(field: &str, value: &str) -> String {
    let field = field.to_ascii_lowercase();
    let credential_field = CREDENTIAL_FIELDS.iter().any(|name| field.contains(name));
    let bearer_value = value
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("bearer "));
    if credential_field || bearer_value {
        MASK.to_string()
    } else {
        value.to_string()
    }
}

/// Mirrors events into the host sink.
struct SinkForwarder {
    sink: Arc<dyn LoggerSink>,
    redact: bool,
}

impl SinkForwarder {
    fn deliver(&self, entry: LogEntry) {
        let sink = Arc::clone(&self.sink);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = sink.log(entry).await {
                        eprintln!("log sink rejected entry: {}", e);
                    }
                });
            }
            Err(_) => {
                if let Err(e) = futures::executor::block_on(sink.log(entry)) {
                    eprintln!("log sink rejected entry: {}", e);
                }
            }
        }
    }
}

impl<S> Layer<S> for SinkForwarder
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = from_tracing(metadata.level());
        if level < self.sink.min_level() {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let message = fields
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());
        let mut entry = LogEntry::new(level, metadata.target(), message);
        for (name, value) in fields.values {
            let value = if self.redact {
                redact_if_sensitive(&name, &value)
            } else {
                value
            };
            entry = entry.with_field(name, value);
        }
        if let Some(span) = ctx.lookup_current() {
            entry = entry.with_span_id(span.name());
        }

        self.deliver(entry);
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    values: Vec<(String, String)>,
}

impl FieldCollector {
    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.values.push((field.name().to_string(), value));
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{:?}", value));
    }
}

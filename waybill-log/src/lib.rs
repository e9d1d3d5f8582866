//! Waybill logging.
//!
//! Small, dependency-light logging used by every Waybill crate. Output goes to
//! stderr as JSON lines by default so relay logs can be shipped as-is.
//!
//! # Usage
//!
//! ```rust
//! use waybill_log::{debug, error, info, warn};
//!
//! info!("Relay started");
//! debug!(target: "waybill::relay", "Polling schema {}", "company");
//!
//! // Structured fields are rendered as a `fields` object in JSON output
//! // and as `key=value` pairs in the text formats.
//! let id = "3f1c";
//! warn!({ "schema" => "company", "record_id" => id }, "Record left in PROCESSING");
//! error!(target: "waybill::broker", { "exchange" => "tms.events" }, "Message returned");
//! ```
//!
//! # Environment Variables
//!
//! - `WAYBILL_DEBUG=1` - Enable debug logging
//! - `WAYBILL_LOG_LEVEL=trace|debug|info|warn|error|off` - Minimum level
//! - `WAYBILL_LOG_FORMAT=json|pretty|compact` - Output format
//! - `WAYBILL_LOG_TIMESTAMPS=1|0` - Include timestamps in text formats

use once_cell::sync::Lazy;
use std::env;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Most verbose
    Trace = 0,
    /// Diagnostic detail
    Debug = 1,
    /// Normal operation
    Info = 2,
    /// Something an operator should look at
    Warn = 3,
    /// Failures
    Error = 4,
    /// Logging disabled
    Off = 5,
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Upper-case level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Off => "OFF",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            _ => Level::Off,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// One JSON object per line
    Json,
    /// Human readable, one line per entry with the full timestamp
    Pretty,
    /// Short time, single-letter level
    Compact,
}

impl Format {
    /// Parse a format name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Some(Format::Json),
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            _ => None,
        }
    }
}

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

/// Logging configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `WAYBILL_DEBUG`
    pub debug: bool,
    /// Minimum level at startup
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether text formats carry timestamps
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            timestamps: true,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl LogConfig {
    /// Read configuration from `WAYBILL_*` variables and apply it to the
    /// global level.
    pub fn from_env() -> Self {
        let debug = env_flag("WAYBILL_DEBUG").unwrap_or(false);

        let level = env::var("WAYBILL_LOG_LEVEL")
            .ok()
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = env::var("WAYBILL_LOG_FORMAT")
            .ok()
            .and_then(|s| Format::parse(&s))
            .unwrap_or(Format::Json);

        let timestamps = env_flag("WAYBILL_LOG_TIMESTAMPS").unwrap_or(true);

        DEBUG_ENABLED.store(debug, Ordering::SeqCst);
        LOG_LEVEL.store(level as u8, Ordering::SeqCst);

        Self {
            debug,
            level,
            format,
            timestamps,
        }
    }
}

/// Force configuration to be read now instead of on the first log call.
pub fn init() {
    Lazy::force(&CONFIG);
}

/// The active configuration.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

/// Whether `WAYBILL_DEBUG` (or [`set_debug`]) is on.
#[inline]
pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Whether entries at `level` are emitted.
#[inline]
pub fn is_level_enabled(level: Level) -> bool {
    if level == Level::Debug && is_debug_enabled() {
        return true;
    }
    level != Level::Off && level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Current minimum level.
pub fn current_level() -> Level {
    Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Change the minimum level at runtime.
pub fn set_level(level: Level) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Toggle debug mode at runtime.
pub fn set_debug(enabled: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    if enabled && current_level() > Level::Debug {
        set_level(Level::Debug);
    }
}

#[doc(hidden)]
pub fn log(level: Level, target: &str, message: &str) {
    log_with_fields(level, target, message, &[]);
}

#[doc(hidden)]
pub fn log_with_fields(level: Level, target: &str, message: &str, fields: &[(&str, String)]) {
    if !is_level_enabled(level) {
        return;
    }

    let line = render(config(), level, target, message, fields);
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{}", line);
}

/// Render one entry in the configured format.
fn render(
    config: &LogConfig,
    level: Level,
    target: &str,
    message: &str,
    fields: &[(&str, String)],
) -> String {
    match config.format {
        Format::Json => render_json(level, target, message, fields),
        Format::Pretty => {
            let mut out = String::new();
            if config.timestamps {
                out.push_str(&chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f ").to_string());
            }
            out.push_str(&format!("{:5} [{}] {}", level.as_str(), target, message));
            push_pairs(&mut out, fields);
            out
        }
        Format::Compact => {
            let mut out = String::new();
            if config.timestamps {
                out.push_str(&chrono::Local::now().format("%H:%M:%S ").to_string());
            }
            let letter = level.as_str().chars().next().unwrap_or('?');
            out.push_str(&format!("{} {}: {}", letter, target, message));
            push_pairs(&mut out, fields);
            out
        }
    }
}

fn push_pairs(out: &mut String, fields: &[(&str, String)]) {
    for (key, value) in fields {
        out.push(' ');
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
}

#[cfg(feature = "json")]
fn render_json(level: Level, target: &str, message: &str, fields: &[(&str, String)]) -> String {
    let mut entry = serde_json::Map::new();
    entry.insert("timestamp".into(), chrono::Utc::now().to_rfc3339().into());
    entry.insert("level".into(), level.as_str().into());
    entry.insert("target".into(), target.into());
    entry.insert("message".into(), message.into());
    if !fields.is_empty() {
        let object: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), serde_json::Value::String(v.clone())))
            .collect();
        entry.insert("fields".into(), serde_json::Value::Object(object));
    }
    serde_json::Value::Object(entry).to_string()
}

#[cfg(not(feature = "json"))]
fn render_json(level: Level, target: &str, message: &str, fields: &[(&str, String)]) -> String {
    let mut out = format!(
        r#"{{"timestamp":"{}","level":"{}","target":"{}","message":"{}""#,
        chrono::Utc::now().to_rfc3339(),
        level.as_str(),
        escape_json(target),
        escape_json(message)
    );
    if !fields.is_empty() {
        let pairs: Vec<String> = fields
            .iter()
            .map(|(k, v)| format!(r#""{}":"{}""#, escape_json(k), escape_json(v)))
            .collect();
        out.push_str(&format!(r#","fields":{{{}}}"#, pairs.join(",")));
    }
    out.push('}');
    out
}

#[cfg(not(feature = "json"))]
fn escape_json(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if c.is_control() => result.push_str(&format!("\\u{:04x}", c as u32)),
            c => result.push(c),
        }
    }
    result
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log {
    ($level:expr, $target:expr, { $($key:literal => $value:expr),* $(,)? }, $($arg:tt)+) => {
        if $crate::is_level_enabled($level) {
            $crate::log_with_fields(
                $level,
                $target,
                &format!($($arg)+),
                &[$(($key, $value.to_string())),*],
            );
        }
    };
    ($level:expr, $target:expr, $($arg:tt)+) => {
        if $crate::is_level_enabled($level) {
            $crate::log($level, $target, &format!($($arg)+));
        }
    };
}

/// Log at trace level.
#[macro_export]
macro_rules! trace {
    (target: $target:expr, $($rest:tt)+) => { $crate::__log!($crate::Level::Trace, $target, $($rest)+) };
    ($($rest:tt)+) => { $crate::__log!($crate::Level::Trace, module_path!(), $($rest)+) };
}

/// Log at debug level. Also emitted when `WAYBILL_DEBUG=1` regardless of
/// the configured level.
#[macro_export]
macro_rules! debug {
    (target: $target:expr, $($rest:tt)+) => { $crate::__log!($crate::Level::Debug, $target, $($rest)+) };
    ($($rest:tt)+) => { $crate::__log!($crate::Level::Debug, module_path!(), $($rest)+) };
}

/// Log at info level.
#[macro_export]
macro_rules! info {
    (target: $target:expr, $($rest:tt)+) => { $crate::__log!($crate::Level::Info, $target, $($rest)+) };
    ($($rest:tt)+) => { $crate::__log!($crate::Level::Info, module_path!(), $($rest)+) };
}

/// Log at warn level.
#[macro_export]
macro_rules! warn {
    (target: $target:expr, $($rest:tt)+) => { $crate::__log!($crate::Level::Warn, $target, $($rest)+) };
    ($($rest:tt)+) => { $crate::__log!($crate::Level::Warn, module_path!(), $($rest)+) };
}

/// Log at error level.
#[macro_export]
macro_rules! error {
    (target: $target:expr, $($rest:tt)+) => { $crate::__log!($crate::Level::Error, $target, $($rest)+) };
    ($($rest:tt)+) => { $crate::__log!($crate::Level::Error, module_path!(), $($rest)+) };
}

#[cfg(feature = "tracing")]
pub mod tracing_compat {
    //! Bridge for applications that already install a `tracing` subscriber.

    use super::*;

    /// A subscriber filtered at the level from `WAYBILL_LOG_LEVEL`, unless
    /// `RUST_LOG` overrides it.
    pub fn subscriber() -> impl tracing::Subscriber {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{EnvFilter, fmt};

        let level = match config().level {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(false))
    }
}

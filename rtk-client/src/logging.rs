//! # Injected Logging
//!
//! Purpose: Give the facade and the subscriber an explicit logging handle
//! instead of relying on whatever global subscriber happens to be installed.
//!
//! ## Design Principles
//! 1. **Explicit Dependency**: A `Logger` is passed in at construction. It
//!    optionally carries a `tracing::Dispatch`; without one, events go to the
//!    global default.
//! 2. **Thread Hand-Off**: Background threads install the same dispatch as
//!    their thread default, so listener logs land where the caller's do.
//! 3. **Bounded Output**: Logged values are truncated to `max_log_size`.

use std::fmt;

use rtk_common::Value;
use tracing::dispatcher::{self, DefaultGuard, Dispatch};
use tracing::Level;

/// Logging capability shared by the facade and the subscriber.
#[derive(Clone)]
pub struct Logger {
    dispatch: Option<Dispatch>,
    log_values: bool,
    max_log_size: usize,
}

impl Default for Logger {
    fn default() -> Self {
        Logger {
            dispatch: None,
            log_values: true,
            max_log_size: 256,
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("injected", &self.dispatch.is_some())
            .field("log_values", &self.log_values)
            .field("max_log_size", &self.max_log_size)
            .finish()
    }
}

impl Logger {
    /// Logs through the global default subscriber.
    pub fn global() -> Self {
        Self::default()
    }

    /// Logs through the given dispatch.
    pub fn with_dispatch(dispatch: Dispatch) -> Self {
        Logger {
            dispatch: Some(dispatch),
            ..Self::default()
        }
    }

    /// Self-contained stderr logger capped at `level`.
    pub fn stderr(level: Level) -> Self {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_target(false)
            .finish();
        Self::with_dispatch(Dispatch::new(subscriber))
    }

    /// Logger that discards everything.
    pub fn disabled() -> Self {
        Self::with_dispatch(Dispatch::none())
    }

    /// Sets whether values are included in info-level log lines.
    pub fn log_values(mut self, enabled: bool) -> Self {
        self.log_values = enabled;
        self
    }

    pub fn max_log_size(mut self, max: usize) -> Self {
        self.max_log_size = max;
        self
    }

    pub fn values_enabled(&self) -> bool {
        self.log_values
    }

    /// Runs `f` with this logger's dispatch as the current default.
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.dispatch {
            Some(dispatch) => dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }

    /// Installs the dispatch for the current thread until the guard drops.
    pub fn install(&self) -> Option<DefaultGuard> {
        self.dispatch.as_ref().map(dispatcher::set_default)
    }

    /// Formats a value for a log line.
    pub fn format(&self, value: &Value) -> String {
        format_value(value, self.max_log_size)
    }
}

/// Renders `value` for logging, truncated to `max_size` characters.
pub fn format_value(value: &Value, max_size: usize) -> String {
    match value {
        Value::Bytes(data) => match std::str::from_utf8(data) {
            Ok(text) => truncate(text, max_size),
            Err(_) => format!("<bytes: {} bytes hidden>", data.len()),
        },
        Value::Str(text) => truncate(text, max_size),
        Value::Dict(map) => {
            let rendered = value.to_string();
            if rendered.chars().count() > max_size.saturating_mul(2) {
                format!("<dict: {} keys>", map.len())
            } else {
                truncate(&rendered, max_size)
            }
        }
        Value::List(items) | Value::Tuple(items) => {
            let rendered = value.to_string();
            if rendered.chars().count() > max_size.saturating_mul(2) {
                format!("<{}: {} items>", value.kind_name(), items.len())
            } else {
                truncate(&rendered, max_size)
            }
        }
        other => {
            let rendered = other.to_string();
            let len = rendered.chars().count();
            if len > max_size.saturating_mul(2) {
                format!("<{} object: {} chars>", other.kind_name(), len)
            } else {
                truncate(&rendered, max_size)
            }
        }
    }
}

/// Cuts `text` to `max_size` characters, noting the original length.
pub fn truncate(text: &str, max_size: usize) -> String {
    let len = text.chars().count();
    if len <= max_size {
        return text.to_string();
    }
    let head: String = text.chars().take(max_size).collect();
    format!("{}(...) <string: {} chars, truncated>", head, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtk_common::NumericArray;
    use std::sync::{Arc, Mutex};

    #[test]
    fn truncates_long_strings() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello(...) <string: 11 chars, truncated>");
        assert_eq!(truncate("測試字串", 2), "測試(...) <string: 4 chars, truncated>");
    }

    #[test]
    fn hides_binary_payloads() {
        assert_eq!(format_value(&Value::Bytes(vec![0xff, 0x00]), 10), "<bytes: 2 bytes hidden>");
        assert_eq!(format_value(&Value::Bytes(b"text".to_vec()), 10), "text");
    }

    #[test]
    fn summarises_large_containers() {
        let list = Value::List((0..100).map(Value::Int).collect());
        assert_eq!(format_value(&list, 10), "<list: 100 items>");

        let dict = Value::dict((0..50).map(|i| (format!("key{}", i), Value::Int(i))));
        assert_eq!(format_value(&dict, 10), "<dict: 50 keys>");

        let small = Value::List(vec![Value::Int(1)]);
        assert_eq!(format_value(&small, 10), "[1]");
    }

    #[test]
    fn summarises_large_objects() {
        let array = Value::from(NumericArray::vector(vec![0.5; 64]));
        assert_eq!(format_value(&array, 8), format!("<numpy object: {} chars>", array.to_string().len()));
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn scope_routes_events_to_injected_dispatch() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let logger = Logger::with_dispatch(Dispatch::new(subscriber));

        logger.scope(|| tracing::info!("routed event"));

        let output = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("routed event"));
    }

    #[test]
    fn stderr_logger_caps_at_its_level() {
        let logger = Logger::stderr(Level::DEBUG);
        assert!(format!("{:?}", logger).contains("injected: true"));

        let (debug, trace) = logger.scope(|| {
            tracing::debug!("stderr logger ready");
            (tracing::enabled!(Level::DEBUG), tracing::enabled!(Level::TRACE))
        });
        assert!(debug);
        assert!(!trace);
    }
}

//! Category-bound logger injected into plug-ins.
//!
//! A plug-in compiled into its own shared library has its own copy of
//! `tracing`'s global dispatcher, so records emitted there with the `tracing`
//! macros never reach the host's subscriber. Plug-ins log through
//! [`PlugInLogger`] instead, which forwards every record to a [`LogSink`]
//! owned by the host.

use std::fmt;
use std::sync::Arc;

use tracing::Level;

/// Host-side destination for plug-in log records.
pub trait LogSink: Send + Sync {
    /// Emits one record.
    fn log(&self, level: Level, category: &str, message: &str);

    /// Returns whether records at `level` for `category` would be kept.
    fn enabled(&self, _level: Level, _category: &str) -> bool {
        true
    }
}

/// A sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _level: Level, _category: &str, _message: &str) {}

    fn enabled(&self, _level: Level, _category: &str) -> bool {
        false
    }
}

/// Logger bound to a category, usually the plug-in's type name.
#[derive(Clone)]
pub struct PlugInLogger {
    category: Arc<str>,
    sink: Arc<dyn LogSink>,
}

impl PlugInLogger {
    /// Creates a logger for `category` writing to `sink`.
    pub fn new(category: impl Into<Arc<str>>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            category: category.into(),
            sink,
        }
    }

    /// Creates a logger that discards every record.
    pub fn detached(category: impl Into<Arc<str>>) -> Self {
        Self::new(category, Arc::new(NullSink))
    }

    /// Returns the logger's category.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Emits `message` at `level`; formatting is skipped when the sink
    /// would drop the record.
    pub fn log(&self, level: Level, message: impl fmt::Display) {
        if self.sink.enabled(level, &self.category) {
            self.sink.log(level, &self.category, &message.to_string());
        }
    }

    pub fn trace(&self, message: impl fmt::Display) {
        self.log(Level::TRACE, message);
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(Level::DEBUG, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(Level::INFO, message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.log(Level::WARN, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(Level::ERROR, message);
    }
}

impl fmt::Debug for PlugInLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlugInLogger")
            .field("category", &self.category)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        records: Mutex<Vec<(Level, String, String)>>,
    }

    impl LogSink for Recording {
        fn log(&self, level: Level, category: &str, message: &str) {
            self.records
                .lock()
                .unwrap()
                .push((level, category.to_string(), message.to_string()));
        }

        fn enabled(&self, level: Level, _category: &str) -> bool {
            level <= Level::INFO
        }
    }

    #[test]
    fn test_records_carry_category() {
        let sink = Arc::new(Recording::default());
        let logger = PlugInLogger::new("poller::Poller", sink.clone());

        logger.info("started");
        logger.warn(format_args!("retry {}", 2));

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].1, "poller::Poller");
        assert_eq!(records[1], (Level::WARN, "poller::Poller".into(), "retry 2".into()));
    }

    #[test]
    fn test_disabled_levels_are_skipped() {
        let sink = Arc::new(Recording::default());
        let logger = PlugInLogger::new("poller", sink.clone());

        logger.debug("noise");
        logger.trace("more noise");

        assert!(sink.records.lock().unwrap().is_empty());
    }
}

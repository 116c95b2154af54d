//! Capturing logger shared by unit tests
//!
//! The logger is global, so tests using it are `#[serial]`. Entries are also
//! filtered by the installing thread, so non-serial tests running alongside
//! cannot leak entries into a capture.

use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use crate::engine::Engine;
use crate::log::{LogEntry, Logger, LogSeverity};

struct CaptureLogger {
    thread: ThreadId,
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Logger for CaptureLogger {
    fn log(&self, entry: &LogEntry) {
        if std::thread::current().id() == self.thread {
            self.entries.lock().unwrap().push(entry.clone());
        }
    }
}

/// Installs a capturing logger; restores the default logger on drop
pub(crate) struct LogCapture {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl LogCapture {
    pub(crate) fn install() -> Self {
        let entries = Arc::new(Mutex::new(Vec::new()));
        Engine::set_logger(CaptureLogger {
            thread: std::thread::current().id(),
            entries: entries.clone(),
        });
        Self { entries }
    }

    pub(crate) fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, severity: LogSeverity) -> usize {
        self.entries().iter().filter(|e| e.severity == severity).count()
    }

    pub(crate) fn errors(&self) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.severity == LogSeverity::Error)
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl Drop for LogCapture {
    fn drop(&mut self) {
        Engine::reset_logger();
    }
}

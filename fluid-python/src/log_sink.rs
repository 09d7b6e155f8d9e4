//! Forward session logs to a Python callable.

use pyo3::prelude::*;
use tracing::Level;

use fluid_core::{LogRecord, LogSink};

/// Calls `callback(level, target, message)` for every event.
pub struct PyLogSink {
    callback: Py<PyAny>,
}

impl PyLogSink {
    pub fn new(callback: Py<PyAny>) -> Self {
        Self { callback }
    }
}

impl LogSink for PyLogSink {
    fn log(&self, record: &LogRecord<'_>) {
        Python::attach(|py| {
            let args = (level_name(&record.level), record.target, record.message);
            // Raising from a log callback must not fail the session call.
            if let Err(e) = self.callback.call1(py, args) {
                e.print(py);
            }
        });
    }
}

pub fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(level_name(&Level::WARN), "warn");
        assert_eq!(level_name(&Level::TRACE), "trace");
    }
}

//! `fluid.Session`: Python wrapper around a core session.
//!
//! Native entry points can block, so every call that reaches the service
//! runs with the GIL released. The session lock is only ever taken with the
//! GIL released: a session holding the lock may need the GIL to run a `log`
//! callback.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyString};
use pyo3_stub_gen::derive::*;

use fluid_core::{
    Applied, DEFAULT_ID_CAPACITY, Session, SessionConfig, TaskKind, TaskState,
};

use crate::errors::to_py_err;
use crate::log_sink::PyLogSink;

#[gen_stub_pyclass]
#[pyclass(name = "Session", module = "fluid")]
pub struct PySession {
    inner: Mutex<Session>,
}

impl PySession {
    fn lock(&self) -> MutexGuard<'_, Session> {
        // A panic mid-call leaves the session itself consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whether an inbound event changed a record.
fn applied(outcome: Applied) -> bool {
    matches!(outcome, Applied::Transitioned { .. })
}

#[gen_stub_pymethods]
#[pymethods]
impl PySession {
    /// Load the service artifact from `directory`.
    ///
    /// `log`, if given, is called as `log(level, target, message)` for every
    /// diagnostic this session emits.
    #[new]
    #[pyo3(signature = (directory, artifact=None, id_capacity=DEFAULT_ID_CAPACITY, log=None))]
    fn new(
        py: Python<'_>,
        directory: PathBuf,
        artifact: Option<String>,
        id_capacity: usize,
        log: Option<Py<PyAny>>,
    ) -> PyResult<Self> {
        let mut config = SessionConfig::new(directory).with_id_capacity(id_capacity);
        if let Some(artifact) = artifact {
            config = config.with_artifact(artifact);
        }
        if let Some(callback) = log {
            config = config.with_log_sink(Arc::new(PyLogSink::new(callback)));
        }

        let session = py.detach(|| Session::initialize(config)).map_err(to_py_err)?;
        Ok(Self {
            inner: Mutex::new(session),
        })
    }

    fn connect(&self, py: Python<'_>, address: &str, port: u16) -> PyResult<()> {
        py.detach(|| self.lock().connect(address, port))
            .map_err(to_py_err)
    }

    fn disconnect(&self, py: Python<'_>) {
        py.detach(|| self.lock().disconnect())
    }

    fn is_connected(&self, py: Python<'_>) -> bool {
        py.detach(|| self.lock().is_connected())
    }

    /// Submit a task and return its correlation id. `kind` is "R" or "Julia".
    fn submit(&self, py: Python<'_>, kind: &str, function: &str, #[gen_stub(override_type(type_repr = "bytes"))] data: &[u8]) -> PyResult<String> {
        let kind: TaskKind = kind
            .parse()
            .map_err(|e: fluid_core::envelope::UnknownTaskKind| PyValueError::new_err(e.to_string()))?;
        let data = data.to_vec();

        py.detach(|| {
            self.lock()
                .submit(kind, function, data)
                .map(|handle| handle.id().to_string())
        })
        .map_err(to_py_err)
    }

    /// Apply a result envelope. Returns whether it completed a task.
    fn deliver(&self, py: Python<'_>, #[gen_stub(override_type(type_repr = "bytes"))] envelope: &[u8]) -> PyResult<bool> {
        py.detach(|| self.lock().deliver(envelope))
            .map(applied)
            .map_err(to_py_err)
    }

    /// Mark a task as started. Returns whether the record changed.
    fn mark_running(&self, py: Python<'_>, id: &str) -> bool {
        applied(py.detach(|| self.lock().mark_running(id)))
    }

    /// Mark a task as failed. Returns whether the record changed.
    fn fail_task(&self, py: Python<'_>, id: &str, diagnostic: &str) -> bool {
        applied(py.detach(|| self.lock().fail_task(id, diagnostic)))
    }

    /// "queued", "running", "complete", "failed", or None for unknown ids.
    fn status(&self, py: Python<'_>, id: &str) -> Option<&'static str> {
        py.detach(|| self.lock().state(id))
            .map(|state| state.status().as_str())
    }

    /// Consume a finished task as `(status, payload)`.
    ///
    /// The payload is the result bytes for "complete", the diagnostic for
    /// "failed" and None while the task is still pending (in which case the
    /// record is kept).
    fn take<'py>(
        &self,
        py: Python<'py>,
        id: &str,
    ) -> Option<(&'static str, Option<Bound<'py, PyAny>>)> {
        let state = py.detach(|| self.lock().take(id))?;
        let status = state.status().as_str();
        let payload = match state {
            TaskState::Complete(value) => Some(PyBytes::new(py, &value).into_any()),
            TaskState::Failed(diagnostic) => Some(PyString::new(py, &diagnostic).into_any()),
            TaskState::Queued | TaskState::Running => None,
        };
        Some((status, payload))
    }

    /// Disconnect and release the artifact. Safe to call more than once.
    fn shutdown(&self, py: Python<'_>) {
        py.detach(|| self.lock().shutdown())
    }

    fn __enter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    #[pyo3(signature = (*_args))]
    fn __exit__(&self, py: Python<'_>, _args: &Bound<'_, pyo3::types::PyTuple>) -> bool {
        self.shutdown(py);
        false
    }

    fn __repr__(&self, py: Python<'_>) -> String {
        py.detach(|| {
            let session = self.lock();
            match session.endpoint() {
                Some(endpoint) => format!("Session(connected={endpoint})"),
                None if session.is_shut_down() => "Session(shut down)".to_string(),
                None => "Session(disconnected)".to_string(),
            }
        })
    }
}

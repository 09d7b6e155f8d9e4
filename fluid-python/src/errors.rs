//! Python exception hierarchy for `FluidError`.

use pyo3::PyErr;
use pyo3::exceptions::{PyException, PyValueError};

use fluid_core::FluidError as CoreError;

pyo3_stub_gen::create_exception!(fluid, FluidError, PyException, "Base class for fluid errors.");

pyo3_stub_gen::create_exception!(
    fluid,
    LoadError,
    FluidError,
    "The service artifact could not be loaded or is missing entry points."
);

pyo3_stub_gen::create_exception!(
    fluid,
    NotConnectedError,
    FluidError,
    "The session is not connected to a compute service."
);

pyo3_stub_gen::create_exception!(fluid, UnboundError, FluidError, "The session has been shut down.");

pyo3_stub_gen::create_exception!(
    fluid,
    ServiceConnectionError,
    FluidError,
    "The service refused the connection."
);

pyo3_stub_gen::create_exception!(
    fluid,
    SubmitRejectedError,
    FluidError,
    "The service refused a task submission."
);

pyo3_stub_gen::create_exception!(
    fluid,
    DuplicateCorrelationIdError,
    FluidError,
    "The service returned a correlation id that is already outstanding."
);

pyo3_stub_gen::create_exception!(
    fluid,
    EnvelopeDecodeError,
    FluidError,
    "A result envelope was malformed."
);

pyo3_stub_gen::create_exception!(
    fluid,
    InvalidCorrelationIdError,
    FluidError,
    "The service accepted a task but returned a correlation id that is not valid UTF-8."
);

pub fn to_py_err(err: CoreError) -> PyErr {
    let message = err.to_string();
    match err {
        CoreError::Load(_) => LoadError::new_err(message),
        CoreError::NotConnected => NotConnectedError::new_err(message),
        CoreError::Unbound => UnboundError::new_err(message),
        CoreError::ConnectionError { .. } => ServiceConnectionError::new_err(message),
        CoreError::SubmitRejected { .. } => SubmitRejectedError::new_err(message),
        CoreError::InvalidArgument(_) => PyValueError::new_err(message),
        CoreError::DuplicateCorrelationId(_) => DuplicateCorrelationIdError::new_err(message),
        CoreError::Decode(_) => EnvelopeDecodeError::new_err(message),
        CoreError::InvalidCorrelationId { .. } => InvalidCorrelationIdError::new_err(message),
    }
}

//! fluid-python: PyO3 bindings for the fluid client bridge.

mod errors;
mod log_sink;
mod session;

use pyo3::prelude::*;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize process-wide tracing with FLUID_LOG and LOG_FORMAT support.
///
/// Sessions created with a `log` callback log through it instead.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("FLUID_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("info") => "info",
            Ok("error") => "error",
            _ => "warn",
        };
        EnvFilter::new(format!("fluid={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[pymodule]
fn fluid(m: &Bound<'_, PyModule>) -> PyResult<()> {
    init_tracing();

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add("DEFAULT_ID_CAPACITY", fluid_core::DEFAULT_ID_CAPACITY)?;

    m.add_class::<session::PySession>()?;

    let py = m.py();
    m.add("FluidError", py.get_type::<errors::FluidError>())?;
    m.add("LoadError", py.get_type::<errors::LoadError>())?;
    m.add("NotConnectedError", py.get_type::<errors::NotConnectedError>())?;
    m.add("UnboundError", py.get_type::<errors::UnboundError>())?;
    m.add(
        "ServiceConnectionError",
        py.get_type::<errors::ServiceConnectionError>(),
    )?;
    m.add("SubmitRejectedError", py.get_type::<errors::SubmitRejectedError>())?;
    m.add(
        "DuplicateCorrelationIdError",
        py.get_type::<errors::DuplicateCorrelationIdError>(),
    )?;
    m.add("EnvelopeDecodeError", py.get_type::<errors::EnvelopeDecodeError>())?;
    m.add(
        "InvalidCorrelationIdError",
        py.get_type::<errors::InvalidCorrelationIdError>(),
    )?;

    Ok(())
}

pyo3_stub_gen::define_stub_info_gatherer!(stub_info);

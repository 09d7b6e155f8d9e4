//! fluid: client bridge for a native R/Julia compute service.
//!
//! Loads the service's client artifact at runtime, submits tasks as Avro
//! envelopes and tracks each task from submission to its result.

mod config;
mod error;
mod feed;
mod log_sink;
mod tracker;

pub mod binding;
pub mod envelope;
pub mod ffi;
pub mod session;

pub use binding::{NativeBinding, ServiceApi};
pub use config::{DEFAULT_ID_CAPACITY, SessionConfig};
pub use envelope::{DecodeError, TaskKind, TaskRequest, TaskResult, TaskSpec};
pub use error::{ErrorCode, FluidError, LoadError, Result};
pub use feed::{FeedStats, run_result_feed};
pub use log_sink::{LogRecord, LogSink, SinkLayer, sink_dispatch};
pub use session::{Endpoint, Session};
pub use tracker::{
    Applied, EARLY_EVENT_CAPACITY, TaskEvent, TaskHandle, TaskRecord, TaskState, TaskStatus,
    TaskTracker, TrackerError,
};

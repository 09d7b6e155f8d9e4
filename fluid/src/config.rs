//! Session configuration.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::level_filters::LevelFilter;

use crate::binding::DEFAULT_ARTIFACT;
use crate::error::FluidError;
use crate::log_sink::LogSink;

/// Default correlation id buffer size handed to the submit entry points.
pub const DEFAULT_ID_CAPACITY: usize = 128;

pub const ENV_LIB_DIR: &str = "FLUID_LIB_DIR";
pub const ENV_ARTIFACT: &str = "FLUID_ARTIFACT";
pub const ENV_ID_CAPACITY: &str = "FLUID_ID_CAPACITY";

#[derive(Clone)]
pub struct SessionConfig {
    /// Directory holding the service artifact.
    pub directory: PathBuf,
    /// Artifact base name, without platform prefix or suffix.
    pub artifact: String,
    pub id_capacity: usize,
    pub log_sink: Option<Arc<dyn LogSink>>,
    pub log_level: LevelFilter,
}

impl SessionConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            artifact: DEFAULT_ARTIFACT.to_string(),
            id_capacity: DEFAULT_ID_CAPACITY,
            log_sink: None,
            log_level: LevelFilter::INFO,
        }
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = artifact.into();
        self
    }

    pub fn with_id_capacity(mut self, capacity: usize) -> Self {
        self.id_capacity = capacity;
        self
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    /// Read `FLUID_LIB_DIR` (required), `FLUID_ARTIFACT` and `FLUID_ID_CAPACITY`.
    pub fn from_env() -> Result<Self, FluidError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FluidError> {
        let directory = lookup(ENV_LIB_DIR)
            .filter(|dir| !dir.is_empty())
            .ok_or_else(|| FluidError::InvalidArgument(format!("{ENV_LIB_DIR} is not set")))?;
        let mut config = Self::new(directory);

        if let Some(artifact) = lookup(ENV_ARTIFACT).filter(|a| !a.is_empty()) {
            config = config.with_artifact(artifact);
        }
        if let Some(raw) = lookup(ENV_ID_CAPACITY) {
            let capacity = raw.trim().parse::<usize>().map_err(|e| {
                FluidError::InvalidArgument(format!("{ENV_ID_CAPACITY}={raw:?}: {e}"))
            })?;
            config = config.with_id_capacity(capacity);
        }

        config.validate()?;
        Ok(config)
    }

    /// The id buffer must hold at least one byte and fit a C `int`.
    pub fn validate(&self) -> Result<(), FluidError> {
        if self.id_capacity == 0 || i32::try_from(self.id_capacity).is_err() {
            return Err(FluidError::InvalidArgument(format!(
                "id capacity must be between 1 and {}, got {}",
                i32::MAX,
                self.id_capacity
            )));
        }
        if self.artifact.is_empty() {
            return Err(FluidError::InvalidArgument("artifact name is empty".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("directory", &self.directory)
            .field("artifact", &self.artifact)
            .field("id_capacity", &self.id_capacity)
            .field("log_sink", &self.log_sink.is_some())
            .field("log_level", &self.log_level)
            .finish()
    }
}

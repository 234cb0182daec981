use crate::context::JobContext;
use async_trait::async_trait;
use polaris_error::{ErrorCodes, PolarisError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Free-form job options as they appear in the config file.
pub type JobOption = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JobConfig {
    pub name: String,
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub option: JobOption,
}

impl JobConfig {
    pub fn enabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enable: true,
            option: JobOption::new(),
        }
    }

    pub fn with_option(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.option.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum JobConfigError {
    #[error("Invalid option for job [{job}]: {source}")]
    Decode {
        job: String,
        source: serde_json::Error,
    },
    #[error("Invalid option for job [{job}]: {reason}")]
    Invalid { job: String, reason: String },
}

impl PolarisError for JobConfigError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

/// Decodes a job's option map into its typed config. Missing keys take the
/// config's defaults.
pub fn decode_option<T: DeserializeOwned>(job: &str, option: &JobOption) -> Result<T, JobConfigError> {
    serde_json::from_value(serde_json::Value::Object(option.clone())).map_err(|source| {
        JobConfigError::Decode {
            job: job.to_string(),
            source,
        }
    })
}

/// A periodic maintenance task.
///
/// `init` runs once before the job is scheduled. On every tick the runner
/// calls `execute` when this node is the leader and `clear` otherwise, so a
/// job never acts on state it accumulated during an earlier term.
#[async_trait]
pub trait MaintainJob: Send {
    fn init(&mut self, option: &JobOption) -> Result<(), JobConfigError>;

    async fn execute(&mut self, ctx: &JobContext);

    /// Drop any state kept between ticks.
    fn clear(&mut self);

    fn interval(&self) -> Duration;
}

pub mod instance;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub use instance::{
    generate_instance_id, rotated_consumer_group_id, workload_name, Environment, FilterType,
    Instance, Value, ID_PREFIX, OFFSET_SMALLEST, WORKLOAD_NAME_PREFIX,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Workload not found: {0}")]
    WorkloadNotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// How the deployment backend treats a workload that exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Keep the workload running; restart it whenever it stops.
    #[default]
    Always,
    /// Run the workload to completion once.
    Never,
}

impl RestartPolicy {
    pub fn restarts(&self) -> bool {
        matches!(self, RestartPolicy::Always)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
    pub details: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: HashMap<String, String>) -> Self {
        self.details = Some(details);
        self
    }
}

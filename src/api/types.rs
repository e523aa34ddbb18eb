//! Request and response bodies.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    /// Free-form generation parameter, e.g. a company name.
    pub subject: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub status: String,
    pub task_id: String,
    pub artifact_ref: String,
}

/// Query string for the stream endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamQuery {
    /// Overrides the subject recorded when the task was created.
    pub subject: Option<String>,
    /// Total artifacts including the first one.
    pub total: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortResponse {
    pub status: String,
    pub message: String,
    pub total_generated: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub active_tasks: usize,
    pub producer: String,
}

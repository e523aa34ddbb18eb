//! HTTP API for task creation, streaming, and cancellation.
//!
//! ## Endpoints
//! - `POST /api/generate` - produce the first artifact and create a task
//! - `GET /api/stream/:task_id` - stream the remaining artifacts over SSE
//! - `DELETE /api/abort/:task_id` - request cooperative cancellation
//! - `GET /api/tasks/:task_id` - snapshot of a live task
//! - `GET /api/health` - liveness and active task count

mod routes;
mod types;

pub use routes::{router, serve, AppState};
pub use types::*;

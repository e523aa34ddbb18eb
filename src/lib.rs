//! # Artifact Stream
//!
//! A cancellable, incrementally streamed artifact generation service.
//!
//! This library provides:
//! - An HTTP API that produces the first artifact of a task synchronously
//! - Server-Sent Events streaming of the remaining artifacts
//! - Cooperative cancellation checked before and after every artifact
//!
//! ## Architecture
//!
//! ```text
//!   POST /api/generate        GET /api/stream/{id}       DELETE /api/abort/{id}
//!          │                          │                          │
//!          ▼                          ▼                          ▼
//!   ┌──────────────┐         ┌─────────────────┐        ┌─────────────────┐
//!   │GenerationTask│────────▶│  StreamEncoder  │        │  TaskRegistry   │
//!   │ (state mach.)│         │  (SSE frames)   │        │  active = false │
//!   └──────┬───────┘         └─────────────────┘        └────────┬────────┘
//!          │ produce(subject, index, should_abort)               │
//!          ▼                                                     │
//!   ┌──────────────────────┐    AbortCoordinator::predicate      │
//!   │ IncrementalProducer  │◀────────────────────────────────────┘
//!   └──────────────────────┘
//! ```
//!
//! ## Modules
//! - `task`: registry, abort coordination and the per-task state machine
//! - `producer`: the producer contract and its implementations
//! - `stream`: SSE encoding of task events
//! - `api`: HTTP routes

pub mod api;
pub mod config;
pub mod producer;
pub mod stream;
pub mod task;

pub use config::Config;

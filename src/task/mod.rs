//! Task module - generation tasks, their shared registry, and cancellation.
//!
//! This module is designed around a few invariants:
//! - The registry exclusively owns every task record; callers only ever see
//!   cloned snapshots
//! - Registry locks are held for a single read or update, never across an await
//! - Cancellation is cooperative and observed only where the abort predicate is
//!   checked

mod abort;
mod error;
pub mod generation;
pub mod registry;

pub use abort::{never_abort, AbortCoordinator, AbortPredicate};
pub use error::TaskError;
pub use generation::{FirstArtifact, GenerationEvent, GenerationTask, Outcome, TaskPhase};
pub use registry::{StreamGuard, TaskRegistry, TaskSnapshot};

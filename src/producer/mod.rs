//! Producer module - the capability that yields one artifact per call.
//!
//! Artifact production is an external collaborator: this crate never knows
//! what an artifact is, only its opaque reference string. Implementations must
//! consult the abort predicate during costly work and return
//! [`Production::Aborted`] instead of a finished artifact once it fires.

mod command;
mod exclusive;
mod simulated;

pub use command::CommandProducer;
pub use exclusive::ExclusiveProducer;
pub use simulated::SimulatedProducer;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ProducerConfig;
use crate::task::AbortPredicate;

/// Result of one production call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Production {
    /// The artifact was completed; holds its opaque reference.
    Produced(String),
    /// The abort predicate fired before the artifact was finished.
    Aborted,
}

/// Producer failures unrelated to cancellation.
#[derive(Debug, Clone, Error)]
pub enum ProducerError {
    #[error("Failed to launch producer: {0}")]
    Launch(String),

    #[error("Producer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Producer returned no artifact reference")]
    EmptyOutput,

    #[error("{0}")]
    Other(String),
}

/// Yields one artifact per invocation.
#[async_trait]
pub trait IncrementalProducer: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Produce artifact `index` for `subject`.
    ///
    /// `should_abort` must be re-checked at sub-artifact granularity.
    async fn produce(
        &self,
        subject: &str,
        index: u32,
        should_abort: AbortPredicate,
    ) -> Result<Production, ProducerError>;
}

/// Shared handle to a producer.
pub type ProducerRef = Arc<dyn IncrementalProducer>;

/// Build the producer described by the configuration.
pub fn build_producer(config: &ProducerConfig, exclusive: bool) -> ProducerRef {
    let producer: ProducerRef = match config {
        ProducerConfig::Simulated { steps, step_delay } => {
            Arc::new(SimulatedProducer::new(*steps, *step_delay))
        }
        ProducerConfig::Command {
            program,
            args,
            poll_interval,
        } => Arc::new(CommandProducer::new(
            program.clone(),
            args.clone(),
            *poll_interval,
        )),
    };

    if exclusive {
        Arc::new(ExclusiveProducer::new(producer))
    } else {
        producer
    }
}

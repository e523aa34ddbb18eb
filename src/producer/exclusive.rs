//! Serializes access to a producer that is not safe to call concurrently.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{IncrementalProducer, ProducerRef, Production, ProducerError};
use crate::task::AbortPredicate;

/// How often a queued caller re-checks its abort predicate.
const QUEUE_POLL: Duration = Duration::from_millis(25);

/// Wraps a producer so at most one `produce` call runs at a time, across all
/// tasks. Waiters whose task is aborted while queued leave the queue without
/// producing.
pub struct ExclusiveProducer {
    inner: ProducerRef,
    gate: Mutex<()>,
}

impl ExclusiveProducer {
    pub fn new(inner: ProducerRef) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }
}

#[async_trait]
impl IncrementalProducer for ExclusiveProducer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn produce(
        &self,
        subject: &str,
        index: u32,
        should_abort: AbortPredicate,
    ) -> Result<Production, ProducerError> {
        let lock = self.gate.lock();
        tokio::pin!(lock);

        // Keep the same pending lock future so the queue position survives polling.
        let _permit = loop {
            tokio::select! {
                permit = &mut lock => break permit,
                _ = tokio::time::sleep(QUEUE_POLL) => {
                    if should_abort() {
                        tracing::debug!(index, "Left producer queue after abort");
                        return Ok(Production::Aborted);
                    }
                }
            }
        };
        if should_abort() {
            return Ok(Production::Aborted);
        }
        self.inner.produce(subject, index, should_abort).await
    }
}

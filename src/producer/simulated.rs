//! Stand-in producer that spends a fixed number of timed steps per artifact.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{IncrementalProducer, Production, ProducerError};
use crate::task::AbortPredicate;

/// Simulates costly, step-wise production (one predicate check per step).
#[derive(Debug, Clone)]
pub struct SimulatedProducer {
    steps: u32,
    step_delay: Duration,
}

impl SimulatedProducer {
    pub fn new(steps: u32, step_delay: Duration) -> Self {
        Self { steps, step_delay }
    }
}

#[async_trait]
impl IncrementalProducer for SimulatedProducer {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn produce(
        &self,
        subject: &str,
        index: u32,
        should_abort: AbortPredicate,
    ) -> Result<Production, ProducerError> {
        for step in 0..self.steps {
            if should_abort() {
                tracing::debug!(index, step, "Simulated production aborted");
                return Ok(Production::Aborted);
            }
            tokio::time::sleep(self.step_delay).await;
        }

        Ok(Production::Produced(format!(
            "{}_{}_{}",
            slug(subject),
            Utc::now().timestamp(),
            index
        )))
    }
}

/// Lowercase ASCII alphanumerics joined by single dashes.
fn slug(subject: &str) -> String {
    let mut out = String::with_capacity(subject.len());
    for c in subject.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "artifact".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::never_abort;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_slug() {
        assert_eq!(slug("Acme Corp."), "acme-corp");
        assert_eq!(slug("  Sunshine!!  Bakery "), "sunshine-bakery");
        assert_eq!(slug("???"), "artifact");
    }

    #[tokio::test]
    async fn test_produces_reference_with_index() {
        let producer = SimulatedProducer::new(3, Duration::ZERO);
        let result = producer.produce("Acme", 4, never_abort()).await.unwrap();

        match result {
            Production::Produced(artifact_ref) => {
                assert!(artifact_ref.starts_with("acme_"));
                assert!(artifact_ref.ends_with("_4"));
            }
            Production::Aborted => panic!("unexpected abort"),
        }
    }

    #[tokio::test]
    async fn test_stops_at_the_step_the_predicate_fires() {
        let producer = SimulatedProducer::new(10, Duration::ZERO);
        let checks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&checks);
        let should_abort: AbortPredicate =
            Arc::new(move || counter.fetch_add(1, Ordering::SeqCst) >= 3);

        let result = producer.produce("Acme", 1, should_abort).await.unwrap();

        assert_eq!(result, Production::Aborted);
        assert_eq!(checks.load(Ordering::SeqCst), 4);
    }
}

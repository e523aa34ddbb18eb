//! Producer backed by an external command, one process per artifact.
//!
//! The command is invoked as `<program> <args..> <subject> <index>` and must
//! print the artifact reference as the last non-empty line of stdout. While the
//! child runs, the abort predicate is polled; once it fires the child is killed
//! and the artifact is reported as not produced.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::{IncrementalProducer, Production, ProducerError};
use crate::task::AbortPredicate;

#[derive(Debug, Clone)]
pub struct CommandProducer {
    program: String,
    args: Vec<String>,
    poll_interval: Duration,
}

impl CommandProducer {
    pub fn new(program: impl Into<String>, args: Vec<String>, poll_interval: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            poll_interval,
        }
    }
}

/// Drain a pipe in the background so a chatty child never blocks on a full pipe.
fn drain<R>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

/// Wait for a drained pipe. Output is decoded lossily; producers may emit
/// arbitrary bytes before the reference line.
async fn collect(
    pipe: JoinHandle<std::io::Result<Vec<u8>>>,
    name: &str,
) -> Result<String, ProducerError> {
    let bytes = pipe
        .await
        .map_err(|e| ProducerError::Other(format!("Failed to collect {}: {}", name, e)))?
        .map_err(|e| ProducerError::Other(format!("Failed to read {}: {}", name, e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[async_trait]
impl IncrementalProducer for CommandProducer {
    fn name(&self) -> &str {
        &self.program
    }

    async fn produce(
        &self,
        subject: &str,
        index: u32,
        should_abort: AbortPredicate,
    ) -> Result<Production, ProducerError> {
        if should_abort() {
            return Ok(Production::Aborted);
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(subject)
            .arg(index.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProducerError::Launch(format!("{}: {}", self.program, e)))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = tokio::time::sleep(self.poll_interval) => None,
            };

            match exited {
                Some(status) => {
                    break status
                        .map_err(|e| ProducerError::Other(format!("Failed to wait: {}", e)))?
                }
                None if should_abort() => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(program = %self.program, "Failed to kill producer: {}", e);
                    }
                    tracing::debug!(program = %self.program, index, "Command production aborted");
                    return Ok(Production::Aborted);
                }
                None => {}
            }
        };

        let stdout = collect(stdout, "stdout").await?;
        let stderr = collect(stderr, "stderr").await?;

        if !status.success() {
            return Err(ProducerError::Failed {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(|line| Production::Produced(line.to_string()))
            .ok_or(ProducerError::EmptyOutput)
    }
}

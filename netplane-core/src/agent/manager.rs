use super::commands::{Answer, BatchAnswer, Command, CommandBatch, CommandResult, OnError};
use crate::config::AgentConfig;
use crate::error::{NetplaneError, NetplaneResult};
use crate::types::HostId;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Delivery of commands to host agents
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Deliver `command` to the agent on `target` and wait for its answer
    async fn send(&self, target: HostId, command: &Command) -> NetplaneResult<Answer>;

    fn is_connected(&self, target: HostId) -> bool;
}

/// Timeout-bounded command delivery on top of an [`AgentTransport`]
#[derive(Clone)]
pub struct AgentManager {
    transport: Arc<dyn AgentTransport>,
    config: AgentConfig,
}

impl AgentManager {
    pub fn new(transport: Arc<dyn AgentTransport>, config: AgentConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn is_connected(&self, target: HostId) -> bool {
        self.transport.is_connected(target)
    }

    /// Send with the configured command timeout
    pub async fn send(&self, target: HostId, command: &Command) -> NetplaneResult<Answer> {
        self.send_with_timeout(target, command, self.config.command_timeout)
            .await
    }

    /// Send one command; a timeout or disconnected target is `ResourceUnavailable`
    pub async fn send_with_timeout(
        &self,
        target: HostId,
        command: &Command,
        timeout: Duration,
    ) -> NetplaneResult<Answer> {
        if !self.transport.is_connected(target) {
            return Err(NetplaneError::unavailable(
                "agent",
                format!("{} is not connected", target),
            ));
        }

        debug!(target = %target, command = command.name(), "Sending agent command");
        match tokio::time::timeout(timeout, self.transport.send(target, command)).await {
            Ok(result) => result,
            Err(_) => Err(NetplaneError::unavailable(
                "agent",
                format!(
                    "{} on {} timed out after {:?}",
                    command.name(),
                    target,
                    timeout
                ),
            )),
        }
    }

    /// Send a batch in constructed order.
    ///
    /// Rejected and undelivered commands are both recorded. Under
    /// `OnError::Continue` every command is still sent; under `OnError::Stop`
    /// the first failure skips the rest.
    pub async fn send_batch(&self, target: HostId, batch: &CommandBatch) -> BatchAnswer {
        let mut results = Vec::with_capacity(batch.len());
        let mut skipped = Vec::new();

        for (index, command) in batch.commands.iter().enumerate() {
            let (answer, error) = match self.send(target, command).await {
                Ok(answer) => {
                    if !answer.success {
                        warn!(
                            target = %target,
                            command = command.name(),
                            index,
                            details = answer.details.as_deref().unwrap_or(""),
                            "Agent rejected command"
                        );
                    }
                    (answer, None)
                }
                Err(e) => {
                    warn!(target = %target, command = command.name(), index, error = %e, "Command not delivered");
                    (Answer::failed(e.to_string()), Some(e.category()))
                }
            };
            let failed = !answer.success;
            results.push(CommandResult {
                index,
                command: command.name().to_string(),
                answer,
                error,
            });

            if failed && batch.on_error == OnError::Stop {
                skipped.extend(
                    batch.commands[index + 1..]
                        .iter()
                        .map(|c| c.name().to_string()),
                );
                break;
            }
        }

        BatchAnswer {
            target,
            results,
            skipped,
        }
    }

    /// Fire-and-log variant: any failure becomes a warning and `None`
    pub async fn easy_send(&self, target: HostId, command: &Command) -> Option<Answer> {
        match self.send(target, command).await {
            Ok(answer) if answer.success => Some(answer),
            Ok(answer) => {
                warn!(
                    target = %target,
                    command = command.name(),
                    details = answer.details.as_deref().unwrap_or(""),
                    "Command failed"
                );
                None
            }
            Err(e) => {
                warn!(target = %target, command = command.name(), error = %e, "Unable to send command");
                None
            }
        }
    }
}

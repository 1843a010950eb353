//! Factories creating configured message queues by name.

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::providers::MemoryMessageQueue;
use crate::queue::{MessageQueue, QueueDependencies};
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;

/// Creates message queues on demand
pub trait MessageQueueFactory: Send + Sync {
    /// Create a closed queue with the given name
    fn create_queue(&self, name: &str) -> Result<Arc<dyn MessageQueue>, QueueError>;
}

/// Factory for [`MemoryMessageQueue`] instances sharing one configuration.
///
/// Every queue gets the factory's configuration and dependencies; the name
/// passed to [`create_queue`](MessageQueueFactory::create_queue) replaces any
/// configured name.
#[derive(Debug, Clone, Default)]
pub struct MemoryMessageQueueFactory {
    config: QueueConfig,
    dependencies: QueueDependencies,
}

impl MemoryMessageQueueFactory {
    /// Create a factory whose queues resolve connection and credential
    /// parameters from `config`
    pub fn new(config: QueueConfig) -> Self {
        let dependencies = QueueDependencies::from_config(&config);
        Self {
            config,
            dependencies,
        }
    }

    pub fn with_dependencies(mut self, dependencies: QueueDependencies) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

impl MessageQueueFactory for MemoryMessageQueueFactory {
    fn create_queue(&self, name: &str) -> Result<Arc<dyn MessageQueue>, QueueError> {
        let config = self.config.clone().with_queue(name);
        let queue = MemoryMessageQueue::from_config(&config, self.dependencies.clone())?;

        debug!(queue = name, "Created memory message queue");
        Ok(Arc::new(queue))
    }
}

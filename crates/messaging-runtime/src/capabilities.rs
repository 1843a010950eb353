//! Capability descriptor for queue backends.
//!
//! Every backend declares up front which operations it supports. Queue
//! implementations look the requested operation up with
//! [`MessagingCapabilities::ensure`] before running it, so an unsupported call
//! fails with [`QueueError::Unsupported`] instead of reaching the backend.

use crate::error::QueueError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(test)]
#[path = "capabilities_tests.rs"]
mod tests;

/// Queue operations that are subject to a capability check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOperation {
    MessageCount,
    Send,
    Receive,
    Peek,
    PeekBatch,
    RenewLock,
    Abandon,
    DeadLetter,
    Clear,
}

impl QueueOperation {
    /// All gated operations, in declaration order
    pub const ALL: [QueueOperation; 9] = [
        Self::MessageCount,
        Self::Send,
        Self::Receive,
        Self::Peek,
        Self::PeekBatch,
        Self::RenewLock,
        Self::Abandon,
        Self::DeadLetter,
        Self::Clear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageCount => "message_count",
            Self::Send => "send",
            Self::Receive => "receive",
            Self::Peek => "peek",
            Self::PeekBatch => "peek_batch",
            Self::RenewLock => "renew_lock",
            Self::Abandon => "abandon",
            Self::DeadLetter => "dead_letter",
            Self::Clear => "clear",
        }
    }
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable set of flags describing what a queue backend can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagingCapabilities {
    message_count: bool,
    send: bool,
    receive: bool,
    peek: bool,
    peek_batch: bool,
    renew_lock: bool,
    abandon: bool,
    dead_letter: bool,
    clear: bool,
}

impl MessagingCapabilities {
    /// Create a descriptor from all nine flags
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        message_count: bool,
        send: bool,
        receive: bool,
        peek: bool,
        peek_batch: bool,
        renew_lock: bool,
        abandon: bool,
        dead_letter: bool,
        clear: bool,
    ) -> Self {
        Self {
            message_count,
            send,
            receive,
            peek,
            peek_batch,
            renew_lock,
            abandon,
            dead_letter,
            clear,
        }
    }

    /// Every operation supported
    pub const fn all() -> Self {
        Self::new(true, true, true, true, true, true, true, true, true)
    }

    /// No operation supported
    pub const fn none() -> Self {
        Self::new(false, false, false, false, false, false, false, false, false)
    }

    pub fn can_message_count(&self) -> bool {
        self.message_count
    }

    pub fn can_send(&self) -> bool {
        self.send
    }

    pub fn can_receive(&self) -> bool {
        self.receive
    }

    pub fn can_peek(&self) -> bool {
        self.peek
    }

    pub fn can_peek_batch(&self) -> bool {
        self.peek_batch
    }

    pub fn can_renew_lock(&self) -> bool {
        self.renew_lock
    }

    pub fn can_abandon(&self) -> bool {
        self.abandon
    }

    pub fn can_dead_letter(&self) -> bool {
        self.dead_letter
    }

    pub fn can_clear(&self) -> bool {
        self.clear
    }

    /// Check whether the given operation is supported
    pub fn supports(&self, operation: QueueOperation) -> bool {
        match operation {
            QueueOperation::MessageCount => self.message_count,
            QueueOperation::Send => self.send,
            QueueOperation::Receive => self.receive,
            QueueOperation::Peek => self.peek,
            QueueOperation::PeekBatch => self.peek_batch,
            QueueOperation::RenewLock => self.renew_lock,
            QueueOperation::Abandon => self.abandon,
            QueueOperation::DeadLetter => self.dead_letter,
            QueueOperation::Clear => self.clear,
        }
    }

    /// Fail with [`QueueError::Unsupported`] when the operation is not supported
    pub fn ensure(&self, operation: QueueOperation, queue: &str) -> Result<(), QueueError> {
        if self.supports(operation) {
            Ok(())
        } else {
            Err(QueueError::Unsupported {
                queue: queue.to_string(),
                operation,
            })
        }
    }

    /// Same descriptor with the operations a local message cache can serve
    /// turned on (count, receive, peek, batch peek and clear).
    pub fn with_cached_operations(self) -> Self {
        Self {
            message_count: true,
            receive: true,
            peek: true,
            peek_batch: true,
            clear: true,
            ..self
        }
    }
}

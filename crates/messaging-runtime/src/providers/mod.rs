//! Queue implementations.
//!
//! This module contains concrete implementations of the
//! [`MessageQueue`](crate::queue::MessageQueue) trait.

pub mod memory;

pub use memory::MemoryMessageQueue;

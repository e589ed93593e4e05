//! Transactional outbox processing.
//!
//! Events written during business transactions are drained here: a
//! periodic task claims pending rows with `FOR UPDATE SKIP LOCKED`,
//! dispatches them to a pluggable sink, and commits the status
//! transitions atomically. Bounded retry; terminal `failed` state;
//! cancellation never drops an event mid-commit.

pub mod processor;

pub use processor::{EventProcessor, OutboxConfig, OutboxProcessor, ProcessFailure};

//! The poll loop driving collection and delivery
//!
//! Every interval the loop reads the runtime and the metrics endpoint
//! concurrently, builds one document per container, accumulates documents
//! across cycles and flushes them to the store when the batch is due.

mod r#loop;

#[cfg(test)]
mod tests;

pub use r#loop::{backoff_delay, PollConfig, PollLoop, PollLoopBuilder};

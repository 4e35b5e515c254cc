//! Test support for freshbox cached suppliers.
//!
//! - [`ScriptedProducer`] returns scripted values and failures, counts calls
//!   and can hold calls open to exercise concurrent callers
//! - [`tracing`] captures supplier spans for assertions

pub mod producer;
pub mod tracing;

pub use producer::{ScriptedError, ScriptedProducer};

#![warn(missing_docs)]
//! # freshbox-core
//!
//! Core traits and types for self-refreshing cached values.
//!
//! This crate defines the vocabulary shared by the `freshbox` supplier and
//! the code that feeds it:
//!
//! - **Produce** fresh values ([`Producer`])
//! - **Describe** when values need a refresh ([`RefreshResult`], [`Freshness`])
//! - **Measure** time ([`Clock`])
//! - **Decide** what happens when a stale refresh fails ([`StaleValueBehavior`])
//!
//! ## Feature Flags
//!
//! - `test-helpers` - Enable [`ManualClock`](clock::ManualClock) for tests
//!

pub mod clock;
pub mod policy;
pub mod producer;
pub mod value;

pub use clock::{Clock, SystemClock};
pub use policy::StaleValueBehavior;
pub use producer::Producer;
pub use value::{Freshness, RefreshResult, RefreshResultBuilder};

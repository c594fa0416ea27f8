//! Observability utilities for agent runs.
//!
//! Provides the markdown run [`Logger`] shared by the dispatcher and every
//! execution context.

pub mod logger;

pub use logger::Logger;

//! epm — smart-contract package manager.
//!
//! Package definitions are lexed, parsed into jobs and run in order against
//! a [`chain::Blockchain`]. Contracts compile through a content-addressed
//! cache that follows includes recursively.

pub mod chain;
pub mod cli;
pub mod compile;
pub mod core;
pub mod error;
pub mod transport;
pub mod tripwire;

pub use error::{EpmError, Result};

#![deny(missing_docs)]
#![forbid(clippy::unwrap_used)]
#![doc = include_str!("../README.md")]

pub mod cache;
pub mod config;
mod error;
pub mod filter;
pub mod metadata;
pub mod pipeline;
pub mod process;
pub mod server;

pub use error::Error;

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;

//! Subcommand implementations.

pub mod context;
pub mod request;
pub mod serve;

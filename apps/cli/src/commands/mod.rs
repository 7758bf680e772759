//! Command implementations for the tweetsent CLI.

pub mod predict;
pub mod prepare;
pub mod setup;
pub mod train;
pub mod types;

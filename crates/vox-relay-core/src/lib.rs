//! Core types, config, and errors for vox-relay.

pub mod config;
pub mod error;
pub mod types;

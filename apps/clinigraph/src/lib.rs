//! # Clinigraph App
//!
//! Settings loading and CLI commands, shared by the binary and its tests.

pub mod cli;
pub mod settings;

pub use settings::{Overrides, Settings};

//! # Formats Module
//!
//! Serialization formats for graphs. File I/O stays in the app layer.

pub mod json;

pub use json::{GraphDocument, graph_from_json, graph_to_json};

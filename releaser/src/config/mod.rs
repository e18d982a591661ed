//! Configuration

pub mod settings;

pub use settings::{RequestOverrides, Settings};

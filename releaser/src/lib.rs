//! Releaser Library
//!
//! Builds an app with its build tool, uploads the artifact over SFTP and
//! records the release in PostgreSQL.

pub mod build;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod logs;
pub mod models;
pub mod probe;
pub mod store;
pub mod transfer;
pub mod utils;

//! Data models

pub mod release;
pub mod request;

//! Data models for github-catalog

pub mod category;
pub mod config;
pub mod record;

pub use category::*;
pub use config::*;
pub use record::*;

//! Collection Backup Library
//!
//! Snapshots named collections of a primary data store to local storage
//! and an optional object-storage gateway, then restores, validates and
//! prunes those snapshots. A failing collection never takes the others
//! down with it.

pub mod config;
pub mod executor;
pub mod locks;
pub mod metadata;
pub mod models;
pub mod remote;
pub mod restore;
pub mod retention;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod utils;
pub mod validator;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::Config;
pub use service::BackupService;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;

//! Warden Core Library
//!
//! Configuration model and shared error type for the Warden directory
//! authentication connector.

pub mod config;
pub mod error;

pub use config::{
    LdapSection, LoggingConfig, QueryConfig, RealmConfig, RealmName, Scope, ServerUris,
    WardenConfig,
};
pub use error::{Error, Result};

/// Warden version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default number of pooled service connections per realm
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Default lifetime of a pooled connection (1 hour)
pub const DEFAULT_POOL_LIFETIME_SECS: u64 = 3600;

/// Default connect/operation timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

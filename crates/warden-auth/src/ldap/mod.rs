//! LDAP/Active Directory authentication module
//!
//! Provides:
//! - Login resolution by search followed by a verifying bind
//! - Group lookup for a user DN
//! - Per-query result caching in fixed time windows
//! - Server pools and pooled service connections
//! - Realms: independent connector setups within one process

mod connection;
mod connector;
mod escape;
mod manager;
mod query;
mod registry;
mod server;
mod template;
mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use connection::{ConnectionSource, DirectoryConnection};
pub use connector::Connector;
pub use escape::{escape_filter, escape_filter_bytes};
pub use manager::{ConnectionManager, ManagerOptions};
pub use query::{CachedQuery, Clock, SystemClock};
pub use registry::{Registry, GROUPS_PARAMS, LOGIN_PARAMS};
pub use server::{ServerDescriptor, ServerSet};
pub use template::{FilterParams, Template};
pub use types::*;

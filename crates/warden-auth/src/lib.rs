//! Directory authentication for Warden
//!
//! Resolves a login to a distinguished name with a directory search, verifies
//! the password by binding as that DN, and looks up group memberships.

pub mod error;
pub mod ldap;

pub use error::{Error, Result};
pub use ldap::{
    escape_filter, escape_filter_bytes, Attributes, AuthResult, CachedQuery, Clock, ConnectionManager,
    ConnectionSource, Connector, DirectoryConnection, DirectoryEntry, FilterParams,
    ManagerOptions, QuerySpec, Registry, Scope, SearchResult, ServerDescriptor, ServerSet,
    SystemClock,
};

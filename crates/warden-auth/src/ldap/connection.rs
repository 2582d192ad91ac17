//! Directory connection traits
//!
//! [`ConnectionManager`](super::ConnectionManager) is the production
//! implementation; the connector only sees these traits.

use async_trait::async_trait;

use crate::error::Result;

use super::types::{Scope, SearchResult};

/// A bound connection to a directory server.
///
/// Holders must call [`release`](DirectoryConnection::release) once done,
/// on every path. Dropping an unreleased connection still closes it or
/// returns it to its pool.
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Run a search. An absent result set yields an empty vector.
    async fn search(
        &mut self,
        base_dn: &str,
        scope: Scope,
        filter: &str,
        attributes: &[String],
    ) -> Result<SearchResult>;

    /// Unbind, or hand a pooled connection back. Idempotent.
    async fn release(&mut self) -> Result<()>;
}

/// Produces bound directory connections
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    /// With `user` set: a fresh single-use connection bound as that user;
    /// bind failures are returned, not swallowed.
    /// Without: a service connection bound with the default credentials,
    /// taken from the pool when pooling is enabled.
    async fn connection(
        &self,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Box<dyn DirectoryConnection>>;
}

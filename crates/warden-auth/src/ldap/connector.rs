//! Authentication and group lookup for one realm

use std::fmt;
use std::sync::Arc;
use tracing::debug;

use warden_core::RealmName;

use crate::error::{Error, Result};

use super::connection::{ConnectionSource, DirectoryConnection};
use super::query::CachedQuery;
use super::registry::Registry;
use super::template::FilterParams;
use super::types::{AuthResult, DirectoryEntry, SearchResult};

/// Public API of a realm. Obtained from [`Registry::connector`].
#[derive(Clone)]
pub struct Connector {
    registry: Arc<Registry>,
    source: Arc<dyn ConnectionSource>,
    realm: Option<String>,
}

impl Connector {
    pub(crate) fn new(
        registry: Arc<Registry>,
        source: Arc<dyn ConnectionSource>,
        realm: Option<String>,
    ) -> Self {
        Self {
            registry,
            source,
            realm,
        }
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    fn login_query(&self) -> Result<Arc<CachedQuery>> {
        self.registry.login_query(self.realm()).ok_or_else(|| {
            Error::configuration(format!(
                "no login query registered for realm {}",
                RealmName(self.realm())
            ))
        })
    }

    fn groups_query(&self) -> Result<Arc<CachedQuery>> {
        self.registry.groups_query(self.realm()).ok_or_else(|| {
            Error::configuration(format!(
                "no groups query registered for realm {}",
                RealmName(self.realm())
            ))
        })
    }

    /// Run `query` on a service connection, releasing it whatever the
    /// outcome. Failing to obtain the connection is returned as the outer
    /// error.
    async fn search(
        &self,
        query: &CachedQuery,
        params: &FilterParams,
    ) -> Result<Result<SearchResult>> {
        let mut conn = self.source.connection(None, None).await?;
        let result = query.execute(conn.as_mut(), params).await;
        release(conn.as_mut()).await;
        Ok(result)
    }

    /// Check a login and password against the directory.
    ///
    /// The login is resolved to exactly one entry with the login query, then
    /// the password is verified by binding as that entry's DN. Returns
    /// `Denied` for an empty password without contacting the directory.
    pub async fn authenticate(
        &self,
        login: impl AsRef<[u8]>,
        password: &str,
    ) -> Result<AuthResult> {
        let query = self.login_query()?;

        // an empty password would be an unauthenticated bind
        if password.is_empty() {
            debug!("Empty password, denying without directory access");
            return Ok(AuthResult::Denied);
        }

        let params = FilterParams::new()
            .with("login", login)
            .with("password", password);

        let result = match self.search(&query, &params).await? {
            Ok(result) => result,
            Err(e) if e.is_directory() => {
                debug!("Login search failed: {}", e);
                return Ok(AuthResult::Denied);
            }
            Err(e) => return Err(e),
        };

        let entry: DirectoryEntry = match <[DirectoryEntry; 1]>::try_from(result) {
            Ok([entry]) => entry,
            Err(result) => {
                debug!(matches = result.len(), "Login did not resolve to a single entry");
                return Ok(AuthResult::Denied);
            }
        };

        match self.source.connection(Some(&entry.dn), Some(password)).await {
            Ok(mut conn) => release(conn.as_mut()).await,
            Err(e) if e.is_directory() => {
                debug!(dn = %entry.dn, "Bind failed: {}", e);
                return Ok(AuthResult::Denied);
            }
            Err(e) => return Err(e),
        }

        debug!(dn = %entry.dn, "Authenticated");
        Ok(AuthResult::from(entry))
    }

    /// Groups of `user_dn`, as found by the groups query.
    ///
    /// `Ok(None)` means the search failed; an empty vector means the user
    /// has no groups.
    pub async fn list_groups(&self, user_dn: impl AsRef<[u8]>) -> Result<Option<SearchResult>> {
        let query = self.groups_query()?;
        let params = FilterParams::new().with("userdn", user_dn);

        match self.search(&query, &params).await? {
            Ok(groups) => Ok(Some(groups)),
            Err(e) if e.is_directory() => {
                debug!("Groups search failed: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// DNs of the groups of `user_dn`; `None` when the lookup failed.
    pub async fn group_principals(
        &self,
        user_dn: impl AsRef<[u8]>,
    ) -> Result<Option<Vec<String>>> {
        Ok(self
            .list_groups(user_dn)
            .await?
            .map(|groups| groups.into_iter().map(|group| group.dn).collect()))
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("realm", &self.realm)
            .finish()
    }
}

async fn release(conn: &mut dyn DirectoryConnection) {
    if let Err(e) = conn.release().await {
        debug!("Failed to release LDAP connection: {}", e);
    }
}

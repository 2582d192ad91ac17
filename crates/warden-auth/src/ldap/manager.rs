//! LDAP connection management
//!
//! Turns server URIs into connections: pooled service connections bound
//! with the default credentials, and single-use connections bound as a
//! specific user. Supports LDAP, LDAPS and STARTTLS.

use async_trait::async_trait;
use deadpool::managed::{self, Object, Pool, PoolError};
use deadpool::Runtime;
use ldap3::exop::WhoAmI;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, SearchEntry};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use warden_core::{RealmConfig, DEFAULT_POOL_LIFETIME_SECS, DEFAULT_POOL_SIZE, DEFAULT_TIMEOUT_SECS};

use crate::error::{Error, Result};

use super::connection::{ConnectionSource, DirectoryConnection};
use super::server::ServerSet;
use super::types::{ldap_scope, DirectoryEntry, Scope, SearchResult};

/// Attribute list requesting no attributes at all (RFC 4511 `1.1`)
const NO_ATTRIBUTES: &str = "1.1";

/// `noSuchObject`: the base DN does not exist
const RC_NO_SUCH_OBJECT: u32 = 32;

/// Connection manager settings
#[derive(Clone)]
pub struct ManagerOptions {
    /// Default bind DN; anonymous when unset
    pub bind: Option<String>,
    pub passwd: Option<String>,
    /// Upgrade plain `ldap://` connections with STARTTLS
    pub start_tls: bool,
    pub skip_tls_verify: bool,
    pub use_pool: bool,
    pub pool_size: usize,
    /// Age after which a pooled connection is replaced
    pub pool_lifetime: Duration,
    /// Connect and per-operation timeout
    pub timeout: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            bind: None,
            passwd: None,
            start_tls: false,
            skip_tls_verify: false,
            use_pool: true,
            pool_size: DEFAULT_POOL_SIZE,
            pool_lifetime: Duration::from_secs(DEFAULT_POOL_LIFETIME_SECS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ManagerOptions {
    pub fn with_bind(mut self, dn: impl Into<String>, password: impl Into<String>) -> Self {
        self.bind = Some(dn.into());
        self.passwd = Some(password.into());
        self
    }

    pub fn without_pool(mut self) -> Self {
        self.use_pool = false;
        self
    }

    /// Reject settings that would hang the pool or bind without a password
    pub fn validate(&self) -> Result<()> {
        if self.use_pool && self.pool_size == 0 {
            return Err(Error::configuration("pool_size must be greater than zero"));
        }

        match (&self.bind, self.passwd.as_deref()) {
            (Some(_), None | Some("")) => Err(Error::configuration(
                "bind is set but passwd is missing or empty",
            )),
            (None, Some(_)) => Err(Error::configuration("passwd is set but bind is missing")),
            _ => Ok(()),
        }
    }
}

impl From<&RealmConfig> for ManagerOptions {
    fn from(config: &RealmConfig) -> Self {
        Self {
            bind: config.bind.clone(),
            passwd: config.passwd.clone(),
            start_tls: config.start_tls,
            skip_tls_verify: config.skip_tls_verify,
            use_pool: config.use_pool,
            pool_size: config.pool_size,
            pool_lifetime: Duration::from_secs(config.pool_lifetime),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }
}

impl fmt::Debug for ManagerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerOptions")
            .field("bind", &self.bind)
            .field("passwd", &self.passwd.as_ref().map(|_| "******"))
            .field("start_tls", &self.start_tls)
            .field("skip_tls_verify", &self.skip_tls_verify)
            .field("use_pool", &self.use_pool)
            .field("pool_size", &self.pool_size)
            .field("pool_lifetime", &self.pool_lifetime)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Everything needed to open and service-bind a connection
struct Link {
    servers: Arc<ServerSet>,
    options: ManagerOptions,
}

impl Link {
    fn settings(&self, tls_url: bool) -> LdapConnSettings {
        LdapConnSettings::new()
            .set_conn_timeout(self.options.timeout)
            .set_starttls(self.options.start_tls && !tls_url)
            .set_no_tls_verify(self.options.skip_tls_verify)
    }

    /// Connect to the first reachable server, starting at the round-robin
    /// cursor.
    async fn open(&self) -> Result<Ldap> {
        let mut last_err = None;

        for server in self.servers.attempt_order() {
            let url = server.url();
            debug!("Connecting to LDAP server: {}", url);

            match LdapConnAsync::with_settings(self.settings(server.use_tls()), &url).await {
                Ok((conn, ldap)) => {
                    ldap3::drive!(conn);
                    return Ok(ldap);
                }
                Err(e) => {
                    warn!("Failed to connect to LDAP server {}: {}", url, e);
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => Error::Ldap(e),
            None => Error::configuration("no LDAP servers configured"),
        })
    }

    async fn bind(&self, ldap: &mut Ldap, dn: &str, password: &str) -> Result<()> {
        ldap.with_timeout(self.options.timeout)
            .simple_bind(dn, password)
            .await?
            .success()?;
        Ok(())
    }

    /// Open a connection bound with the default credentials, or anonymous
    /// when none are configured
    async fn open_service(&self) -> Result<Ldap> {
        let mut ldap = self.open().await?;
        if let (Some(dn), Some(password)) = (&self.options.bind, &self.options.passwd) {
            self.bind(&mut ldap, dn, password).await?;
        }
        Ok(ldap)
    }
}

/// deadpool manager for service connections
pub(crate) struct LdapPoolManager {
    link: Arc<Link>,
}

#[async_trait]
impl managed::Manager for LdapPoolManager {
    type Type = Ldap;
    type Error = Error;

    async fn create(&self) -> Result<Ldap> {
        self.link.open_service().await
    }

    async fn recycle(
        &self,
        conn: &mut Ldap,
        metrics: &managed::Metrics,
    ) -> managed::RecycleResult<Error> {
        if metrics.created.elapsed() >= self.link.options.pool_lifetime {
            debug!("Recycling LDAP connection past pool lifetime");
            return Err(managed::RecycleError::StaticMessage(
                "connection exceeded pool lifetime",
            ));
        }

        if conn.is_closed() {
            return Err(managed::RecycleError::StaticMessage("connection closed"));
        }

        conn.with_timeout(self.link.options.timeout)
            .extended(WhoAmI)
            .await
            .map(|_| ())
            .map_err(|e| managed::RecycleError::Backend(Error::Ldap(e)))
    }
}

/// Provides bound connections to one or more directory servers
pub struct ConnectionManager {
    link: Arc<Link>,
    pool: Option<Pool<LdapPoolManager>>,
}

impl ConnectionManager {
    pub fn new(servers: ServerSet, options: ManagerOptions) -> Result<Self> {
        options.validate()?;

        let link = Arc::new(Link {
            servers: Arc::new(servers),
            options,
        });

        let pool = if link.options.use_pool {
            let pool = Pool::builder(LdapPoolManager { link: link.clone() })
                .max_size(link.options.pool_size)
                .runtime(Runtime::Tokio1)
                .create_timeout(Some(link.options.timeout))
                .recycle_timeout(Some(link.options.timeout))
                .build()
                .map_err(|e| Error::Pool(format!("Failed to build LDAP pool: {}", e)))?;
            Some(pool)
        } else {
            None
        };

        let manager = Self { link, pool };
        info!("LDAP connection manager ready: {}", manager);
        Ok(manager)
    }

    /// Build from URIs as given in configuration: several entries, or one
    /// string of whitespace-separated URIs.
    pub fn from_uris<I, S>(uris: I, options: ManagerOptions) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let uris: Vec<String> = uris
            .into_iter()
            .flat_map(|s| {
                s.as_ref()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        Self::new(ServerSet::parse(uris)?, options)
    }

    pub fn from_config(config: &RealmConfig) -> Result<Self> {
        Self::from_uris(config.uri.to_vec(), ManagerOptions::from(config))
    }

    pub fn servers(&self) -> &ServerSet {
        &self.link.servers
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.link.options
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    async fn pooled(&self, pool: &Pool<LdapPoolManager>) -> Result<Object<LdapPoolManager>> {
        pool.get().await.map_err(|e| match e {
            PoolError::Backend(e) => e,
            other => Error::Pool(other.to_string()),
        })
    }
}

#[async_trait]
impl ConnectionSource for ConnectionManager {
    async fn connection(
        &self,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Box<dyn DirectoryConnection>> {
        let timeout = self.link.options.timeout;

        if let Some(user) = user {
            let mut ldap = self.link.open().await?;
            self.link
                .bind(&mut ldap, user, password.unwrap_or_default())
                .await?;
            return Ok(Box::new(LdapConnection::owned(ldap, timeout)));
        }

        let handle = match &self.pool {
            Some(pool) => Handle::Pooled(self.pooled(pool).await?),
            None => Handle::Owned(self.link.open_service().await?),
        };

        Ok(Box::new(LdapConnection {
            handle: Some(handle),
            timeout,
        }))
    }
}

impl fmt::Display for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let options = &self.link.options;
        write!(
            f,
            "uri={}, bind={}/{}, pool={}",
            self.link.servers,
            options.bind.as_deref().unwrap_or("<anonymous>"),
            if options.passwd.is_some() { "******" } else { "" },
            match &self.pool {
                Some(_) => options.pool_size.to_string(),
                None => "off".to_string(),
            }
        )
    }
}

enum Handle {
    Pooled(Object<LdapPoolManager>),
    Owned(Ldap),
}

impl Handle {
    fn ldap(&mut self) -> &mut Ldap {
        match self {
            Handle::Pooled(obj) => &mut **obj,
            Handle::Owned(ldap) => ldap,
        }
    }
}

/// A live connection handed out by [`ConnectionManager`]
pub struct LdapConnection {
    handle: Option<Handle>,
    timeout: Duration,
}

impl LdapConnection {
    fn owned(ldap: Ldap, timeout: Duration) -> Self {
        Self {
            handle: Some(Handle::Owned(ldap)),
            timeout,
        }
    }
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
    async fn search(
        &mut self,
        base_dn: &str,
        scope: Scope,
        filter: &str,
        attributes: &[String],
    ) -> Result<SearchResult> {
        let timeout = self.timeout;
        let ldap = self
            .handle
            .as_mut()
            .ok_or_else(|| Error::Directory("connection already released".to_string()))?
            .ldap();

        let attrs: Vec<&str> = if attributes.is_empty() {
            vec![NO_ATTRIBUTES]
        } else {
            attributes.iter().map(|s| s.as_str()).collect()
        };

        let ldap3::SearchResult(entries, result) = ldap
            .with_timeout(timeout)
            .search(base_dn, ldap_scope(scope), filter, attrs)
            .await?;

        if result.rc == RC_NO_SUCH_OBJECT {
            debug!("Search base {} does not exist", base_dn);
            return Ok(Vec::new());
        }
        result.success()?;

        Ok(entries
            .into_iter()
            .map(|entry| DirectoryEntry::from(SearchEntry::construct(entry)))
            .collect())
    }

    async fn release(&mut self) -> Result<()> {
        match self.handle.take() {
            // back to the pool on drop
            Some(Handle::Pooled(obj)) => {
                drop(obj);
                Ok(())
            }
            Some(Handle::Owned(mut ldap)) => {
                ldap.unbind().await?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

//! Per-realm setup: login query, groups query and connection source
//!
//! Built once at startup, then shared read-only behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use warden_core::{LdapSection, RealmName};

use crate::error::{Error, Result};

use super::connection::ConnectionSource;
use super::connector::Connector;
use super::manager::ConnectionManager;
use super::query::{CachedQuery, Clock, SystemClock};
use super::types::QuerySpec;

/// Placeholders a login query may use
pub const LOGIN_PARAMS: &[&str] = &["login", "password"];

/// Placeholders a groups query may use
pub const GROUPS_PARAMS: &[&str] = &["userdn"];

#[derive(Default)]
struct Realm {
    login_query: Option<Arc<CachedQuery>>,
    groups_query: Option<Arc<CachedQuery>>,
    source: Option<Arc<dyn ConnectionSource>>,
}

/// All realms known to the process. `None` is the default realm.
pub struct Registry {
    realms: HashMap<Option<String>, Realm>,
    clock: Arc<dyn Clock>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            realms: HashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Clock for the caches of queries registered after this call
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn realm_mut(&mut self, realm: Option<&str>) -> &mut Realm {
        self.realms.entry(realm.map(str::to_string)).or_default()
    }

    fn realm(&self, realm: Option<&str>) -> Option<&Realm> {
        self.realms.get(&realm.map(str::to_string))
    }

    /// Register the connection source for `realm`
    pub fn setup(&mut self, realm: Option<&str>, source: Arc<dyn ConnectionSource>) {
        self.realm_mut(realm).source = Some(source);
    }

    /// Register the login search for `realm`. The filter may use `{login}`
    /// and `{password}`.
    pub fn set_login_query(
        &mut self,
        realm: Option<&str>,
        spec: QuerySpec,
    ) -> Result<Arc<CachedQuery>> {
        let query = Arc::new(CachedQuery::new(spec, LOGIN_PARAMS)?.with_clock(self.clock.clone()));
        self.realm_mut(realm).login_query = Some(query.clone());
        Ok(query)
    }

    /// Register the groups search for `realm`. The filter may use `{userdn}`.
    pub fn set_groups_query(
        &mut self,
        realm: Option<&str>,
        spec: QuerySpec,
    ) -> Result<Arc<CachedQuery>> {
        let query = Arc::new(CachedQuery::new(spec, GROUPS_PARAMS)?.with_clock(self.clock.clone()));
        self.realm_mut(realm).groups_query = Some(query.clone());
        Ok(query)
    }

    pub fn login_query(&self, realm: Option<&str>) -> Option<Arc<CachedQuery>> {
        self.realm(realm).and_then(|r| r.login_query.clone())
    }

    pub fn groups_query(&self, realm: Option<&str>) -> Option<Arc<CachedQuery>> {
        self.realm(realm).and_then(|r| r.groups_query.clone())
    }

    /// Names of realms with a connection source, default realm first
    pub fn realms(&self) -> Vec<Option<&str>> {
        let mut names: Vec<Option<&str>> = self
            .realms
            .iter()
            .filter(|(_, r)| r.source.is_some())
            .map(|(name, _)| name.as_deref())
            .collect();
        names.sort();
        names
    }

    /// Connector bound to `realm`. Fails when the realm was never set up.
    pub fn connector(self: &Arc<Self>, realm: Option<&str>) -> Result<Connector> {
        let source = self
            .realm(realm)
            .and_then(|r| r.source.clone())
            .ok_or_else(|| {
                Error::configuration(format!(
                    "LDAP connector for realm {} is not set up",
                    RealmName(realm)
                ))
            })?;

        Ok(Connector::new(
            self.clone(),
            source,
            realm.map(str::to_string),
        ))
    }

    /// Build every realm of the `[ldap]` configuration section
    pub fn from_config(section: &LdapSection) -> Result<Self> {
        section.validate()?;

        let mut registry = Self::new();
        for (name, config) in section.iter() {
            let manager = ConnectionManager::from_config(config)?;
            info!("LDAP realm {} set up: {}", RealmName(name), manager);
            registry.setup(name, Arc::new(manager));

            if let Some(query) = &config.login_query {
                let query = registry.set_login_query(name, QuerySpec::login_from_config(query))?;
                info!("LDAP realm {} login query: {}", RealmName(name), query);
            }
            if let Some(query) = &config.groups_query {
                let query = registry.set_groups_query(name, QuerySpec::groups_from_config(query))?;
                info!("LDAP realm {} groups query: {}", RealmName(name), query);
            }
        }

        Ok(registry)
    }
}

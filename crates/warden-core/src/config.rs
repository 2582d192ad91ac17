//! Configuration for Warden
//!
//! Example:
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [ldap.default]
//! uri = "ldaps://dc1.example.com ldaps://dc2.example.com"
//! bind = "CN=ldap user,CN=Users,DC=example,DC=com"
//! passwd = "secret"
//!
//! [ldap.default.login_query]
//! base_dn = "CN=Users,DC=example,DC=com"
//! filter = "(sAMAccountName={login})"
//!
//! [ldap.default.groups_query]
//! base_dn = "CN=Users,DC=example,DC=com"
//! filter = "(&(objectCategory=group)(member={userdn}))"
//! cache_period = 60
//!
//! [ldap.realms.partners]
//! uri = ["ldap://partners.example.com:8389"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::{DEFAULT_POOL_LIFETIME_SECS, DEFAULT_POOL_SIZE, DEFAULT_TIMEOUT_SECS};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub ldap: LdapSection,
}

impl WardenConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        debug!("Loading configuration from {}", path);
        let content = std::fs::read_to_string(path).map_err(crate::Error::ConfigRead)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| crate::Error::ConfigParse(e.to_string()))?;
        config.ldap.validate()?;
        Ok(config)
    }

    /// Build a single-realm configuration from `WARDEN_*` variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("WARDEN_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Ok(uri) = std::env::var("WARDEN_LDAP_URI") {
            let mut realm = RealmConfig::new(ServerUris::One(uri));
            realm.bind = std::env::var("WARDEN_LDAP_BIND").ok();
            realm.passwd = std::env::var("WARDEN_LDAP_PASSWD").ok();
            if let Ok(base_dn) = std::env::var("WARDEN_LDAP_LOGIN_BASE_DN") {
                let filter = std::env::var("WARDEN_LDAP_LOGIN_FILTER")
                    .unwrap_or_else(|_| "(uid={login})".to_string());
                realm.login_query = Some(QueryConfig::new(base_dn, filter));
            }
            if let Ok(base_dn) = std::env::var("WARDEN_LDAP_GROUPS_BASE_DN") {
                let filter = std::env::var("WARDEN_LDAP_GROUPS_FILTER")
                    .unwrap_or_else(|_| "(member={userdn})".to_string());
                realm.groups_query = Some(QueryConfig::new(base_dn, filter));
            }
            config.ldap.default = Some(realm);
        }

        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// ============================================================================
// LDAP
// ============================================================================

/// Directory connector configuration: one unqualified realm plus any number
/// of named ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LdapSection {
    #[serde(default)]
    pub default: Option<RealmConfig>,

    #[serde(default)]
    pub realms: BTreeMap<String, RealmConfig>,
}

impl LdapSection {
    /// Iterate over configured realms; the default realm is yielded as `None`.
    pub fn iter(&self) -> impl Iterator<Item = (Option<&str>, &RealmConfig)> {
        self.default
            .iter()
            .map(|realm| (None, realm))
            .chain(self.realms.iter().map(|(name, realm)| (Some(name.as_str()), realm)))
    }

    pub fn realm(&self, name: Option<&str>) -> Option<&RealmConfig> {
        match name {
            None => self.default.as_ref(),
            Some(name) => self.realms.get(name),
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        for (name, realm) in self.iter() {
            realm
                .validate()
                .map_err(|e| crate::Error::invalid(format!("realm {}: {}", RealmName(name), e)))?;
        }
        Ok(())
    }
}

/// Display helper for an optional realm name.
pub struct RealmName<'a>(pub Option<&'a str>);

impl fmt::Display for RealmName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(name) => write!(f, "'{}'", name),
            None => f.write_str("<default>"),
        }
    }
}

/// One or more server URIs. A single string may hold several
/// whitespace-separated URIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerUris {
    One(String),
    Many(Vec<String>),
}

impl ServerUris {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            ServerUris::One(s) => s.split_whitespace().map(str::to_string).collect(),
            ServerUris::Many(v) => v
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

/// Connection and query settings for one realm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmConfig {
    /// Server URI(s): `ldap://host[:port]`, `ldaps://host[:port]` or a bare host
    pub uri: ServerUris,

    /// Default bind DN for service connections (anonymous when unset)
    #[serde(default)]
    pub bind: Option<String>,

    /// Default bind password
    #[serde(default)]
    pub passwd: Option<String>,

    /// Upgrade plain connections with STARTTLS
    #[serde(default)]
    pub start_tls: bool,

    /// Skip TLS certificate verification (not recommended for production)
    #[serde(default)]
    pub skip_tls_verify: bool,

    /// Pool service connections. When false every search opens a new one.
    #[serde(default = "default_true")]
    pub use_pool: bool,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Seconds before a pooled connection is replaced
    #[serde(default = "default_pool_lifetime")]
    pub pool_lifetime: u64,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub login_query: Option<QueryConfig>,

    #[serde(default)]
    pub groups_query: Option<QueryConfig>,
}

fn default_true() -> bool {
    true
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_pool_lifetime() -> u64 {
    DEFAULT_POOL_LIFETIME_SECS
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl RealmConfig {
    pub fn new(uri: ServerUris) -> Self {
        Self {
            uri,
            bind: None,
            passwd: None,
            start_tls: false,
            skip_tls_verify: false,
            use_pool: true,
            pool_size: DEFAULT_POOL_SIZE,
            pool_lifetime: DEFAULT_POOL_LIFETIME_SECS,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            login_query: None,
            groups_query: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.uri.to_vec().is_empty() {
            return Err("at least one server URI is required".to_string());
        }

        if self.use_pool && self.pool_size == 0 {
            return Err("pool_size must be greater than zero".to_string());
        }

        match (&self.bind, self.passwd.as_deref()) {
            (Some(_), None | Some("")) => {
                return Err("bind is set but passwd is missing or empty".to_string());
            }
            (None, Some(_)) => return Err("passwd is set but bind is missing".to_string()),
            _ => {}
        }

        for (name, query) in [("login_query", &self.login_query), ("groups_query", &self.groups_query)] {
            if let Some(query) = query {
                if query.filter.trim().is_empty() {
                    return Err(format!("{}.filter must not be empty", name));
                }
            }
        }

        Ok(())
    }
}

/// A search registered for a realm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// DN at which the search starts; may contain placeholders
    pub base_dn: String,

    /// Filter template, e.g. `(uid={login})`
    pub filter: String,

    /// Search scope; login queries default to `one`, groups queries to `sub`
    #[serde(default)]
    pub scope: Option<Scope>,

    /// Attributes to return. Empty requests none, `["*"]` requests all.
    #[serde(default)]
    pub attributes: Vec<String>,

    /// Seconds to cache results; 0 disables caching
    #[serde(default)]
    pub cache_period: u64,
}

impl QueryConfig {
    pub fn new(base_dn: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            filter: filter.into(),
            scope: None,
            attributes: Vec::new(),
            cache_period: 0,
        }
    }
}

/// How deep a search descends from its base DN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Only the base entry itself
    #[serde(rename = "base")]
    Base,
    /// Immediate children of the base entry
    #[serde(rename = "one", alias = "onelevel", alias = "single_level")]
    SingleLevel,
    /// The base entry and everything below it
    #[serde(rename = "sub", alias = "subtree", alias = "whole_subtree")]
    Subtree,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::Base => "base",
            Scope::SingleLevel => "one",
            Scope::Subtree => "sub",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[logging]
level = "debug"

[ldap.default]
uri = "ldap://dc1.example.com ldaps://dc2.example.com"
bind = "CN=ldap user,CN=Users,DC=example,DC=com"
passwd = "ld@pu5er"

[ldap.default.login_query]
base_dn = "CN=Users,DC=example,DC=com"
filter = "(sAMAccountName={login})"

[ldap.default.groups_query]
base_dn = "CN=Users,DC=example,DC=com"
filter = "(member:1.2.840.113556.1.4.1941:={userdn})"
scope = "sub"
attributes = ["cn"]
cache_period = 60

[ldap.realms.partners]
uri = ["ldap://partners.example.com:8389"]
use_pool = false
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = WardenConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.logging.level, "debug");

        let default = config.ldap.realm(None).unwrap();
        assert_eq!(
            default.uri.to_vec(),
            vec!["ldap://dc1.example.com", "ldaps://dc2.example.com"]
        );
        assert!(default.use_pool);
        assert_eq!(default.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(default.pool_lifetime, DEFAULT_POOL_LIFETIME_SECS);

        let login = default.login_query.as_ref().unwrap();
        assert_eq!(login.scope, None);
        assert_eq!(login.cache_period, 0);

        let groups = default.groups_query.as_ref().unwrap();
        assert_eq!(groups.scope, Some(Scope::Subtree));
        assert_eq!(groups.attributes, vec!["cn".to_string()]);
        assert_eq!(groups.cache_period, 60);

        let partners = config.ldap.realm(Some("partners")).unwrap();
        assert!(!partners.use_pool);
        assert!(partners.login_query.is_none());
        assert!(config.ldap.realm(Some("missing")).is_none());
    }

    #[test]
    fn test_realm_iteration_order() {
        let config = WardenConfig::from_toml_str(SAMPLE).unwrap();
        let names: Vec<Option<&str>> = config.ldap.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec![None, Some("partners")]);
    }

    #[test]
    fn test_config_validation() {
        let mut realm = RealmConfig::new(ServerUris::One("   ".to_string()));
        assert!(realm.validate().is_err());

        realm.uri = ServerUris::One("ldap://localhost".to_string());
        assert!(realm.validate().is_ok());

        realm.pool_size = 0;
        assert!(realm.validate().is_err());
        realm.use_pool = false;
        assert!(realm.validate().is_ok());

        realm.login_query = Some(QueryConfig::new("dc=example,dc=com", ""));
        assert!(realm.validate().is_err());
    }

    #[test]
    fn test_bind_credentials_validation() {
        let mut realm = RealmConfig::new(ServerUris::One("ldap://localhost".to_string()));

        realm.bind = Some("cn=svc,dc=example,dc=com".to_string());
        assert!(realm.validate().is_err());
        realm.passwd = Some(String::new());
        assert!(realm.validate().is_err());
        realm.passwd = Some("secret".to_string());
        assert!(realm.validate().is_ok());

        realm.bind = None;
        assert!(realm.validate().is_err());
    }

    #[test]
    fn test_invalid_realm_rejected_on_load() {
        let err = WardenConfig::from_toml_str(
            r#"
[ldap.realms.broken]
uri = []
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("'broken'"));
    }

    #[test]
    fn test_scope_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            scope: Scope,
        }

        let parsed: Wrapper = toml::from_str("scope = \"subtree\"").unwrap();
        assert_eq!(parsed.scope, Scope::Subtree);
        let parsed: Wrapper = toml::from_str("scope = \"one\"").unwrap();
        assert_eq!(parsed.scope, Scope::SingleLevel);
        assert_eq!(Scope::Base.to_string(), "base");
    }
}

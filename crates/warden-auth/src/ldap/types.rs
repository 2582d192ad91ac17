//! LDAP data types
//!
//! Search results, authentication outcomes and query specifications.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::collections::HashMap;
use std::fmt;

use warden_core::QueryConfig;
pub use warden_core::Scope;

// ============================================================================
// Attributes
// ============================================================================

/// Attribute values of one directory entry.
///
/// Attribute names are case-insensitive; they are stored lowercased and
/// looked up the same way, so `mail`, `Mail` and `MAIL` are one attribute.
/// Values that are not valid UTF-8 (`objectGUID`, `jpegPhoto`, ...) are kept
/// apart as raw bytes and are not serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(flatten)]
    text: BTreeMap<String, Vec<String>>,

    #[serde(skip)]
    binary: BTreeMap<String, Vec<Vec<u8>>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add values to an attribute, merging with values already present under
    /// a differently-cased name.
    pub fn insert(&mut self, name: impl AsRef<str>, values: impl IntoIterator<Item = String>) {
        self.text
            .entry(name.as_ref().to_ascii_lowercase())
            .or_default()
            .extend(values);
    }

    /// Add raw values to a binary attribute
    pub fn insert_binary(
        &mut self,
        name: impl AsRef<str>,
        values: impl IntoIterator<Item = Vec<u8>>,
    ) {
        self.binary
            .entry(name.as_ref().to_ascii_lowercase())
            .or_default()
            .extend(values);
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.text
            .get(&name.to_ascii_lowercase())
            .map(|values| values.as_slice())
    }

    pub fn get_binary(&self, name: &str) -> Option<&[Vec<u8>]> {
        self.binary
            .get(&name.to_ascii_lowercase())
            .map(|values| values.as_slice())
    }

    /// Get first value of an attribute
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(|s| s.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.text.contains_key(&name) || self.binary.contains_key(&name)
    }

    /// Number of distinct attribute names, text and binary
    pub fn len(&self) -> usize {
        self.text.len()
            + self
                .binary
                .keys()
                .filter(|name| !self.text.contains_key(*name))
                .count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.binary.is_empty()
    }

    /// Iterate over text `(lowercased name, values)` pairs in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Vec<String>> {
        self.text.iter()
    }

    /// Iterate over binary `(lowercased name, values)` pairs in name order.
    pub fn iter_binary(&self) -> btree_map::Iter<'_, String, Vec<Vec<u8>>> {
        self.binary.iter()
    }
}

impl<S: AsRef<str>> FromIterator<(S, Vec<String>)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (S, Vec<String>)>>(iter: I) -> Self {
        let mut attrs = Attributes::new();
        for (name, values) in iter {
            attrs.insert(name, values);
        }
        attrs
    }
}

impl From<HashMap<String, Vec<String>>> for Attributes {
    fn from(map: HashMap<String, Vec<String>>) -> Self {
        map.into_iter().collect()
    }
}

// ============================================================================
// Search results
// ============================================================================

/// One entry returned by a directory search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Entry DN (Distinguished Name)
    pub dn: String,

    /// Returned attributes
    #[serde(default)]
    pub attributes: Attributes,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            dn: dn.into(),
            attributes,
        }
    }
}

impl From<ldap3::SearchEntry> for DirectoryEntry {
    fn from(entry: ldap3::SearchEntry) -> Self {
        let mut attributes = Attributes::from(entry.attrs);
        for (name, values) in entry.bin_attrs {
            attributes.insert_binary(name, values);
        }

        Self {
            dn: entry.dn,
            attributes,
        }
    }
}

/// Entries of one search, in server order
pub type SearchResult = Vec<DirectoryEntry>;

// ============================================================================
// Authentication Result
// ============================================================================

/// Outcome of a password check.
///
/// Every failure collapses to `Denied`; callers cannot tell an unknown user
/// from a wrong password or an unreachable server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Denied,
    Authenticated { dn: String, attributes: Attributes },
}

impl AuthResult {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthResult::Authenticated { .. })
    }

    pub fn dn(&self) -> Option<&str> {
        match self {
            AuthResult::Authenticated { dn, .. } => Some(dn),
            AuthResult::Denied => None,
        }
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            AuthResult::Authenticated { attributes, .. } => Some(attributes),
            AuthResult::Denied => None,
        }
    }
}

impl From<DirectoryEntry> for AuthResult {
    fn from(entry: DirectoryEntry) -> Self {
        AuthResult::Authenticated {
            dn: entry.dn,
            attributes: entry.attributes,
        }
    }
}

// ============================================================================
// Query specification
// ============================================================================

/// A parameterized search, fixed once registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    /// Base DN template
    pub base_dn: String,
    /// Filter template
    pub filter: String,
    pub scope: Scope,
    /// Attributes to return; empty requests none
    pub attributes: Vec<String>,
    /// Cache window in seconds; 0 disables the cache
    pub cache_ttl_seconds: u64,
}

impl QuerySpec {
    /// Login search: single-level scope, uncached.
    pub fn login(base_dn: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            filter: filter.into(),
            scope: Scope::SingleLevel,
            attributes: Vec::new(),
            cache_ttl_seconds: 0,
        }
    }

    /// Groups search: whole-subtree scope, uncached.
    pub fn groups(base_dn: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            scope: Scope::Subtree,
            ..Self::login(base_dn, filter)
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cache_ttl(mut self, seconds: u64) -> Self {
        self.cache_ttl_seconds = seconds;
        self
    }

    /// Login query from configuration
    pub fn login_from_config(config: &QueryConfig) -> Self {
        Self::login(&config.base_dn, &config.filter).apply_config(config)
    }

    /// Groups query from configuration
    pub fn groups_from_config(config: &QueryConfig) -> Self {
        Self::groups(&config.base_dn, &config.filter).apply_config(config)
    }

    fn apply_config(mut self, config: &QueryConfig) -> Self {
        if let Some(scope) = config.scope {
            self.scope = scope;
        }
        self.attributes = config.attributes.clone();
        self.cache_ttl_seconds = config.cache_period;
        self
    }
}

impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "base_dn={}, filter={}, scope={}, attributes=[{}], cache_period={}",
            self.base_dn,
            self.filter,
            self.scope,
            self.attributes.join(","),
            self.cache_ttl_seconds
        )
    }
}

pub(crate) fn ldap_scope(scope: Scope) -> ldap3::Scope {
    match scope {
        Scope::Base => ldap3::Scope::Base,
        Scope::SingleLevel => ldap3::Scope::OneLevel,
        Scope::Subtree => ldap3::Scope::Subtree,
    }
}

//! Server descriptors and server pools

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

use crate::error::{Error, Result};

/// Default port for plain LDAP
pub const LDAP_PORT: u16 = 389;

/// Default port for LDAP over TLS
pub const LDAPS_PORT: u16 = 636;

/// Address of one directory server
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerDescriptor {
    host: String,
    port: u16,
    use_tls: bool,
}

impl ServerDescriptor {
    pub fn new(host: impl Into<String>, port: u16, use_tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            use_tls,
        }
    }

    /// Parse `scheme://host[:port]` or a bare `host[:port]`.
    ///
    /// `ldaps` selects TLS and port 636; any other scheme, or none, is plain
    /// LDAP on port 389. An explicit port wins over the default.
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        let invalid = |reason: String| Error::InvalidUri {
            uri: uri.to_string(),
            reason,
        };

        let candidate = if uri.contains("://") {
            uri.to_string()
        } else {
            format!("ldap://{}", uri)
        };
        let url = Url::parse(&candidate).map_err(|e| invalid(e.to_string()))?;

        let use_tls = url.scheme().eq_ignore_ascii_case("ldaps");
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host".to_string()))?;
        let port = url
            .port()
            .unwrap_or(if use_tls { LDAPS_PORT } else { LDAP_PORT });

        Ok(Self::new(host, port, use_tls))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    /// URL understood by the LDAP client
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

impl fmt::Display for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Ordered set of servers. Connection attempts rotate the starting server
/// and fall through the rest in order.
#[derive(Debug)]
pub struct ServerSet {
    servers: Vec<ServerDescriptor>,
    cursor: AtomicUsize,
}

impl ServerSet {
    pub fn new(servers: Vec<ServerDescriptor>) -> Result<Self> {
        if servers.is_empty() {
            return Err(Error::configuration("at least one server URI is required"));
        }

        Ok(Self {
            servers,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn parse<I, S>(uris: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let servers = uris
            .into_iter()
            .map(|uri| ServerDescriptor::parse(uri.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(servers)
    }

    /// Parse a whitespace-separated list of URIs
    pub fn parse_str(uris: &str) -> Result<Self> {
        Self::parse(uris.split_whitespace())
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// More than one server
    pub fn is_pool(&self) -> bool {
        self.servers.len() > 1
    }

    pub fn get(&self, index: usize) -> Option<&ServerDescriptor> {
        self.servers.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ServerDescriptor> {
        self.servers.iter()
    }

    /// Servers in the order the next connection attempt should try them:
    /// round-robin start, then wrap around.
    pub fn attempt_order(&self) -> impl Iterator<Item = &ServerDescriptor> {
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % self.servers.len();
        self.servers[start..].iter().chain(self.servers[..start].iter())
    }
}

impl fmt::Display for ServerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let urls: Vec<String> = self.servers.iter().map(|s| s.url()).collect();
        f.write_str(&urls.join(" "))
    }
}

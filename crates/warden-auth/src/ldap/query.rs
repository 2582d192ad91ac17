//! Cached directory queries
//!
//! A [`CachedQuery`] keeps results in generations: all entries stored within
//! the same `cache_ttl_seconds` window are dropped together once the clock
//! crosses into the next window.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;

use super::connection::DirectoryConnection;
use super::template::{FilterParams, Template};
use super::types::{QuerySpec, SearchResult};

/// Source of the current time in whole seconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// Resolved `(base_dn, filter)` pair
type CacheKey = (String, String);

struct QueryCache {
    last_window: u64,
    entries: HashMap<CacheKey, SearchResult>,
}

/// Start of the cache window containing `now`
fn window_start(ttl: u64, now: u64) -> u64 {
    now - (now % ttl)
}

/// A registered search with an in-memory result cache
pub struct CachedQuery {
    spec: QuerySpec,
    base_dn: Template,
    filter: Template,
    cache: Mutex<QueryCache>,
    clock: Arc<dyn Clock>,
}

impl CachedQuery {
    /// Parse the query's templates, accepting the placeholder names in
    /// `params`.
    pub fn new(spec: QuerySpec, params: &[&str]) -> Result<Self> {
        let base_dn = Template::parse(&spec.base_dn, params)?;
        let filter = Template::parse(&spec.filter, params)?;

        Ok(Self {
            spec,
            base_dn,
            filter,
            cache: Mutex::new(QueryCache {
                last_window: 0,
                entries: HashMap::new(),
            }),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Number of cached keys in the current generation
    pub fn cached_len(&self) -> usize {
        self.cache.lock().entries.len()
    }

    /// Look up a resolved key, first discarding the whole cache if the
    /// clock has moved into a new window.
    pub fn query_cache(&self, base_dn: &str, filter: &str) -> Option<SearchResult> {
        self.lookup(base_dn, filter).and_then(|(result, _)| result)
    }

    /// Cache lookup plus the window it was made in; `None` when caching is
    /// off.
    fn lookup(&self, base_dn: &str, filter: &str) -> Option<(Option<SearchResult>, u64)> {
        let ttl = self.spec.cache_ttl_seconds;
        if ttl == 0 {
            return None;
        }

        let now = self.clock.now();
        let ts = window_start(ttl, now);
        let mut cache = self.cache.lock();

        if ts > cache.last_window {
            debug!(ts, last_ts = cache.last_window, "dumping query cache");
            cache.entries.clear();
            cache.last_window = ts;
        }

        let result = cache
            .entries
            .get(&(base_dn.to_string(), filter.to_string()))
            .cloned();
        Some((result, cache.last_window))
    }

    /// Store a result looked up in `window`. Dropped if the cache has since
    /// moved to a later window.
    fn store(&self, window: u64, key: CacheKey, result: SearchResult) {
        let mut cache = self.cache.lock();
        if cache.last_window != window {
            debug!(window, last_ts = cache.last_window, "discarding result from past window");
            return;
        }
        cache.entries.insert(key, result);
    }

    /// Resolve the templates with `params` and run the search, serving from
    /// the cache when the query has a TTL.
    pub async fn execute(
        &self,
        conn: &mut dyn DirectoryConnection,
        params: &FilterParams,
    ) -> Result<SearchResult> {
        let base_dn = self.base_dn.render(params)?;
        let filter = self.filter.render(params)?;
        debug!(%base_dn, %filter, "searching");

        let window = match self.lookup(&base_dn, &filter) {
            Some((Some(result), _)) => {
                debug!(%base_dn, %filter, "result retrieved from cache");
                return Ok(result);
            }
            Some((None, window)) => Some(window),
            None => None,
        };

        let result = conn
            .search(&base_dn, self.spec.scope, &filter, &self.spec.attributes)
            .await?;

        debug!(entries = result.len(), "search result");

        if let Some(window) = window {
            self.store(window, (base_dn, filter), result.clone());
        }

        Ok(result)
    }
}

impl fmt::Display for CachedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.spec.fmt(f)
    }
}

impl fmt::Debug for CachedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedQuery")
            .field("spec", &self.spec)
            .field("cached", &self.cached_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::connection::ConnectionSource;
    use crate::ldap::testutil::{entry, ManualClock, MockDirectory};
    use crate::ldap::types::Scope;

    fn login_query(ttl: u64, clock: Arc<ManualClock>) -> CachedQuery {
        let spec = QuerySpec::login("DN=Org", "(cn={login})")
            .with_attributes(["attrs"])
            .with_scope(Scope::Subtree)
            .with_cache_ttl(ttl);
        CachedQuery::new(spec, &["login"]).unwrap().with_clock(clock)
    }

    #[test]
    fn test_window_start() {
        assert_eq!(window_start(60, 0), 0);
        assert_eq!(window_start(60, 59), 0);
        assert_eq!(window_start(60, 60), 60);
        assert_eq!(window_start(60, 125), 120);
        assert_eq!(window_start(1, 1234), 1234);
    }

    #[tokio::test]
    async fn test_execute_no_cache_period() {
        let dir = MockDirectory::with_entries(vec![entry("a", &[("b", "c")])]);
        let query = login_query(0, ManualClock::at(100));
        let mut conn = dir.connection(None, None).await.unwrap();

        let params = FilterParams::new().with("login", "foo");
        let result = query.execute(conn.as_mut(), &params).await.unwrap();
        assert_eq!(result, vec![entry("a", &[("b", "c")])]);

        query.execute(conn.as_mut(), &params).await.unwrap();

        let searches = dir.searches();
        assert_eq!(searches.len(), 2);
        assert_eq!(searches[0].base_dn, "DN=Org");
        assert_eq!(searches[0].filter, "(cn=foo)");
        assert_eq!(searches[0].scope, Scope::Subtree);
        assert_eq!(searches[0].attributes, vec!["attrs".to_string()]);
        assert_eq!(query.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_execute_no_result() {
        let dir = MockDirectory::with_entries(vec![]);
        let query = login_query(0, ManualClock::at(100));
        let mut conn = dir.connection(None, None).await.unwrap();

        let params = FilterParams::new().with("login", "foo");
        let result = query.execute(conn.as_mut(), &params).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_execute_with_cache_period_miss_then_hit() {
        let dir = MockDirectory::with_entries(vec![entry("a", &[("b", "c")])]);
        let query = login_query(60, ManualClock::at(1000));
        let mut conn = dir.connection(None, None).await.unwrap();
        let params = FilterParams::new().with("login", "foo");

        let first = query.execute(conn.as_mut(), &params).await.unwrap();
        assert_eq!(dir.searches().len(), 1);
        assert_eq!(query.cached_len(), 1);

        let second = query.execute(conn.as_mut(), &params).await.unwrap();
        assert_eq!(dir.searches().len(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cache_keyed_by_resolved_filter() {
        let dir = MockDirectory::with_entries(vec![entry("a", &[])]);
        let query = login_query(60, ManualClock::at(1000));
        let mut conn = dir.connection(None, None).await.unwrap();

        query
            .execute(conn.as_mut(), &FilterParams::new().with("login", "foo*"))
            .await
            .unwrap();
        // same raw bytes, valid UTF-8, resolve to the same filter
        query
            .execute(conn.as_mut(), &FilterParams::new().with("login", b"foo*"))
            .await
            .unwrap();
        assert_eq!(dir.searches().len(), 1);
        assert!(query.query_cache("DN=Org", "(cn=foo\\2A)").is_some());

        query
            .execute(conn.as_mut(), &FilterParams::new().with("login", "bar"))
            .await
            .unwrap();
        assert_eq!(dir.searches().len(), 2);
        assert_eq!(query.cached_len(), 2);
    }

    #[tokio::test]
    async fn test_cache_rollover_evicts_generation() {
        let clock = ManualClock::at(1000);
        let dir = MockDirectory::with_entries(vec![entry("a", &[])]);
        let query = login_query(60, clock.clone());
        let mut conn = dir.connection(None, None).await.unwrap();
        let foo = FilterParams::new().with("login", "foo");
        let bar = FilterParams::new().with("login", "bar");

        query.execute(conn.as_mut(), &foo).await.unwrap();
        // still inside the [960, 1020) window
        clock.set(1010);
        query.execute(conn.as_mut(), &bar).await.unwrap();
        assert_eq!(query.cached_len(), 2);

        clock.set(1019);
        assert!(query.query_cache("DN=Org", "(cn=foo)").is_some());
        assert!(query.query_cache("DN=Org", "(cn=bar)").is_some());

        // both entries go together, whatever their insertion time
        clock.set(1020);
        assert!(query.query_cache("DN=Org", "(cn=bar)").is_none());
        assert_eq!(query.cached_len(), 0);
        assert!(query.query_cache("DN=Org", "(cn=foo)").is_none());

        query.execute(conn.as_mut(), &foo).await.unwrap();
        assert_eq!(dir.searches().len(), 3);
    }

    #[test]
    fn test_store_from_past_window_discarded() {
        let clock = ManualClock::at(1000);
        let query = login_query(60, clock.clone());

        // a search starts in the [960, 1020) window...
        let (miss, window) = query.lookup("DN=Org", "(cn=foo)").unwrap();
        assert!(miss.is_none());
        assert_eq!(window, 960);

        // ...and another request rolls the cache before it finishes
        clock.set(1025);
        assert!(query.query_cache("DN=Org", "(cn=bar)").is_none());

        query.store(window, ("DN=Org".into(), "(cn=foo)".into()), vec![entry("a", &[])]);
        assert_eq!(query.cached_len(), 0);
        assert!(query.query_cache("DN=Org", "(cn=foo)").is_none());

        let (_, window) = query.lookup("DN=Org", "(cn=foo)").unwrap();
        query.store(window, ("DN=Org".into(), "(cn=foo)".into()), vec![entry("a", &[])]);
        assert_eq!(query.cached_len(), 1);
    }

    #[test]
    fn test_query_cache_first_call_clears() {
        let query = login_query(1, ManualClock::at(5));
        query
            .cache
            .lock()
            .entries
            .insert(("DN=Org".into(), "(cn=foo)".into()), vec![entry("a", &[])]);

        assert!(query.query_cache("DN=Org", "(cn=foo)").is_none());
        assert_eq!(query.cached_len(), 0);
        assert_eq!(query.cache.lock().last_window, 5);
    }

    #[test]
    fn test_query_cache_disabled_never_touches_cache() {
        let query = login_query(0, ManualClock::at(5));
        query
            .cache
            .lock()
            .entries
            .insert(("DN=Org".into(), "(cn=foo)".into()), vec![entry("a", &[])]);

        assert!(query.query_cache("DN=Org", "(cn=foo)").is_none());
        assert_eq!(query.cached_len(), 1);
    }

    #[tokio::test]
    async fn test_search_error_not_cached() {
        let dir = MockDirectory::with_entries(vec![entry("a", &[])]);
        dir.fail_searches("server busy");
        let query = login_query(60, ManualClock::at(1000));
        let mut conn = dir.connection(None, None).await.unwrap();

        let err = query
            .execute(conn.as_mut(), &FilterParams::new().with("login", "foo"))
            .await
            .unwrap_err();
        assert!(err.is_directory());
        assert_eq!(query.cached_len(), 0);
    }

    #[test]
    fn test_rejects_unknown_placeholder() {
        let spec = QuerySpec::login("DN=Org", "(cn={username})");
        assert!(CachedQuery::new(spec, &["login", "password"]).is_err());
    }
}

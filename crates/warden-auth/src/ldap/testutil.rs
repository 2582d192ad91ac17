//! In-memory directory doubles for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

use super::connection::{ConnectionSource, DirectoryConnection};
use super::query::Clock;
use super::types::{Attributes, DirectoryEntry, Scope, SearchResult};

/// Build an entry from `(attribute, value)` pairs
pub(crate) fn entry(dn: &str, attrs: &[(&str, &str)]) -> DirectoryEntry {
    let mut attributes = Attributes::new();
    for (name, value) in attrs {
        attributes.insert(name, vec![value.to_string()]);
    }
    DirectoryEntry::new(dn, attributes)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedSearch {
    pub base_dn: String,
    pub scope: Scope,
    pub filter: String,
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedBind {
    pub user: String,
    pub password: String,
}

#[derive(Default)]
struct MockState {
    entries: SearchResult,
    search_error: Option<String>,
    bind_error: Option<String>,
    connect_error: Option<String>,
    searches: Vec<RecordedSearch>,
    binds: Vec<RecordedBind>,
    opened: usize,
    released: usize,
}

/// Scripted directory: every search returns the same entries, user binds
/// succeed unless told otherwise.
#[derive(Clone, Default)]
pub(crate) struct MockDirectory {
    state: Arc<Mutex<MockState>>,
}

impl MockDirectory {
    pub fn with_entries(entries: SearchResult) -> Self {
        let dir = Self::default();
        dir.state.lock().entries = entries;
        dir
    }

    pub fn fail_searches(&self, msg: &str) {
        self.state.lock().search_error = Some(msg.to_string());
    }

    pub fn fail_binds(&self, msg: &str) {
        self.state.lock().bind_error = Some(msg.to_string());
    }

    pub fn fail_connects(&self, msg: &str) {
        self.state.lock().connect_error = Some(msg.to_string());
    }

    pub fn searches(&self) -> Vec<RecordedSearch> {
        self.state.lock().searches.clone()
    }

    pub fn binds(&self) -> Vec<RecordedBind> {
        self.state.lock().binds.clone()
    }

    /// Connections handed out, service and user-bound
    pub fn opened(&self) -> usize {
        self.state.lock().opened
    }

    /// Connections handed out and not yet released
    pub fn outstanding(&self) -> usize {
        let state = self.state.lock();
        state.opened - state.released
    }
}

#[async_trait]
impl ConnectionSource for MockDirectory {
    async fn connection(
        &self,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Box<dyn DirectoryConnection>> {
        let mut state = self.state.lock();
        if let Some(msg) = &state.connect_error {
            return Err(Error::Directory(msg.clone()));
        }

        if let Some(user) = user {
            state.binds.push(RecordedBind {
                user: user.to_string(),
                password: password.unwrap_or_default().to_string(),
            });
            if let Some(msg) = &state.bind_error {
                return Err(Error::Directory(msg.clone()));
            }
        }

        state.opened += 1;
        Ok(Box::new(MockConnection {
            state: self.state.clone(),
            released: false,
        }))
    }
}

struct MockConnection {
    state: Arc<Mutex<MockState>>,
    released: bool,
}

#[async_trait]
impl DirectoryConnection for MockConnection {
    async fn search(
        &mut self,
        base_dn: &str,
        scope: Scope,
        filter: &str,
        attributes: &[String],
    ) -> Result<SearchResult> {
        let mut state = self.state.lock();
        if let Some(msg) = &state.search_error {
            return Err(Error::Directory(msg.clone()));
        }
        state.searches.push(RecordedSearch {
            base_dn: base_dn.to_string(),
            scope,
            filter: filter.to_string(),
            attributes: attributes.to_vec(),
        });
        Ok(state.entries.clone())
    }

    async fn release(&mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            self.state.lock().released += 1;
        }
        Ok(())
    }
}

/// Clock under test control
#[derive(Debug, Default)]
pub(crate) struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn at(now: u64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(now)))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

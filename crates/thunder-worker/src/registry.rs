// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The table of open connections.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use thunder_core::{ConnectionId, ThunderError};

use crate::connection::Database;

struct Entry {
    db: Arc<Database>,
    /// Open requests sharing this connection (single-instance mode).
    refs: usize,
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    entries: HashMap<ConnectionId, Entry>,
    single_instance: HashMap<String, ConnectionId>,
}

/// What [`ConnectionRegistry::release`] did.
#[derive(Debug)]
pub enum Release {
    /// Other openers still hold the connection.
    Shared { remaining: usize },
    /// The last holder let go; the connection left the registry.
    Last(Arc<Database>),
}

/// Maps connection ids to open databases and paths to single-instance
/// connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn next_id(&self) -> ConnectionId {
        let mut state = self.state();
        state.next_id += 1;
        ConnectionId(state.next_id)
    }

    pub fn insert(&self, db: Arc<Database>) {
        let mut state = self.state();
        if db.options().single_instance {
            state.single_instance.insert(db.path().to_string(), db.id());
        }
        state.entries.insert(db.id(), Entry { db, refs: 1 });
    }

    pub fn get(&self, id: ConnectionId) -> Result<Arc<Database>, ThunderError> {
        self.state()
            .entries
            .get(&id)
            .map(|entry| Arc::clone(&entry.db))
            .ok_or(ThunderError::DatabaseNotFound { id })
    }

    /// Returns the single-instance connection for `path`, counting one more
    /// holder.
    ///
    /// A request whose read-only mode differs from the shared connection's is
    /// an argument error and counts no holder.
    pub fn share(&self, path: &str, read_only: bool) -> Result<Option<Arc<Database>>, ThunderError> {
        let mut state = self.state();
        let Some(&id) = state.single_instance.get(path) else {
            return Ok(None);
        };
        let Some(entry) = state.entries.get_mut(&id) else {
            return Ok(None);
        };
        let shared = entry.db.options().read_only;
        if shared != read_only {
            return Err(ThunderError::Argument(format!(
                "{path} is already open as a single instance with readOnly {shared}"
            )));
        }
        entry.refs += 1;
        Ok(Some(Arc::clone(&entry.db)))
    }

    /// Drops one holder of `id`.
    pub fn release(&self, id: ConnectionId) -> Result<Release, ThunderError> {
        let mut state = self.state();
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or(ThunderError::DatabaseNotFound { id })?;
        if entry.refs > 1 {
            entry.refs -= 1;
            return Ok(Release::Shared {
                remaining: entry.refs,
            });
        }
        let db = Self::remove_entry(&mut state, id).ok_or(ThunderError::DatabaseNotFound { id })?;
        Ok(Release::Last(db))
    }

    /// Removes every connection open on `path`, whatever its holder count.
    pub fn remove_path(&self, path: &str) -> Vec<Arc<Database>> {
        let mut state = self.state();
        let ids: Vec<ConnectionId> = state
            .entries
            .values()
            .filter(|entry| entry.db.path() == path)
            .map(|entry| entry.db.id())
            .collect();
        ids.into_iter()
            .filter_map(|id| Self::remove_entry(&mut state, id))
            .collect()
    }

    /// Removes and returns every connection.
    pub fn drain(&self) -> Vec<Arc<Database>> {
        let mut state = self.state();
        state.single_instance.clear();
        state.entries.drain().map(|(_, entry)| entry.db).collect()
    }

    fn remove_entry(state: &mut RegistryState, id: ConnectionId) -> Option<Arc<Database>> {
        let entry = state.entries.remove(&id)?;
        if state.single_instance.get(entry.db.path()) == Some(&id) {
            state.single_instance.remove(entry.db.path());
        }
        Some(entry.db)
    }

    pub fn is_open(&self, path: &str) -> bool {
        self.state()
            .entries
            .values()
            .any(|entry| entry.db.path() == path)
    }

    pub fn all(&self) -> Vec<Arc<Database>> {
        self.state()
            .entries
            .values()
            .map(|entry| Arc::clone(&entry.db))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

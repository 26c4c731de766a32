//! Client-side persistent state: favourite repositories and search history.
//!
//! Each key is loaded from the store on first access and written back in full
//! after every change. Subscribers get the new value through a
//! `tokio::sync::watch` channel; the value changes only on explicit calls.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::models::{Repository, SearchHistoryEntry};

pub const FAVORITES_KEY: &str = "registry-browser-favorites";
pub const SEARCH_HISTORY_KEY: &str = "registry-browser-search-history";
pub const MAX_HISTORY_ITEMS: usize = 10;

/// String key-value storage backing [`ClientState`].
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// One `<key>.json` file per key inside a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(key), value)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

impl MemoryStore {
    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory store poisoned"))
    }
}

/// Favourites and search history for one client session.
///
/// Read-modify-write is not guarded against other processes sharing the
/// same store.
pub struct ClientState<S: KeyValueStore = FileStore> {
    store: S,
    favorites: OnceLock<watch::Sender<BTreeSet<String>>>,
    history: OnceLock<watch::Sender<Vec<SearchHistoryEntry>>>,
}

impl<S: KeyValueStore> ClientState<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            favorites: OnceLock::new(),
            history: OnceLock::new(),
        }
    }

    fn load<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return T::default(),
            Err(e) => {
                warn!(key, error = %e, "could not read client state");
                return T::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(key, error = %e, "discarding unreadable client state");
            T::default()
        })
    }

    fn persist<T: Serialize>(&self, key: &str, value: &T) {
        let result = serde_json::to_string(value)
            .map_err(io::Error::from)
            .and_then(|json| self.store.set(key, &json));
        match result {
            Ok(()) => debug!(key, "saved client state"),
            Err(e) => warn!(key, error = %e, "could not save client state"),
        }
    }

    fn favorites_tx(&self) -> &watch::Sender<BTreeSet<String>> {
        self.favorites
            .get_or_init(|| watch::channel(self.load(FAVORITES_KEY)).0)
    }

    fn history_tx(&self) -> &watch::Sender<Vec<SearchHistoryEntry>> {
        self.history
            .get_or_init(|| watch::channel(self.load(SEARCH_HISTORY_KEY)).0)
    }

    /// Flip membership of `name`. Returns whether it is now a favourite.
    pub fn toggle_favorite(&self, name: &str) -> bool {
        let tx = self.favorites_tx();
        let mut now_favorite = false;
        tx.send_modify(|favorites| {
            now_favorite = favorites.insert(name.to_string());
            if !now_favorite {
                favorites.remove(name);
            }
        });
        self.persist(FAVORITES_KEY, &*tx.borrow());
        now_favorite
    }

    pub fn is_favorite(&self, name: &str) -> bool {
        self.favorites_tx().borrow().contains(name)
    }

    pub fn favorites(&self) -> BTreeSet<String> {
        self.favorites_tx().borrow().clone()
    }

    pub fn subscribe_favorites(&self) -> watch::Receiver<BTreeSet<String>> {
        self.favorites_tx().subscribe()
    }

    /// Set `is_favorite` on each repository from the current favourites.
    pub fn annotate(&self, repos: &mut [Repository]) {
        let favorites = self.favorites_tx().borrow();
        for repo in repos.iter_mut() {
            repo.is_favorite = favorites.contains(&repo.name);
        }
    }

    /// Record a search at the front of the history. An earlier entry with the
    /// same trimmed query is replaced; the log keeps the newest ten.
    pub fn add_search_to_history(&self, query: &str, results: usize) {
        let query = query.trim();
        let entry = SearchHistoryEntry {
            query: query.to_string(),
            timestamp: Utc::now(),
            results,
        };
        let tx = self.history_tx();
        tx.send_modify(|history| {
            history.retain(|h| h.query != entry.query);
            history.insert(0, entry);
            history.truncate(MAX_HISTORY_ITEMS);
        });
        self.persist(SEARCH_HISTORY_KEY, &*tx.borrow());
    }

    pub fn search_history(&self) -> Vec<SearchHistoryEntry> {
        self.history_tx().borrow().clone()
    }

    pub fn subscribe_search_history(&self) -> watch::Receiver<Vec<SearchHistoryEntry>> {
        self.history_tx().subscribe()
    }

    pub fn clear_search_history(&self) {
        self.history_tx().send_modify(|history| history.clear());
        if let Err(e) = self.store.remove(SEARCH_HISTORY_KEY) {
            warn!(error = %e, "could not clear search history");
        }
    }
}

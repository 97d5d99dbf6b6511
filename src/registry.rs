//! Component E — Entry Registry. A per-kind keyed map enforcing
//! at-most-one-Entry-per-key and at-most-one-build-per-Entry, grounded on
//! two teacher idioms fused together: `lsp.rs`'s
//! `Arc<Mutex<HashMap<K, V>>>` map (`entry().or_insert()` tie-break for
//! concurrent misses) for the registry itself, and `schema::SchemaCache`'s
//! per-slot single-flight idiom, generalized here from "compile once" to
//! the full Entry lifecycle (§3's state machine).
//!
//! The registry map lock is a plain `std::sync::Mutex` (never held across
//! I/O, per §5). The per-Entry lock is a `tokio::sync::Mutex` because §5
//! requires it held across the subprocess wait — an async-aware lock is
//! the correct primitive for that, where a `std::sync::MutexGuard` could
//! not safely be.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use crate::error::ImportsError;
use crate::model::{Doc, ImportKind, Meta};
use crate::store;
use crate::watch::WatchHandle;

/// Entry lifecycle (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Empty,
    Building,
    Ready,
    Invalidated,
    Failed,
}

/// An opaque handle a caller holds to pin an Entry for its own lifetime.
/// Entries keep only a `Weak` reference to the inner marker, mirroring the
/// weak-reference-multiset described in §3: once every clone of a
/// `Sentinel` is dropped, the weak reference can no longer be upgraded and
/// the next GC pass is free to collect the Entry.
#[derive(Clone)]
pub struct Sentinel(Arc<()>);

impl Default for Sentinel {
    fn default() -> Self {
        Self::new()
    }
}

impl Sentinel {
    pub fn new() -> Self {
        Self(Arc::new(()))
    }

    fn downgrade(&self) -> Weak<()> {
        Arc::downgrade(&self.0)
    }
}

struct EntryInner {
    state: EntryState,
    doc: Option<Doc>,
    last_error: Option<ImportsError>,
    references: Vec<Weak<()>>,
    ignore_reference: bool,
    watchers: Vec<WatchHandle>,
    meta: Option<Meta>,
}

/// One entry per key (§3). Generic over the key shape so `Library`,
/// `Resource`, and `Variables` each get their own strongly-typed registry.
pub struct Entry<K> {
    pub kind: ImportKind,
    pub key: K,
    pub name: String,
    pub working_dir: PathBuf,
    pub base_dir: PathBuf,
    inner: tokio::sync::Mutex<EntryInner>,
}

impl<K> Entry<K> {
    fn new(kind: ImportKind, key: K, name: String, working_dir: PathBuf, base_dir: PathBuf, ignore_reference: bool) -> Self {
        Self {
            kind,
            key,
            name,
            working_dir,
            base_dir,
            inner: tokio::sync::Mutex::new(EntryInner {
                state: EntryState::Empty,
                doc: None,
                last_error: None,
                references: vec![],
                ignore_reference,
                watchers: vec![],
                meta: None,
            }),
        }
    }

    pub async fn state(&self) -> EntryState {
        self.inner.lock().await.state
    }

    pub async fn doc(&self) -> Option<Doc> {
        self.inner.lock().await.doc.clone()
    }

    pub async fn meta(&self) -> Option<Meta> {
        self.inner.lock().await.meta.clone()
    }

    /// Pin or reference-count this Entry for `sentinel`'s lifetime. Pinned
    /// entries (`ignore_reference=true`, used for speculative introspection)
    /// never accumulate references.
    pub async fn add_reference(&self, sentinel: &Sentinel) {
        let mut inner = self.inner.lock().await;
        if inner.ignore_reference {
            return;
        }
        inner.references.push(sentinel.downgrade());
    }

    pub async fn set_ignore_reference(&self, ignore: bool) {
        self.inner.lock().await.ignore_reference = ignore;
    }

    /// True if every weak reference has been reclaimed and the entry isn't
    /// pinned — i.e. it's eligible for the next GC pass (§3 invariant 5).
    pub async fn is_collectible(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.ignore_reference {
            return false;
        }
        inner.references.retain(|w| w.strong_count() > 0);
        inner.references.is_empty()
    }

    /// Attach a watcher handle, taking ownership. Released on invalidation
    /// and on drop (§3, §4.F).
    pub async fn own_watcher(&self, handle: WatchHandle) {
        self.inner.lock().await.watchers.push(handle);
    }

    /// Releases watchers, clears `doc`, transitions to `Invalidated`.
    /// Idempotent (§4.E).
    pub async fn invalidate(&self) -> Option<Doc> {
        let mut inner = self.inner.lock().await;
        let previous = inner.doc.take();
        inner.watchers.clear();
        inner.meta = None;
        inner.state = EntryState::Invalidated;
        previous
    }

    /// Runs the single-flight build protocol (§4.E). `meta`/`cacheable` are
    /// the freshly computed fingerprint for this attempt; `filepath_base` and
    /// `store_root` locate the on-disk artifact; `introspect` is invoked only
    /// on a cache miss. The Entry mutex is held for the whole call, which is
    /// exactly what makes concurrent callers single-flight onto the same
    /// build (§5: "the Entry mutex is held across subprocess wait").
    pub async fn build<F, Fut>(
        &self,
        meta: Meta,
        cacheable: bool,
        store_root: &std::path::Path,
        filepath_base: &str,
        introspect: F,
    ) -> Result<Doc, ImportsError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Doc, ImportsError>>,
    {
        let mut inner = self.inner.lock().await;

        if inner.state == EntryState::Ready
            && let (Some(doc), Some(existing_meta)) = (&inner.doc, &inner.meta)
            && *existing_meta == meta
        {
            return Ok(doc.clone());
        }

        inner.state = EntryState::Building;

        // Cache hit: a fresh fingerprint byte-matches what's on disk.
        if cacheable
            && self.kind != ImportKind::Resource
            && let Some((stored_meta, doc)) = store::read(store_root, self.kind, filepath_base)
            && stored_meta == meta
        {
            inner.state = EntryState::Ready;
            inner.doc = Some(doc.clone());
            inner.meta = Some(meta);
            inner.last_error = None;
            return Ok(doc);
        }

        // Cache miss (or uncacheable/resource): run the black box. The
        // Entry mutex stays held across this await by design (§5).
        match introspect().await {
            Ok(doc) => {
                if cacheable && self.kind != ImportKind::Resource {
                    // Cache I/O failures are swallowed (§7): a failed write
                    // just means next time's also a miss, never a build
                    // failure.
                    let _ = store::write(store_root, self.kind, filepath_base, &meta, &doc);
                }
                inner.state = EntryState::Ready;
                inner.doc = Some(doc.clone());
                inner.meta = Some(meta);
                inner.last_error = None;
                Ok(doc)
            }
            Err(err) => {
                inner.state = EntryState::Failed;
                inner.doc = None;
                inner.meta = None;
                inner.last_error = Some(err.clone());
                Err(err)
            }
        }
    }
}

/// Per-kind keyed map of entries.
pub struct Registry<K: Eq + Hash + Clone> {
    kind: ImportKind,
    entries: Mutex<HashMap<K, Arc<Entry<K>>>>,
}

impl<K: Eq + Hash + Clone> Registry<K> {
    pub fn new(kind: ImportKind) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Invariant 1 (§3): at most one Entry exists per key at any time.
    /// Concurrent misses race on `entry().or_insert_with()`; the loser's
    /// freshly-built `Entry` is simply dropped, matching the teacher's
    /// `config_cache` tie-break in `lsp.rs::resolve_schema_for_document`.
    pub fn get_or_create(&self, key: K, name: String, working_dir: PathBuf, base_dir: PathBuf, ignore_reference: bool) -> Arc<Entry<K>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Entry::new(self.kind, key, name, working_dir, base_dir, ignore_reference))),
        )
    }

    pub fn get(&self, key: &K) -> Option<Arc<Entry<K>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }

    /// Remove `entry` from the map, but only if it is still the entry
    /// currently stored for `key` (ABA-safe: a concurrent `get_or_create`
    /// may have already replaced it with a fresh one after invalidation).
    pub fn remove(&self, key: &K, entry: &Arc<Entry<K>>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = entries.get(key)
            && Arc::ptr_eq(current, entry)
        {
            entries.remove(key);
        }
    }

    /// GC pass: evicts every unpinned entry whose reference multiset is
    /// empty (§3 invariant 5, §8.5). Returns the evicted entries so callers
    /// can release resources (the Manager unregisters dropped watchers by
    /// simply dropping the `Arc`, since `Entry` holds its own `WatchHandle`s).
    pub async fn gc(&self) -> Vec<Arc<Entry<K>>> {
        let candidates: Vec<(K, Arc<Entry<K>>)> = {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect()
        };

        let mut evicted = Vec::new();
        for (key, entry) in candidates {
            if entry.is_collectible().await {
                let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(current) = entries.get(&key)
                    && Arc::ptr_eq(current, &entry)
                {
                    entries.remove(&key);
                    evicted.push(entry);
                }
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Vec<Arc<Entry<K>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).values().cloned().collect()
    }
}

//! Component F — File-Watcher Bridge. Derives the glob patterns an Entry
//! needs watched, and offers a transport-agnostic `FileWatcherHost` trait so
//! the core never touches `tower_lsp_server`'s
//! `DidChangeWatchedFilesRegistrationOptions` directly — it only needs to
//! ask "watch these globs, call me back when one matches", the same split
//! the teacher keeps between `Backend` (which owns the LSP client) and the
//! rest of `lsp.rs`. A second, non-LSP implementation backs the CLI's
//! `--watch` mode using the `notify` crate, grounded on
//! `other_examples/0b2e2e34_aptos-labs-aptos-core__aptos-move-flow-src-mcp-file_watcher.rs.rs`'s
//! `RecommendedWatcher`/`RecursiveMode` usage.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Opaque identity for one registration, scoped to a single `FileWatcherHost`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WatcherId(u64);

impl WatcherId {
    /// Construct an id from a host-local counter. Each `FileWatcherHost`
    /// impl owns its own id space, so callers outside this module (the LSP
    /// transport's dynamic-registration host) need a way to mint one too.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Registers glob patterns with a host (the LSP client via dynamic
/// registration, or a local `notify` watcher) and notifies on matching
/// change events.
pub trait FileWatcherHost: Send + Sync {
    fn register(&self, globs: Vec<String>) -> WatcherId;
    fn unregister(&self, id: WatcherId);
}

/// An RAII registration. Entries own one of these per build (§3); dropping
/// it unregisters with the host, which is what lets an Entry release its
/// watchers simply by clearing its `Vec<WatchHandle>` on invalidation
/// (`Entry::invalidate` in `registry.rs`).
pub struct WatchHandle {
    host: Arc<dyn FileWatcherHost>,
    id: WatcherId,
}

impl WatchHandle {
    pub fn new(host: Arc<dyn FileWatcherHost>, globs: Vec<String>) -> Self {
        let id = host.register(globs);
        Self { host, id }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.host.unregister(self.id);
    }
}

/// Derive the glob patterns that should be watched for a given import's
/// resolution (§4.F). Priority order, matching
/// `original_source/workspace.py`'s `add_file_watchers`:
///
/// 1. If the import resolved to a package with submodule search locations,
///    watch every `.py` file under each of them recursively — any of them
///    changing can change what the package re-exports.
/// 2. Else, if it resolved to a single file, watch its containing directory
///    non-recursively — covers edits to the file itself plus siblings that
///    `__init__.py`-style re-export tricks might pull in.
/// 3. Else (unresolved import, watching for it to start existing), fall
///    back to every configured search root, recursively, so a later library
///    install/unzip under any of them is noticed.
pub fn derive_globs(origin: Option<&Path>, submodule_search_locations: &[PathBuf], search_path_roots: &[PathBuf]) -> Vec<String> {
    if !submodule_search_locations.is_empty() {
        return submodule_search_locations
            .iter()
            .map(|p| format!("{}/**/*.py", p.display()))
            .collect();
    }

    if let Some(origin) = origin {
        let parent = origin.parent().unwrap_or(origin);
        return vec![format!("{}/*", parent.display())];
    }

    search_path_roots.iter().map(|p| format!("{}/**/*.py", p.display())).collect()
}

/// A `FileWatcherHost` backed by a global monotonic counter and an in-memory
/// list, useful for the CLI's standalone `--watch` mode layered on top of
/// `notify` (the LSP path instead registers globs with the client and routes
/// matches back in through `dispatch::InvalidationDispatcher`).
pub struct NotifyWatcherHost {
    next_id: AtomicU64,
    registrations: std::sync::Mutex<std::collections::HashMap<u64, notify::RecommendedWatcher>>,
    on_event: Arc<dyn Fn(PathBuf) + Send + Sync>,
}

impl NotifyWatcherHost {
    pub fn new(on_event: Arc<dyn Fn(PathBuf) + Send + Sync>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            registrations: std::sync::Mutex::new(std::collections::HashMap::new()),
            on_event,
        }
    }
}

impl FileWatcherHost for NotifyWatcherHost {
    fn register(&self, globs: Vec<String>) -> WatcherId {
        use notify::{RecursiveMode, Watcher};

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let callback = Arc::clone(&self.on_event);
        if let Ok(mut watcher) = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                for path in event.paths {
                    callback(path);
                }
            }
        }) {
            for glob in &globs {
                // `notify` watches directories, not glob patterns; strip the
                // trailing pattern segment to get a concrete directory root.
                let root = root_of_glob(glob);
                let _ = watcher.watch(&root, RecursiveMode::Recursive);
            }
            self.registrations.lock().unwrap_or_else(|e| e.into_inner()).insert(id, watcher);
        }
        WatcherId(id)
    }

    fn unregister(&self, id: WatcherId) {
        self.registrations.lock().unwrap_or_else(|e| e.into_inner()).remove(&id.0);
    }
}

fn root_of_glob(glob: &str) -> PathBuf {
    let stripped = glob.trim_end_matches("/**/*.py").trim_end_matches("/*");
    PathBuf::from(stripped)
}

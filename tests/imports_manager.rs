//! Facade-level integration tests driving `ImportsManager` directly (no LSP
//! transport), covering cross-component behavior that doesn't fit neatly
//! inside any single module's `#[cfg(test)]` block: cache persistence
//! across manager instances, single-flight builds under concurrent
//! requests, and reference-counted garbage collection.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use robotcode_imports::manager::{ImportRequest, ImportsManager};
use robotcode_imports::model::{Doc, LibraryDoc};

mod support {
    use super::*;
    use robotcode_imports::dispatch::InvalidationDispatcher;
    use robotcode_imports::introspect::{IntrospectRequest, Introspector};
    use robotcode_imports::watch::{FileWatcherHost, WatcherId};
    use std::future::Future;
    use std::pin::Pin;

    pub struct NullWatcherHost;
    impl FileWatcherHost for NullWatcherHost {
        fn register(&self, _globs: Vec<String>) -> WatcherId {
            WatcherId::default()
        }
        fn unregister(&self, _id: WatcherId) {}
    }

    /// An introspector that counts invocations and always reports the same
    /// library doc, used to assert single-flight / cache-hit behavior
    /// without spawning a real subprocess.
    pub struct CountingIntrospector {
        pub calls: Arc<AtomicUsize>,
        pub doc: Doc,
    }

    impl Introspector for CountingIntrospector {
        fn run<'a>(
            &'a self,
            _req: &'a IntrospectRequest,
            _deadline: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<Doc, robotcode_imports::ImportsError>> + Send + 'a>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let doc = self.doc.clone();
            Box::pin(async move { Ok(doc) })
        }
    }

    pub fn manager_with(
        cache_root: &Path,
        introspector: impl Introspector + 'static,
    ) -> ImportsManager {
        ImportsManager::new(
            cache_root.to_path_buf(),
            Arc::new(introspector),
            Arc::new(NullWatcherHost),
            Arc::new(InvalidationDispatcher::new(Duration::from_millis(50))),
        )
    }
}

use robotcode_imports::resolve::EmptySearchPath;
use support::{CountingIntrospector, manager_with};

fn request<'a>(file: &'a Path, dir: &'a Path, search_path: &'a EmptySearchPath) -> ImportRequest<'a> {
    ImportRequest {
        name: file.to_str().unwrap(),
        args: vec![],
        working_dir: dir.to_path_buf(),
        base_dir: dir.to_path_buf(),
        search_path,
        extra_vars: HashMap::new(),
    }
}

#[tokio::test]
async fn cached_artifact_survives_across_manager_instances() {
    let workspace = tempfile::tempdir().unwrap();
    let cache_root = tempfile::tempdir().unwrap();
    let file = workspace.path().join("Foo.py");
    std::fs::write(&file, "").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let search_path = EmptySearchPath;

    {
        let manager = manager_with(
            cache_root.path(),
            CountingIntrospector { calls: Arc::clone(&calls), doc: Doc::Library(LibraryDoc { name: "Foo".into(), ..Default::default() }) },
        );
        let sentinel = robotcode_imports::registry::Sentinel::new();
        let req = request(&file, workspace.path(), &search_path);
        manager.libdoc_for_library(&req, &sentinel).await.unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A brand-new manager (simulating a server restart) pointed at the same
    // cache root should find the on-disk artifact and never call the
    // introspector at all.
    let manager = manager_with(
        cache_root.path(),
        CountingIntrospector { calls: Arc::clone(&calls), doc: Doc::Library(LibraryDoc::default()) },
    );
    let sentinel = robotcode_imports::registry::Sentinel::new();
    let req = request(&file, workspace.path(), &search_path);
    let doc = manager.libdoc_for_library(&req, &sentinel).await.unwrap();

    assert_eq!(doc.name, "Foo");
    assert_eq!(calls.load(Ordering::SeqCst), 1, "second manager must hit the on-disk cache, not re-introspect");
}

#[tokio::test]
async fn concurrent_requests_for_the_same_import_single_flight_onto_one_build() {
    let workspace = tempfile::tempdir().unwrap();
    let cache_root = tempfile::tempdir().unwrap();
    let file = workspace.path().join("Foo.py");
    std::fs::write(&file, "").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let manager = Arc::new(manager_with(
        cache_root.path(),
        CountingIntrospector { calls: Arc::clone(&calls), doc: Doc::Library(LibraryDoc { name: "Foo".into(), ..Default::default() }) },
    ));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        let file = file.clone();
        let dir = workspace.path().to_path_buf();
        handles.push(tokio::spawn(async move {
            let search_path = EmptySearchPath;
            let sentinel = robotcode_imports::registry::Sentinel::new();
            let req = request(&file, &dir, &search_path);
            manager.libdoc_for_library(&req, &sentinel).await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1, "8 concurrent identical requests must introspect exactly once");
}

#[tokio::test]
async fn entry_is_collected_once_its_last_reference_is_dropped() {
    let workspace = tempfile::tempdir().unwrap();
    let cache_root = tempfile::tempdir().unwrap();
    let file = workspace.path().join("Foo.py");
    std::fs::write(&file, "").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let manager = manager_with(
        cache_root.path(),
        CountingIntrospector { calls: Arc::clone(&calls), doc: Doc::Library(LibraryDoc { name: "Foo".into(), ..Default::default() }) },
    );

    let search_path = EmptySearchPath;
    let req = request(&file, workspace.path(), &search_path);

    {
        let sentinel = robotcode_imports::registry::Sentinel::new();
        manager.libdoc_for_library(&req, &sentinel).await.unwrap();
        manager.collect_garbage().await;
        // Still pinned: the sentinel is alive on this scope's stack.
        assert!(manager.meta_for_library(&key_for(&file)).await.is_some());
    }

    // The sentinel has now been dropped; a GC pass should evict the entry.
    manager.collect_garbage().await;
    assert!(manager.meta_for_library(&key_for(&file)).await.is_none());
}

fn key_for(file: &Path) -> robotcode_imports::model::NameArgsKey {
    robotcode_imports::model::NameArgsKey {
        resolved_source_or_name: file.to_str().unwrap().to_string(),
        resolved_args: vec![],
    }
}

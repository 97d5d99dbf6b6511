//! Component I — Public Facade. `ImportsManager` is the single entry point
//! the rest of a language server talks to; everything else in this crate is
//! a private collaborator it wires together. Grounded on the teacher's
//! `Backend` in `lsp.rs`, which plays the same role for schema validation:
//! one struct holding every collaborator, exposing a small set of
//! high-level operations and nothing else.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::config::{CompiledIgnorePatterns, Config};
use crate::dispatch::{FileChangeEvent, InvalidationDispatcher, Topic};
use crate::fingerprint::{self, FingerprintOutcome};
use crate::introspect::{IntrospectRequest, Introspector, default_timeout};
use crate::model::{Doc, ImportKind, LibraryDoc, Meta, Namespace, NameArgsKey, ResourceKey, VariablesDoc};
use crate::registry::{Registry, Sentinel};
use crate::resolve::{PathResolver, Resolved, SearchPath};
use crate::store;
use crate::variables::VariableProvider;
use crate::watch::{self, FileWatcherHost, WatchHandle};
use crate::error::ImportsError;

/// Everything needed to resolve and build one import, gathered by the
/// caller (an LSP request handler) before delegating to the Facade.
pub struct ImportRequest<'a> {
    pub name: &'a str,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub base_dir: PathBuf,
    pub search_path: &'a dyn SearchPath,
    pub extra_vars: HashMap<String, String>,
}

pub struct ImportsManager {
    cache_root: PathBuf,
    config: RwLock<Arc<Config>>,
    ignores: RwLock<Arc<CompiledIgnorePatterns>>,
    libraries: Registry<NameArgsKey>,
    resources: Registry<ResourceKey>,
    variables: Registry<NameArgsKey>,
    resolver: PathResolver,
    introspector: Arc<dyn Introspector>,
    watcher_host: Arc<dyn FileWatcherHost>,
    dispatcher: Arc<InvalidationDispatcher>,
    variable_provider: VariableProvider,
    lang_runtime_version: RwLock<Option<String>>,
}

impl ImportsManager {
    pub fn new(
        cache_root: PathBuf,
        introspector: Arc<dyn Introspector>,
        watcher_host: Arc<dyn FileWatcherHost>,
        dispatcher: Arc<InvalidationDispatcher>,
    ) -> Self {
        Self {
            cache_root,
            config: RwLock::new(Arc::new(Config::default())),
            ignores: RwLock::new(Arc::new(CompiledIgnorePatterns::empty())),
            libraries: Registry::new(ImportKind::Library),
            resources: Registry::new(ImportKind::Resource),
            variables: Registry::new(ImportKind::Variables),
            resolver: PathResolver::default(),
            introspector,
            watcher_host,
            dispatcher,
            variable_provider: VariableProvider::new(),
            lang_runtime_version: RwLock::new(None),
        }
    }

    /// Swap in a new configuration: recompiles ignore patterns and
    /// invalidates the memoized command-line variable set. Existing cache
    /// entries are left alone — they'll simply be re-evaluated for
    /// ignore-list membership next time they're rebuilt.
    pub fn update_config(&self, config: Config) -> Result<(), crate::config::ConfigError> {
        let ignores = CompiledIgnorePatterns::compile(&config)?;
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(config);
        *self.ignores.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(ignores);
        self.variable_provider.invalidate();
        Ok(())
    }

    fn store_root(&self) -> PathBuf {
        let reported = self.lang_runtime_version.read().unwrap_or_else(|e| e.into_inner()).clone();
        store::store_root(&self.cache_root, &store::lang_runtime_version(reported.as_deref()))
    }

    /// Records the introspection backend's reported interpreter version the
    /// first time a build succeeds (Open Question resolution, DESIGN.md);
    /// subsequent calls are no-ops so the store root stays stable for the
    /// life of the process.
    fn record_runtime_version(&self, reported: Option<&str>) {
        let mut slot = self.lang_runtime_version.write().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = reported.map(str::to_string);
        }
    }

    /// Resolve and build documentation for a `Library` import, pinning the
    /// result for `sentinel`'s lifetime.
    pub async fn libdoc_for_library(&self, req: &ImportRequest<'_>, sentinel: &Sentinel) -> Result<LibraryDoc, ImportsError> {
        match self.libdoc_generic(ImportKind::Library, req, sentinel).await? {
            Doc::Library(doc) => Ok(doc),
            _ => unreachable!("libraries registry only ever stores Doc::Library"),
        }
    }

    /// Resolve and build documentation for a `Variables` import.
    pub async fn libdoc_for_variables(&self, req: &ImportRequest<'_>, sentinel: &Sentinel) -> Result<VariablesDoc, ImportsError> {
        match self.libdoc_generic(ImportKind::Variables, req, sentinel).await? {
            Doc::Variables(doc) => Ok(doc),
            _ => unreachable!("variables registry only ever stores Doc::Variables"),
        }
    }

    /// Resolve and build the keyword/variable namespace for a `Resource`
    /// import. Never persisted to disk (§3): resources always rebuild from
    /// the black box on a registry miss.
    pub async fn libdoc_and_namespace_for_resource(&self, req: &ImportRequest<'_>, sentinel: &Sentinel) -> Result<Namespace, ImportsError> {
        match self.libdoc_generic(ImportKind::Resource, req, sentinel).await? {
            Doc::Resource(ns) => Ok(ns),
            _ => unreachable!("resources registry only ever stores Doc::Resource"),
        }
    }

    async fn libdoc_generic(&self, kind: ImportKind, req: &ImportRequest<'_>, sentinel: &Sentinel) -> Result<Doc, ImportsError> {
        let resolved = self.resolver.find(kind, req.name, &req.base_dir, &req.extra_vars, req.search_path)?;

        let (origin, search_locations) = match &resolved {
            Resolved::Path(p) => (Some(p.clone()), vec![]),
            Resolved::Module(spec) => (spec.origin.clone(), spec.submodule_search_locations.clone()),
            Resolved::NotFound => (None, vec![]),
        };

        let ignores = Arc::clone(&self.ignores.read().unwrap_or_else(|e| e.into_inner()));
        let outcome = fingerprint::fingerprint(kind, req.name, None, matches!(resolved, Resolved::Path(_)), origin.as_deref(), &search_locations, &ignores);

        let (meta, cacheable) = match outcome {
            FingerprintOutcome::Identified { meta, cacheable } => (meta, cacheable),
            // §4.A: an import whose identity can't be established locally
            // is "ignored" rather than fatal — the downstream build falls
            // back to a transient, uncacheable attempt. For a bare module
            // name (no path separator, no known extension) this is the
            // common case: a standard-library-style name our local search
            // doesn't cover but the introspector's own runtime import
            // machinery might still resolve. A path-like name with nothing
            // on disk, though, can never resolve at introspection time
            // either, so that one stays a hard `ResolveFailed`.
            FingerprintOutcome::Unidentified if kind == ImportKind::Library && !fingerprint::looks_like_path(kind, req.name) => {
                (
                    Meta {
                        meta_version: Meta::current_version(),
                        name: req.name.to_string(),
                        member_name: None,
                        origin: None,
                        submodule_search_locations: vec![],
                        by_path: false,
                        mtimes: Default::default(),
                    },
                    false,
                )
            }
            FingerprintOutcome::Unidentified => {
                return Err(ImportsError::ResolveFailed {
                    name: req.name.to_string(),
                    reason: "import could not be identified on disk".to_string(),
                });
            }
        };

        let key = NameArgsKey {
            resolved_source_or_name: meta.origin.clone().unwrap_or_else(|| meta.name.clone()),
            resolved_args: req.args.clone(),
        };

        let entry = match kind {
            ImportKind::Library => self.libraries.get_or_create(key, req.name.to_string(), req.working_dir.clone(), req.base_dir.clone(), false),
            ImportKind::Variables => self.variables.get_or_create(key, req.name.to_string(), req.working_dir.clone(), req.base_dir.clone(), false),
            ImportKind::Resource => {
                let resource_key = ResourceKey {
                    resolved_source: meta.origin.clone().unwrap_or_else(|| meta.name.clone()),
                };
                return self.build_resource_entry(resource_key, &meta, cacheable, req, sentinel, &search_locations).await;
            }
        };

        entry.add_reference(sentinel).await;

        let globs = watch::derive_globs(origin.as_deref(), &search_locations, &req.search_path.roots());
        entry.own_watcher(WatchHandle::new(Arc::clone(&self.watcher_host), globs)).await;

        let intro_req = self.build_intro_request(kind, req, &meta).await;
        let timeout = default_timeout(kind);
        let store_root = self.store_root();
        let filepath_base = meta.filepath_base();
        let introspector = Arc::clone(&self.introspector);

        let doc = entry
            .build(meta, cacheable, &store_root, &filepath_base, move || async move {
                introspector.run(&intro_req, timeout).await
            })
            .await?;

        Ok(doc)
    }

    async fn build_resource_entry(
        &self,
        key: ResourceKey,
        meta: &crate::model::Meta,
        cacheable: bool,
        req: &ImportRequest<'_>,
        sentinel: &Sentinel,
        search_locations: &[PathBuf],
    ) -> Result<Doc, ImportsError> {
        let entry = self.resources.get_or_create(key, req.name.to_string(), req.working_dir.clone(), req.base_dir.clone(), false);
        entry.add_reference(sentinel).await;

        let origin = meta.origin.as_ref().map(PathBuf::from);
        let globs = watch::derive_globs(origin.as_deref(), search_locations, &req.search_path.roots());
        entry.own_watcher(WatchHandle::new(Arc::clone(&self.watcher_host), globs)).await;

        let intro_req = self.build_intro_request(ImportKind::Resource, req, meta).await;
        let timeout = default_timeout(ImportKind::Resource);
        let store_root = self.store_root();
        let filepath_base = meta.filepath_base();
        let introspector = Arc::clone(&self.introspector);

        entry
            .build(meta.clone(), cacheable, &store_root, &filepath_base, move || async move {
                introspector.run(&intro_req, timeout).await
            })
            .await
    }

    async fn build_intro_request(&self, kind: ImportKind, req: &ImportRequest<'_>, meta: &crate::model::Meta) -> IntrospectRequest {
        let config = Arc::clone(&self.config.read().unwrap_or_else(|e| e.into_inner()));
        let cli_vars = self
            .variable_provider
            .resolve(&config.robot, &req.working_dir, self.introspector.as_ref(), default_timeout(ImportKind::Variables))
            .await;
        IntrospectRequest {
            kind,
            name: meta.origin.clone().unwrap_or_else(|| req.name.to_string()),
            args: req.args.clone(),
            working_dir: req.working_dir.clone(),
            base_dir: req.base_dir.clone(),
            cli_vars,
            extra_vars: req.extra_vars.clone(),
        }
    }

    /// Resolve a single command-line variable's value, honoring
    /// per-request `extra_vars` over the memoized profile/project/file
    /// union.
    pub async fn resolve_variable(&self, name: &str, extra_vars: &HashMap<String, String>, working_dir: &Path) -> Option<String> {
        if let Some(v) = extra_vars.get(name) {
            return Some(v.clone());
        }
        let config = Arc::clone(&self.config.read().unwrap_or_else(|e| e.into_inner()));
        self.variable_provider
            .resolve(&config.robot, working_dir, self.introspector.as_ref(), default_timeout(ImportKind::Variables))
            .await
            .get(name)
            .cloned()
    }

    pub async fn meta_for_library(&self, key: &NameArgsKey) -> Option<crate::model::Meta> {
        self.libraries.get(key)?.meta().await
    }

    pub async fn meta_for_variables(&self, key: &NameArgsKey) -> Option<crate::model::Meta> {
        self.variables.get(key)?.meta().await
    }

    /// Offer importable library/resource/variables names whose stem starts
    /// with `prefix`, scanning `roots` non-recursively — the "which names
    /// can I import" completion the original implementation calls out
    /// separately per kind (kept distinct per-kind here rather than
    /// collapsed into one helper, matching that split).
    pub fn complete_library_import(&self, prefix: &str, roots: &[PathBuf]) -> Vec<String> {
        complete_by_extension(prefix, roots, &["py"])
    }

    pub fn complete_resource_import(&self, prefix: &str, roots: &[PathBuf]) -> Vec<String> {
        complete_by_extension(prefix, roots, fingerprint::RESOURCE_EXTENSIONS)
    }

    pub fn complete_variables_import(&self, prefix: &str, roots: &[PathBuf]) -> Vec<String> {
        complete_by_extension(prefix, roots, &["py", "yaml", "yml"])
    }

    /// Kept from the original implementation's `get_libdoc_from_model`:
    /// introspect library documentation directly from in-memory source text
    /// rather than a resolved file on disk (used when a document that
    /// hasn't been saved yet declares a test library in its own body). This
    /// path is always transient — there is no stable identity to cache
    /// against, so it never touches the registry or the artifact store.
    pub async fn libdoc_from_model(&self, source: &str, working_dir: &Path, base_dir: &Path) -> Result<LibraryDoc, ImportsError> {
        let intro_req = IntrospectRequest {
            kind: ImportKind::Library,
            name: source.to_string(),
            args: vec![],
            working_dir: working_dir.to_path_buf(),
            base_dir: base_dir.to_path_buf(),
            cli_vars: HashMap::new(),
            extra_vars: HashMap::new(),
        };
        match self.introspector.run(&intro_req, default_timeout(ImportKind::Library)).await? {
            Doc::Library(doc) => Ok(doc),
            _ => Err(ImportsError::IntrospectionError {
                name: "<model>".to_string(),
                args: vec![],
                kind: "unexpected-doc-kind".to_string(),
                message: "introspector did not return a library doc".to_string(),
                source_location: None,
            }),
        }
    }

    /// Wipe every on-disk artifact. In-memory entries are untouched (§4.I):
    /// they'll simply miss the store on their next build.
    pub fn clear_cache(&self) -> Result<(), ImportsError> {
        store::clear(&self.cache_root)
    }

    /// React to a batch of raw filesystem change events, invalidating any
    /// matching entry across all three registries and firing at most one
    /// notification per affected kind.
    pub async fn handle_file_events(&self, events: Vec<FileChangeEvent>) {
        if self.dispatcher.dispatch_file_events(&events, &self.libraries, Topic::Libraries).await {
            self.resolver.invalidate_kind(ImportKind::Library);
        }
        if self.dispatcher.dispatch_file_events(&events, &self.resources, Topic::Resources).await {
            self.resolver.invalidate_kind(ImportKind::Resource);
        }
        if self.dispatcher.dispatch_file_events(&events, &self.variables, Topic::Variables).await {
            self.resolver.invalidate_kind(ImportKind::Variables);
        }
    }

    pub fn subscribe(&self, f: impl Fn(Topic, &[Doc]) + Send + Sync + 'static) {
        self.dispatcher.subscribe(f);
    }

    /// Run one garbage-collection pass over every registry, releasing
    /// entries with no remaining live reference (§3 invariant 5).
    pub async fn collect_garbage(&self) {
        if !self.libraries.gc().await.is_empty() {
            self.resolver.invalidate_kind(ImportKind::Library);
        }
        if !self.resources.gc().await.is_empty() {
            self.resolver.invalidate_kind(ImportKind::Resource);
        }
        if !self.variables.gc().await.is_empty() {
            self.resolver.invalidate_kind(ImportKind::Variables);
        }
    }
}

fn complete_by_extension(prefix: &str, roots: &[PathBuf], extensions: &[&str]) -> Vec<String> {
    let mut names = Vec::new();
    for root in roots {
        let Ok(read_dir) = std::fs::read_dir(root) else { continue };
        for entry in read_dir.flatten() {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else { continue };
            if extensions.contains(&ext) && stem.starts_with(prefix) {
                names.push(stem.to_string());
            }
        }
    }
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::EmptySearchPath;
    use std::time::Duration;

    struct FakeWatcherHost;
    impl FileWatcherHost for FakeWatcherHost {
        fn register(&self, _globs: Vec<String>) -> watch::WatcherId {
            watch::WatcherId::default()
        }
        fn unregister(&self, _id: watch::WatcherId) {}
    }

    struct StubIntrospector {
        doc: Doc,
    }
    impl Introspector for StubIntrospector {
        fn run<'a>(
            &'a self,
            _req: &'a IntrospectRequest,
            _deadline: Duration,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Doc, ImportsError>> + Send + 'a>> {
            let doc = self.doc.clone();
            Box::pin(async move { Ok(doc) })
        }
    }

    fn manager(doc: Doc, cache_root: &Path) -> ImportsManager {
        ImportsManager::new(
            cache_root.to_path_buf(),
            Arc::new(StubIntrospector { doc }),
            Arc::new(FakeWatcherHost),
            Arc::new(InvalidationDispatcher::new(Duration::from_millis(50))),
        )
    }

    #[tokio::test]
    async fn libdoc_for_library_resolves_builds_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Foo.py");
        std::fs::write(&file, "").unwrap();

        let manager = manager(Doc::Library(LibraryDoc { name: "Foo".into(), ..Default::default() }), dir.path());
        let sentinel = Sentinel::new();
        let req = ImportRequest {
            name: file.to_str().unwrap(),
            args: vec![],
            working_dir: dir.path().to_path_buf(),
            base_dir: dir.path().to_path_buf(),
            search_path: &EmptySearchPath,
            extra_vars: HashMap::new(),
        };

        let doc = manager.libdoc_for_library(&req, &sentinel).await.unwrap();
        assert_eq!(doc.name, "Foo");
    }

    #[tokio::test]
    async fn unresolvable_import_surfaces_resolve_failed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Doc::Library(LibraryDoc::default()), dir.path());
        let sentinel = Sentinel::new();
        let req = ImportRequest {
            name: "DoesNotExist.py",
            args: vec![],
            working_dir: dir.path().to_path_buf(),
            base_dir: dir.path().to_path_buf(),
            search_path: &EmptySearchPath,
            extra_vars: HashMap::new(),
        };
        let result = manager.libdoc_for_library(&req, &sentinel).await;
        assert!(matches!(result, Err(ImportsError::ResolveFailed { .. })));
    }

    #[tokio::test]
    async fn bare_module_name_with_no_local_match_falls_back_to_a_transient_build() {
        // "BuiltIn" isn't a path and isn't found by our local search, but
        // per §4.A that's not fatal: it's handed to the introspector anyway
        // as an uncacheable, transient attempt (the introspector's own
        // runtime import machinery is the real authority on module names).
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(Doc::Library(LibraryDoc { name: "BuiltIn".into(), ..Default::default() }), dir.path());
        let sentinel = Sentinel::new();
        let req = ImportRequest {
            name: "BuiltIn",
            args: vec![],
            working_dir: dir.path().to_path_buf(),
            base_dir: dir.path().to_path_buf(),
            search_path: &EmptySearchPath,
            extra_vars: HashMap::new(),
        };
        let doc = manager.libdoc_for_library(&req, &sentinel).await.unwrap();
        assert_eq!(doc.name, "BuiltIn");
    }

    #[test]
    fn complete_library_import_filters_by_prefix_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Foo.py"), "").unwrap();
        std::fs::write(dir.path().join("Bar.py"), "").unwrap();
        std::fs::write(dir.path().join("readme.txt"), "").unwrap();

        let manager = manager(Doc::Library(LibraryDoc::default()), dir.path());
        let matches = manager.complete_library_import("Fo", &[dir.path().to_path_buf()]);
        assert_eq!(matches, vec!["Foo".to_string()]);
    }
}

//! LSP transport surface. A thin `Backend: LanguageServer` that routes
//! lifecycle, document-sync, and `didChangeWatchedFiles` notifications into
//! `ImportsManager` — grounded on the teacher's `Backend` in this same file:
//! the `document_map`/debounce-then-revalidate idiom of `spawn_validation`/
//! `validate_and_publish`, and the dynamic-registration watcher pattern in
//! `initialized()`. Code-lens, inlay-hint, and diagnostic content are out of
//! scope (§1 Non-goals) — this module only carries the dispatcher plumbing
//! the Imports Manager actually needs wired up.

use std::borrow::Cow;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tower_lsp_server::jsonrpc::Result;
use tower_lsp_server::ls_types::*;
use tower_lsp_server::{Client, LanguageServer, LspService, Server};

use crate::config::Config;
use crate::dispatch::{FileChangeEvent, FileChangeKind, InvalidationDispatcher};
use crate::introspect::ProcessIntrospector;
use crate::manager::{ImportRequest, ImportsManager};
use crate::registry::Sentinel;
use crate::resolve::SearchPath;
use crate::watch::{FileWatcherHost, WatcherId};

/// Routes Entry watch registrations through the client's dynamic
/// `workspace/didChangeWatchedFiles` capability, one registration per
/// `FileWatcherHost::register` call — the same client plumbing the teacher
/// uses for its single static `jvl.json` watcher, generalized to many
/// short-lived per-Entry registrations.
pub struct LspWatcherHost {
    client: Client,
    next_id: AtomicU64,
}

impl LspWatcherHost {
    pub fn new(client: Client) -> Self {
        Self { client, next_id: AtomicU64::new(1) }
    }
}

impl FileWatcherHost for LspWatcherHost {
    fn register(&self, globs: Vec<String>) -> WatcherId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let registration = Registration {
            id: registration_id(id),
            method: "workspace/didChangeWatchedFiles".to_string(),
            register_options: Some(
                serde_json::to_value(DidChangeWatchedFilesRegistrationOptions {
                    watchers: globs
                        .into_iter()
                        .map(|pattern| FileSystemWatcher {
                            glob_pattern: GlobPattern::String(pattern),
                            kind: Some(WatchKind::Create | WatchKind::Change | WatchKind::Delete),
                        })
                        .collect(),
                })
                .unwrap(),
            ),
        };

        let client = self.client.clone();
        tokio::spawn(async move {
            let _ = client.register_capability(vec![registration]).await;
        });
        WatcherId::new(id)
    }

    fn unregister(&self, id: WatcherId) {
        let unregistration = Unregistration {
            id: registration_id(id.value()),
            method: "workspace/didChangeWatchedFiles".to_string(),
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            let _ = client.unregister_capability(vec![unregistration]).await;
        });
    }
}

fn registration_id(id: u64) -> String {
    format!("robotcode-imports-{id}")
}

/// A fixed snapshot of the configured search roots, handed to the Facade per
/// call (`ImportRequest::search_path` is a borrow, so the snapshot just
/// needs to outlive one request).
struct RootsSearchPath(Vec<PathBuf>);

impl SearchPath for RootsSearchPath {
    fn roots(&self) -> Vec<PathBuf> {
        self.0.clone()
    }
}

/// Bookkeeping for one open resource document: the LSP version (to notice a
/// stale revalidation firing after a newer edit, same guard the teacher uses
/// in `validate_and_publish`) and the `Sentinel` pinning its Entry for as
/// long as the document stays open.
struct ResourceDoc {
    version: i32,
    _sentinel: Sentinel,
}

pub struct Backend {
    client: Client,
    manager: Arc<ImportsManager>,
    dispatcher: Arc<InvalidationDispatcher>,
    resource_docs: Mutex<HashMap<Uri, ResourceDoc>>,
    workspace_roots: RwLock<Vec<PathBuf>>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").finish()
    }
}

impl Backend {
    pub fn new(client: Client, cache_root: PathBuf) -> Self {
        let dispatcher = Arc::new(InvalidationDispatcher::new(Duration::from_secs(1)));
        let watcher_host = Arc::new(LspWatcherHost::new(client.clone()));
        let manager = Arc::new(ImportsManager::new(
            cache_root,
            Arc::new(ProcessIntrospector::default()),
            watcher_host,
            Arc::clone(&dispatcher),
        ));
        Self {
            client,
            manager,
            dispatcher,
            resource_docs: Mutex::new(HashMap::new()),
            workspace_roots: RwLock::new(vec![]),
        }
    }

    fn search_path(&self) -> RootsSearchPath {
        RootsSearchPath(self.workspace_roots.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn reload_config_from(&self, root: &std::path::Path) {
        let Some(path) = crate::config::find_config_file(root) else { return };
        match Config::load(&path) {
            Ok(config) => {
                if let Err(e) = self.manager.update_config(config) {
                    self.client
                        .log_message(MessageType::WARNING, format!("robotcode-ls: failed to apply {}: {e}", path.display()))
                        .await;
                }
            }
            Err(e) => {
                self.client
                    .log_message(MessageType::WARNING, format!("robotcode-ls: failed to load {}: {e}", path.display()))
                    .await;
            }
        }
    }

    async fn reload_all_configs(&self) {
        let roots = self.workspace_roots.read().unwrap_or_else(|e| e.into_inner()).clone();
        for root in &roots {
            self.reload_config_from(root).await;
        }
    }
}

impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let mut roots: Vec<PathBuf> = params
            .workspace_folders
            .unwrap_or_default()
            .into_iter()
            .filter_map(|folder| folder.uri.to_file_path().map(Cow::into_owned))
            .collect();

        if roots.is_empty()
            && let Some(root_uri) = params.root_uri
            && let Some(path) = root_uri.to_file_path()
        {
            roots.push(path.into_owned());
        }

        *self.workspace_roots.write().unwrap_or_else(|e| e.into_inner()) = roots;

        Ok(InitializeResult {
            server_info: Some(ServerInfo {
                name: "robotcode-ls".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::FULL)),
                workspace: Some(WorkspaceServerCapabilities {
                    workspace_folders: Some(WorkspaceFoldersServerCapabilities {
                        supported: Some(true),
                        change_notifications: Some(OneOf::Left(true)),
                    }),
                    file_operations: None,
                }),
                ..Default::default()
            },
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.reload_all_configs().await;

        let registration = Registration {
            id: "robotcode-imports-config-watch".to_string(),
            method: "workspace/didChangeWatchedFiles".to_string(),
            register_options: Some(
                serde_json::to_value(DidChangeWatchedFilesRegistrationOptions {
                    watchers: vec![FileSystemWatcher {
                        glob_pattern: GlobPattern::String("**/robotcode.json".to_string()),
                        kind: Some(WatchKind::Create | WatchKind::Change | WatchKind::Delete),
                    }],
                })
                .unwrap(),
            ),
        };

        if let Err(e) = self.client.register_capability(vec![registration]).await {
            self.client
                .log_message(MessageType::WARNING, format!("robotcode-ls: failed to register config watcher ({e})"))
                .await;
        }
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        let Some(path) = uri.to_file_path().map(Cow::into_owned) else {
            self.client
                .log_message(MessageType::INFO, format!("robotcode-ls: skipping non-file URI: {}", uri.as_str()))
                .await;
            return;
        };
        let Some(base_dir) = path.parent().map(PathBuf::from) else { return };

        let sentinel = Sentinel::new();
        let search_path = self.search_path();
        let req = ImportRequest {
            name: path.to_str().unwrap_or_default(),
            args: vec![],
            working_dir: base_dir.clone(),
            base_dir,
            search_path: &search_path,
            extra_vars: HashMap::new(),
        };

        match self.manager.libdoc_and_namespace_for_resource(&req, &sentinel).await {
            Ok(_) => {
                self.resource_docs
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(uri, ResourceDoc { version, _sentinel: sentinel });
            }
            Err(e) => {
                self.client
                    .log_message(MessageType::WARNING, format!("robotcode-ls: failed to resolve {}: {e}", path.display()))
                    .await;
            }
        }
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;
        let Some(path) = uri.to_file_path().map(Cow::into_owned) else { return };

        {
            let mut docs = self.resource_docs.lock().unwrap_or_else(|e| e.into_inner());
            match docs.get_mut(&uri) {
                Some(doc) => doc.version = version,
                None => return,
            }
        }

        let manager = Arc::clone(&self.manager);
        self.dispatcher.schedule_resource_revalidation(path.clone(), move || {
            tokio::spawn(async move {
                manager.handle_file_events(vec![FileChangeEvent { path, kind: FileChangeKind::Changed }]).await;
            });
        });
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.resource_docs.lock().unwrap_or_else(|e| e.into_inner()).remove(&uri);
        if let Some(path) = uri.to_file_path().map(Cow::into_owned) {
            self.dispatcher.cancel_resource_revalidation(&path);
        }
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        let events: Vec<FileChangeEvent> = params
            .changes
            .into_iter()
            .filter_map(|change| {
                let path = change.uri.to_file_path()?.into_owned();
                let kind = match change.typ {
                    FileChangeType::CREATED => FileChangeKind::Created,
                    FileChangeType::DELETED => FileChangeKind::Deleted,
                    _ => FileChangeKind::Changed,
                };
                Some(FileChangeEvent { path, kind })
            })
            .collect();

        if events.iter().any(|e| e.path.file_name() == Some(OsStr::new("robotcode.json"))) {
            self.reload_all_configs().await;
        }

        if !events.is_empty() {
            self.manager.handle_file_events(events).await;
        }
    }

    async fn did_change_workspace_folders(&self, params: DidChangeWorkspaceFoldersParams) {
        let mut roots = self.workspace_roots.write().unwrap_or_else(|e| e.into_inner());
        for removed in params.event.removed {
            if let Some(path) = removed.uri.to_file_path() {
                roots.retain(|r| *r != *path);
            }
        }
        for added in params.event.added {
            if let Some(path) = added.uri.to_file_path() {
                roots.push(path.into_owned());
            }
        }
    }
}

/// Start the LSP server over stdio.
pub async fn run_server(cache_root: PathBuf) {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(|client| Backend::new(client, cache_root));
    Server::new(stdin, stdout, socket).serve(service).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watcher_ids_round_trip_through_registration_ids() {
        let id = WatcherId::new(42);
        assert_eq!(id.value(), 42);
        assert_eq!(registration_id(id.value()), "robotcode-imports-42");
    }
}

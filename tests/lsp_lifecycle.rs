//! End-to-end LSP handshake and document lifecycle smoke tests, driven
//! in-process over a duplex-stream transport (no real stdio, no real
//! editor) — the same harness shape the teacher drives its own LSP tests
//! with, retargeted at the Imports Manager's `Backend`.

mod common;

use common::lsp_client::TestClient;

#[tokio::test]
async fn initialize_reports_server_info_and_capabilities() {
    let cache_dir = tempfile::tempdir().unwrap();
    let mut client = TestClient::new(cache_dir.path().to_path_buf());

    let result = client.initialize(None).await;

    assert_eq!(result["serverInfo"]["name"], "robotcode-ls");
    assert_eq!(
        result["capabilities"]["textDocumentSync"],
        serde_json::json!(1) // TextDocumentSyncKind::FULL
    );
    assert_eq!(
        result["capabilities"]["workspace"]["workspaceFolders"]["supported"],
        serde_json::json!(true)
    );

    client.shutdown().await;
}

#[tokio::test]
async fn initialized_registers_a_robotcode_json_watcher() {
    let cache_dir = tempfile::tempdir().unwrap();
    let mut client = TestClient::new(cache_dir.path().to_path_buf());

    client.initialize(None).await;

    let registration = client.recv().await;
    assert_eq!(registration["method"], "client/registerCapability");
    let registrations = registration["params"]["registrations"].as_array().unwrap();
    assert!(registrations.iter().any(|r| r["id"] == "robotcode-imports-config-watch"));

    client.shutdown().await;
}

#[tokio::test]
async fn did_open_on_a_resource_never_crashes_the_server_even_without_a_real_backend() {
    // No `robotcode-introspect` binary is on PATH in the test environment,
    // so introspection fails — the point of this test is that the Backend
    // handles that gracefully (logs a warning, doesn't panic) rather than
    // that it successfully resolves a namespace.
    let workspace = tempfile::tempdir().unwrap();
    let resource_path = workspace.path().join("keywords.resource");
    std::fs::write(&resource_path, "*** Keywords ***\n").unwrap();

    let cache_dir = tempfile::tempdir().unwrap();
    let mut client = TestClient::new(cache_dir.path().to_path_buf());
    client.initialize(None).await;
    let _ = client.recv().await; // config watcher registration

    let uri = format!("file://{}", resource_path.display());
    client.did_open(&uri, 1, "*** Keywords ***\n").await;

    let warning = client.recv_notification("window/logMessage").await;
    assert!(warning["params"]["message"].as_str().unwrap().contains("failed to resolve"));

    client.did_close(&uri).await;
    client.shutdown().await;
}

#[tokio::test]
async fn did_change_watched_files_for_robotcode_json_triggers_a_config_reload_attempt() {
    let workspace = tempfile::tempdir().unwrap();
    let config_path = workspace.path().join("robotcode.json");
    std::fs::write(&config_path, r#"{"cache": {"ignoredLibraries": ["Foo.*"]}}"#).unwrap();

    let cache_dir = tempfile::tempdir().unwrap();
    let mut client = TestClient::new(cache_dir.path().to_path_buf());
    let root_uri = format!("file://{}", workspace.path().display());
    client.initialize(Some(&root_uri)).await;
    let _ = client.recv().await; // config watcher registration

    // A valid config reloads silently; drive an invalid edit through the
    // same path and confirm the server surfaces a warning instead of
    // crashing.
    std::fs::write(&config_path, "{ not json").unwrap();
    let uri = format!("file://{}", config_path.display());
    client.did_change_watched_files(&[(&uri, 2)]).await;

    let warning = client.recv_notification("window/logMessage").await;
    assert!(warning["params"]["message"].as_str().unwrap().contains("failed to load"));

    client.shutdown().await;
}

//! Component D — Subprocess Introspector. Runs the black-box introspection
//! routine in a fresh, one-shot worker process per build with a hard
//! deadline, grounded on the original implementation's
//! `ProcessPoolExecutor(mp_context=spawn).result(timeout)` pattern. Rust has
//! no direct analogue to a `spawn`-context process pool, so a real OS
//! process is spawned per call via `tokio::process::Command` (the same
//! "isolated child, no inherited state" guarantee `spawn` gives Python) and
//! bounded with `tokio::time::timeout`, mirroring how the teacher bounds
//! `spawn_blocking` validations with a semaphore in `lsp.rs`.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::error::ImportsError;
use crate::model::{Doc, ImportKind};

/// Default deadlines (§4.D).
pub const LIBRARY_TIMEOUT: Duration = Duration::from_secs(30);
pub const VARIABLES_TIMEOUT: Duration = Duration::from_secs(30);
pub const RESOURCE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn default_timeout(kind: ImportKind) -> Duration {
    match kind {
        ImportKind::Library => LIBRARY_TIMEOUT,
        ImportKind::Variables => VARIABLES_TIMEOUT,
        ImportKind::Resource => RESOURCE_TIMEOUT,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntrospectRequest {
    pub kind: ImportKind,
    pub name: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub base_dir: PathBuf,
    pub cli_vars: std::collections::HashMap<String, String>,
    pub extra_vars: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireResponse {
    Ok { doc: Doc },
    Err { error: WireError },
}

#[derive(Debug, Deserialize)]
struct WireError {
    kind: String,
    message: String,
    source_location: Option<String>,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The introspection collaborator, kept as a trait so the Entry Registry
/// can be tested against an in-process fake instead of spawning real
/// subprocesses (§8 scenario S5 requires a "fake Introspector that sleeps
/// 60s").
pub trait Introspector: Send + Sync {
    fn run<'a>(&'a self, req: &'a IntrospectRequest, deadline: Duration) -> BoxFuture<'a, Result<Doc, ImportsError>>;
}

/// Spawns `command` as a one-shot child process per call, writes a single
/// line of JSON on stdin, reads a single line of JSON from stdout.
pub struct ProcessIntrospector {
    command: PathBuf,
}

impl ProcessIntrospector {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self { command: command.into() }
    }
}

impl Default for ProcessIntrospector {
    fn default() -> Self {
        Self::new("robotcode-introspect")
    }
}

impl Introspector for ProcessIntrospector {
    fn run<'a>(&'a self, req: &'a IntrospectRequest, deadline: Duration) -> BoxFuture<'a, Result<Doc, ImportsError>> {
        Box::pin(with_deadline(run_inner(&self.command, req), deadline, req))
    }
}

/// Enforce `deadline` on any introspection future, mapping expiry to
/// `IntrospectionTimeout`. Shared by `ProcessIntrospector` and by test
/// fakes standing in for the black box (§8 scenario S5).
pub async fn with_deadline<F>(fut: F, deadline: Duration, req: &IntrospectRequest) -> Result<Doc, ImportsError>
where
    F: Future<Output = Result<Doc, ImportsError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ImportsError::IntrospectionTimeout {
            name: req.name.clone(),
            args: req.args.clone(),
            deadline_secs: deadline.as_secs(),
        }),
    }
}

async fn run_inner(command: &PathBuf, req: &IntrospectRequest) -> Result<Doc, ImportsError> {
    let mut child = Command::new(command)
        .current_dir(&req.working_dir)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ImportsError::IntrospectionCrashed {
            name: req.name.clone(),
            args: req.args.clone(),
            exit_status: "spawn failed".to_string(),
            stderr_tail: e.to_string(),
        })?;

    let request_line = serde_json::to_string(req).map_err(|e| ImportsError::IntrospectionError {
        name: req.name.clone(),
        args: req.args.clone(),
        kind: "encode".to_string(),
        message: e.to_string(),
        source_location: None,
    })?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(request_line.as_bytes()).await;
        let _ = stdin.write_all(b"\n").await;
        let _ = stdin.shutdown().await;
    }

    let stdout = child.stdout.take().expect("piped stdout");
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    let _ = reader.read_line(&mut line).await;

    let status = child.wait().await.map_err(|e| ImportsError::IntrospectionCrashed {
        name: req.name.clone(),
        args: req.args.clone(),
        exit_status: "wait failed".to_string(),
        stderr_tail: e.to_string(),
    })?;

    if !status.success() {
        let mut stderr_tail = String::new();
        if let Some(mut stderr) = child.stderr.take() {
            use tokio::io::AsyncReadExt;
            let _ = stderr.read_to_string(&mut stderr_tail).await;
        }
        return Err(ImportsError::IntrospectionCrashed {
            name: req.name.clone(),
            args: req.args.clone(),
            exit_status: status.to_string(),
            stderr_tail: tail(&stderr_tail, 2048),
        });
    }

    if line.trim().is_empty() {
        return Err(ImportsError::IntrospectionError {
            name: req.name.clone(),
            args: req.args.clone(),
            kind: "empty-response".to_string(),
            message: "introspector produced no output".to_string(),
            source_location: None,
        });
    }

    match serde_json::from_str::<WireResponse>(line.trim()) {
        Ok(WireResponse::Ok { doc }) => Ok(doc),
        Ok(WireResponse::Err { error }) => Err(ImportsError::IntrospectionError {
            name: req.name.clone(),
            args: req.args.clone(),
            kind: error.kind,
            message: error.message,
            source_location: error.source_location,
        }),
        Err(e) => Err(ImportsError::IntrospectionError {
            name: req.name.clone(),
            args: req.args.clone(),
            kind: "decode".to_string(),
            message: e.to_string(),
            source_location: None,
        }),
    }
}

fn tail(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        s.to_string()
    } else {
        s[s.len() - max_bytes..].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SleepyIntrospector {
        sleep: Duration,
    }

    impl Introspector for SleepyIntrospector {
        fn run<'a>(&'a self, req: &'a IntrospectRequest, deadline: Duration) -> BoxFuture<'a, Result<Doc, ImportsError>> {
            let sleep = self.sleep;
            Box::pin(with_deadline(
                async move {
                    tokio::time::sleep(sleep).await;
                    Ok(Doc::Library(crate::model::LibraryDoc::default()))
                },
                deadline,
                req,
            ))
        }
    }

    fn sample_request() -> IntrospectRequest {
        IntrospectRequest {
            kind: ImportKind::Library,
            name: "Foo".into(),
            args: vec![],
            working_dir: PathBuf::from("."),
            base_dir: PathBuf::from("."),
            cli_vars: Default::default(),
            extra_vars: Default::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_exceeded_surfaces_timeout_error() {
        let introspector = SleepyIntrospector { sleep: Duration::from_secs(60) };
        let req = sample_request();

        let handle = tokio::spawn(async move {
            introspector.run(&req, Duration::from_secs(1)).await
        });
        tokio::time::advance(Duration::from_secs(2)).await;
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ImportsError::IntrospectionTimeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_introspector_succeeds_within_deadline() {
        let introspector = SleepyIntrospector { sleep: Duration::from_millis(10) };
        let req = sample_request();
        let result = introspector.run(&req, Duration::from_secs(5)).await;
        assert!(result.is_ok());
    }
}

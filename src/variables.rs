//! Component H — Command-line Variable Provider. A lazily-built, memoized
//! union of profile variables, project-config variables, and variable-file
//! contents, rebuilt only when the configuration that feeds it changes.
//! Grounded on the original implementation's `get_command_line_variables`
//! (see DESIGN.md) and on the teacher's `config_cache`
//! compute-once-then-invalidate-on-change idiom in `lsp.rs`. Variable files
//! are Python/YAML, so their contents are extracted the same way any other
//! `Variables` import is: through the Subprocess Introspector (§4.D), with
//! caching disabled since this set is rebuilt on every config change rather
//! than kept as a registry Entry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::RobotConfig;
use crate::introspect::{IntrospectRequest, Introspector};
use crate::model::{Doc, ImportKind, VariablesDoc};

/// Precedence, low to high (later entries win on key collision): profile
/// environment, project `robot.variables`, then variable files in listed
/// order. This mirrors the original implementation's merge order, where
/// each later source is allowed to override the ones before it.
fn merge(env: &HashMap<String, String>, project: &HashMap<String, String>, files: &[HashMap<String, String>]) -> HashMap<String, String> {
    let mut merged = env.clone();
    merged.extend(project.clone());
    for file in files {
        merged.extend(file.clone());
    }
    merged
}

/// Flattens a `VariablesDoc`'s entries into a plain name/value map. Values
/// that didn't come back as JSON strings are rendered as JSON text, matching
/// how the rest of this crate treats an introspected variable's value.
fn flatten(doc: &VariablesDoc) -> HashMap<String, String> {
    doc.variables
        .iter()
        .map(|v| {
            let value = match &v.value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (v.name.clone(), value)
        })
        .collect()
}

struct Cache {
    generation: u64,
    variables: HashMap<String, String>,
}

/// Lazily builds and memoizes the effective command-line variable set.
/// Bump `generation` (via `invalidate`) whenever the backing configuration
/// changes; the next `resolve` call rebuilds from scratch.
pub struct VariableProvider {
    cache: Mutex<Option<Cache>>,
    generation: std::sync::atomic::AtomicU64,
}

impl Default for VariableProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableProvider {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(None),
            generation: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Invalidate the memoized set; the next `resolve` rebuilds it.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    /// Return the effective variable map, rebuilding from `config` and the
    /// contents of `config.variable_files` only if the configuration has
    /// changed since the last call. Each variable file is introspected
    /// uncached through `introspector`, bounded by `timeout`; a file that
    /// fails to introspect (missing, unreadable, or a black-box error) is
    /// skipped rather than failing the whole resolution.
    pub async fn resolve(&self, config: &RobotConfig, working_dir: &Path, introspector: &dyn Introspector, timeout: Duration) -> HashMap<String, String> {
        let current_generation = self.generation.load(std::sync::atomic::Ordering::SeqCst);
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = cache.as_ref()
                && cached.generation == current_generation
            {
                return cached.variables.clone();
            }
        }

        let mut files = Vec::with_capacity(config.variable_files.len());
        for path in &config.variable_files {
            let req = IntrospectRequest {
                kind: ImportKind::Variables,
                name: path.clone(),
                args: vec![],
                working_dir: working_dir.to_path_buf(),
                base_dir: working_dir.to_path_buf(),
                cli_vars: HashMap::new(),
                extra_vars: HashMap::new(),
            };
            if let Ok(Doc::Variables(doc)) = introspector.run(&req, timeout).await {
                files.push(flatten(&doc));
            }
        }

        let variables = merge(&config.env, &config.variables, &files);
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        *cache = Some(Cache {
            generation: current_generation,
            variables: variables.clone(),
        });
        variables
    }
}

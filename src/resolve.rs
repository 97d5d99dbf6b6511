//! Component B — Path Resolver. Resolves an import name to a canonical
//! source, memoized in a bounded LRU, grounded on the teacher's
//! `find_config_file` upward walk and on the "simple LRU cache" shape the
//! original implementation uses (`SimpleLRUCache`), here an `lru::LruCache`
//! behind a `Mutex` exactly as `schema::SchemaCache` wraps its `HashMap` of
//! slots.
//!
//! When `name` contains a `${VAR}` sigil, it is expanded against the
//! caller's `extra_vars` map before any filesystem lookup happens (§4.B):
//! an unresolved variable is left as a literal `${VAR}` in the expanded
//! name, which will simply fail to resolve to a file rather than raising a
//! parse error — no language parsing belongs in this crate (§1 Non-goals).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lru::LruCache;

use crate::error::ImportsError;
use crate::fingerprint::{ModuleSpec, RESOURCE_EXTENSIONS, looks_like_path};
use crate::model::ImportKind;

/// Default LRU capacity (§4.B).
pub const DEFAULT_CAPACITY: usize = 256;

/// True if `name` contains at least one `${...}` variable reference.
pub fn contains_variable_sigil(name: &str) -> bool {
    name.contains("${")
}

/// Substitute every `${VAR}` reference in `name` with its value from
/// `vars`. A reference whose name isn't in `vars` is left untouched
/// (literal `${VAR}` survives into the expanded string) rather than
/// erroring — resolution simply fails downstream when the resulting name
/// doesn't correspond to a file or importable module.
pub fn expand_variables(name: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after_sigil = &rest[start + 2..];
        match after_sigil.find('}') {
            Some(end) => {
                let var_name = &after_sigil[..end];
                match vars.get(var_name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after_sigil[end + 1..];
            }
            None => {
                // Unterminated sigil: no closing brace anywhere in the
                // remainder, so treat the rest as a literal tail.
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// A stable hash of an `extra_vars` map, used as part of the LRU
/// memoization key so two resolutions of the same name under different
/// variable bindings don't collide (§4.B: memoized by `(name, base_dir,
/// extra_vars_fingerprint, ...)`).
fn fingerprint_vars(vars: &HashMap<String, String>) -> u64 {
    let mut entries: Vec<(&String, &String)> = vars.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for (k, v) in entries {
        k.hash(&mut hasher);
        v.hash(&mut hasher);
    }
    hasher.finish()
}

/// Memoization key: the resolved inputs to a single `find` call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResolveKey {
    kind: ImportKind,
    name: String,
    base_dir: PathBuf,
    extra_vars_fingerprint: u64,
}

/// The outcome of resolving an import name.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// A concrete file on disk.
    Path(PathBuf),
    /// A module-like name (library only): resolved search locations but no
    /// single file, or a file plus sibling submodule locations.
    Module(ModuleSpec),
    /// Could not be resolved at all.
    NotFound,
}

/// A search-path provider, supplied by the collaborator that knows the
/// workspace's configured library/resource search roots. Kept as a trait so
/// `resolve::find` stays testable without a real workspace.
pub trait SearchPath: Send + Sync {
    fn roots(&self) -> Vec<PathBuf>;
}

/// A no-op search path, useful for tests and for callers with no configured
/// extra roots.
pub struct EmptySearchPath;
impl SearchPath for EmptySearchPath {
    fn roots(&self) -> Vec<PathBuf> {
        vec![]
    }
}

/// Bounded LRU cache of resolved import paths, one instance shared by all
/// kinds (the kind is part of the memoization key).
pub struct PathResolver {
    cache: Mutex<LruCache<ResolveKey, Resolved>>,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl PathResolver {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Resolve `name` to a canonical source, memoized by
    /// `(kind, name, base_dir, extra_vars_fingerprint)`. If `name` contains
    /// a `${VAR}` sigil it is expanded against `extra_vars` before any
    /// filesystem lookup (§4.B). A `Resource` import that resolves to a file
    /// whose extension isn't in the allowed set (§7) is rejected outright and
    /// never memoized.
    pub fn find(
        &self,
        kind: ImportKind,
        name: &str,
        base_dir: &Path,
        extra_vars: &HashMap<String, String>,
        search_path: &dyn SearchPath,
    ) -> Result<Resolved, ImportsError> {
        let extra_vars_fingerprint = fingerprint_vars(extra_vars);
        let key = ResolveKey {
            kind,
            name: name.to_string(),
            base_dir: base_dir.to_path_buf(),
            extra_vars_fingerprint,
        };

        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(&key) {
                return Ok(hit.clone());
            }
        }

        let expanded = if contains_variable_sigil(name) {
            expand_variables(name, extra_vars)
        } else {
            name.to_string()
        };
        let resolved = resolve_uncached(kind, &expanded, base_dir, search_path)?;

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(key, resolved.clone());
        Ok(resolved)
    }

    /// Clear every memoized resolution for the given kind. Called whenever
    /// the registry removes an Entry of that kind, per §4.B.
    pub fn invalidate_kind(&self, kind: ImportKind) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let keep: Vec<(ResolveKey, Resolved)> = cache
            .iter()
            .filter(|(k, _)| k.kind != kind)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        cache.clear();
        for (k, v) in keep {
            cache.put(k, v);
        }
    }
}

/// True if `path`'s extension is one of the allowed resource extensions
/// (§7), case-insensitively.
fn has_allowed_resource_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| RESOURCE_EXTENSIONS.iter().any(|allowed| ext.eq_ignore_ascii_case(allowed)))
}

fn check_resource_extension(kind: ImportKind, path: PathBuf) -> Result<Resolved, ImportsError> {
    if kind == ImportKind::Resource && !has_allowed_resource_extension(&path) {
        return Err(ImportsError::InvalidResourceExtension {
            path: path.to_string_lossy().into_owned(),
            allowed: RESOURCE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        });
    }
    Ok(Resolved::Path(path))
}

fn resolve_uncached(
    kind: ImportKind,
    name: &str,
    base_dir: &Path,
    search_path: &dyn SearchPath,
) -> Result<Resolved, ImportsError> {
    if looks_like_path(kind, name) {
        let candidate = Path::new(name);
        let abs = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            base_dir.join(candidate)
        };
        if abs.is_file() {
            return check_resource_extension(kind, abs);
        }
        // Scan upward from base_dir, matching the teacher's config-walk idiom.
        if let Some(found) = find_file_upward(base_dir, candidate) {
            return check_resource_extension(kind, found);
        }
        return Ok(Resolved::NotFound);
    }

    if kind != ImportKind::Library {
        return Ok(Resolved::NotFound);
    }

    // Module name: look for `<root>/<a>/<b>.py` or `<root>/<a>/<b>/__init__.py`
    // across every configured search root, standard-library-rewrite aside
    // (stdlib rewriting to `robot.libraries.<name>` happens one layer up, in
    // the Facade, since it is policy rather than resolution mechanics).
    let rel = name.replace('.', "/");
    for root in search_path.roots() {
        let as_module = root.join(format!("{rel}.py"));
        if as_module.is_file() {
            return Ok(Resolved::Path(as_module));
        }
        let as_package = root.join(&rel);
        let init = as_package.join("__init__.py");
        if init.is_file() {
            return Ok(Resolved::Module(ModuleSpec {
                origin: Some(init),
                submodule_search_locations: vec![as_package],
            }));
        }
    }

    Ok(Resolved::NotFound)
}

fn find_file_upward(start: &Path, relative: &Path) -> Option<PathBuf> {
    let mut dir = if start.is_file() { start.parent()? } else { start };
    loop {
        let candidate = dir.join(relative);
        if candidate.is_file() {
            return Some(candidate);
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return None,
        }
    }
}

//! Component C — On-disk Artifact Store. Pure functions over a filesystem
//! subtree, grounded on the teacher's `schema::{load_url_schema, write_cache,
//! clear_cache}`: same atomic write-then-rename pattern and symlink
//! defense-in-depth, generalized from a single schema cache directory to
//! the versioned, three-kind layout of §3.
//!
//! Layout: `<cache_root>/.robotcode_cache/<lang_runtime_version>/<domain_version>/<kind_dir>/<filepath_base>.{meta,spec}.json`

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ImportsError;
use crate::model::{Doc, ImportKind, Meta};

/// Identifies the introspection backend's runtime, e.g. `python-3.11`.
/// Resolved once at manager start-up (Open Question resolution, see
/// DESIGN.md): the Subprocess Introspector reports its interpreter version
/// on first successful spawn; until then this crate's own build target
/// triple stands in so the cache directory is still well-defined.
pub fn lang_runtime_version(reported: Option<&str>) -> String {
    reported
        .map(str::to_string)
        .unwrap_or_else(|| "unknown-runtime".to_string())
}

/// The artifact schema version. Bumped whenever `Meta`/`Doc`'s on-disk shape
/// changes in a way older caches can't be read back from.
pub const DOMAIN_VERSION: &str = "v1";

/// Root directory for the artifact store under a given cache root.
pub fn store_root(cache_root: &Path, lang_runtime_version: &str) -> PathBuf {
    cache_root
        .join(".robotcode_cache")
        .join(lang_runtime_version)
        .join(DOMAIN_VERSION)
}

fn meta_path(root: &Path, kind: ImportKind, filepath_base: &str) -> PathBuf {
    root.join(kind.store_dir())
        .join(format!("{filepath_base}.meta.json"))
}

fn spec_path(root: &Path, kind: ImportKind, filepath_base: &str) -> PathBuf {
    root.join(kind.store_dir())
        .join(format!("{filepath_base}.spec.json"))
}

/// Read a `(Meta, Doc)` pair. Returns `None` if either file is missing,
/// malformed, or its `meta_version` doesn't match the running version —
/// any such condition is treated as an absent cache entry, never an error.
pub fn read(root: &Path, kind: ImportKind, filepath_base: &str) -> Option<(Meta, Doc)> {
    let meta_path = meta_path(root, kind, filepath_base);
    let spec_path = spec_path(root, kind, filepath_base);

    let meta_str = fs::read_to_string(&meta_path).ok()?;
    let meta: Meta = serde_json::from_str(&meta_str).ok()?;
    if meta.meta_version != Meta::current_version() {
        return None;
    }

    let spec_str = fs::read_to_string(&spec_path).ok()?;
    let doc: Doc = serde_json::from_str(&spec_str).ok()?;

    Some((meta, doc))
}

/// Write a `(Meta, Doc)` pair atomically. Spec is written before meta: if
/// the spec write fails, meta is never written, so a reader never observes
/// a meta whose spec doesn't exist (§4.C).
pub fn write(
    root: &Path,
    kind: ImportKind,
    filepath_base: &str,
    meta: &Meta,
    doc: &Doc,
) -> Result<(), ImportsError> {
    let dir = root.join(kind.store_dir());
    fs::create_dir_all(&dir).map_err(|e| ImportsError::CacheIoError {
        path: dir.display().to_string(),
        cause: e.to_string(),
    })?;

    let spec_path = spec_path(root, kind, filepath_base);
    let meta_path = meta_path(root, kind, filepath_base);

    let spec_json = serde_json::to_string_pretty(doc).map_err(|e| ImportsError::CacheIoError {
        path: spec_path.display().to_string(),
        cause: e.to_string(),
    })?;
    atomic_write(&spec_path, &spec_json)?;

    let meta_json = serde_json::to_string_pretty(meta).map_err(|e| ImportsError::CacheIoError {
        path: meta_path.display().to_string(),
        cause: e.to_string(),
    })?;
    atomic_write(&meta_path, &meta_json)?;

    Ok(())
}

fn atomic_write(path: &Path, content: &str) -> Result<(), ImportsError> {
    if let Ok(m) = fs::symlink_metadata(path)
        && m.file_type().is_symlink()
    {
        return Err(ImportsError::CacheIoError {
            path: path.display().to_string(),
            cause: "refusing to write through a symlink".to_string(),
        });
    }

    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("json")
    ));
    fs::write(&tmp, content).map_err(|e| ImportsError::CacheIoError {
        path: tmp.display().to_string(),
        cause: e.to_string(),
    })?;
    fs::rename(&tmp, path).map_err(|e| ImportsError::CacheIoError {
        path: path.display().to_string(),
        cause: e.to_string(),
    })
}

/// Recursively remove the cache root. In-memory entries are left intact
/// (per §4.I, `clear_cache` does not touch the Entry Registry).
pub fn clear(cache_root: &Path) -> Result<(), ImportsError> {
    let dir = cache_root.join(".robotcode_cache");

    match fs::symlink_metadata(&dir) {
        Ok(m) if m.file_type().is_symlink() => {
            return Err(ImportsError::CacheIoError {
                path: dir.display().to_string(),
                cause: "cache directory is a symlink; refusing to clear".to_string(),
            });
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(ImportsError::CacheIoError {
                path: dir.display().to_string(),
                cause: e.to_string(),
            });
        }
    }

    match fs::remove_dir_all(&dir) {
        Ok(()) => Ok(()),
        Err(_) if !dir.exists() => Ok(()),
        Err(e) => Err(ImportsError::CacheIoError {
            path: dir.display().to_string(),
            cause: e.to_string(),
        }),
    }
}

//! Data model shared across the Imports Manager: import kinds, keys, the
//! `Meta` fingerprint, and the documentation artifacts produced by
//! introspection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The closed set of things an import directive can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportKind {
    Library,
    Resource,
    Variables,
}

impl ImportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Library => "library",
            Self::Resource => "resource",
            Self::Variables => "variables",
        }
    }

    /// Directory name this kind's artifacts live under in the store.
    pub fn store_dir(&self) -> &'static str {
        match self {
            Self::Library => "libdoc",
            Self::Resource => "resource",
            Self::Variables => "variables",
        }
    }
}

/// Resolved import arguments after variable substitution. Order is
/// significant and participates in key equality.
pub type ResolvedArgs = Vec<String>;

/// Key for a `Library` or `Variables` import.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameArgsKey {
    pub resolved_source_or_name: String,
    pub resolved_args: ResolvedArgs,
}

/// Key for a `Resource` import: identity is just the resolved source path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub resolved_source: String,
}

/// Union of the three key shapes, discriminated by `ImportKind` at the
/// registry boundary (each kind has its own map, so the discriminant is
/// implicit in which map an `EntryKey` lives in, but we keep an explicit
/// enum too for code that needs to carry a key across kind boundaries, e.g.
/// the invalidation dispatcher).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Library(NameArgsKey),
    Resource(ResourceKey),
    Variables(NameArgsKey),
}

impl EntryKey {
    pub fn kind(&self) -> ImportKind {
        match self {
            Self::Library(_) => ImportKind::Library,
            Self::Resource(_) => ImportKind::Resource,
            Self::Variables(_) => ImportKind::Variables,
        }
    }
}

/// Identity + freshness descriptor persisted alongside each artifact.
///
/// Two `Meta` values are equal iff every field, including the full `mtimes`
/// map, matches byte-for-byte once serialized. We derive `PartialEq` so Rust
/// structural equality does exactly that, since every field here is already
/// a value type with exact equality semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub meta_version: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub member_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub submodule_search_locations: Vec<String>,
    pub by_path: bool,
    /// Absolute path -> mtime in nanoseconds since the Unix epoch.
    /// A `BTreeMap` so serialization is deterministic (stable key order),
    /// which is what makes the "byte-equal meta.json" cache-hit test work.
    #[serde(default)]
    pub mtimes: BTreeMap<String, u64>,
}

impl Meta {
    pub fn current_version() -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    /// The deterministic stem used to name `meta.json`/`spec.json`.
    ///
    /// For path-based imports: 32-bit Adler-32 of the parent directory
    /// string (hex, 8 chars) + `_` + the stem of `origin`.
    /// For module imports: the dotted name with `.` -> `/`, optionally
    /// suffixed with `.member_name`.
    pub fn filepath_base(&self) -> String {
        if self.by_path {
            let origin = self.origin.as_deref().unwrap_or(&self.name);
            let path = Path::new(origin);
            let parent = path.parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| origin.to_string());
            let hash = adler::adler32_slice(parent.as_bytes());
            format!("{hash:08x}_{stem}")
        } else {
            let mut base = self.name.replace('.', "/");
            if let Some(member) = &self.member_name {
                base = format!("{base}.{member}");
            }
            base
        }
    }
}

/// Collect mtimes (ns since epoch) for `origin` plus every `.py`-like file
/// recursively under each `submodule_search_locations` entry. Used by both
/// the fingerprinter and (for test fixtures) introspection stubs.
pub fn collect_mtimes(origin: Option<&Path>, search_locations: &[PathBuf]) -> BTreeMap<String, u64> {
    let mut mtimes = BTreeMap::new();
    if let Some(origin) = origin {
        if let Some(ns) = mtime_ns(origin) {
            mtimes.insert(origin.to_string_lossy().into_owned(), ns);
        }
    }
    for loc in search_locations {
        let walker = ignore::WalkBuilder::new(loc).hidden(false).build();
        for entry in walker.flatten() {
            let path = entry.path();
            if entry.file_type().is_some_and(|ft| ft.is_file())
                && path.extension().and_then(|e| e.to_str()) == Some("py")
                && let Some(ns) = mtime_ns(path)
            {
                mtimes.insert(path.to_string_lossy().into_owned(), ns);
            }
        }
    }
    mtimes
}

fn mtime_ns(path: &Path) -> Option<u64> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    let dur = modified
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    Some(dur.as_nanos().min(u64::MAX as u128) as u64)
}

/// A single keyword extracted from a library or resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordDoc {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub doc: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lineno: Option<u32>,
}

/// A single variable extracted from a variables file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDoc {
    pub name: String,
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lineno: Option<u32>,
}

/// A structured error raised during introspection, with source location if
/// the black box could determine one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionIssue {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lineno: Option<u32>,
}

/// Documentation for a `Library` import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryDoc {
    pub name: String,
    #[serde(default)]
    pub doc: String,
    #[serde(default)]
    pub keywords: Vec<KeywordDoc>,
    #[serde(default)]
    pub errors: Vec<IntrospectionIssue>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<String>,
}

/// Documentation for a `Variables` import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariablesDoc {
    pub name: String,
    #[serde(default)]
    pub variables: Vec<VariableDoc>,
    #[serde(default)]
    pub errors: Vec<IntrospectionIssue>,
}

/// The symbol environment derived from a resource file: its own keywords
/// and variables, plus the libraries/resources/variables it in turn
/// imports (full recursive resolution of those is delegated back through
/// the Facade by the caller; the Namespace here only records what this
/// resource document itself declares).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Namespace {
    pub source: String,
    #[serde(default)]
    pub keywords: Vec<KeywordDoc>,
    #[serde(default)]
    pub variables: Vec<VariableDoc>,
    #[serde(default)]
    pub errors: Vec<IntrospectionIssue>,
}

/// The artifact produced by a successful build, tagged by kind so the
/// Entry Registry can store one enum per key regardless of kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Doc {
    Library(LibraryDoc),
    Resource(Namespace),
    Variables(VariablesDoc),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filepath_base_for_path_import_uses_adler32_of_parent() {
        let meta = Meta {
            meta_version: "0.0.0".into(),
            name: "C:/some dir/My.py".into(),
            member_name: None,
            origin: Some("C:/some dir/My.py".into()),
            submodule_search_locations: vec![],
            by_path: true,
            mtimes: BTreeMap::new(),
        };
        let base = meta.filepath_base();
        let expected_hash = adler::adler32_slice("C:/some dir".as_bytes());
        assert_eq!(base, format!("{expected_hash:08x}_My"));
    }

    #[test]
    fn filepath_base_for_module_import_uses_dotted_path() {
        let meta = Meta {
            meta_version: "0.0.0".into(),
            name: "robot.libraries.OperatingSystem".into(),
            member_name: None,
            origin: Some("/usr/lib/robot/libraries/OperatingSystem.py".into()),
            submodule_search_locations: vec![],
            by_path: false,
            mtimes: BTreeMap::new(),
        };
        assert_eq!(meta.filepath_base(), "robot/libraries/OperatingSystem");
    }

    #[test]
    fn filepath_base_appends_member_name() {
        let meta = Meta {
            meta_version: "0.0.0".into(),
            name: "my.vars".into(),
            member_name: Some("get_variables".into()),
            origin: None,
            submodule_search_locations: vec![],
            by_path: false,
            mtimes: BTreeMap::new(),
        };
        assert_eq!(meta.filepath_base(), "my/vars.get_variables");
    }

    #[test]
    fn meta_equality_is_sensitive_to_mtimes() {
        let mut a = Meta {
            meta_version: "0.0.0".into(),
            name: "x".into(),
            member_name: None,
            origin: Some("/a/x.py".into()),
            submodule_search_locations: vec![],
            by_path: true,
            mtimes: BTreeMap::new(),
        };
        let mut b = a.clone();
        assert_eq!(a, b);
        a.mtimes.insert("/a/x.py".into(), 1);
        b.mtimes.insert("/a/x.py".into(), 2);
        assert_ne!(a, b);
    }
}

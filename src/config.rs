//! Configuration surface (§6), grounded on the teacher's `discover::Config`:
//! JSONC parsing via `jsonc-parser`, `deny_unknown_fields`, and a
//! `schemars`-derived JSON Schema for self-description.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {message}")]
    JsoncParseError { path: String, message: String },
    #[error("failed to parse config file '{path}': {source}")]
    ParseError {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid glob pattern '{pattern}': {source}")]
    GlobError {
        pattern: String,
        source: globset::Error,
    },
}

/// Where on-disk artifacts are written relative to a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub enum CacheSaveLocation {
    /// A server-managed storage directory outside the project tree.
    #[default]
    WorkspaceStorage,
    /// `<workspace_folder>/.robotcode_cache`.
    WorkspaceFolder,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(deny_unknown_fields, default, rename_all = "camelCase")]
pub struct CacheConfig {
    pub save_location: CacheSaveLocation,
    /// Glob patterns matched against a library's name or resolved origin;
    /// matching libraries are resolvable but never persisted to disk.
    pub ignored_libraries: Vec<String>,
    /// Same as `ignored_libraries`, for `Variables` imports.
    pub ignored_variables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(deny_unknown_fields, default, rename_all = "camelCase")]
pub struct RobotConfig {
    /// Extra environment variables passed to every introspection subprocess.
    pub env: HashMap<String, String>,
    /// Extra variables visible to every import (profile-level).
    pub variables: HashMap<String, String>,
    /// Paths (optionally `path:name=value` args) to variable files loaded
    /// by the Command-line Variable Provider.
    pub variable_files: Vec<String>,
}

/// Project configuration, grounded on the teacher's `jvl.json` but carrying
/// the Imports Manager's own recognized options (§6).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
#[schemars(rename = "robotcode-imports-ls configuration")]
pub struct Config {
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    #[schemars(rename = "$schema")]
    pub schema_url: Option<String>,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub robot: RobotConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_url: None,
            cache: CacheConfig::default(),
            robot: RobotConfig::default(),
        }
    }
}

impl Config {
    /// Load and parse a config file (JSONC: comments and trailing commas
    /// allowed, same as the teacher's `jvl.json`).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            source: e,
        })?;

        let ast = jsonc_parser::parse_to_ast(
            &content,
            &Default::default(),
            &crate::parse::parse_options(),
        )
        .map_err(|e| ConfigError::JsoncParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let value: serde_json::Value = ast
            .value
            .ok_or_else(|| ConfigError::JsoncParseError {
                path: path.display().to_string(),
                message: "empty config file".to_string(),
            })?
            .into();

        serde_json::from_value(value).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })
    }
}

/// Discover the config file by walking up from the start directory, looking
/// for `robotcode.json`.
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut dir = if start.is_file() {
        start.parent()?
    } else {
        start
    };

    loop {
        let candidate = dir.join("robotcode.json");
        if candidate.exists() {
            return Some(candidate);
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return None,
        }
    }
}

/// Pre-compiled glob lists for the `cache.ignored_libraries`/
/// `cache.ignored_variables` patterns, so the Fingerprinter doesn't
/// recompile a `GlobSet` on every import.
pub struct CompiledIgnorePatterns {
    libraries: globset::GlobSet,
    variables: globset::GlobSet,
}

impl CompiledIgnorePatterns {
    pub fn compile(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            libraries: build_globset(&config.cache.ignored_libraries)?,
            variables: build_globset(&config.cache.ignored_variables)?,
        })
    }

    pub fn empty() -> Self {
        Self {
            libraries: globset::GlobSetBuilder::new().build().unwrap(),
            variables: globset::GlobSetBuilder::new().build().unwrap(),
        }
    }

    /// Returns true if `name` or `origin` matches an ignore pattern for the
    /// given kind. `Resource` imports are never ignored (no ignore list is
    /// defined for them in §6).
    pub fn is_ignored(&self, kind: crate::model::ImportKind, name: &str, origin: Option<&str>) -> bool {
        let set = match kind {
            crate::model::ImportKind::Library => &self.libraries,
            crate::model::ImportKind::Variables => &self.variables,
            crate::model::ImportKind::Resource => return false,
        };
        set.is_match(name) || origin.is_some_and(|o| set.is_match(o))
    }
}

fn build_globset(patterns: &[String]) -> Result<globset::GlobSet, ConfigError> {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        let glob = globset::Glob::new(pattern).map_err(|e| ConfigError::GlobError {
            pattern: pattern.clone(),
            source: e,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| ConfigError::GlobError {
        pattern: patterns.join(", "),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_empty_ignore_lists() {
        let config = Config::default();
        assert!(config.cache.ignored_libraries.is_empty());
        assert!(config.cache.ignored_variables.is_empty());
    }

    #[test]
    fn ignore_patterns_match_name_or_origin() {
        let mut config = Config::default();
        config.cache.ignored_libraries = vec!["Foo.*".into()];
        let compiled = CompiledIgnorePatterns::compile(&config).unwrap();
        assert!(compiled.is_ignored(crate::model::ImportKind::Library, "Foo.Bar", None));
        assert!(!compiled.is_ignored(crate::model::ImportKind::Library, "Baz", None));
        assert!(!compiled.is_ignored(crate::model::ImportKind::Resource, "Foo.Bar", None));
    }

    #[test]
    fn load_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("robotcode.json");
        std::fs::write(&path, r#"{"totallyUnknown": true}"#).unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn load_accepts_jsonc_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("robotcode.json");
        std::fs::write(
            &path,
            r#"{
                // ignore our internal test doubles
                "cache": { "ignoredLibraries": ["Foo.*"] },
            }"#,
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.cache.ignored_libraries, vec!["Foo.*".to_string()]);
    }
}

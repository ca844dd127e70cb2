//! Package manifest
//!
//! The descriptor file that marks a directory as a package root. Only the
//! fields the registry consumes are modeled; everything else is ignored.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::value::Value;

/// A named capability-provider declaration
pub type ProviderMap = serde_json::Map<String, Value>;

/// Parsed package manifest
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    pub name: Option<String>,
    pub version: Option<String>,
    /// Named capability-provider declarations, keyed by capability name
    #[serde(default)]
    pub providers: HashMap<String, ProviderMap>,
}

impl Manifest {
    /// Read and parse the manifest inside `dir`. A missing or unparsable
    /// manifest is not an error; the package falls back to defaults.
    pub fn read(dir: &Path, file_name: &str) -> Option<Manifest> {
        let path = dir.join(file_name);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => return None,
        };
        match serde_json::from_str(&text) {
            Ok(manifest) => Some(manifest),
            Err(error) => {
                debug!("failed to parse manifest {:?}: {}", path, error);
                None
            }
        }
    }

    /// Providers declared for `name`, or an empty map
    pub fn providers(&self, name: &str) -> ProviderMap {
        self.providers.get(name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let manifest: Manifest = serde_json::from_str(
            r#"{
                "name": "p",
                "version": "1.0.0",
                "providers": { "codec": { "json": "lib/json.src" } },
                "scripts": { "ignored": "true" }
            }"#,
        )
        .unwrap();
        assert_eq!(manifest.name.as_deref(), Some("p"));
        assert_eq!(manifest.version.as_deref(), Some("1.0.0"));
        assert_eq!(
            manifest.providers("codec").get("json").and_then(|v| v.as_str()),
            Some("lib/json.src")
        );
        assert!(manifest.providers("storage").is_empty());
    }

    #[test]
    fn test_read_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Manifest::read(dir.path(), "package.json").is_none());
    }

    #[test]
    fn test_read_unparsable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "not json").unwrap();
        assert!(Manifest::read(dir.path(), "package.json").is_none());
    }
}

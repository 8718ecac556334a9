//! `Kiln.toml` project manifest.
//!
//! A `[package]` table plus a `[dependencies]` table whose values are either
//! a relative `path` or a `system = true` marker resolved against a shared
//! library root, deserialized with `serde` + `toml`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub package: Package,
    #[serde(default)]
    pub dependencies: HashMap<String, DependencySpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Entry source file, relative to the project directory.
    #[serde(default = "default_entry")]
    pub entry: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    Path { path: String },
    System { system: bool },
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_entry() -> String {
    "src/main.kl".to_string()
}

impl Manifest {
    /// Loads `Kiln.toml` from `dir`. A host-level failure (missing file,
    /// malformed TOML), not a compilation diagnostic, so it propagates as
    /// an `anyhow::Error` rather than through a `Sink`.
    pub fn load(dir: &Path) -> anyhow::Result<Manifest> {
        let path = dir.join("Kiln.toml");
        let content = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_manifest() {
        let toml = "[package]\nname = \"demo\"\n";
        let manifest: Manifest = toml::from_str(toml).unwrap();
        assert_eq!(manifest.package.name, "demo");
        assert_eq!(manifest.package.version, "0.1.0");
        assert_eq!(manifest.package.entry, "src/main.kl");
        assert!(manifest.dependencies.is_empty());
    }

    #[test]
    fn parses_path_and_system_dependencies() {
        let toml = r#"
        [package]
        name = "demo"
        version = "0.1.0"

        [dependencies]
        collections = { path = "../collections" }
        posix = { system = true }
        "#;
        let manifest: Manifest = toml::from_str(toml).unwrap();
        match &manifest.dependencies["collections"] {
            DependencySpec::Path { path } => assert_eq!(path, "../collections"),
            DependencySpec::System { .. } => panic!("expected a path dependency"),
        }
        match &manifest.dependencies["posix"] {
            DependencySpec::System { system } => assert!(*system),
            DependencySpec::Path { .. } => panic!("expected a system dependency"),
        }
    }

    #[test]
    fn missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Manifest::load(dir.path()).is_err());
    }
}

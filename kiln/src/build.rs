//! Project build orchestration.
//!
//! Resolves `Kiln.toml` dependencies to on-disk search paths, drives
//! `kilnc`'s passes over the package's entry file, and — on request —
//! serializes the result as a library bundle for path-dependents to import.
//! Stops short of native codegen and linking (Non-goals): a `Build`
//! here produces a typed, lifetime-checked tree and optionally a bundle,
//! nothing more.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

use kilnc::types::TypeInterner;
use kilnc::{Sink, TypedUnit};

use crate::manifest::{DependencySpec, Manifest};

pub struct BuildOutcome {
    pub unit: TypedUnit,
    pub sink: Sink,
}

impl BuildOutcome {
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.sink.error_count()
    }
}

/// Resolves one manifest dependency to the project directory it points at:
/// a `path` dependency relative to `project_dir`, a `system` dependency
/// under `system_root`.
fn resolve_dependency(project_dir: &Path, name: &str, dep: &DependencySpec, system_root: Option<&Path>) -> anyhow::Result<PathBuf> {
    match dep {
        DependencySpec::Path { path } => Ok(project_dir.join(path)),
        DependencySpec::System { system } => {
            if !*system {
                bail!("dependency `{name}` has `system = false`, which names no resolvable location");
            }
            system_root
                .map(|root| root.join(name))
                .with_context(|| format!("dependency `{name}` is `system = true` but no system library root was given (pass --system-libs)"))
        }
    }
}

/// The ordered list of filesystem roots `parse_unit` resolves `import`
/// statements against: the package's own `src/`, then each dependency's.
pub fn search_paths(project_dir: &Path, manifest: &Manifest, system_root: Option<&Path>) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = vec![project_dir.join("src")];
    for (name, dep) in &manifest.dependencies {
        let dep_dir = resolve_dependency(project_dir, name, dep, system_root)?;
        paths.push(dep_dir.join("src"));
    }
    Ok(paths)
}

/// Compiles `project_dir`'s package through `parse_unit` → `analyse` →
/// `lifetime_check`. Never fails on a malformed *program*: those errors
/// land in the returned `Sink`. Only a missing/unreadable
/// entry file, an unresolvable dependency, or a dependency cycle is a
/// host-level `anyhow::Error`.
///
/// `path` dependencies are compiled first (depth-first, the `imported
/// libraries` composition assigns the driver) and their typed
/// declarations are handed to this package's own `analyse` call as the
/// `imported_libraries` map, keyed by the name the dependency was declared
/// under. `system` dependencies contribute no declarations here: they have
/// no `Kiln.toml`/source of their own to analyse, and are instead resolved
/// purely as `import`-statement search-path roots (`search_paths`) for the
/// raw source-level import the program writes.
pub fn compile_package(project_dir: &Path, manifest: &Manifest, system_root: Option<&Path>) -> anyhow::Result<BuildOutcome> {
    compile_package_rec(project_dir, manifest, system_root, &mut Vec::new())
}

fn compile_package_rec(
    project_dir: &Path,
    manifest: &Manifest,
    system_root: Option<&Path>,
    in_progress: &mut Vec<PathBuf>,
) -> anyhow::Result<BuildOutcome> {
    let canonical = fs::canonicalize(project_dir).unwrap_or_else(|_| project_dir.to_path_buf());
    if in_progress.contains(&canonical) {
        bail!("dependency cycle detected at {}", project_dir.display());
    }
    in_progress.push(canonical);

    // Created before the dependency loop: `lift_unqualified` interns its
    // prefixed `Ty`s through this same interner, so the lifted declarations
    // slot into this package's own type model rather than the dependency's.
    let interner = TypeInterner::new();

    let mut imported_libraries = HashMap::new();
    for (name, dep) in &manifest.dependencies {
        if matches!(dep, DependencySpec::System { .. }) {
            continue;
        }
        let dep_dir = resolve_dependency(project_dir, name, dep, system_root)?;
        let dep_manifest =
            Manifest::load(&dep_dir).with_context(|| format!("loading manifest for dependency `{name}` at {}", dep_dir.display()))?;
        let dep_outcome = compile_package_rec(&dep_dir, &dep_manifest, system_root, in_progress)?;
        if dep_outcome.error_count() > 0 {
            bail!("dependency `{name}` failed to compile ({} error(s))", dep_outcome.error_count());
        }
        let prefix = kilnc::path::Path::single(kilnc::symbol::intern(name));
        let lifted = kilnc::library::lift_unqualified(dep_outcome.unit.decls, &prefix, &interner);
        imported_libraries.insert(name.clone(), lifted);
    }
    in_progress.pop();

    let entry_path = project_dir.join(&manifest.package.entry);
    let source = fs::read_to_string(&entry_path).with_context(|| format!("reading entry file {}", entry_path.display()))?;
    let paths = search_paths(project_dir, manifest, system_root)?;

    let mut sink = Sink::new();
    let filename = entry_path.to_string_lossy().into_owned();
    let stmts = kilnc::parse_unit(&source, &filename, &paths, &mut sink);

    let unit = kilnc::analyse(&stmts, &imported_libraries, &interner, &mut sink);
    kilnc::lifetime_check(&unit, &mut sink);

    Ok(BuildOutcome { unit, sink })
}

/// Writes `outcome`'s typed tree out as a library bundle other projects can
/// consume as a `path` dependency.
pub fn export_bundle(outcome: &BuildOutcome, out_path: &Path) -> anyhow::Result<()> {
    let mut file = fs::File::create(out_path).with_context(|| format!("creating {}", out_path.display()))?;
    kilnc::export_library(&outcome.unit, &mut file).with_context(|| format!("writing library bundle to {}", out_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Package;

    fn manifest(entry: &str) -> Manifest {
        Manifest { package: Package { name: "demo".into(), version: "0.1.0".into(), entry: entry.into() }, dependencies: Default::default() }
    }

    #[test]
    fn compiles_a_minimal_package() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.kl"), "fn main() void {}\n").unwrap();
        let outcome = compile_package(dir.path(), &manifest("src/main.kl"), None).unwrap();
        assert_eq!(outcome.error_count(), 0);
        assert_eq!(outcome.unit.decls.len(), 1);
    }

    #[test]
    fn missing_entry_file_is_a_host_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(compile_package(dir.path(), &manifest("src/main.kl"), None).is_err());
    }

    #[test]
    fn unresolvable_system_dependency_is_a_host_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.kl"), "fn main() void {}\n").unwrap();
        let mut m = manifest("src/main.kl");
        m.dependencies.insert("posix".into(), DependencySpec::System { system: true });
        assert!(compile_package(dir.path(), &m, None).is_err());
    }

    #[test]
    fn bundle_round_trips_through_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.kl"), "fn add(i32 a, i32 b) i32 { return a + b; }\n").unwrap();
        let outcome = compile_package(dir.path(), &manifest("src/main.kl"), None).unwrap();
        assert_eq!(outcome.error_count(), 0);
        let bundle_path = dir.path().join("demo.kbundle");
        export_bundle(&outcome, &bundle_path).unwrap();
        assert!(fs::metadata(&bundle_path).unwrap().len() > 4);
    }
}

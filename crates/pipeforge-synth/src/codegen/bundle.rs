// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dependency bundling.
//!
//! A bundled script carries an embedded manifest listing the external crates
//! its function uses. Versions, features and renames are taken from the
//! author's own `Cargo.toml` through `cargo metadata`, so the script builds
//! against the same requirements as the code it was cut from.

use cargo_metadata::{Dependency, DependencyKind, MetadataCommand, Package};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::BundleError;

/// Where a dependency comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySource {
    /// crates.io with a version requirement.
    Registry {
        /// Requirement as written by the author (`^1.0`).
        version: String,
    },
    /// A git repository, pinned to the locked revision when known.
    Git {
        /// Repository URL.
        url: String,
        /// Commit, branch or tag.
        reference: Option<GitReference>,
    },
}

/// A git reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitReference {
    /// Commit hash.
    Rev(String),
    /// Branch name.
    Branch(String),
    /// Tag name.
    Tag(String),
}

/// One entry of an embedded `[dependencies]` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    /// Manifest key (the name code refers to, before `-`/`_` normalization).
    pub name: String,
    /// Real package name when the dependency is renamed.
    pub package: Option<String>,
    /// Origin.
    pub source: DependencySource,
    /// Enabled features.
    pub features: Vec<String>,
    /// Whether default features stay on.
    pub default_features: bool,
}

impl DependencySpec {
    /// Registry dependency with default features.
    pub fn registry(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package: None,
            source: DependencySource::Registry {
                version: version.into(),
            },
            features: Vec::new(),
            default_features: true,
        }
    }

    /// The manifest value: a bare version string, or an inline table.
    pub fn manifest_value(&self) -> toml::Value {
        if let DependencySource::Registry { version } = &self.source
            && self.package.is_none()
            && self.features.is_empty()
            && self.default_features
        {
            return toml::Value::String(version.clone());
        }

        let mut table = toml::Table::new();
        match &self.source {
            DependencySource::Registry { version } => {
                table.insert("version".into(), toml::Value::String(version.clone()));
            }
            DependencySource::Git { url, reference } => {
                table.insert("git".into(), toml::Value::String(url.clone()));
                let reference = match reference {
                    Some(GitReference::Rev(rev)) => Some(("rev", rev)),
                    Some(GitReference::Branch(branch)) => Some(("branch", branch)),
                    Some(GitReference::Tag(tag)) => Some(("tag", tag)),
                    None => None,
                };
                if let Some((key, value)) = reference {
                    table.insert(key.into(), toml::Value::String(value.clone()));
                }
            }
        }
        if !self.features.is_empty() {
            let features = self
                .features
                .iter()
                .cloned()
                .map(toml::Value::String)
                .collect();
            table.insert("features".into(), toml::Value::Array(features));
        }
        if !self.default_features {
            table.insert("default-features".into(), toml::Value::Boolean(false));
        }
        if let Some(package) = &self.package {
            table.insert("package".into(), toml::Value::String(package.clone()));
        }
        toml::Value::Table(table)
    }

    /// The `name = ...` line for a `[dependencies]` table.
    pub fn manifest_line(&self) -> String {
        format!("{} = {}", self.name, self.manifest_value())
    }
}

/// Resolves the crates a function uses into manifest entries.
pub trait Bundler {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Resolve `crates` (as written in code) for a function from `source_file`.
    fn resolve(
        &self,
        source_file: &Path,
        crates: &BTreeSet<String>,
    ) -> Result<Vec<DependencySpec>, BundleError>;
}

// ============================================================================
// cargo metadata
// ============================================================================

/// The parts of a workspace package needed to resolve crate names.
#[derive(Debug, Clone)]
struct WorkspacePackage {
    name: String,
    manifest_path: PathBuf,
    dependencies: Vec<Dependency>,
}

impl From<&Package> for WorkspacePackage {
    fn from(package: &Package) -> Self {
        Self {
            name: package.name.to_string(),
            manifest_path: package.manifest_path.clone().into_std_path_buf(),
            dependencies: package.dependencies.clone(),
        }
    }
}

/// Name a dependency is visible under in code.
fn code_name(dependency: &Dependency) -> String {
    dependency
        .rename
        .as_deref()
        .unwrap_or(&dependency.name)
        .replace('-', "_")
}

// Normal dependencies win; dev dependencies cover functions registered in tests.
fn kind_rank(kind: DependencyKind) -> u8 {
    match kind {
        DependencyKind::Normal => 0,
        DependencyKind::Build => 1,
        DependencyKind::Development => 2,
        _ => 3,
    }
}

fn to_spec(dependency: &Dependency) -> Result<DependencySpec, BundleError> {
    let unsupported = |reason: &str| BundleError::UnsupportedDependency {
        name: dependency.name.clone(),
        reason: reason.to_string(),
    };
    let source = match dependency.source.as_deref() {
        None => return Err(unsupported("path dependencies cannot be embedded")),
        Some(source) if is_crates_io(source) => DependencySource::Registry {
            version: dependency.req.to_string(),
        },
        Some(source) if source.starts_with("git+") => parse_git_source(source),
        Some(source) => {
            return Err(unsupported(&format!("unsupported registry {}", source)));
        }
    };
    let (name, package) = match &dependency.rename {
        Some(rename) => (rename.clone(), Some(dependency.name.clone())),
        None => (dependency.name.clone(), None),
    };
    Ok(DependencySpec {
        name,
        package,
        source,
        features: dependency.features.clone(),
        default_features: dependency.uses_default_features,
    })
}

fn is_crates_io(source: &str) -> bool {
    (source.starts_with("registry+") || source.starts_with("sparse+"))
        && (source.contains("github.com/rust-lang/crates.io-index")
            || source.contains("index.crates.io"))
}

/// `git+https://host/repo?branch=main#0123abcd`
fn parse_git_source(source: &str) -> DependencySource {
    let rest = source.trim_start_matches("git+");
    let (base, fragment) = match rest.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (rest, None),
    };
    let (url, query) = match base.split_once('?') {
        Some((url, query)) => (url, Some(query)),
        None => (base, None),
    };
    let reference = fragment
        .filter(|f| !f.is_empty())
        .map(|rev| GitReference::Rev(rev.to_string()))
        .or_else(|| {
            let (key, value) = query?.split_once('=')?;
            match key {
                "rev" => Some(GitReference::Rev(value.to_string())),
                "branch" => Some(GitReference::Branch(value.to_string())),
                "tag" => Some(GitReference::Tag(value.to_string())),
                _ => None,
            }
        });
    DependencySource::Git {
        url: url.to_string(),
        reference,
    }
}

/// Nearest `Cargo.toml` in `start` or its ancestors.
pub fn find_manifest(start: &Path) -> Option<PathBuf> {
    let dir = if start.is_file() { start.parent()? } else { start };
    dir.ancestors()
        .map(|d| d.join("Cargo.toml"))
        .find(|candidate| candidate.is_file())
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Match `crates` against the package that owns `source_file`.
fn resolve_from_packages(
    packages: &[WorkspacePackage],
    source_file: &Path,
    manifest: &Path,
    crates: &BTreeSet<String>,
) -> Result<Vec<DependencySpec>, BundleError> {
    let source_file = normalize(source_file);
    let package = packages
        .iter()
        .filter_map(|package| {
            let dir = normalize(package.manifest_path.parent()?);
            source_file
                .starts_with(&dir)
                .then(|| (dir.components().count(), package))
        })
        .max_by_key(|(depth, _)| *depth)
        .map(|(_, package)| package)
        .ok_or_else(|| BundleError::PackageNotFound(manifest.to_path_buf()))?;

    tracing::debug!(package = %package.name, crates = ?crates, "Resolving crates against package");

    let mut specs = Vec::new();
    let mut missing = Vec::new();
    for name in crates {
        let dependency = package
            .dependencies
            .iter()
            .filter(|dep| &code_name(dep) == name)
            .min_by_key(|dep| kind_rank(dep.kind));
        match dependency {
            Some(dep) => specs.push(to_spec(dep)?),
            None if *name == package.name.replace('-', "_") => {
                return Err(BundleError::UnsupportedDependency {
                    name: name.clone(),
                    reason: "the function refers to its own package".to_string(),
                });
            }
            None => missing.push(name.clone()),
        }
    }

    if !missing.is_empty() {
        return Err(BundleError::UnresolvedCrates {
            manifest: manifest.to_path_buf(),
            crates: missing,
        });
    }
    Ok(specs)
}

/// Resolves crates with `cargo metadata --no-deps`.
pub struct CargoMetadataBundler {
    cargo: PathBuf,
    cache: RefCell<HashMap<PathBuf, Rc<Vec<WorkspacePackage>>>>,
}

impl CargoMetadataBundler {
    /// Bundler running the given cargo executable.
    pub fn new(cargo: impl Into<PathBuf>) -> Self {
        Self {
            cargo: cargo.into(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    fn packages(&self, manifest: &Path) -> Result<Rc<Vec<WorkspacePackage>>, BundleError> {
        if let Some(cached) = self.cache.borrow().get(manifest) {
            return Ok(Rc::clone(cached));
        }

        tracing::debug!(
            cargo = %self.cargo.display(),
            manifest = %manifest.display(),
            "Invoking cargo metadata"
        );
        let started = std::time::Instant::now();
        let metadata = MetadataCommand::new()
            .cargo_path(self.cargo.clone())
            .manifest_path(manifest.to_path_buf())
            .no_deps()
            .other_options(vec!["--offline".to_string()])
            .exec()
            .map_err(metadata_error)?;
        tracing::debug!(
            duration_ms = started.elapsed().as_millis() as u64,
            packages = metadata.packages.len(),
            "cargo metadata finished"
        );

        let packages: Rc<Vec<WorkspacePackage>> =
            Rc::new(metadata.packages.iter().map(WorkspacePackage::from).collect());
        self.cache
            .borrow_mut()
            .insert(manifest.to_path_buf(), Rc::clone(&packages));
        Ok(packages)
    }
}

impl Bundler for CargoMetadataBundler {
    fn name(&self) -> &str {
        "cargo-metadata"
    }

    fn resolve(
        &self,
        source_file: &Path,
        crates: &BTreeSet<String>,
    ) -> Result<Vec<DependencySpec>, BundleError> {
        if crates.is_empty() {
            return Ok(Vec::new());
        }
        let manifest = find_manifest(source_file)
            .ok_or_else(|| BundleError::ManifestNotFound(source_file.to_path_buf()))?;
        let packages = self.packages(&manifest)?;
        resolve_from_packages(&packages, source_file, &manifest, crates)
    }
}

/// Cargo's own failures get a short message; everything else keeps its source.
fn metadata_error(err: cargo_metadata::Error) -> BundleError {
    match err {
        cargo_metadata::Error::CargoMetadata { stderr } => {
            BundleError::Cargo(describe_cargo_failure(&stderr))
        }
        other => BundleError::Metadata(other),
    }
}

/// Turn cargo's stderr into a short message.
fn describe_cargo_failure(stderr: &str) -> String {
    if stderr.contains("could not find `Cargo.toml`") {
        return "cargo metadata failed: no Cargo.toml found".to_string();
    }
    if stderr.contains("failed to parse manifest") {
        return "cargo metadata failed: the manifest does not parse".to_string();
    }
    if stderr.contains("no such command") || stderr.contains("no such subcommand") {
        return "cargo metadata failed: this cargo has no `metadata` command".to_string();
    }
    match first_error(stderr) {
        Some(message) => format!("cargo metadata failed: {}", message),
        None => "cargo metadata failed".to_string(),
    }
}

fn first_error(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("error:"))
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
}

//! Requirements scanning and reconciliation.
//!
//! [`scan`] walks an agent object's members and resolves the third-party
//! distributions they come from. [`compare`] diffs those against the
//! caller's constraints, and [`reconcile`] applies the resulting append
//! actions to a requirement list.

mod stdlib;
pub mod version;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::agent::AgentObject;
use crate::error::{AgentEngineError, AgentEngineResult};

pub use stdlib::STDLIB_MODULES;
pub use version::{normalize_name, Requirement, SpecifierSet, Version};

/// Packages the runtime always needs to load the serialized object.
pub const MANDATORY_PACKAGES: [&str; 2] = ["cloudpickle", "pydantic"];

/// Requirements as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirements {
    /// Requirement lines.
    List(Vec<String>),
    /// Path to a `requirements.txt`.
    File(PathBuf),
}

impl Requirements {
    /// Resolve to requirement lines. Files drop blank lines and `#` comments.
    pub fn into_lines(self) -> AgentEngineResult<Vec<String>> {
        match self {
            Requirements::List(lines) => Ok(lines),
            Requirements::File(path) => {
                let text = fs::read_to_string(&path).map_err(|e| {
                    AgentEngineError::Io(format!(
                        "failed to read requirements file {}: {e}",
                        path.display()
                    ))
                })?;
                Ok(text
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(str::to_string)
                    .collect())
            }
        }
    }
}

impl From<Vec<String>> for Requirements {
    fn from(lines: Vec<String>) -> Self {
        Requirements::List(lines)
    }
}

impl From<Vec<&str>> for Requirements {
    fn from(lines: Vec<&str>) -> Self {
        Requirements::List(lines.into_iter().map(str::to_string).collect())
    }
}

/// Installed distributions of the deploying environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledPackages {
    modules: HashMap<String, Vec<String>>,
    versions: HashMap<String, String>,
}

impl InstalledPackages {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a distribution, its version and the top-level modules it
    /// provides.
    pub fn insert<I, S>(&mut self, distribution: &str, version: &str, modules: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dist = normalize_name(distribution);
        for module in modules {
            let entry = self.modules.entry(module.into()).or_default();
            if !entry.contains(&dist) {
                entry.push(dist.clone());
            }
        }
        self.versions.insert(dist, version.to_string());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with<I, S>(mut self, distribution: &str, version: &str, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(distribution, version, modules);
        self
    }

    /// Distributions providing a top-level module.
    pub fn distributions(&self, module: &str) -> &[String] {
        self.modules.get(module).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Installed version of a distribution.
    pub fn version(&self, distribution: &str) -> Option<&str> {
        self.versions
            .get(&normalize_name(distribution))
            .map(String::as_str)
    }

    /// Read `*.dist-info` directories under a `site-packages` directory.
    ///
    /// `METADATA` supplies name and version; `top_level.txt` supplies the
    /// modules, falling back to the name with `-` replaced by `_`.
    pub fn from_site_packages(dir: impl AsRef<Path>) -> AgentEngineResult<Self> {
        let dir = dir.as_ref();
        let mut index = Self::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_dist_info = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".dist-info"));
            if !is_dist_info || !path.is_dir() {
                continue;
            }
            let metadata = match fs::read_to_string(path.join("METADATA")) {
                Ok(text) => text,
                Err(e) => {
                    debug!("skipping {}: {e}", path.display());
                    continue;
                }
            };
            let field = |key: &str| {
                metadata
                    .lines()
                    .take_while(|l| !l.is_empty())
                    .find_map(|l| l.strip_prefix(key).map(|v| v.trim().to_string()))
            };
            let (Some(name), Some(version)) = (field("Name:"), field("Version:")) else {
                debug!("skipping {}: METADATA lacks Name or Version", path.display());
                continue;
            };
            let modules: Vec<String> = match fs::read_to_string(path.join("top_level.txt")) {
                Ok(text) => text
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect(),
                Err(_) => vec![name.replace('-', "_")],
            };
            index.insert(&name, &version, modules);
        }
        Ok(index)
    }
}

/// Outcome of [`compare`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementsDiff {
    /// Scanned packages absent from the constraints.
    pub missing: Vec<String>,
    /// `"{package}=={version} (required: {specifier})"` entries.
    pub incompatible: Vec<String>,
    /// Lines to append: missing packages that are mandatory.
    pub append: Vec<String>,
}

/// Constraints to compare against.
#[derive(Debug, Clone)]
pub enum Constraints {
    /// Requirement lines; invalid lines are logged and skipped.
    Lines(Vec<String>),
    /// Pre-parsed `{package: specifier}` map.
    Parsed(BTreeMap<String, SpecifierSet>),
}

impl Constraints {
    fn into_map(self) -> BTreeMap<String, SpecifierSet> {
        match self {
            Constraints::Parsed(map) => map
                .into_iter()
                .map(|(k, v)| (normalize_name(&k), v))
                .collect(),
            Constraints::Lines(lines) => parse_constraints(&lines),
        }
    }
}

/// Parse requirement lines into a constraint map, logging invalid lines.
pub fn parse_constraints(lines: &[String]) -> BTreeMap<String, SpecifierSet> {
    let mut map = BTreeMap::new();
    for line in lines {
        match Requirement::parse(line) {
            Ok(req) => {
                map.insert(req.name, req.specifier);
            }
            Err(e) => warn!("Failed to parse requirement {line:?}: {e}"),
        }
    }
    map
}

/// Resolve the distributions an object's members come from.
///
/// Takes the top-level module of every member that has one, drops names in
/// `ignore_modules` (the standard library by default) and maps the rest
/// through `packages`. The mandatory packages are always present; their
/// version is empty when `packages` does not know them.
pub fn scan(
    object: &dyn AgentObject,
    ignore_modules: Option<&HashSet<String>>,
    packages: &InstalledPackages,
) -> BTreeMap<String, String> {
    let default_ignored: HashSet<String>;
    let ignored = match ignore_modules {
        Some(set) => set,
        None => {
            default_ignored = STDLIB_MODULES.iter().map(|s| s.to_string()).collect();
            &default_ignored
        }
    };

    let mut modules = BTreeSet::new();
    for member in object.members() {
        if let Some(module) = &member.module {
            let top = module.split('.').next().unwrap_or(module);
            if !top.is_empty() && !ignored.contains(top) {
                modules.insert(top.to_string());
            }
        }
    }

    let mut scanned = BTreeMap::new();
    for module in &modules {
        for dist in packages.distributions(module) {
            if let Some(version) = packages.version(dist) {
                scanned.insert(dist.clone(), version.to_string());
            }
        }
    }

    for name in MANDATORY_PACKAGES {
        if !scanned.contains_key(name) {
            let version = packages.version(name).unwrap_or_default();
            if version.is_empty() {
                debug!("mandatory package {name} is not in the installed index");
            }
            scanned.insert(name.to_string(), version.to_string());
        }
    }
    scanned
}

/// Diff scanned packages against constraints.
pub fn compare(scanned: &BTreeMap<String, String>, constraints: Constraints) -> RequirementsDiff {
    let constraints = constraints.into_map();
    let mut diff = RequirementsDiff::default();
    for (package, version) in scanned {
        let key = normalize_name(package);
        match constraints.get(&key) {
            None => {
                diff.missing.push(package.clone());
                if MANDATORY_PACKAGES.contains(&key.as_str()) {
                    diff.append.push(pin(package, version));
                }
            }
            Some(spec) if spec.is_empty() => {}
            Some(spec) => {
                if !version.is_empty() && !spec.contains(version) {
                    diff.incompatible
                        .push(format!("{package}=={version} (required: {spec})"));
                }
            }
        }
    }
    diff
}

fn pin(package: &str, version: &str) -> String {
    if version.is_empty() {
        package.to_string()
    } else {
        format!("{package}=={version}")
    }
}

/// Scan `object`, compare against `requirements`, log the drift and return
/// the requirements with append actions applied.
pub fn reconcile(
    object: &dyn AgentObject,
    mut requirements: Vec<String>,
    packages: &InstalledPackages,
) -> Vec<String> {
    let scanned = scan(object, None, packages);
    let diff = compare(&scanned, Constraints::Lines(requirements.clone()));
    if !diff.missing.is_empty() {
        warn!(
            "The following requirements are missing: {:?}",
            diff.missing
        );
    }
    if !diff.incompatible.is_empty() {
        warn!(
            "The following requirements are incompatible: {:?}",
            diff.incompatible
        );
    }
    if !diff.append.is_empty() {
        warn!(
            "The following requirements are appended: {:?}",
            diff.append
        );
        requirements.extend(diff.append);
    }
    requirements
}

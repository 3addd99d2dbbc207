//! Pre-flight checks on deployment arguments.
//!
//! Everything here runs before anything is uploaded or sent.

use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::SUPPORTED_PYTHON_VERSIONS;
use crate::error::{AgentEngineError, AgentEngineResult};

/// Object-storage prefix a staging bucket must carry.
pub const GCS_PREFIX: &str = "gs://";

/// Directory inside the extra packages that holds installation scripts.
pub const INSTALLATION_SUBDIR: &str = "installation_scripts";

const ALLOWED_CPU: [u32; 5] = [1, 2, 4, 6, 8];
const MAX_MEMORY_GI: u32 = 32;
const MIN_INSTANCES_MAX: u32 = 10;
const MAX_INSTANCES_MAX: u32 = 1000;
const MAX_INSTANCES_MAX_PSC: u32 = 100;

fn memory_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\s?Gi$").expect("valid memory regex"))
}

fn method_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid name regex"))
}

/// The staging bucket must be a `gs://` URI.
pub fn validate_staging_bucket(bucket: &str) -> AgentEngineResult<()> {
    if !bucket.starts_with(GCS_PREFIX) || bucket.len() == GCS_PREFIX.len() {
        return Err(AgentEngineError::config(format!(
            "staging_bucket must start with `{GCS_PREFIX}`, got {bucket:?}"
        )));
    }
    Ok(())
}

/// The Python version must be one the service can run.
pub fn validate_python_version(version: &str) -> AgentEngineResult<()> {
    if !SUPPORTED_PYTHON_VERSIONS.contains(&version) {
        return Err(AgentEngineError::config(format!(
            "Unsupported python version: {version}. AgentEngine only supports {} at the moment.",
            SUPPORTED_PYTHON_VERSIONS.join(", ")
        )));
    }
    Ok(())
}

/// Check `{cpu, memory}` against the allowed values and the tiered CPU floor.
pub fn validate_resource_limits(limits: &BTreeMap<String, String>) -> AgentEngineResult<()> {
    let cpu = limits
        .get("cpu")
        .ok_or_else(|| AgentEngineError::config("resource_limits must include `cpu`"))?;
    let memory = limits
        .get("memory")
        .ok_or_else(|| AgentEngineError::config("resource_limits must include `memory`"))?;

    let cpu: u32 = cpu
        .trim()
        .parse()
        .ok()
        .filter(|c| ALLOWED_CPU.contains(c))
        .ok_or_else(|| {
            AgentEngineError::config(format!(
                "resource_limits[cpu] must be one of {ALLOWED_CPU:?}, got {cpu:?}"
            ))
        })?;

    let gib: u32 = memory_regex()
        .captures(memory.trim())
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| {
            AgentEngineError::config(format!(
                "resource_limits[memory] must look like `4Gi`, got {memory:?}"
            ))
        })?;
    if gib > MAX_MEMORY_GI {
        return Err(AgentEngineError::config(format!(
            "resource_limits[memory] must be at most {MAX_MEMORY_GI}Gi, got {memory}"
        )));
    }

    let floor = match gib {
        g if g > 24 => 8,
        g if g > 16 => 6,
        g if g > 8 => 4,
        g if g > 4 => 2,
        _ => 1,
    };
    if cpu < floor {
        return Err(AgentEngineError::config(format!(
            "resource_limits[cpu] must be at least {floor} for {gib}Gi of memory, got {cpu}"
        )));
    }
    Ok(())
}

/// Check instance bounds. A PSC interface lowers the `max_instances` ceiling.
pub fn validate_instance_bounds(
    min_instances: Option<u32>,
    max_instances: Option<u32>,
    has_psc: bool,
) -> AgentEngineResult<()> {
    if let Some(min) = min_instances {
        if min > MIN_INSTANCES_MAX {
            return Err(AgentEngineError::config(format!(
                "min_instances must be between 0 and {MIN_INSTANCES_MAX}, got {min}"
            )));
        }
    }
    if let Some(max) = max_instances {
        let ceiling = if has_psc {
            MAX_INSTANCES_MAX_PSC
        } else {
            MAX_INSTANCES_MAX
        };
        if max < 1 || max > ceiling {
            return Err(AgentEngineError::config(format!(
                "max_instances must be between 1 and {ceiling}, got {max}"
            )));
        }
    }
    if let (Some(min), Some(max)) = (min_instances, max_instances) {
        if min > max {
            return Err(AgentEngineError::config(format!(
                "min_instances ({min}) must not exceed max_instances ({max})"
            )));
        }
    }
    Ok(())
}

/// Concurrency must be at least one request per container.
pub fn validate_container_concurrency(concurrency: u32) -> AgentEngineResult<()> {
    if concurrency < 1 {
        return Err(AgentEngineError::config(
            "container_concurrency must be at least 1",
        ));
    }
    Ok(())
}

/// Method names must be identifiers.
pub fn is_valid_method_name(name: &str) -> bool {
    method_name_regex().is_match(name)
}

/// Check that extra packages exist and that installation scripts are
/// declared and shipped consistently.
///
/// Every declared script must live under `installation_scripts/` and be
/// listed in `extra_packages`; every extra package under
/// `installation_scripts/` must be declared as a script.
pub fn validate_extra_packages(
    extra_packages: &[String],
    installation_scripts: &[String],
) -> AgentEngineResult<()> {
    for package in extra_packages {
        if !Path::new(package).exists() {
            return Err(AgentEngineError::validation(format!(
                "Extra package path does not exist: {package}"
            )));
        }
    }

    for script in installation_scripts {
        if !in_installation_subdir(script) {
            return Err(AgentEngineError::validation(format!(
                "Installation script {script} must be in the `{INSTALLATION_SUBDIR}/` subdirectory"
            )));
        }
        if !extra_packages.iter().any(|p| same_path(p, script)) {
            return Err(AgentEngineError::validation(format!(
                "Installation script {script} must also be listed in extra_packages"
            )));
        }
    }

    for package in extra_packages {
        if in_installation_subdir(package)
            && !installation_scripts.iter().any(|s| same_path(s, package))
        {
            return Err(AgentEngineError::validation(format!(
                "Extra package {package} is in `{INSTALLATION_SUBDIR}/` but is not declared in build_options.installation_scripts"
            )));
        }
    }
    Ok(())
}

fn normal_components(path: &str) -> Vec<&std::ffi::OsStr> {
    Path::new(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s),
            _ => None,
        })
        .collect()
}

fn in_installation_subdir(path: &str) -> bool {
    let parts = normal_components(path);
    parts.len() > 1 && parts[..parts.len() - 1].iter().any(|p| *p == INSTALLATION_SUBDIR)
}

fn same_path(a: &str, b: &str) -> bool {
    normal_components(a) == normal_components(b)
}

//! Artifact staging.
//!
//! [`prepare`] writes up to three blobs under the staging prefix:
//! the serialized agent object, the requirement list and a gzipped tarball of
//! the extra packages. The object blob is read back and verified before
//! anything else is written.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::AgentObject;
use crate::error::{AgentEngineError, AgentEngineResult};
use crate::storage::{ObjectStore, StagingLocation};
use crate::validation;

/// Blob name of the serialized object.
pub const BLOB_FILENAME: &str = "agent_engine.pkl";
/// Blob name of the requirement list.
pub const REQUIREMENTS_FILE: &str = "requirements.txt";
/// Blob name of the extra packages tarball.
pub const EXTRA_PACKAGES_FILE: &str = "dependencies.tar.gz";
/// Staging directory used when the caller does not name one.
pub const DEFAULT_DIR_NAME: &str = "agent_engine";

/// Build-time options for the deployed container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Scripts under `installation_scripts/` run while the image is built.
    #[serde(default)]
    pub installation_scripts: Vec<String>,
}

impl BuildOptions {
    /// Options with the given installation scripts.
    pub fn with_installation_scripts<I, S>(scripts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            installation_scripts: scripts.into_iter().map(Into::into).collect(),
        }
    }
}

/// URIs of the blobs [`prepare`] wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedArtifacts {
    /// `agent_engine.pkl`.
    pub pickle_uri: Option<String>,
    /// `requirements.txt`.
    pub requirements_uri: Option<String>,
    /// `dependencies.tar.gz`.
    pub dependencies_uri: Option<String>,
}

impl StagedArtifacts {
    /// True when nothing was uploaded.
    pub fn is_empty(&self) -> bool {
        self.pickle_uri.is_none() && self.requirements_uri.is_none() && self.dependencies_uri.is_none()
    }
}

/// What to stage.
#[derive(Clone, Copy, Default)]
pub struct PackageInputs<'a> {
    /// The agent object. `None` stages nothing.
    pub object: Option<&'a dyn AgentObject>,
    /// Requirement lines. `None` skips `requirements.txt`.
    pub requirements: Option<&'a [String]>,
    /// Local files and directories. `None` skips the tarball.
    pub extra_packages: Option<&'a [String]>,
    /// Build options checked against `extra_packages`.
    pub build_options: Option<&'a BuildOptions>,
}

/// Stage artifacts for a deployment.
///
/// Extra packages are validated first, so a bad path or script layout fails
/// before any upload. The object blob is downloaded again and handed to
/// [`AgentObject::verify`]; requirements and extras are only written once it
/// passes.
pub async fn prepare(
    store: &dyn ObjectStore,
    location: &StagingLocation,
    inputs: PackageInputs<'_>,
) -> AgentEngineResult<StagedArtifacts> {
    let Some(object) = inputs.object else {
        debug!("No agent object; skipping artifact staging");
        return Ok(StagedArtifacts::default());
    };

    if let Some(extra) = inputs.extra_packages {
        let scripts = inputs
            .build_options
            .map(|o| o.installation_scripts.as_slice())
            .unwrap_or(&[]);
        validation::validate_extra_packages(extra, scripts)?;
    } else if let Some(options) = inputs.build_options {
        validation::validate_extra_packages(&[], &options.installation_scripts)?;
    }

    let blob = object.serialize()?;

    store.ensure_bucket(&location.bucket).await?;

    let mut staged = StagedArtifacts::default();

    let object_name = location.object(BLOB_FILENAME);
    store.upload(&location.bucket, &object_name, blob).await?;
    let reloaded = store.download(&location.bucket, &object_name).await?;
    object.verify(&reloaded).map_err(|e| match e {
        AgentEngineError::Serialization { .. } => e,
        other => AgentEngineError::serialization(format!(
            "failed to load the staged object: {other}"
        )),
    })?;
    let uri = location.uri(BLOB_FILENAME);
    info!("Wrote to {}", uri);
    staged.pickle_uri = Some(uri);

    if let Some(requirements) = inputs.requirements {
        let body = requirements.join("\n").into_bytes();
        store
            .upload(&location.bucket, &location.object(REQUIREMENTS_FILE), body)
            .await?;
        let uri = location.uri(REQUIREMENTS_FILE);
        info!("Writing to {}", uri);
        staged.requirements_uri = Some(uri);
    }

    if let Some(extra) = inputs.extra_packages {
        let paths: Vec<PathBuf> = extra.iter().map(PathBuf::from).collect();
        let tarball = tokio::task::spawn_blocking(move || build_tarball(&paths))
            .await
            .map_err(|e| AgentEngineError::Other(format!("tarball task failed: {e}")))??;
        store
            .upload(&location.bucket, &location.object(EXTRA_PACKAGES_FILE), tarball)
            .await?;
        let uri = location.uri(EXTRA_PACKAGES_FILE);
        info!("Writing to {}", uri);
        staged.dependencies_uri = Some(uri);
    }

    Ok(staged)
}

/// Gzipped tar of `paths`. Directories are added recursively.
///
/// Entries keep the path as given with root and `.`/`..` components dropped.
pub fn build_tarball(paths: &[PathBuf]) -> AgentEngineResult<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for path in paths {
        let name = archive_name(path);
        if name.as_os_str().is_empty() {
            return Err(AgentEngineError::validation(format!(
                "cannot archive {} without a file name",
                path.display()
            )));
        }
        if path.is_dir() {
            builder.append_dir_all(&name, path)?;
        } else {
            builder.append_path_with_name(path, &name)?;
        }
        debug!("Added {} to the extra packages tarball", name.display());
    }
    let mut encoder = builder.into_inner()?;
    encoder.flush()?;
    Ok(encoder.finish()?)
}

fn archive_name(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

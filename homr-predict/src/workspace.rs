//! Per-request scratch directories
//!
//! A workspace lives exactly as long as the closure passed to
//! [`WorkspaceManager::with_workspace`]. Removal is tied to `TempDir`'s drop,
//! so the directory is reclaimed on success, on error, and on unwinding.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::engine::output_path_for;
use crate::error::PredictError;

/// Canonical name of the staged input image
///
/// The engine derives its output name from this, so the caller's original
/// file name never reaches it.
pub const STAGED_INPUT_NAME: &str = "input.png";

const WORKSPACE_PREFIX: &str = "homr-";

/// Isolated scratch directory owned by one request
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    input_path: PathBuf,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Where the staged image lives (whether or not it has been staged yet)
    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    /// Where the engine must write its MusicXML
    pub fn expected_output_path(&self) -> PathBuf {
        output_path_for(&self.input_path)
    }

    /// Copy the caller's image into the workspace under the canonical name
    pub fn stage_image(&self, source: &Path) -> Result<&Path, PredictError> {
        std::fs::copy(source, &self.input_path).map_err(|e| PredictError::Staging {
            path: source.to_path_buf(),
            source: e,
        })?;

        debug!(
            source = %source.display(),
            staged = %self.input_path.display(),
            "Staged input image"
        );
        Ok(&self.input_path)
    }
}

/// Allocates workspaces under a parent directory
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    parent: PathBuf,
}

impl WorkspaceManager {
    pub fn new(parent: impl Into<PathBuf>) -> Self {
        Self {
            parent: parent.into(),
        }
    }

    pub fn parent(&self) -> &Path {
        &self.parent
    }

    /// Run `body` inside a fresh workspace, removing it on every exit path
    pub fn with_workspace<T, F>(&self, body: F) -> Result<T, PredictError>
    where
        F: FnOnce(&Workspace) -> Result<T, PredictError>,
    {
        let workspace = self.create()?;
        let root = workspace.root().to_path_buf();
        debug!(workspace = %root.display(), "Workspace created");

        let result = body(&workspace);

        if let Err(e) = workspace.dir.close() {
            warn!(workspace = %root.display(), error = %e, "Failed to remove workspace");
        } else {
            debug!(workspace = %root.display(), "Workspace removed");
        }

        result
    }

    fn create(&self) -> Result<Workspace, PredictError> {
        let staging_error = |e: std::io::Error| PredictError::Staging {
            path: self.parent.clone(),
            source: e,
        };

        std::fs::create_dir_all(&self.parent).map_err(staging_error)?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&self.parent)
            .map_err(staging_error)?;

        let input_path = dir.path().join(STAGED_INPUT_NAME);
        Ok(Workspace { dir, input_path })
    }
}

//! Publishing results outside the request workspace
//!
//! Each request publishes to its own directory, `<root>/<request-id>/`, so
//! concurrent requests never overwrite each other's output. The copy goes to
//! a `.part` file first; only a complete file is ever visible under the final
//! name. With a retention limit, the oldest completed request directories are
//! pruned after each publish.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PredictError;

/// File name of a published result inside its request directory
pub const PUBLISHED_FILE_NAME: &str = "output.musicxml";

#[derive(Debug, Clone)]
pub struct OutputPublisher {
    root: PathBuf,
    /// Completed outputs to keep; 0 keeps everything
    max_retained: usize,
}

impl OutputPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_retained: 0,
        }
    }

    pub fn with_retention(mut self, max_retained: usize) -> Self {
        self.max_retained = max_retained;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final location of a request's output
    pub fn destination_for(&self, request_id: Uuid) -> PathBuf {
        self.root
            .join(request_id.to_string())
            .join(PUBLISHED_FILE_NAME)
    }

    /// Previously published output for `request_id`, if any
    pub fn published_path(&self, request_id: Uuid) -> Option<PathBuf> {
        let path = self.destination_for(request_id);
        path.is_file().then_some(path)
    }

    /// Copy `source` to the request-scoped destination
    ///
    /// Fails if the request already published or any I/O step fails. On
    /// failure nothing is left at the destination.
    pub fn publish(&self, source: &Path, request_id: Uuid) -> Result<PathBuf, PredictError> {
        let request_dir = self.root.join(request_id.to_string());
        let destination = request_dir.join(PUBLISHED_FILE_NAME);
        let partial = request_dir.join(format!("{}.part", PUBLISHED_FILE_NAME));

        let publish_error = |e: std::io::Error| PredictError::Publish {
            destination: destination.clone(),
            source: e,
        };

        std::fs::create_dir_all(&self.root).map_err(publish_error)?;
        // create_dir (not _all) so a reused id is an error rather than an overwrite
        std::fs::create_dir(&request_dir).map_err(publish_error)?;

        let copied = std::fs::copy(source, &partial)
            .and_then(|bytes| std::fs::rename(&partial, &destination).map(|_| bytes));

        match copied {
            Ok(bytes) => {
                info!(
                    request_id = %request_id,
                    destination = %destination.display(),
                    bytes,
                    "Published output"
                );
                self.prune(request_id);
                Ok(destination)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&partial);
                let _ = std::fs::remove_dir(&request_dir);
                debug!(request_id = %request_id, "Removed partial output after failed publish");
                Err(publish_error(e))
            }
        }
    }

    /// Remove the oldest completed outputs beyond the retention limit
    ///
    /// Only directories named by a request id and holding a published file
    /// are considered, so in-flight publishes are never touched. Failures are
    /// logged and do not affect the request that triggered the prune.
    fn prune(&self, current: Uuid) {
        if self.max_retained == 0 {
            return;
        }

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "Failed to scan outputs for pruning");
                return;
            }
        };

        let mut completed: Vec<(SystemTime, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| Uuid::parse_str(name).ok())
                    .is_some_and(|id| id != current)
            })
            .filter(|entry| entry.path().join(PUBLISHED_FILE_NAME).is_file())
            .filter_map(|entry| {
                let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, entry.path()))
            })
            .collect();

        // The current output takes one slot
        let keep = self.max_retained - 1;
        if completed.len() <= keep {
            return;
        }

        completed.sort_by(|a, b| b.0.cmp(&a.0));
        let mut pruned = 0usize;
        for (_, dir) in completed.into_iter().skip(keep) {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => pruned += 1,
                Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to prune output"),
            }
        }
        info!(pruned, max_retained = self.max_retained, "Pruned old outputs");
    }
}

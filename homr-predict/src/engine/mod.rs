//! Recognition engine capability
//!
//! The optical music recognition engine is an external collaborator. The
//! orchestration layer only knows this contract: given a staged input image
//! and two configuration records, the engine writes MusicXML next to the
//! input, at [`output_path_for`]`(input)`.

pub mod command;

use std::path::{Path, PathBuf};
use thiserror::Error;

use homr_common::config::WeightVariant;

use crate::request::{ProcessingConfig, XmlGeneratorArguments};
use crate::weights::{ProvisionedWeights, WeightSet};

pub use command::CommandEngine;

/// Extension of the file the engine produces
pub const OUTPUT_EXTENSION: &str = "musicxml";

/// Output location for a given input: same directory, same stem, `.musicxml`
pub fn output_path_for(input: &Path) -> PathBuf {
    input.with_extension(OUTPUT_EXTENSION)
}

/// Engine failure
#[derive(Debug, Error)]
pub enum EngineError {
    /// Engine program could not be found
    #[error("Recognition program '{0}' not found")]
    Unavailable(String),

    /// Engine could not be started or waited on
    #[error("Failed to run recognition program: {0}")]
    Execution(String),

    /// Engine ran and reported failure
    #[error("Recognition exited with code {exit_code:?}: {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Configuration needs weights that setup did not provision
    #[error("Accelerated inference requested but only '{0}' weights are provisioned")]
    WeightsNotProvisioned(WeightVariant),
}

/// Optical music recognition engine
pub trait RecognitionEngine: Send + Sync {
    /// Name used in logs and error messages
    fn name(&self) -> &str;

    /// Whether concurrent `process_image` calls are safe
    ///
    /// Engines are serialized unless they opt in.
    fn is_reentrant(&self) -> bool {
        false
    }

    /// Fetch the recognition weights the engine manages itself into
    /// `weights.root()`
    ///
    /// Runs once during setup, after the manifest pass. Must be idempotent.
    fn provision_weights(&self, _accelerated: bool, _weights: &WeightSet) -> Result<(), EngineError> {
        Ok(())
    }

    /// Fetch the title OCR weights into `weights.root()`
    fn provision_title_weights(&self, _weights: &WeightSet) -> Result<(), EngineError> {
        Ok(())
    }

    /// Recognize `input` and write MusicXML to `output_path_for(input)`
    ///
    /// Blocks for the whole of preprocessing, inference and serialization.
    fn process_image(
        &self,
        input: &Path,
        config: &ProcessingConfig,
        xml_args: &XmlGeneratorArguments,
        weights: &ProvisionedWeights,
    ) -> Result<(), EngineError>;
}

//! External recognition program adapter
//!
//! Runs the recognition CLI as a child process:
//! `<program> <configured args> <generated flags> <input>`.
//! Weight directories are exported through environment variables. During
//! setup the same program is run with its init arguments so it can fetch the
//! weights it manages itself.

use homr_common::config::EngineConfig;
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

use super::{EngineError, RecognitionEngine};
use crate::request::{ProcessingConfig, StaffSelection, XmlGeneratorArguments};
use crate::weights::{ProvisionedWeights, WeightSet};

/// Keep at most this much of the child's stderr in errors
const STDERR_TAIL_BYTES: usize = 4096;

/// Recognition engine backed by an external program
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    reentrant: bool,
    models_dir_env: String,
    ocr_models_dir_env: String,
    init_args: Vec<String>,
    title_init_args: Vec<String>,
}

impl CommandEngine {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            reentrant: config.reentrant,
            models_dir_env: config.models_dir_env.clone(),
            ocr_models_dir_env: config.ocr_models_dir_env.clone(),
            init_args: config.init_args.clone(),
            title_init_args: config.title_init_args.clone(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full argument list after the program name
    pub fn build_args(
        &self,
        input: &Path,
        config: &ProcessingConfig,
        xml_args: &XmlGeneratorArguments,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.args.iter().map(OsString::from).collect();

        if config.enable_debug {
            args.push("--debug".into());
        }
        if config.enable_cache {
            args.push("--cache".into());
        }
        if config.write_staff_positions {
            args.push("--write-staff-positions".into());
        }
        if config.read_staff_positions {
            args.push("--read-staff-positions".into());
        }
        if let StaffSelection::Single(index) = config.selected_staff {
            args.push("--selected-staff".into());
            args.push(index.to_string().into());
        }

        args.push("--gpu".into());
        args.push(if config.use_gpu_inference { "yes" } else { "no" }.into());

        if xml_args.large_page {
            args.push("--output-large-page".into());
        }
        if let Some(bpm) = xml_args.metronome {
            args.push("--output-metronome".into());
            args.push(bpm.to_string().into());
        }
        if let Some(bpm) = xml_args.tempo {
            args.push("--output-tempo".into());
            args.push(bpm.to_string().into());
        }

        args.push(input.as_os_str().to_owned());
        args
    }
}

impl CommandEngine {
    /// Argument list for a weight provisioning run, or `None` when disabled
    pub fn build_init_args(&self, accelerated: bool) -> Option<Vec<OsString>> {
        if self.init_args.is_empty() {
            return None;
        }
        let mut args: Vec<OsString> = self
            .args
            .iter()
            .chain(&self.init_args)
            .map(OsString::from)
            .collect();
        args.push("--gpu".into());
        args.push(if accelerated { "yes" } else { "no" }.into());
        Some(args)
    }

    /// Argument list for a title OCR provisioning run, or `None` when disabled
    pub fn build_title_init_args(&self) -> Option<Vec<OsString>> {
        if self.title_init_args.is_empty() {
            return None;
        }
        Some(
            self.args
                .iter()
                .chain(&self.title_init_args)
                .map(OsString::from)
                .collect(),
        )
    }

    /// Run the program to completion, failing on a non-zero exit
    fn run(&self, args: &[OsString], envs: &[(&str, &Path)], dir: Option<&Path>) -> Result<(), EngineError> {
        tracing::debug!(program = %self.program, ?args, "Spawning recognition program");

        let mut command = Command::new(&self.program);
        command.args(args);
        for (key, value) in envs {
            command.env(key, value);
        }
        if let Some(dir) = dir {
            command.current_dir(dir);
        }

        let output = command.output().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::Unavailable(self.program.clone()),
            _ => EngineError::Execution(e.to_string()),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Failed {
                exit_code: output.status.code(),
                stderr: tail(stderr.trim(), STDERR_TAIL_BYTES).to_string(),
            });
        }
        Ok(())
    }
}

impl RecognitionEngine for CommandEngine {
    fn name(&self) -> &str {
        &self.program
    }

    fn is_reentrant(&self) -> bool {
        self.reentrant
    }

    fn provision_weights(&self, accelerated: bool, weights: &WeightSet) -> Result<(), EngineError> {
        let Some(args) = self.build_init_args(accelerated) else {
            tracing::debug!(program = %self.program, "Engine weight initialization disabled");
            return Ok(());
        };

        let start = Instant::now();
        self.run(&args, &[(self.models_dir_env.as_str(), weights.root())], Some(weights.root()))?;
        tracing::info!(
            program = %self.program,
            variant = %weights.variant(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Engine weights initialized"
        );
        Ok(())
    }

    fn provision_title_weights(&self, weights: &WeightSet) -> Result<(), EngineError> {
        let Some(args) = self.build_title_init_args() else {
            tracing::debug!(program = %self.program, "Engine title OCR initialization disabled");
            return Ok(());
        };

        let start = Instant::now();
        self.run(&args, &[(self.ocr_models_dir_env.as_str(), weights.root())], Some(weights.root()))?;
        tracing::info!(
            program = %self.program,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Engine title OCR weights initialized"
        );
        Ok(())
    }

    fn process_image(
        &self,
        input: &Path,
        config: &ProcessingConfig,
        xml_args: &XmlGeneratorArguments,
        weights: &ProvisionedWeights,
    ) -> Result<(), EngineError> {
        let args = self.build_args(input, config, xml_args);
        let envs = [
            (self.models_dir_env.as_str(), weights.recognition.root()),
            (self.ocr_models_dir_env.as_str(), weights.title_ocr.root()),
        ];

        let start = Instant::now();
        self.run(&args, &envs, input.parent())?;

        tracing::info!(
            program = %self.program,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Recognition program finished"
        );
        Ok(())
    }
}

/// Last `max` bytes of `text`, cut on a char boundary
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

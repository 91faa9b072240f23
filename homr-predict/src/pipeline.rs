//! Recognition engine invocation
//!
//! The invoker owns the read-only provisioned weights and gates access to the
//! engine: unless the engine declares itself reentrant, only one request runs
//! inference at a time.

use homr_common::config::WeightVariant;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info};

use crate::engine::{output_path_for, EngineError, RecognitionEngine};
use crate::error::PredictError;
use crate::request::{ProcessingConfig, XmlGeneratorArguments};
use crate::weights::ProvisionedWeights;

pub struct PipelineInvoker {
    engine: Arc<dyn RecognitionEngine>,
    weights: Arc<ProvisionedWeights>,
    gate: Mutex<()>,
}

impl PipelineInvoker {
    pub fn new(engine: Arc<dyn RecognitionEngine>, weights: Arc<ProvisionedWeights>) -> Self {
        Self {
            engine,
            weights,
            gate: Mutex::new(()),
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn weights(&self) -> &ProvisionedWeights {
        &self.weights
    }

    /// Run the engine on a staged input and return the produced file
    ///
    /// No retry: an engine failure is a `Pipeline` error and a missing output
    /// after a reported success is `OutputMissing`.
    pub fn invoke(
        &self,
        input: &Path,
        config: &ProcessingConfig,
        xml_args: &XmlGeneratorArguments,
    ) -> Result<PathBuf, PredictError> {
        let provisioned = self.weights.recognition.variant();
        if config.use_gpu_inference && provisioned != WeightVariant::Accelerated {
            return Err(EngineError::WeightsNotProvisioned(provisioned).into());
        }

        let expected = output_path_for(input);
        let start = Instant::now();

        {
            let _guard = if self.engine.is_reentrant() {
                None
            } else {
                // A panic in another request must not wedge the service
                Some(self.gate.lock().unwrap_or_else(PoisonError::into_inner))
            };
            debug!(
                engine = %self.engine.name(),
                waited_ms = start.elapsed().as_millis() as u64,
                "Engine acquired"
            );
            self.engine
                .process_image(input, config, xml_args, &self.weights)?;
        }

        if !expected.is_file() {
            return Err(PredictError::OutputMissing {
                engine: self.engine.name().to_string(),
                expected,
            });
        }

        info!(
            engine = %self.engine.name(),
            output = %expected.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Recognition complete"
        );
        Ok(expected)
    }
}

//! Setup and predict entry points
//!
//! `setup` runs once before the service accepts requests. `Predictor::predict`
//! handles one request end to end:
//! validate → workspace → configs → engine → publish → workspace removal.

use homr_common::config::{TomlConfig, WeightVariant};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::engine::RecognitionEngine;
use crate::error::{PredictError, ProvisioningError};
use crate::pipeline::PipelineInvoker;
use crate::providers;
use crate::publisher::OutputPublisher;
use crate::request::{build_configs, PredictRequest};
use crate::weights::{ProvisionedWeights, WeightProvisioner};
use crate::workspace::WorkspaceManager;

/// Provision every weight set the service needs
///
/// Declared manifest artifacts are fetched first, then the engine fetches the
/// weights it manages itself into the same directories. A failure here must
/// stop the service from starting.
pub async fn setup(
    provisioner: &WeightProvisioner,
    engine: Arc<dyn RecognitionEngine>,
) -> Result<ProvisionedWeights, ProvisioningError> {
    info!(providers = ?providers::detect(), "Available compute providers");
    info!(models_dir = %provisioner.models_dir().display(), "Provisioning model weights");

    let weights = provisioner.provision_all().await?;

    info!(engine = %engine.name(), "Initializing engine weights");
    let weights = tokio::task::spawn_blocking(move || provision_engine(engine.as_ref(), weights))
        .await
        .map_err(|e| ProvisioningError::EngineTask(e.to_string()))??;

    info!("Model setup complete");
    Ok(weights)
}

fn provision_engine(
    engine: &dyn RecognitionEngine,
    weights: ProvisionedWeights,
) -> Result<ProvisionedWeights, ProvisioningError> {
    let accelerated = weights.recognition.variant() == WeightVariant::Accelerated;
    engine
        .provision_weights(accelerated, &weights.recognition)
        .map_err(|source| ProvisioningError::Engine {
            variant: weights.recognition.variant(),
            source,
        })?;
    engine
        .provision_title_weights(&weights.title_ocr)
        .map_err(|source| ProvisioningError::Engine {
            variant: WeightVariant::TitleOcr,
            source,
        })?;
    Ok(weights)
}

/// Result handle of a successful prediction
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub id: Uuid,
    /// Published MusicXML, outside any workspace
    pub output: PathBuf,
    pub elapsed: Duration,
}

pub struct Predictor {
    workspaces: WorkspaceManager,
    invoker: PipelineInvoker,
    publisher: OutputPublisher,
}

impl Predictor {
    /// Only constructible from provisioned weights, so no request can reach
    /// the engine before setup has completed.
    pub fn new(
        engine: Arc<dyn RecognitionEngine>,
        weights: Arc<ProvisionedWeights>,
        workspaces: WorkspaceManager,
        publisher: OutputPublisher,
    ) -> Self {
        Self {
            workspaces,
            invoker: PipelineInvoker::new(engine, weights),
            publisher,
        }
    }

    /// Predictor using the configured workspace and output folders
    pub fn from_config(
        config: &TomlConfig,
        engine: Arc<dyn RecognitionEngine>,
        weights: ProvisionedWeights,
    ) -> Self {
        Self::new(
            engine,
            Arc::new(weights),
            WorkspaceManager::new(config.scratch_dir()),
            OutputPublisher::new(config.outputs_dir()).with_retention(config.outputs.max_retained),
        )
    }

    pub fn publisher(&self) -> &OutputPublisher {
        &self.publisher
    }

    pub fn weights(&self) -> &ProvisionedWeights {
        self.invoker.weights()
    }

    /// Convert one sheet music image into a published MusicXML file
    ///
    /// Blocking; async callers should run it on the blocking pool.
    pub fn predict(&self, request: &PredictRequest) -> Result<Prediction, PredictError> {
        let id = Uuid::new_v4();
        let span = info_span!("predict", request_id = %id);
        let _entered = span.enter();

        let start = Instant::now();
        let result = self.run(id, request);

        match result {
            Ok(output) => {
                let elapsed = start.elapsed();
                info!(
                    output = %output.display(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Prediction succeeded"
                );
                Ok(Prediction { id, output, elapsed })
            }
            Err(e) => {
                warn!(code = e.code(), error = %e, "Prediction failed");
                Err(e)
            }
        }
    }

    fn run(&self, id: Uuid, request: &PredictRequest) -> Result<PathBuf, PredictError> {
        request.validate()?;
        debug!(
            image = %request.image.display(),
            large_page = request.large_page,
            metronome_bpm = ?request.metronome_bpm,
            tempo_bpm = ?request.tempo_bpm,
            engine = %self.invoker.engine_name(),
            "Starting prediction"
        );

        self.workspaces.with_workspace(|workspace| {
            let input = workspace.stage_image(&request.image)?;
            let (config, xml_args) = build_configs(request);
            let produced = self.invoker.invoke(input, &config, &xml_args)?;
            // Must happen before the workspace (and `produced`) is removed
            self.publisher.publish(&produced, id)
        })
    }
}

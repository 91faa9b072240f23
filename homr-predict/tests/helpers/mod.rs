//! Shared fixtures for homr-predict integration tests
#![allow(dead_code)]

use homr_common::config::WeightVariant;
use homr_predict::engine::{output_path_for, EngineError, RecognitionEngine};
use homr_predict::publisher::OutputPublisher;
use homr_predict::request::{ProcessingConfig, XmlGeneratorArguments};
use homr_predict::weights::{ProvisionedWeights, WeightSet};
use homr_predict::workspace::WorkspaceManager;
use homr_predict::Predictor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// One recorded engine invocation
#[derive(Debug, Clone)]
pub struct EngineCall {
    pub input: PathBuf,
    pub config: ProcessingConfig,
    pub xml_args: XmlGeneratorArguments,
}

#[derive(Debug, Clone, Copy)]
pub enum FakeBehavior {
    /// Write a MusicXML document naming the staged input's size
    Succeed,
    /// Report success without writing anything
    Silent,
    /// Report an engine failure
    Fail,
}

/// Engine double that writes a deterministic output next to its input
pub struct FakeEngine {
    behavior: FakeBehavior,
    delay: Duration,
    fail_provisioning: bool,
    calls: Mutex<Vec<EngineCall>>,
    provisioned: Mutex<Vec<(WeightVariant, PathBuf)>>,
}

impl FakeEngine {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            fail_provisioning: false,
            calls: Mutex::new(Vec::new()),
            provisioned: Mutex::new(Vec::new()),
        }
    }

    pub fn with_failing_provisioning(mut self) -> Self {
        self.fail_provisioning = true;
        self
    }

    /// Weight sets the engine was asked to provision, in order
    pub fn provisioned(&self) -> Vec<(WeightVariant, PathBuf)> {
        self.provisioned.lock().unwrap().clone()
    }

    fn record_provisioning(&self, weights: &WeightSet) -> Result<(), EngineError> {
        self.provisioned
            .lock()
            .unwrap()
            .push((weights.variant(), weights.root().to_path_buf()));
        if self.fail_provisioning {
            return Err(EngineError::Failed {
                exit_code: Some(1),
                stderr: "weights server unreachable".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl RecognitionEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    fn provision_weights(&self, accelerated: bool, weights: &WeightSet) -> Result<(), EngineError> {
        assert!(accelerated, "setup always provisions the accelerated variant");
        self.record_provisioning(weights)
    }

    fn provision_title_weights(&self, weights: &WeightSet) -> Result<(), EngineError> {
        self.record_provisioning(weights)
    }

    fn process_image(
        &self,
        input: &Path,
        config: &ProcessingConfig,
        xml_args: &XmlGeneratorArguments,
        _weights: &ProvisionedWeights,
    ) -> Result<(), EngineError> {
        self.calls.lock().unwrap().push(EngineCall {
            input: input.to_path_buf(),
            config: config.clone(),
            xml_args: xml_args.clone(),
        });
        std::thread::sleep(self.delay);

        match self.behavior {
            FakeBehavior::Succeed => {
                // Echo the staged bytes so callers can tell outputs apart
                let staged = std::fs::read(input).map_err(|e| EngineError::Execution(e.to_string()))?;
                let body = format!(
                    "<score-partwise><source>{}</source></score-partwise>",
                    String::from_utf8_lossy(&staged)
                );
                std::fs::write(output_path_for(input), body)
                    .map_err(|e| EngineError::Execution(e.to_string()))
            }
            FakeBehavior::Silent => Ok(()),
            FakeBehavior::Fail => Err(EngineError::Failed {
                exit_code: Some(1),
                stderr: "no staffs detected".to_string(),
            }),
        }
    }
}

pub fn test_weights(root: &Path) -> ProvisionedWeights {
    ProvisionedWeights {
        recognition: WeightSet::new(
            WeightVariant::Accelerated,
            root.join(WeightVariant::Accelerated.dir_name()),
            vec![],
        ),
        title_ocr: WeightSet::new(
            WeightVariant::TitleOcr,
            root.join(WeightVariant::TitleOcr.dir_name()),
            vec![],
        ),
    }
}

/// Temporary directories backing a test predictor
pub struct TestEnv {
    pub root: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
        }
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.path().join("scratch")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.root.path().join("outputs")
    }

    /// Write a fake image into the caller-owned area
    pub fn image(&self, name: &str, content: &[u8]) -> PathBuf {
        let dir = self.root.path().join("uploads");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn predictor(&self, engine: Arc<FakeEngine>) -> Predictor {
        Predictor::new(
            engine,
            Arc::new(test_weights(&self.root.path().join("models"))),
            WorkspaceManager::new(self.scratch_dir()),
            OutputPublisher::new(self.outputs_dir()),
        )
    }

    /// Entries left in the scratch directory
    pub fn leftover_workspaces(&self) -> usize {
        match std::fs::read_dir(self.scratch_dir()) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

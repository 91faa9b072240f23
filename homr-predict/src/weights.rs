//! Model weight provisioning
//!
//! Artifacts are declared in the `[[weights.artifacts]]` manifest and stored at
//! `<models_dir>/<variant>/<name>`. Provisioning is idempotent: an artifact
//! that is present (and matches its declared digest, if any) is never fetched
//! again. Downloads land in a `.part` sibling and are renamed into place only
//! after verification, so a failed download never leaves a file under the
//! final name.

use async_trait::async_trait;
use homr_common::config::{ArtifactEntry, WeightVariant, WeightsConfig};
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::ProvisioningError;

const USER_AGENT: &str = concat!("homr-predict/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Provisioned state
// ============================================================================

/// On-disk artifacts for one inference variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightSet {
    variant: WeightVariant,
    root: PathBuf,
    artifacts: Vec<PathBuf>,
}

impl WeightSet {
    pub fn new(variant: WeightVariant, root: PathBuf, artifacts: Vec<PathBuf>) -> Self {
        Self {
            variant,
            root,
            artifacts,
        }
    }

    pub fn variant(&self) -> WeightVariant {
        self.variant
    }

    /// Directory holding this variant's artifacts
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }
}

/// Weights available to every request, fixed after startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedWeights {
    pub recognition: WeightSet,
    pub title_ocr: WeightSet,
}

// ============================================================================
// Fetching
// ============================================================================

/// Capability that downloads one artifact to a local path
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Write the artifact's bytes to `dest`, returning the number written
    async fn fetch(&self, artifact: &ArtifactEntry, dest: &Path) -> Result<u64, ProvisioningError>;
}

/// HTTP(S) artifact fetcher
pub struct HttpFetcher {
    http_client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ProvisioningError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ProvisioningError::HttpClient(e.to_string()))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, artifact: &ArtifactEntry, dest: &Path) -> Result<u64, ProvisioningError> {
        let download_error = |message: String| ProvisioningError::Download {
            name: artifact.name.clone(),
            url: artifact.url.clone(),
            message,
        };

        let mut response = self
            .http_client
            .get(&artifact.url)
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(download_error(format!("HTTP status {}", response.status())));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| ProvisioningError::storage(dest, e))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| download_error(e.to_string()))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| ProvisioningError::storage(dest, e))?;
            written += chunk.len() as u64;
        }

        file.sync_all()
            .await
            .map_err(|e| ProvisioningError::storage(dest, e))?;

        Ok(written)
    }
}

// ============================================================================
// Provisioner
// ============================================================================

/// Ensures declared model artifacts exist under the models folder
pub struct WeightProvisioner {
    models_dir: PathBuf,
    artifacts: Vec<ArtifactEntry>,
    fetcher: Arc<dyn ArtifactFetcher>,
}

impl WeightProvisioner {
    pub fn new(
        models_dir: PathBuf,
        artifacts: Vec<ArtifactEntry>,
        fetcher: Arc<dyn ArtifactFetcher>,
    ) -> Self {
        Self {
            models_dir,
            artifacts,
            fetcher,
        }
    }

    /// Provisioner backed by the HTTP fetcher
    pub fn from_config(models_dir: PathBuf, config: &WeightsConfig) -> Result<Self, ProvisioningError> {
        let fetcher = HttpFetcher::new(Duration::from_secs(config.download_timeout_secs))?;
        Ok(Self::new(models_dir, config.artifacts.clone(), Arc::new(fetcher)))
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Recognition weights: accelerated (reduced precision) or standard
    pub async fn provision(&self, accelerated: bool) -> Result<WeightSet, ProvisioningError> {
        let variant = if accelerated {
            WeightVariant::Accelerated
        } else {
            WeightVariant::Standard
        };
        self.provision_variant(variant).await
    }

    /// Title detection OCR weights
    pub async fn provision_title_weights(&self) -> Result<WeightSet, ProvisioningError> {
        self.provision_variant(WeightVariant::TitleOcr).await
    }

    /// Accelerated recognition weights plus title OCR weights
    pub async fn provision_all(&self) -> Result<ProvisionedWeights, ProvisioningError> {
        info!("Provisioning accelerated recognition weights");
        let recognition = self.provision(true).await?;

        info!("Provisioning title OCR weights");
        let title_ocr = self.provision_title_weights().await?;

        Ok(ProvisionedWeights {
            recognition,
            title_ocr,
        })
    }

    async fn provision_variant(&self, variant: WeightVariant) -> Result<WeightSet, ProvisioningError> {
        let declared: Vec<&ArtifactEntry> = self
            .artifacts
            .iter()
            .filter(|a| a.variant == variant)
            .collect();

        for artifact in &declared {
            validate_name(artifact)?;
        }

        let variant_dir = self.models_dir.join(variant.dir_name());
        tokio::fs::create_dir_all(&variant_dir)
            .await
            .map_err(|e| ProvisioningError::storage(&variant_dir, e))?;

        if declared.is_empty() {
            warn!(
                variant = %variant,
                dir = %variant_dir.display(),
                "No artifacts declared for variant; engine must supply its own weights"
            );
        }

        let start = Instant::now();
        let mut paths = Vec::with_capacity(declared.len());
        let mut fetched = 0usize;

        for artifact in declared {
            let (path, was_fetched) = self.ensure_artifact(artifact, &variant_dir).await?;
            if was_fetched {
                fetched += 1;
            }
            paths.push(path);
        }

        info!(
            variant = %variant,
            artifacts = paths.len(),
            fetched,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Weights ready"
        );

        Ok(WeightSet::new(variant, variant_dir, paths))
    }

    /// Returns the artifact path and whether a download happened
    async fn ensure_artifact(
        &self,
        artifact: &ArtifactEntry,
        dir: &Path,
    ) -> Result<(PathBuf, bool), ProvisioningError> {
        let dest = dir.join(&artifact.name);

        if is_present(artifact, &dest).await? {
            debug!(artifact = %artifact.name, "Artifact already present");
            return Ok((dest, false));
        }

        let part = dir.join(format!("{}.part", artifact.name));
        info!(artifact = %artifact.name, url = %artifact.url, "Downloading artifact");

        let result = async {
            let bytes = self.fetcher.fetch(artifact, &part).await?;
            verify_checksum(artifact, &part).await?;
            tokio::fs::rename(&part, &dest)
                .await
                .map_err(|e| ProvisioningError::storage(&dest, e))?;
            Ok::<u64, ProvisioningError>(bytes)
        }
        .await;

        match result {
            Ok(bytes) => {
                info!(artifact = %artifact.name, bytes, "Artifact downloaded");
                Ok((dest, true))
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }
}

fn validate_name(artifact: &ArtifactEntry) -> Result<(), ProvisioningError> {
    let name = artifact.name.as_str();
    let is_plain_file_name = !name.is_empty()
        && !name.contains(['/', '\\'])
        && Path::new(name).file_name() == Some(OsStr::new(name));

    if is_plain_file_name {
        Ok(())
    } else {
        Err(ProvisioningError::InvalidManifest {
            name: name.to_string(),
            reason: "name must be a plain file name".to_string(),
        })
    }
}

async fn is_present(artifact: &ArtifactEntry, dest: &Path) -> Result<bool, ProvisioningError> {
    if tokio::fs::metadata(dest).await.is_err() {
        return Ok(false);
    }

    let Some(expected) = &artifact.sha256 else {
        return Ok(true);
    };

    let actual = sha256_file(dest).await?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        warn!(
            artifact = %artifact.name,
            expected = %expected,
            actual = %actual,
            "Existing artifact does not match declared checksum, fetching again"
        );
        Ok(false)
    }
}

async fn verify_checksum(artifact: &ArtifactEntry, path: &Path) -> Result<(), ProvisioningError> {
    let Some(expected) = &artifact.sha256 else {
        return Ok(());
    };

    let actual = sha256_file(path).await?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(ProvisioningError::ChecksumMismatch {
            name: artifact.name.clone(),
            expected: expected.clone(),
            actual,
        })
    }
}

/// Hex SHA-256 of a file, computed on the blocking pool
pub async fn sha256_file(path: &Path) -> Result<String, ProvisioningError> {
    let path_buf = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<String, ProvisioningError> {
        use std::fs::File;
        use std::io::Read;

        let mut file = File::open(&path_buf).map_err(|e| ProvisioningError::storage(&path_buf, e))?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 1024 * 1024]; // 1MB chunks

        loop {
            let bytes_read = file
                .read(&mut buffer)
                .map_err(|e| ProvisioningError::storage(&path_buf, e))?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| {
        ProvisioningError::storage(
            path,
            std::io::Error::new(std::io::ErrorKind::Other, format!("Hash task failed: {}", e)),
        )
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves fixed bytes per URL and counts every fetch
    #[derive(Default)]
    struct CountingFetcher {
        bodies: HashMap<String, Vec<u8>>,
        calls: Mutex<Vec<String>>,
    }

    impl CountingFetcher {
        fn with(entries: &[(&str, &[u8])]) -> Self {
            Self {
                bodies: entries
                    .iter()
                    .map(|(url, body)| (url.to_string(), body.to_vec()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ArtifactFetcher for CountingFetcher {
        async fn fetch(&self, artifact: &ArtifactEntry, dest: &Path) -> Result<u64, ProvisioningError> {
            self.calls.lock().unwrap().push(artifact.url.clone());
            match self.bodies.get(&artifact.url) {
                Some(body) => {
                    tokio::fs::write(dest, body).await.unwrap();
                    Ok(body.len() as u64)
                }
                None => Err(ProvisioningError::Download {
                    name: artifact.name.clone(),
                    url: artifact.url.clone(),
                    message: "HTTP status 404 Not Found".to_string(),
                }),
            }
        }
    }

    fn entry(name: &str, url: &str, variant: WeightVariant, sha256: Option<String>) -> ArtifactEntry {
        ArtifactEntry {
            name: name.to_string(),
            url: url.to_string(),
            sha256,
            variant,
        }
    }

    fn digest(bytes: &[u8]) -> String {
        format!("{:x}", Sha256::digest(bytes))
    }

    #[tokio::test]
    async fn test_second_provision_fetches_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(CountingFetcher::with(&[
            ("mem://segnet", b"segnet-fp16"),
            ("mem://transformer", b"transformer-fp16"),
            ("mem://title", b"ocr"),
        ]));
        let provisioner = WeightProvisioner::new(
            temp_dir.path().to_path_buf(),
            vec![
                entry("segnet.onnx", "mem://segnet", WeightVariant::Accelerated, Some(digest(b"segnet-fp16"))),
                entry("transformer.onnx", "mem://transformer", WeightVariant::Accelerated, None),
                entry("title.onnx", "mem://title", WeightVariant::TitleOcr, None),
            ],
            fetcher.clone(),
        );

        let first = provisioner.provision_all().await.unwrap();
        assert_eq!(fetcher.call_count(), 3);

        let second = provisioner.provision_all().await.unwrap();
        assert_eq!(fetcher.call_count(), 3, "second provisioning must not fetch");
        assert_eq!(first, second);

        assert_eq!(first.recognition.variant(), WeightVariant::Accelerated);
        assert_eq!(first.recognition.artifacts().len(), 2);
        assert_eq!(first.title_ocr.variant(), WeightVariant::TitleOcr);
        assert_eq!(
            std::fs::read(first.recognition.root().join("segnet.onnx")).unwrap(),
            b"segnet-fp16"
        );
    }

    #[tokio::test]
    async fn test_standard_variant_is_separate() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(CountingFetcher::with(&[("mem://fp32", b"fp32")]));
        let provisioner = WeightProvisioner::new(
            temp_dir.path().to_path_buf(),
            vec![entry("segnet.onnx", "mem://fp32", WeightVariant::Standard, None)],
            fetcher.clone(),
        );

        let accelerated = provisioner.provision(true).await.unwrap();
        assert!(accelerated.artifacts().is_empty());
        assert_eq!(fetcher.call_count(), 0);

        let standard = provisioner.provision(false).await.unwrap();
        assert_eq!(standard.artifacts(), &[temp_dir.path().join("standard").join("segnet.onnx")]);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_existing_artifact_is_refetched() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("accelerated");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("segnet.onnx"), b"truncated").unwrap();

        let fetcher = Arc::new(CountingFetcher::with(&[("mem://segnet", b"segnet-fp16")]));
        let provisioner = WeightProvisioner::new(
            temp_dir.path().to_path_buf(),
            vec![entry("segnet.onnx", "mem://segnet", WeightVariant::Accelerated, Some(digest(b"segnet-fp16")))],
            fetcher.clone(),
        );

        provisioner.provision(true).await.unwrap();
        assert_eq!(fetcher.call_count(), 1);
        assert_eq!(std::fs::read(dir.join("segnet.onnx")).unwrap(), b"segnet-fp16");
    }

    #[tokio::test]
    async fn test_checksum_mismatch_leaves_no_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(CountingFetcher::with(&[("mem://segnet", b"tampered")]));
        let provisioner = WeightProvisioner::new(
            temp_dir.path().to_path_buf(),
            vec![entry("segnet.onnx", "mem://segnet", WeightVariant::Accelerated, Some(digest(b"genuine")))],
            fetcher,
        );

        let result = provisioner.provision(true).await;
        assert!(matches!(result, Err(ProvisioningError::ChecksumMismatch { .. })));

        let dir = temp_dir.path().join("accelerated");
        assert!(!dir.join("segnet.onnx").exists());
        assert!(!dir.join("segnet.onnx.part").exists());
    }

    #[tokio::test]
    async fn test_download_failure_is_provisioning_error() {
        let temp_dir = TempDir::new().unwrap();
        let provisioner = WeightProvisioner::new(
            temp_dir.path().to_path_buf(),
            vec![entry("title.onnx", "mem://missing", WeightVariant::TitleOcr, None)],
            Arc::new(CountingFetcher::default()),
        );

        let result = provisioner.provision_title_weights().await;
        assert!(matches!(result, Err(ProvisioningError::Download { .. })));
        assert!(!temp_dir.path().join("title_ocr").join("title.onnx").exists());
    }

    #[tokio::test]
    async fn test_path_like_names_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        for bad in ["../escape.onnx", "nested/model.onnx", "..", ""] {
            let provisioner = WeightProvisioner::new(
                temp_dir.path().to_path_buf(),
                vec![entry(bad, "mem://x", WeightVariant::Accelerated, None)],
                Arc::new(CountingFetcher::default()),
            );
            let result = provisioner.provision(true).await;
            assert!(
                matches!(result, Err(ProvisioningError::InvalidManifest { .. })),
                "name {:?} should be rejected",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_sha256_file_matches_digest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blob");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(
            sha256_file(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

//! Configuration loading and root folder resolution
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `HOMR_CONFIG` environment variable
//! 3. `~/.config/homr/predictor.toml`
//! 4. `/etc/homr/predictor.toml`
//! 5. Compiled defaults (fallback)
//!
//! A missing config file is never fatal: the service logs a warning and starts
//! with compiled defaults. A config file that exists but does not parse is an
//! error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "HOMR_CONFIG";

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "HOMR_ROOT_FOLDER";

const CONFIG_DIR_NAME: &str = "homr";
const CONFIG_FILE_NAME: &str = "predictor.toml";

// ============================================================================
// TOML schema
// ============================================================================

/// Top-level TOML configuration
///
/// Every section is optional in the file; absent keys take the compiled
/// defaults below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Base folder for provisioned model weights
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub weights: WeightsConfig,
    pub workspace: WorkspaceConfig,
    pub outputs: OutputsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set (e.g. "info", "homr_predict=debug")
    pub level: String,
    /// Append log lines to this file instead of stderr
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// External recognition program configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Program to execute (looked up in PATH when not absolute)
    pub program: String,
    /// Arguments placed before the generated flags
    pub args: Vec<String>,
    /// Whether concurrent invocations may share the engine
    pub reentrant: bool,
    /// Environment variable receiving the recognition weights directory
    pub models_dir_env: String,
    /// Environment variable receiving the title OCR weights directory
    pub ocr_models_dir_env: String,
    /// Arguments that make the program fetch its recognition weights and exit
    /// (empty disables the step)
    pub init_args: Vec<String>,
    /// Arguments that make the program fetch its title OCR weights and exit
    /// (empty disables the step)
    pub title_init_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "homr".to_string(),
            args: Vec::new(),
            reentrant: false,
            models_dir_env: "HOMR_MODELS_DIR".to_string(),
            ocr_models_dir_env: "HOMR_OCR_MODELS_DIR".to_string(),
            init_args: vec!["--init".to_string()],
            title_init_args: vec!["--init-ocr".to_string()],
        }
    }
}

/// Inference variant a model artifact belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightVariant {
    /// Full-precision weights
    Standard,
    /// Reduced-precision weights for accelerated (GPU) inference
    Accelerated,
    /// Weights for the title OCR subsystem
    TitleOcr,
}

impl WeightVariant {
    /// Directory name used under the models folder
    pub fn dir_name(&self) -> &'static str {
        match self {
            WeightVariant::Standard => "standard",
            WeightVariant::Accelerated => "accelerated",
            WeightVariant::TitleOcr => "title_ocr",
        }
    }
}

impl std::fmt::Display for WeightVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// One declared model artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// File name under the variant directory
    pub name: String,
    /// Download location
    pub url: String,
    /// Expected lowercase hex SHA-256 digest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub variant: WeightVariant,
}

/// Weight provisioning configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightsConfig {
    /// Models folder (defaults to `<root_folder>/models`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models_dir: Option<PathBuf>,
    /// Per-artifact download timeout
    pub download_timeout_secs: u64,
    pub artifacts: Vec<ArtifactEntry>,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            models_dir: None,
            download_timeout_secs: 600,
            artifacts: Vec::new(),
        }
    }
}

/// Per-request scratch directory configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Parent of the per-request workspaces (defaults to the system temp dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

/// Published output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputsConfig {
    /// Folder receiving request-scoped outputs (defaults to `<temp>/homr-outputs`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Newest published outputs to keep; older ones are pruned on publish.
    /// Zero keeps everything.
    pub max_retained: usize,
}

impl Default for OutputsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_retained: 1000,
        }
    }
}

impl TomlConfig {
    /// Models folder, falling back to `<root_folder>/models`
    pub fn models_dir(&self, root_folder: &Path) -> PathBuf {
        self.weights
            .models_dir
            .clone()
            .unwrap_or_else(|| root_folder.join("models"))
    }

    /// Parent folder for per-request workspaces
    pub fn scratch_dir(&self) -> PathBuf {
        self.workspace
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Folder for published outputs
    pub fn outputs_dir(&self) -> PathBuf {
        self.outputs
            .dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("homr-outputs"))
    }
}

// ============================================================================
// Config file resolution
// ============================================================================

/// Locates and loads the TOML config file
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new(cli_path: Option<PathBuf>) -> Self {
        Self { cli_path }
    }

    /// Config file path by priority order
    ///
    /// Explicit paths (CLI, environment) are returned even if they do not
    /// exist so the caller can warn about them. Well-known locations are only
    /// returned when present.
    pub fn config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            return Some(path.clone());
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        let user_config = dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
        let system_config = PathBuf::from("/etc").join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);

        user_config
            .into_iter()
            .chain(std::iter::once(system_config))
            .find(|p| p.exists())
    }

    /// Load the resolved config, falling back to compiled defaults
    pub fn load(&self) -> Result<TomlConfig> {
        match self.config_path() {
            Some(path) if path.exists() => {
                let config = load_toml_config(&path)?;
                info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using compiled defaults",
                    path.display()
                );
                Ok(TomlConfig::default())
            }
            None => {
                debug!("No config file found, using compiled defaults");
                Ok(TomlConfig::default())
            }
        }
    }
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;
    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(Error::Io(e));
    }
    Ok(())
}

// ============================================================================
// Root folder resolution
// ============================================================================

/// Root folder resolution priority:
/// 1. Command-line argument
/// 2. `HOMR_ROOT_FOLDER` environment variable
/// 3. TOML `root_folder`
/// 4. OS-dependent compiled default
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/homr (or /var/lib/homr for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join(CONFIG_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("/var/lib/homr"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join(CONFIG_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\homr"))
    } else {
        dirs::data_dir()
            .map(|d| d.join(CONFIG_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("./homr_data"))
    }
}

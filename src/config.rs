use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default encoder model (multilingual, handles mixed-language headers)
const DEFAULT_ENCODER_MODEL: &str = "paraphrase-multilingual-minilm-l12-v2";
/// Default merge threshold on cosine distance
const DEFAULT_THRESHOLD: f32 = 0.4;
const DEFAULT_MAX_KEYS: usize = 5000;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LISTEN: &str = "0.0.0.0:8000";
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const CONFIG_FILE: &str = "config.yaml";

/// Text encoder settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Model name for embeddings (e.g., "paraphrase-multilingual-minilm-l12-v2")
    #[serde(default = "default_encoder_model")]
    pub model: String,

    /// Batch size passed to the model; unset lets the runtime decide
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// Print a progress bar while the model downloads
    #[serde(default)]
    pub show_download_progress: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            model: default_encoder_model(),
            batch_size: None,
            show_download_progress: false,
        }
    }
}

/// Clustering request settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Threshold used when a request does not carry one [0.0, 1.0]
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,

    /// Largest accepted `keys` list. Each request holds an N×N `f64`
    /// linkage matrix, about 200 MB at 5000 keys.
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,

    /// Per-request clustering deadline in seconds, 0 disables it
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_threshold(),
            max_keys: default_max_keys(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// HTTP daemon settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Load the encoder before accepting requests
    #[serde(default)]
    pub preload: bool,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            preload: false,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_encoder_model() -> String {
    DEFAULT_ENCODER_MODEL.to_string()
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_max_keys() -> usize {
    DEFAULT_MAX_KEYS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let clustering = &self.clustering;
        if !(0.0..=1.0).contains(&clustering.default_threshold) {
            bail!(
                "clustering.default_threshold must be between 0.0 and 1.0, got {}",
                clustering.default_threshold
            );
        }

        if clustering.max_keys == 0 {
            bail!("clustering.max_keys must be greater than 0");
        }

        if self.encoder.model.trim().is_empty() {
            bail!("encoder.model must not be empty");
        }

        if self.encoder.batch_size == Some(0) {
            bail!("encoder.batch_size must be greater than 0 when set");
        }

        if self.daemon.max_body_bytes == 0 {
            bail!("daemon.max_body_bytes must be greater than 0");
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing the defaults first if
    /// the file does not exist yet.
    pub fn load_with(base_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base_path = base_path.as_ref();
        let path = base_path.join(CONFIG_FILE);

        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        // create new if does not exist
        if !path.exists() {
            let defaults = serde_yml::to_string(&Self::default())?;
            std::fs::write(&path, defaults)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("{} is malformed", path.display()))?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = self.base_path.join(CONFIG_FILE);
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(&path, config_str)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Directory holding `config.yaml` and the model cache.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

/// Resolve the data directory: `$KEYCLUSTER_BASE_PATH`, or
/// `~/.local/share/keycluster`.
pub fn default_base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("KEYCLUSTER_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = homedir::my_home()
        .context("could not determine home directory")?
        .context("home directory path is empty")?;
    Ok(home.join(".local/share/keycluster"))
}

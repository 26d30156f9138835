use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ReelError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Record cache settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Media download settings
    #[serde(default)]
    pub media: MediaConfig,

    /// Chat model used for classification
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// AWS configuration for transcription
    #[serde(default)]
    pub aws: AwsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file (defaults to the user data directory)
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Root directory; each post downloads into `<download_dir>/<shortcode>`
    pub download_dir: PathBuf,

    /// yt-dlp executable
    pub yt_dlp_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// OpenAI-compatible API root
    pub base_url: String,

    pub model: String,

    /// Sampling temperature (0.0 to 2.0)
    pub temperature: f32,

    /// API key; `--api-key` and `GROQ_API_KEY` take precedence
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// AWS region
    pub region: String,

    /// S3 bucket for temporary audio storage
    pub s3_bucket: String,

    /// Optional S3 key prefix
    pub s3_key_prefix: Option<String>,

    /// Transcription language code (auto-detect if not specified)
    pub language: Option<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            yt_dlp_path: "yt-dlp".to_string(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            temperature: 0.3,
            api_key: None,
        }
    }
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            s3_bucket: "".to_string(),
            s3_key_prefix: Some("reelsift/".to_string()),
            language: None,
        }
    }
}

impl AwsConfig {
    /// Transcription needs somewhere to stage audio
    pub fn require_bucket(&self) -> Result<()> {
        if self.s3_bucket.is_empty() {
            return Err(ReelError::Config(
                "aws.s3_bucket must be configured to transcribe audio".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from `path` (or the default location), creating a default file if missing
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(&config_path).await?;
            tracing::info!("Wrote default configuration to {}", config_path.display());
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("reel-sift").join("config.yaml"))
    }

    /// Database file, falling back to the user data directory
    pub fn store_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.store.path {
            return Ok(path.clone());
        }

        let data_dir = dirs::data_dir()
            .context("Could not determine data directory")?;

        Ok(data_dir.join("reel-sift").join("posts.db"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.classifier.model.trim().is_empty() {
            return Err(ReelError::Config("classifier.model must not be empty".to_string()).into());
        }

        if !(0.0..=2.0).contains(&self.classifier.temperature) {
            return Err(ReelError::Config(format!(
                "classifier.temperature must be between 0 and 2, got {}",
                self.classifier.temperature
            ))
            .into());
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        match self.store_path() {
            Ok(path) => println!("  Store: {}", path.display()),
            Err(_) => println!("  Store: (unresolved)"),
        }
        println!("  Download Dir: {}", self.media.download_dir.display());
        println!("  Classifier: {} @ {}", self.classifier.model, self.classifier.base_url);
        println!("  Classifier API Key: {}", if self.classifier.api_key.is_some() { "set" } else { "not set" });
        println!("  AWS Region: {}", self.aws.region);
        println!("  S3 Bucket: {}", self.aws.s3_bucket);
        if let Some(prefix) = &self.aws.s3_key_prefix {
            println!("  S3 Prefix: {}", prefix);
        }
    }
}

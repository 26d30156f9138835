use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "reelsift",
    about = "Reel Sift - Cache, transcribe and classify Instagram food posts",
    version,
    long_about = "Extracts metadata from Instagram posts and reels, transcribes their audio with AWS Transcribe and asks a chat model whether they are about food. Every stage is cached per URL in a local SQLite store, so re-running only does the missing work."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to ./config.yaml, then the user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Record store database, overriding the configured path
    #[arg(long, global = true, value_name = "FILE")]
    pub db: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the processing stages for a post URL
    Process(ProcessArgs),

    /// Print the cached record for a URL without running any stage
    Show {
        #[arg(value_name = "URL")]
        url: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List recently processed posts
    List {
        /// Maximum number of posts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show or create the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ProcessArgs {
    /// Instagram post, reel or TV URL
    #[arg(value_name = "URL")]
    pub url: String,

    /// Download media files
    #[arg(long)]
    pub download: bool,

    /// Extract and transcribe audio
    #[arg(long)]
    pub audio: bool,

    /// Classify the post with the chat model
    #[arg(long)]
    pub llm: bool,

    /// Run every stage
    #[arg(long)]
    pub full: bool,

    /// Ignore cached results and redo the selected stages
    #[arg(long)]
    pub force_refresh: bool,

    /// Leave the audio transcription out of the classification prompt
    #[arg(long)]
    pub no_transcription: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Chat model API key
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Directory to save downloads, overriding the configured one
    #[arg(long, value_name = "DIR")]
    pub download_dir: Option<PathBuf>,

    /// Language code for transcription (auto-detect if not specified)
    #[arg(short, long, value_name = "LANG")]
    pub language: Option<String>,
}

impl ProcessArgs {
    pub fn wants_audio(&self) -> bool {
        self.audio || self.full
    }

    pub fn wants_download(&self) -> bool {
        self.download || self.full
    }

    pub fn wants_classification(&self) -> bool {
        self.llm || self.full
    }

    pub fn include_transcription(&self) -> bool {
        !self.no_transcription
    }

    /// Whether this run may end up calling the transcriber
    pub fn needs_transcriber(&self) -> bool {
        self.wants_audio() || (self.wants_classification() && self.include_transcription())
    }
}

#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// A single JSON document
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

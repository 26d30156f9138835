//! Reel Sift - caches, transcribes and classifies social media food posts
//!
//! This library drives an Instagram post through three cached stages: metadata
//! extraction (yt-dlp), audio transcription (AWS Transcribe) and classification
//! by a chat model. Every stage result is kept in a local SQLite store keyed by URL
//! so repeated runs only do the work that is still missing.

pub mod classify;
pub mod cli;
pub mod config;
pub mod extractors;
pub mod output;
pub mod pipeline;
pub mod store;
pub mod transcribe;
pub mod utils;

pub use classify::{ChatClassifier, Classifier};
pub use cli::{Cli, Commands};
pub use config::Config;
pub use extractors::{InstagramExtractor, PostExtractor};
pub use pipeline::PostPipeline;
pub use store::{AudioTrack, Card, CardKind, Classification, PostMetadata, PostRecord, RecordStore};
pub use transcribe::{AwsTranscriber, Transcriber};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the pipeline
///
/// These ride inside `anyhow::Error`, so callers match on them with
/// `err.downcast_ref::<ReelError>()`.
#[derive(thiserror::Error, Debug)]
pub enum ReelError {
    #[error("Metadata extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Classifier response could not be parsed: {0}")]
    ClassificationParseFailed(String),

    #[error("Classifier service error: {0}")]
    ClassificationServiceError(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

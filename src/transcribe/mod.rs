use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_transcribe::Client as TranscribeClient;
use std::path::Path;
use uuid::Uuid;

use crate::config::AwsConfig;
use crate::store::AudioTrack;
use crate::ReelError;

pub mod audio;
pub mod processor;

/// Speech-to-text for a downloaded video
///
/// `Ok(AudioTrack::Missing)` means the file has no audio stream and
/// `Ok(AudioTrack::Untranscribed)` means the speech engine failed on a real
/// track. `Err` is reserved for failing to get at the audio at all.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, video_path: &Path) -> Result<AudioTrack>;
}

/// ffmpeg for the audio track, AWS Transcribe for the words
pub struct AwsTranscriber {
    config: AwsConfig,
    s3_client: S3Client,
    transcribe_client: TranscribeClient,
}

impl AwsTranscriber {
    /// Create a new transcriber; no AWS call is made until the first transcription
    pub async fn new(config: AwsConfig) -> Self {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        Self {
            s3_client: S3Client::new(&aws_config),
            transcribe_client: TranscribeClient::new(&aws_config),
            config,
        }
    }

    /// Upload, transcribe and clean up; returns the transcript text
    async fn speech_to_text(&self, audio_path: &Path) -> Result<String> {
        if self.config.s3_bucket.is_empty() {
            return Err(ReelError::Config("aws.s3_bucket is not configured".to_string()).into());
        }

        let s3_key = self.upload_to_s3(audio_path).await?;
        let job_name = format!("reelsift_{}", Uuid::new_v4());

        let outcome = match self.start_transcription_job(&job_name, &s3_key).await {
            Ok(()) => {
                processor::TranscriptionProcessor::new(self.transcribe_client.clone(), job_name)
                    .wait_for_completion()
                    .await
            }
            Err(e) => Err(e),
        };

        // the upload goes either way
        if let Err(e) = self.cleanup_s3(&s3_key).await {
            tracing::warn!(error = %e, key = %s3_key, "Failed to clean up S3 object");
        }

        let transcript = outcome?;
        tracing::info!(
            chars = transcript.text.len(),
            confidence = ?transcript.confidence,
            "Transcription received"
        );
        Ok(transcript.text)
    }

    /// Upload audio file to S3
    async fn upload_to_s3(&self, audio_path: &Path) -> Result<String> {
        let key = format!(
            "{}audio_{}_{}.mp3",
            self.config.s3_key_prefix.as_deref().unwrap_or(""),
            Uuid::new_v4(),
            chrono::Utc::now().format("%Y%m%d_%H%M%S"),
        );

        tracing::info!("Uploading audio to S3: s3://{}/{}", self.config.s3_bucket, key);

        let content = fs_err::read(audio_path)?;

        self.s3_client
            .put_object()
            .bucket(&self.config.s3_bucket)
            .key(&key)
            .body(content.into())
            .content_type("audio/mpeg")
            .send()
            .await
            .context("Failed to upload audio to S3")?;

        Ok(key)
    }

    /// Start AWS Transcribe job, auto-detecting the language unless one is configured
    async fn start_transcription_job(&self, job_name: &str, s3_key: &str) -> Result<()> {
        use aws_sdk_transcribe::types::{Media, MediaFormat};

        let media_uri = format!("s3://{}/{}", self.config.s3_bucket, s3_key);
        tracing::info!("Starting transcription job: {}", job_name);

        let media = Media::builder().media_file_uri(media_uri).build();

        let mut job_builder = self
            .transcribe_client
            .start_transcription_job()
            .transcription_job_name(job_name)
            .media_format(MediaFormat::Mp3)
            .media_sample_rate_hertz(16_000)
            .media(media);

        if let Some(lang) = self.config.language.as_deref() {
            tracing::info!("Using configured language: {}", lang);
            job_builder = job_builder.language_code(lang.into());
        } else {
            job_builder = job_builder.identify_language(true);
        }

        job_builder
            .send()
            .await
            .context("Failed to start transcription job")?;

        Ok(())
    }

    /// Clean up S3 object
    async fn cleanup_s3(&self, s3_key: &str) -> Result<()> {
        tracing::debug!("Cleaning up S3 object: {}", s3_key);

        self.s3_client
            .delete_object()
            .bucket(&self.config.s3_bucket)
            .key(s3_key)
            .send()
            .await
            .context("Failed to clean up S3 object")?;

        Ok(())
    }
}

#[async_trait]
impl Transcriber for AwsTranscriber {
    async fn transcribe(&self, video_path: &Path) -> Result<AudioTrack> {
        if !audio::has_audio_stream(video_path).await? {
            tracing::info!("No audio track found in {}", video_path.display());
            return Ok(AudioTrack::Missing);
        }

        let audio_path = video_path.with_extension("audio.mp3");
        audio::extract_audio(video_path, &audio_path).await?;

        match self.speech_to_text(&audio_path).await {
            Ok(text) if !text.trim().is_empty() => Ok(AudioTrack::Transcribed(text)),
            Ok(_) => {
                tracing::warn!("Audio track produced no recognizable speech");
                Ok(AudioTrack::Untranscribed)
            }
            Err(e) => {
                let failure = ReelError::TranscriptionFailed(format!("{:#}", e));
                tracing::warn!(error = %failure, "Post has audio but transcription failed");
                Ok(AudioTrack::Untranscribed)
            }
        }
    }
}

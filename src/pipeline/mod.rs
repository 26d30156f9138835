//! Per-URL processing pipeline
//!
//! Three stages (metadata, audio, classification), each with its own cache
//! predicate against the [`RecordStore`]. A stage only does external work when
//! its own fields are missing or the caller forces a refresh, and each stage
//! persists through a separate write that touches only its own fields.

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::classify::{build_context, parse_classification, Classifier};
use crate::extractors::{DownloadedMedia, PostExtractor};
use crate::store::{AudioTrack, Classification, PostRecord, RecordStore, RecordUpdate};
use crate::transcribe::Transcriber;
use crate::utils::{preview, sanitize_filename};
use crate::ReelError;

/// Drives one URL at a time through extraction, transcription and classification
pub struct PostPipeline {
    store: RecordStore,
    extractor: Box<dyn PostExtractor>,
    transcriber: Box<dyn Transcriber>,
    classifier: Box<dyn Classifier>,
    download_dir: PathBuf,
    /// URLs whose audio stage already ran through this pipeline
    audio_attempted: Mutex<HashSet<String>>,
}

impl PostPipeline {
    pub fn new(
        store: RecordStore,
        extractor: Box<dyn PostExtractor>,
        transcriber: Box<dyn Transcriber>,
        classifier: Box<dyn Classifier>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            extractor,
            transcriber,
            classifier,
            download_dir: download_dir.into(),
            audio_attempted: Mutex::new(HashSet::new()),
        }
    }

    /// Cached record for `url`, without triggering any stage
    pub fn record(&self, url: &str) -> Result<Option<PostRecord>> {
        self.store.get(url)
    }

    /// Release the store; call once when the whole run is over
    pub fn close(self) -> Result<()> {
        self.store.close()
    }

    /// Make sure metadata for `url` is cached, extracting it if needed
    pub async fn ensure_metadata(&self, url: &str, force_refresh: bool) -> Result<PostRecord> {
        if !force_refresh {
            if let Some(record) = self.store.get(url)? {
                tracing::info!(url, "Metadata cached, skipping extraction");
                return Ok(record);
            }
        }

        tracing::info!(url, platform = self.extractor.platform_name(), "Extracting metadata");
        let extracted = self
            .extractor
            .extract_metadata(url)
            .await
            .map_err(|e| ReelError::ExtractionFailed(format!("{:#}", e)))?;

        let record = self.store.upsert(
            url,
            RecordUpdate {
                shortcode: Some(extracted.shortcode),
                metadata: Some(extracted.metadata),
                ..Default::default()
            },
        )?;

        tracing::info!(url, shortcode = %record.shortcode, is_video = record.metadata.is_video, "Metadata stored");
        Ok(record)
    }

    /// Make sure the audio stage has run for `url`
    ///
    /// Transcription failures are recorded in the returned record's audio
    /// state rather than returned as errors. Only a metadata failure errors.
    pub async fn ensure_transcription(&self, url: &str, force_refresh: bool) -> Result<PostRecord> {
        let record = match self.store.get(url)? {
            Some(record) if !force_refresh && record.transcription().is_some() => {
                tracing::info!(url, "Transcription cached, skipping audio processing");
                return Ok(record);
            }
            Some(record) => record,
            None => self.ensure_metadata(url, false).await?,
        };

        if !record.metadata.is_video {
            tracing::info!(url, "Post is not a video, skipping audio processing");
            return Ok(record);
        }

        let audio = self.process_audio(url, &record).await;
        match &audio {
            AudioTrack::Transcribed(text) => {
                tracing::info!(url, preview = %preview(text, 100), "Audio transcribed")
            }
            AudioTrack::Untranscribed => tracing::warn!(url, "Post has audio but transcription failed"),
            AudioTrack::Missing => tracing::info!(url, "Post has no usable audio"),
        }

        if !self.store.update_audio(url, &audio)? {
            anyhow::bail!("Record for {} disappeared before audio could be saved", url);
        }
        self.mark_audio_attempted(url);

        self.store
            .get(url)?
            .with_context(|| format!("Record for {} missing after audio update", url))
    }

    /// Make sure `url` has a classification, calling the model if needed
    ///
    /// Returns `Ok(None)` when the model answered with something unparseable;
    /// nothing is stored in that case. A video without a cached transcription
    /// gets the audio stage first, unless that stage already ran for `url`
    /// through this pipeline.
    pub async fn ensure_classification(
        &self,
        url: &str,
        force_refresh: bool,
        include_transcription: bool,
    ) -> Result<Option<Classification>> {
        let mut record = match self.store.get(url)? {
            Some(PostRecord {
                classification: Some(classification),
                ..
            }) if !force_refresh => {
                tracing::info!(url, "Classification cached, skipping model call");
                return Ok(Some(classification));
            }
            Some(record) => record,
            None => self.ensure_metadata(url, false).await?,
        };

        if include_transcription
            && record.metadata.is_video
            && record.transcription().is_none()
            && !self.audio_already_attempted(url)
        {
            record = self.ensure_transcription(url, force_refresh).await?;
        }

        let context = build_context(&record, include_transcription);
        let response = self.classifier.complete(&context).await.map_err(|e| {
            match e.downcast::<ReelError>() {
                Ok(err @ ReelError::ClassificationServiceError(_)) => err,
                Ok(other) => ReelError::ClassificationServiceError(other.to_string()),
                Err(e) => ReelError::ClassificationServiceError(format!("{:#}", e)),
            }
        })?;

        let classification = match parse_classification(&response) {
            Ok(classification) => classification,
            Err(e) => {
                tracing::warn!(url, error = %e, response = %preview(&response, 200), "Discarding classifier response");
                return Ok(None);
            }
        };

        self.store.upsert(
            url,
            RecordUpdate {
                shortcode: Some(record.shortcode),
                metadata: Some(record.metadata),
                audio: record.audio,
                classification: Some(classification.clone()),
            },
        )?;

        tracing::info!(
            url,
            food_related = classification.is_food_related,
            cards = classification.cards.len(),
            "Classification stored"
        );
        Ok(Some(classification))
    }

    /// Download every media file of the post into its own, freshly emptied directory
    pub async fn download_media(&self, url: &str) -> Result<DownloadedMedia> {
        let record = self.ensure_metadata(url, false).await?;
        let dest = self.prepare_media_dir(&record.shortcode)?;
        self.extractor.download_media(url, &dest).await
    }

    /// Download, pick the video and transcribe it, folding every failure into an audio state
    async fn process_audio(&self, url: &str, record: &PostRecord) -> AudioTrack {
        let media = match self.prepare_media_dir(&record.shortcode) {
            Ok(dest) => self.extractor.download_media(url, &dest).await,
            Err(e) => Err(e),
        };

        let media = match media {
            Ok(media) => media,
            Err(e) => {
                tracing::warn!(url, error = %format!("{:#}", e), "Failed to download media");
                return AudioTrack::Missing;
            }
        };

        let Some(video) = media.video_file() else {
            tracing::warn!(url, files = media.files.len(), "No video file found in downloaded content");
            return AudioTrack::Missing;
        };

        match self.transcriber.transcribe(video).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(url, error = %format!("{:#}", e), "Failed to extract audio from video");
                AudioTrack::Missing
            }
        }
    }

    fn mark_audio_attempted(&self, url: &str) {
        if let Ok(mut attempted) = self.audio_attempted.lock() {
            attempted.insert(url.to_string());
        }
    }

    fn audio_already_attempted(&self, url: &str) -> bool {
        self.audio_attempted
            .lock()
            .map(|attempted| attempted.contains(url))
            .unwrap_or(false)
    }

    /// Per-post download directory, cleared so stale files never mix with a new download
    fn prepare_media_dir(&self, shortcode: &str) -> Result<PathBuf> {
        let dir = self.media_dir(shortcode);
        if dir.exists() {
            fs_err::remove_dir_all(&dir)?;
        }
        fs_err::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn media_dir(&self, shortcode: &str) -> PathBuf {
        let name = sanitize_filename(shortcode);
        let name = if name.is_empty() || name.chars().all(|c| c == '.') {
            "post".to_string()
        } else {
            name
        };
        self.download_dir.join(name)
    }
}

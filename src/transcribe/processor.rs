use anyhow::{Context, Result};
use aws_sdk_transcribe::types::{TranscriptionJob, TranscriptionJobStatus};
use aws_sdk_transcribe::Client as TranscribeClient;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Text and quality of a finished transcription job
#[derive(Debug, Clone)]
pub struct JobTranscript {
    pub text: String,

    /// Mean word confidence (0.0 to 1.0), if AWS reported any
    pub confidence: Option<f64>,
}

/// AWS Transcribe transcript format
#[derive(Debug, Deserialize)]
struct AwsTranscript {
    results: TranscriptResults,
}

#[derive(Debug, Deserialize)]
struct TranscriptResults {
    transcripts: Vec<TranscriptText>,
    #[serde(default)]
    items: Vec<TranscriptItem>,
}

#[derive(Debug, Deserialize)]
struct TranscriptText {
    transcript: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptItem {
    #[serde(rename = "type")]
    item_type: String,
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    confidence: Option<String>,
}

/// Polls one transcription job until it settles
pub struct TranscriptionProcessor {
    client: TranscribeClient,
    job_name: String,
}

impl TranscriptionProcessor {
    pub fn new(client: TranscribeClient, job_name: String) -> Self {
        Self { client, job_name }
    }

    /// Poll until the job settles, then fetch and parse its transcript
    pub async fn wait_for_completion(&self) -> Result<JobTranscript> {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner.set_message(format!("Waiting for {}", self.job_name));

        let started = Instant::now();
        let mut polls = 0u32;

        let job = loop {
            polls += 1;
            let job = self.fetch_job().await?;

            match job.transcription_job_status() {
                Some(TranscriptionJobStatus::Completed) => {
                    spinner.finish_and_clear();
                    break job;
                }
                Some(TranscriptionJobStatus::Failed) => {
                    spinner.finish_and_clear();
                    anyhow::bail!(
                        "Transcription job {} failed: {}",
                        self.job_name,
                        job.failure_reason().unwrap_or("no reason given")
                    );
                }
                Some(TranscriptionJobStatus::Queued) | Some(TranscriptionJobStatus::InProgress) => {
                    spinner.set_message(format!(
                        "Transcribing audio ({}s)",
                        started.elapsed().as_secs()
                    ));
                    sleep(poll_interval(polls)).await;
                }
                other => {
                    spinner.finish_and_clear();
                    anyhow::bail!("Transcription job {} in unexpected state {:?}", self.job_name, other);
                }
            }
        };

        tracing::debug!(
            job = %self.job_name,
            polls,
            elapsed_secs = started.elapsed().as_secs(),
            "Transcription job finished"
        );

        let uri = job
            .transcript()
            .and_then(|t| t.transcript_file_uri())
            .with_context(|| format!("Job {} finished without a transcript", self.job_name))?;

        parse_transcript(&download_transcript(uri).await?)
    }

    async fn fetch_job(&self) -> Result<TranscriptionJob> {
        self.client
            .get_transcription_job()
            .transcription_job_name(&self.job_name)
            .send()
            .await
            .with_context(|| format!("Failed to poll transcription job {}", self.job_name))?
            .transcription_job()
            .cloned()
            .with_context(|| format!("Transcription job {} not found", self.job_name))
    }
}

/// Back off from 5s by 2s per poll, capped at 30s
fn poll_interval(polls: u32) -> Duration {
    let secs = 5 + 2 * polls.saturating_sub(1) as u64;
    Duration::from_secs(secs.min(30))
}

/// Download transcript from the presigned URI AWS hands back
async fn download_transcript(uri: &str) -> Result<String> {
    let response = reqwest::get(uri)
        .await
        .context("Failed to download transcript")?;

    if !response.status().is_success() {
        anyhow::bail!("Failed to download transcript: HTTP {}", response.status());
    }

    response
        .text()
        .await
        .context("Failed to read transcript content")
}

/// Pull the full text and mean confidence out of a transcript document
pub(crate) fn parse_transcript(json: &str) -> Result<JobTranscript> {
    let transcript: AwsTranscript =
        serde_json::from_str(json).context("Failed to parse transcript JSON")?;

    let text = transcript
        .results
        .transcripts
        .iter()
        .map(|t| t.transcript.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let confidences: Vec<f64> = transcript
        .results
        .items
        .iter()
        .filter(|item| item.item_type == "pronunciation")
        .filter_map(|item| item.alternatives.first())
        .filter_map(|alt| alt.confidence.as_deref())
        .filter_map(|c| c.parse::<f64>().ok())
        .collect();

    let confidence = if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
    };

    Ok(JobTranscript { text, confidence })
}

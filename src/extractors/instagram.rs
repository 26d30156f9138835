use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::{collect_media_files, extract_shortcode, DownloadedMedia, ExtractedPost, PostExtractor};
use crate::store::PostMetadata;
use crate::Result;

/// Instagram post and reel extractor using yt-dlp
pub struct InstagramExtractor {
    yt_dlp_path: String,
}

impl InstagramExtractor {
    pub fn new(yt_dlp_path: impl Into<String>) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
        }
    }

    /// Check if yt-dlp is available
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.yt_dlp_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Get post information using yt-dlp
    async fn get_post_info(&self, url: &str) -> Result<Value> {
        tracing::debug!("Extracting post info for: {}", url);

        let output = Command::new(&self.yt_dlp_path)
            .args(["--dump-json", "--no-playlist", "--skip-download", url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp failed: {}", error.trim());
        }

        // carousels print one JSON document per line, the first describes the post
        let stdout = String::from_utf8(output.stdout)?;
        let first = stdout
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("yt-dlp returned no metadata for {}", url))?;

        Ok(serde_json::from_str(first)?)
    }
}

/// Map a yt-dlp info document onto post metadata
pub(crate) fn metadata_from_info(info: &Value) -> PostMetadata {
    let text = |key: &str| info[key].as_str().unwrap_or_default().to_string();

    let is_video = match info["vcodec"].as_str() {
        Some(vcodec) => vcodec != "none",
        None => info["duration"].as_f64().is_some(),
    };

    let account_name = info["uploader_id"]
        .as_str()
        .or_else(|| info["channel"].as_str())
        .or_else(|| info["uploader"].as_str())
        .unwrap_or_default()
        .to_string();

    PostMetadata {
        title: text("title"),
        description: text("description"),
        published_at: info["timestamp"]
            .as_i64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        account_name,
        account_followers: info["channel_follower_count"].as_u64().unwrap_or(0),
        account_category: text("account_category"),
        is_video,
    }
}

#[async_trait]
impl PostExtractor for InstagramExtractor {
    async fn extract_metadata(&self, url: &str) -> Result<ExtractedPost> {
        let shortcode = extract_shortcode(url)?;

        if !self.check_availability().await {
            anyhow::bail!("yt-dlp is not available. Please install it: https://github.com/yt-dlp/yt-dlp");
        }

        let info = self.get_post_info(url).await?;

        Ok(ExtractedPost {
            shortcode,
            metadata: metadata_from_info(&info),
        })
    }

    async fn download_media(&self, url: &str, dest: &Path) -> Result<DownloadedMedia> {
        tracing::info!("Downloading media for {} to: {}", url, dest.display());

        let template = dest.join("%(id)s_%(autonumber)s.%(ext)s");
        let output = Command::new(&self.yt_dlp_path)
            .args([
                "--output",
                &template.to_string_lossy(),
                "--no-playlist",
                "--write-thumbnail",
                "--write-description",
                "--newline",
                url,
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to download media: {}", error.trim());
        }

        let files = collect_media_files(dest)?;
        tracing::debug!("Downloaded {} media files", files.len());

        Ok(DownloadedMedia {
            dir: dest.to_path_buf(),
            files,
        })
    }

    fn platform_name(&self) -> &'static str {
        "Instagram"
    }
}

impl Default for InstagramExtractor {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

pub mod instagram;

pub use instagram::InstagramExtractor;

use crate::store::PostMetadata;
use crate::Result;

/// Metadata reported for a post, plus the shortcode it was fetched under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPost {
    pub shortcode: String,
    pub metadata: PostMetadata,
}

/// Files fetched for a post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadedMedia {
    /// Directory the files were written to
    pub dir: PathBuf,

    pub files: Vec<MediaFile>,
}

impl DownloadedMedia {
    /// First video that is still on disk
    pub fn video_file(&self) -> Option<&Path> {
        self.files
            .iter()
            .find(|file| file.kind == MediaKind::Video && file.path.exists())
            .map(|file| file.path.as_path())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFile {
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
    Text,
}

impl MediaKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp4" | "mov" | "webm" | "mkv" => Some(MediaKind::Video),
            "jpg" | "jpeg" | "png" | "webp" => Some(MediaKind::Image),
            "txt" | "json" => Some(MediaKind::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
            MediaKind::Text => "text",
        }
    }
}

/// Fetches post metadata and media for a URL
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostExtractor: Send + Sync {
    /// Resolve the post behind `url` and read its metadata
    async fn extract_metadata(&self, url: &str) -> Result<ExtractedPost>;

    /// Download every media file of the post into `dest`, which already exists and is empty
    async fn download_media(&self, url: &str, dest: &Path) -> Result<DownloadedMedia>;

    /// Get the name of this platform
    fn platform_name(&self) -> &'static str;
}

/// Pull the post shortcode out of an Instagram URL
///
/// Looks for the segment after `p/`, `reel/`, `reels/` or `tv/` and falls back
/// to the last path segment. Query strings and trailing slashes are ignored.
pub fn extract_shortcode(url: &str) -> Result<String> {
    let parsed = validate_url(url)?;
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let after_marker = segments
        .windows(2)
        .find(|pair| matches!(pair[0], "p" | "reel" | "reels" | "tv"))
        .map(|pair| pair[1]);

    after_marker
        .or_else(|| segments.last().copied())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Could not extract shortcode from URL: {}", url))
}

/// Validate and normalize URLs
pub fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)
        .map_err(|_| anyhow::anyhow!("Invalid URL format: {}", url))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("URL must use HTTP or HTTPS protocol");
    }

    Ok(parsed)
}

/// Recursively list the media files below `dir`
pub fn collect_media_files(dir: &Path) -> Result<Vec<MediaFile>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        for entry in fs_err::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }

            let kind = path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(MediaKind::from_extension);
            if let Some(kind) = kind {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                files.push(MediaFile { path, kind, name });
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

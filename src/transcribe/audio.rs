use anyhow::Result;
use std::path::Path;
use tokio::process::Command;

/// Check whether a media file carries at least one audio stream, using ffprobe
pub async fn has_audio_stream(path: &Path) -> Result<bool> {
    if !path.is_file() {
        anyhow::bail!("Video file does not exist: {}", path.display());
    }

    let output = Command::new("ffprobe")
        .args([
            "-v", "quiet",
            "-print_format", "json",
            "-show_streams",
            &path.to_string_lossy(),
        ])
        .output()
        .await?;

    if !output.status.success() {
        let error = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Failed to analyze file with ffprobe: {}", error);
    }

    let info: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    Ok(streams_include_audio(&info))
}

fn streams_include_audio(info: &serde_json::Value) -> bool {
    info["streams"]
        .as_array()
        .map(|streams| {
            streams
                .iter()
                .any(|stream| stream["codec_type"].as_str() == Some("audio"))
        })
        .unwrap_or(false)
}

/// Strip the video and write a mono 16 kHz MP3 suited to speech recognition
pub async fn extract_audio(video_path: &Path, target_path: &Path) -> Result<()> {
    tracing::debug!("Extracting audio: {} -> {}", video_path.display(), target_path.display());

    let output = Command::new("ffmpeg")
        .args([
            "-i", &video_path.to_string_lossy(),
            "-vn", // No video
            "-acodec", "mp3",
            "-ab", "64k",
            "-ar", "16000",
            "-ac", "1",
            "-y", // Overwrite output file
            &target_path.to_string_lossy(),
        ])
        .output()
        .await?;

    if !output.status.success() {
        let error = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Failed to extract audio with ffmpeg: {}", error);
    }

    Ok(())
}

/// Sanitize filename for safe filesystem usage
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            match c {
                // Keep alphanumeric characters, spaces, hyphens, underscores, and dots
                c if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' || c == '.' => c,
                // Replace everything else with underscore
                _ => '_',
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// First `max_chars` characters of `text` on one line, with an ellipsis when cut
pub fn preview(text: &str, max_chars: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }

    let cut: String = flattened.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

/// Check if the current environment has required tools
pub async fn check_dependencies() -> Vec<String> {
    let mut missing = Vec::new();

    // Check for yt-dlp
    if !check_command_available("yt-dlp", "--version").await {
        missing.push("yt-dlp - required for Instagram metadata and media downloads".to_string());
    }

    // ffmpeg and ffprobe only matter for the audio stage
    if !check_command_available("ffmpeg", "-version").await {
        missing.push("ffmpeg - required to extract audio for transcription".to_string());
    }
    if !check_command_available("ffprobe", "-version").await {
        missing.push("ffprobe - required to detect audio tracks".to_string());
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str, version_flag: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg(version_flag)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

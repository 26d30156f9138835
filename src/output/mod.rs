use anyhow::Result;
use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::extractors::DownloadedMedia;
use crate::store::{Classification, PostMetadata, PostRecord};
use crate::utils::preview;

/// Flat JSON shape of a record, with the audio state spelled out as `hasAudio` + `transcription`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordView<'a> {
    pub url: &'a str,
    pub shortcode: &'a str,
    #[serde(flatten)]
    pub metadata: &'a PostMetadata,
    pub has_audio: Option<bool>,
    pub transcription: Option<&'a str>,
    pub classification: Option<&'a Classification>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'a> From<&'a PostRecord> for RecordView<'a> {
    fn from(record: &'a PostRecord) -> Self {
        Self {
            url: &record.url,
            shortcode: &record.shortcode,
            metadata: &record.metadata,
            has_audio: record.has_audio(),
            transcription: record.transcription(),
            classification: record.classification.as_ref(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Everything one `process` run produced
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessReport<'a> {
    pub record: RecordView<'a>,
    pub transcription: Option<&'a str>,
    pub download: Option<&'a DownloadedMedia>,
    pub classification: Option<&'a Classification>,
}

pub fn format_as_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn print_metadata(record: &PostRecord) {
    println!("\n{} Metadata for {}", style("✅").green(), record.url);
    println!("{}", format_record_text(record));
}

pub fn print_audio(record: &PostRecord) {
    println!("\n----- Audio -----");
    match (record.has_audio(), record.transcription()) {
        (_, Some(text)) => {
            println!("{} Transcription:", style("✅").green());
            println!("{}", text);
        }
        (Some(true), None) => println!("{} Post has audio but it could not be transcribed", style("❓").yellow()),
        (Some(false), None) => println!("{} No audio track found", style("❓").yellow()),
        (None, None) => println!("{} Not a video, audio skipped", style("–").dim()),
    }
}

pub fn print_download(media: &DownloadedMedia) {
    println!("\n{} Media downloaded to {}", style("✅").green(), media.dir.display());
    for file in &media.files {
        println!("  - {} ({})", file.name, file.kind.as_str());
    }
}

pub fn print_classification(classification: &Classification) {
    println!("\n----- Classification -----");
    if classification.is_food_related {
        println!("{} Food-related, {} card(s)", style("🍔").green(), classification.cards.len());
    } else {
        println!("{} Not food-related", style("🚫").red());
    }

    for card in &classification.cards {
        println!("  [{}] {}", style(card.kind.as_str()).cyan(), style(&card.name).bold());
        if !card.description.is_empty() {
            println!("      {}", card.description);
        }
        if !card.details.is_empty() {
            println!("      {}", style(&card.details).dim());
        }
    }
}

pub fn print_failure(message: &str) {
    println!("\n{} {}", style("❌").red(), message);
}

/// Print a cached record in the requested format
pub fn print_record(record: &PostRecord, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", format_as_json(&RecordView::from(record))?),
        OutputFormat::Text => {
            println!("{}", format_record_text(record));
            if record.audio.is_some() {
                print_audio(record);
            }
            if let Some(classification) = &record.classification {
                print_classification(classification);
            }
        }
    }
    Ok(())
}

/// One line per record
pub fn print_recent(records: &[PostRecord]) {
    if records.is_empty() {
        println!("No cached posts yet.");
        return;
    }

    for record in records {
        let verdict = match &record.classification {
            Some(c) if c.is_food_related => style(format!("food ({} cards)", c.cards.len())).green(),
            Some(_) => style("not food".to_string()).red(),
            None => style("unclassified".to_string()).dim(),
        };
        println!(
            "{}  {:<12} {:<20} {}",
            record.updated_at.format("%Y-%m-%d %H:%M"),
            record.shortcode,
            verdict,
            preview(&record.metadata.title, 50),
        );
    }
}

fn format_record_text(record: &PostRecord) -> String {
    let metadata = &record.metadata;
    let mut lines = vec![
        format!("  Shortcode:   {}", record.shortcode),
        format!("  Title:       {}", metadata.title),
        format!("  Description: {}", preview(&metadata.description, 200)),
        format!("  Account:     {} ({} followers)", metadata.account_name, metadata.account_followers),
    ];
    if !metadata.account_category.is_empty() {
        lines.push(format!("  Category:    {}", metadata.account_category));
    }
    if let Some(published_at) = metadata.published_at {
        lines.push(format!("  Published:   {}", published_at.format("%Y-%m-%d %H:%M UTC")));
    }
    lines.push(format!("  Video:       {}", if metadata.is_video { "yes" } else { "no" }));
    lines.push(format!("  Updated:     {}", record.updated_at.format("%Y-%m-%d %H:%M:%S UTC")));
    lines.join("\n")
}

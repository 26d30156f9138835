//! Food classification of post text by a chat model
//!
//! The model is asked for a JSON verdict; [`parse_classification`] is strict
//! about its shape so a half-formed answer never ends up cached.

use async_trait::async_trait;

pub mod chat;

pub use chat::ChatClassifier;

use crate::store::{Classification, PostRecord};
use crate::{ReelError, Result};

pub const SYSTEM_PROMPT: &str =
    "You analyze Instagram content and extract food-related information.";

/// Sends classification context to a generative model and returns its raw reply
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Transport, auth and quota problems are errors; content is not inspected here
    async fn complete(&self, context: &str) -> Result<String>;
}

/// Build the prompt describing one post
pub fn build_context(record: &PostRecord, include_transcription: bool) -> String {
    let transcription = match record.transcription() {
        Some(text) if include_transcription => format!("\nAudio Transcription: {}", text),
        _ => String::new(),
    };

    format!(
        r#"Analyze this Instagram content and determine if it's food-related:

URL: {url}
Title: {title}
Description: {description}{transcription}
Account: {account}

Extract the following information in JSON format:
1. isFoodRelated (boolean)
2. cards - an array of objects with:
   - type: "restaurant", "food", "offer", or "misc"
   - name: name of restaurant or food item
   - description: brief description
   - details: any other relevant details

Return ONLY valid JSON with no other text."#,
        url = record.url,
        title = record.metadata.title,
        description = record.metadata.description,
        transcription = transcription,
        account = record.metadata.account_name,
    )
}

/// Parse a model reply into a classification
///
/// Accepts the JSON bare, inside a markdown code block, or embedded in prose.
pub fn parse_classification(response: &str) -> std::result::Result<Classification, ReelError> {
    let candidate = json_candidate(response)
        .ok_or_else(|| ReelError::ClassificationParseFailed("no JSON object in response".to_string()))?;

    serde_json::from_str::<Classification>(candidate)
        .map_err(|e| ReelError::ClassificationParseFailed(e.to_string()))
}

/// Locate the JSON object inside an LLM response
fn json_candidate(response: &str) -> Option<&str> {
    let trimmed = response.trim();

    if trimmed.starts_with('{') {
        return Some(trimmed);
    }

    // Markdown code block
    if let Some(start) = trimmed.find("```") {
        let after_marker = &trimmed[start + 3..];
        // drop the info string (`json`, `JSON`, ` json`, ...) whatever its case
        let body = match after_marker.split_once('\n') {
            Some((tag, rest)) if !tag.contains('{') => rest,
            _ => after_marker.trim_start_matches(|c: char| c.is_ascii_alphabetic() || c == ' '),
        };
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }

    // Outermost braces in surrounding prose
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One cached post, keyed by its source URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub url: String,

    /// Identifier parsed from the URL, names the media download directory
    pub shortcode: String,

    pub metadata: PostMetadata,

    /// `None` until the audio stage has run
    pub audio: Option<AudioTrack>,

    pub classification: Option<Classification>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl PostRecord {
    /// Tri-state audio flag: unknown, no track, or track present
    pub fn has_audio(&self) -> Option<bool> {
        self.audio.as_ref().map(AudioTrack::has_audio)
    }

    /// Non-empty transcription, if one is cached
    pub fn transcription(&self) -> Option<&str> {
        self.audio.as_ref().and_then(AudioTrack::text)
    }
}

/// Descriptive fields reported by the extractor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMetadata {
    pub title: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    pub account_name: String,
    pub account_followers: u64,
    pub account_category: String,
    pub is_video: bool,
}

/// Outcome of the audio stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum AudioTrack {
    /// No audio track, or the audio could not be extracted at all
    Missing,

    /// An audio track exists but speech-to-text produced nothing usable
    Untranscribed,

    Transcribed(String),
}

impl AudioTrack {
    pub fn has_audio(&self) -> bool {
        !matches!(self, AudioTrack::Missing)
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            AudioTrack::Transcribed(text) if !text.is_empty() => Some(text),
            _ => None,
        }
    }

    /// Rebuild from the stored `(has_audio, transcription)` columns
    pub(crate) fn from_columns(has_audio: Option<bool>, transcription: Option<String>) -> Option<Self> {
        match (has_audio, transcription) {
            (None, _) => None,
            (Some(false), _) => Some(AudioTrack::Missing),
            (Some(true), Some(text)) if !text.is_empty() => Some(AudioTrack::Transcribed(text)),
            (Some(true), _) => Some(AudioTrack::Untranscribed),
        }
    }

    pub(crate) fn to_columns(&self) -> (bool, Option<&str>) {
        match self {
            AudioTrack::Missing => (false, None),
            AudioTrack::Untranscribed => (true, None),
            AudioTrack::Transcribed(text) => (true, Some(text.as_str())),
        }
    }
}

/// Structured verdict returned by the classifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(rename = "isFoodRelated", alias = "is_food_related")]
    pub is_food_related: bool,

    pub cards: Vec<Card>,
}

/// One entity pulled out of a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    #[serde(rename = "type")]
    pub kind: CardKind,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Free-form; structured values from the model are kept as compact JSON text
    #[serde(default, deserialize_with = "details_as_text")]
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardKind {
    Restaurant,
    Food,
    Offer,
    #[serde(other)]
    Misc,
}

impl CardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardKind::Restaurant => "restaurant",
            CardKind::Food => "food",
            CardKind::Offer => "offer",
            CardKind::Misc => "misc",
        }
    }
}

fn details_as_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    })
}

pub mod models;


use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub use models::*;

const RECORD_COLUMNS: &str = "url, shortcode, title, description, published_at, account_name, \
     account_followers, account_category, is_video, has_audio, transcription, classification, \
     created_at, updated_at";

/// Fields a stage wants written; `None` groups are left untouched
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
    pub shortcode: Option<String>,
    pub metadata: Option<PostMetadata>,
    pub audio: Option<AudioTrack>,
    pub classification: Option<Classification>,
}

/// SQLite-backed cache of post records, one row per URL
pub struct RecordStore {
    conn: Mutex<Connection>,
}

impl RecordStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open record store at {}", db_path.display()))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
        ",
        )?;

        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                shortcode TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                published_at TEXT,
                account_name TEXT NOT NULL DEFAULT '',
                account_followers INTEGER NOT NULL DEFAULT 0,
                account_category TEXT NOT NULL DEFAULT '',
                is_video INTEGER NOT NULL DEFAULT 0,
                has_audio INTEGER,            -- NULL until the audio stage has run
                transcription TEXT,
                is_food_related INTEGER,
                classification TEXT,          -- JSON
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_posts_updated ON posts(updated_at DESC);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Record store lock poisoned"))
    }

    pub fn exists(&self, url: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found = conn
            .query_row("SELECT 1 FROM posts WHERE url = ?1", params![url], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get(&self, url: &str) -> Result<Option<PostRecord>> {
        let conn = self.lock()?;
        fetch_record(&conn, url)
    }

    /// Most recently written records first
    pub fn recent(&self, limit: usize) -> Result<Vec<PostRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM posts ORDER BY updated_at DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], |row| Ok(read_row(row)))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    /// Insert the record, or update only the supplied field groups of an existing one
    ///
    /// A new record needs a shortcode and metadata.
    pub fn upsert(&self, url: &str, update: RecordUpdate) -> Result<PostRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let previous = previous_updated_at(&tx, url)?;
        let now = next_timestamp(previous);

        match previous {
            None => insert_record(&tx, url, &update, now)?,
            Some(_) => update_record(&tx, url, &update, now)?,
        }

        let record = fetch_record(&tx, url)?
            .ok_or_else(|| anyhow!("Record for {} vanished during upsert", url))?;
        tx.commit()?;

        tracing::debug!(url, updated_at = %record.updated_at, "Record written");
        Ok(record)
    }

    /// Write only the audio columns; returns `false` when no record exists for `url`
    pub fn update_audio(&self, url: &str, audio: &AudioTrack) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let Some(previous) = previous_updated_at(&tx, url)? else {
            return Ok(false);
        };

        let (has_audio, transcription) = audio.to_columns();
        tx.execute(
            "UPDATE posts SET has_audio = ?1, transcription = ?2, updated_at = ?3 WHERE url = ?4",
            params![has_audio, transcription, format_timestamp(next_timestamp(Some(previous))), url],
        )?;
        tx.commit()?;

        Ok(true)
    }

    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| anyhow!("Record store lock poisoned"))?;
        conn.close()
            .map_err(|(_, e)| e)
            .context("Failed to close record store")
    }
}

fn insert_record(tx: &Transaction<'_>, url: &str, update: &RecordUpdate, now: DateTime<Utc>) -> Result<()> {
    let (Some(shortcode), Some(metadata)) = (&update.shortcode, &update.metadata) else {
        anyhow::bail!("Cannot create a record for {} without metadata", url);
    };

    let (has_audio, transcription) = match &update.audio {
        Some(audio) => {
            let (has_audio, text) = audio.to_columns();
            (Some(has_audio), text)
        }
        None => (None, None),
    };
    let (is_food_related, classification) = classification_columns(update.classification.as_ref())?;
    let now = format_timestamp(now);

    tx.execute(
        "INSERT INTO posts (
            url, shortcode, title, description, published_at,
            account_name, account_followers, account_category, is_video,
            has_audio, transcription, is_food_related, classification,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
        params![
            url,
            shortcode,
            metadata.title,
            metadata.description,
            metadata.published_at.map(format_timestamp),
            metadata.account_name,
            metadata.account_followers as i64,
            metadata.account_category,
            metadata.is_video,
            has_audio,
            transcription,
            is_food_related,
            classification,
            now,
        ],
    )?;
    Ok(())
}

fn update_record(tx: &Transaction<'_>, url: &str, update: &RecordUpdate, now: DateTime<Utc>) -> Result<()> {
    let mut assignments: Vec<(&str, Value)> = Vec::new();

    if let Some(shortcode) = &update.shortcode {
        assignments.push(("shortcode", text(shortcode)));
    }
    if let Some(metadata) = &update.metadata {
        assignments.extend([
            ("title", text(&metadata.title)),
            ("description", text(&metadata.description)),
            (
                "published_at",
                metadata
                    .published_at
                    .map(|at| Value::Text(format_timestamp(at)))
                    .unwrap_or(Value::Null),
            ),
            ("account_name", text(&metadata.account_name)),
            ("account_followers", Value::Integer(metadata.account_followers as i64)),
            ("account_category", text(&metadata.account_category)),
            ("is_video", Value::Integer(metadata.is_video as i64)),
        ]);
    }
    if let Some(audio) = &update.audio {
        let (has_audio, transcription) = audio.to_columns();
        assignments.push(("has_audio", Value::Integer(has_audio as i64)));
        assignments.push(("transcription", transcription.map(text).unwrap_or(Value::Null)));
    }
    if let Some(classification) = &update.classification {
        let (is_food_related, json) = classification_columns(Some(classification))?;
        assignments.push(("is_food_related", is_food_related.map(|b| Value::Integer(b as i64)).unwrap_or(Value::Null)));
        assignments.push(("classification", json.map(Value::Text).unwrap_or(Value::Null)));
    }
    assignments.push(("updated_at", Value::Text(format_timestamp(now))));

    let set_clause = assignments
        .iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{} = ?{}", column, i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("UPDATE posts SET {} WHERE url = ?{}", set_clause, assignments.len() + 1);

    let values = assignments
        .into_iter()
        .map(|(_, value)| value)
        .chain(std::iter::once(text(url)));
    tx.execute(&sql, params_from_iter(values))?;
    Ok(())
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn classification_columns(classification: Option<&Classification>) -> Result<(Option<bool>, Option<String>)> {
    match classification {
        Some(classification) => {
            let json = serde_json::to_string(classification).context("Failed to serialize classification")?;
            Ok((Some(classification.is_food_related), Some(json)))
        }
        None => Ok((None, None)),
    }
}

fn previous_updated_at(conn: &Connection, url: &str) -> Result<Option<DateTime<Utc>>> {
    let stored: Option<String> = conn
        .query_row("SELECT updated_at FROM posts WHERE url = ?1", params![url], |row| row.get(0))
        .optional()?;
    stored.map(|s| parse_timestamp(&s)).transpose()
}

fn fetch_record(conn: &Connection, url: &str) -> Result<Option<PostRecord>> {
    let row = conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM posts WHERE url = ?1"),
            params![url],
            |row| Ok(read_row(row)),
        )
        .optional()?;
    row.transpose()
}

fn read_row(row: &Row<'_>) -> Result<PostRecord> {
    let published_at: Option<String> = row.get("published_at")?;
    let has_audio: Option<bool> = row.get("has_audio")?;
    let transcription: Option<String> = row.get("transcription")?;
    let classification: Option<String> = row.get("classification")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let url: String = row.get("url")?;

    let classification = classification
        .map(|json| serde_json::from_str::<Classification>(&json))
        .transpose()
        .with_context(|| format!("Stored classification for {} is corrupt", url))?;

    Ok(PostRecord {
        shortcode: row.get("shortcode")?,
        metadata: PostMetadata {
            title: row.get("title")?,
            description: row.get("description")?,
            published_at: published_at.as_deref().map(parse_timestamp).transpose()?,
            account_name: row.get("account_name")?,
            account_followers: row.get::<_, i64>("account_followers")?.max(0) as u64,
            account_category: row.get("account_category")?,
            is_video: row.get("is_video")?,
        },
        audio: AudioTrack::from_columns(has_audio, transcription),
        classification,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        url,
    })
}

/// Current time, nudged forward when the clock has not moved past `previous`
fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    // stored with microsecond precision, so compare at that precision
    let now = Utc::now();
    let now = now - Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos() % 1_000));
    match previous {
        Some(previous) if now <= previous => previous + Duration::microseconds(1),
        _ => now,
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .with_context(|| format!("Invalid stored timestamp: {}", value))
}

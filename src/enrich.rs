use std::path::Path;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::time_utils::parse_db;
use crate::{AppError, AppResult};

/// One dicho as produced by the external LLM enrichment step.
///
/// Enrichment is manual and happens outside this tool: a human feeds the
/// candidates TSV to an LLM and brings back a TSV with these columns filled
/// in. Nothing here calls a language model.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EnrichedDicho {
    pub dicho: String,
    pub translation: String,
    pub expanded_context_usage: String,
    pub semantic_keywords: Vec<String>,
    pub cultural_context: String,
    pub emotion_tone: String,
    pub difficulty_level: u8,
    pub learning_notes: Option<String>,
    #[serde(with = "crate::serde_helpers::offset_datetime")]
    pub date_time: OffsetDateTime,
    pub contributor_first: Option<String>,
}

/// Raw TSV row before validation. Keywords arrive comma-separated.
#[derive(Debug, Deserialize)]
struct RawRow {
    dicho: String,
    translation: String,
    expanded_context_usage: String,
    semantic_keywords: String,
    cultural_context: String,
    emotion_tone: String,
    difficulty_level: String,
    #[serde(default)]
    learning_notes: String,
    date_time: String,
    #[serde(default)]
    contributor_first: String,
}

/// Result of parsing an enrichment TSV: valid rows plus per-row rejections.
/// A malformed row never aborts the batch.
#[derive(Debug, Default)]
pub struct EnrichmentBatch {
    pub rows: Vec<EnrichedDicho>,
    pub skipped: Vec<(usize, String)>,
}

fn validate_row(raw: RawRow) -> AppResult<EnrichedDicho> {
    if raw.dicho.trim().is_empty() {
        return Err(AppError::Other("empty dicho text".to_string()));
    }
    let difficulty_level: u8 = raw
        .difficulty_level
        .trim()
        .parse()
        .map_err(|_| AppError::Other(format!("bad difficulty '{}'", raw.difficulty_level)))?;
    if !(1..=5).contains(&difficulty_level) {
        return Err(AppError::Other(format!(
            "difficulty {} outside 1-5",
            difficulty_level
        )));
    }
    let semantic_keywords: Vec<String> = raw
        .semantic_keywords
        .split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if semantic_keywords.is_empty() {
        return Err(AppError::Other("no semantic keywords".to_string()));
    }
    let date_time = parse_db(raw.date_time.trim())?;
    let optional = |s: String| {
        let trimmed = s.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    };
    Ok(EnrichedDicho {
        dicho: raw.dicho.trim().to_string(),
        translation: raw.translation.trim().to_string(),
        expanded_context_usage: raw.expanded_context_usage.trim().to_string(),
        semantic_keywords,
        cultural_context: raw.cultural_context.trim().to_string(),
        emotion_tone: raw.emotion_tone.trim().to_string(),
        difficulty_level,
        learning_notes: optional(raw.learning_notes),
        date_time,
        contributor_first: optional(raw.contributor_first),
    })
}

/// Parse an enrichment TSV, skipping (and reporting) malformed rows.
pub fn parse_enriched_tsv(content: &str) -> AppResult<EnrichmentBatch> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_reader(content.as_bytes());

    let mut batch = EnrichmentBatch::default();
    for (i, record) in reader.deserialize::<RawRow>().enumerate() {
        let line = i + 2; // header occupies line 1
        let outcome = record.map_err(AppError::from).and_then(validate_row);
        match outcome {
            Ok(row) => batch.rows.push(row),
            Err(e) => {
                warn!("Skipping enrichment row at line {}: {}", line, e);
                batch.skipped.push((line, e.to_string()));
            }
        }
    }
    debug!(
        "Parsed {} enriched dichos, skipped {}",
        batch.rows.len(),
        batch.skipped.len()
    );
    Ok(batch)
}

#[tracing::instrument(name = "Reading enrichment file", level = "debug")]
pub async fn read_enriched<P: AsRef<Path> + std::fmt::Debug>(path: P) -> AppResult<EnrichmentBatch> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_enriched_tsv(&content)
}

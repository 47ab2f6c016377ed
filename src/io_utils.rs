use std::path::Path;

use serde::ser;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::AppResult;
use crate::dedup::CandidateDicho;
use crate::time_utils::format_db;

/// Columns the external enrichment step receives for each candidate.
static CANDIDATE_HEADER: [&str; 4] = ["dicho", "original", "date_time", "contributor"];

/// Write candidate dichos as a TSV for the external enrichment step.
#[tracing::instrument(name = "Writing candidates file", level = "debug", skip(candidates))]
pub async fn write_candidates_tsv<P: AsRef<Path> + std::fmt::Debug>(
    output: P,
    candidates: &[CandidateDicho],
) -> AppResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(Vec::new());
    writer.write_record(CANDIDATE_HEADER)?;
    for candidate in candidates {
        writer.write_record([
            candidate.cleaned.as_str(),
            candidate.original.as_str(),
            format_db(&candidate.date_time)?.as_str(),
            candidate.contributor.as_str(),
        ])?;
    }
    let data = writer
        .into_inner()
        .map_err(|e| crate::AppError::Other(e.to_string()))?;
    debug!("Writing {} candidates to {:?}", candidates.len(), output);
    write_file(output, String::from_utf8_lossy(&data).into_owned()).await
}

/// Serialize an object to pretty JSON and write it to disk.
#[tracing::instrument(name = "Writing JSON file", level = "trace", skip(obj))]
pub async fn write_json_output<P: AsRef<Path> + std::fmt::Debug, S: ser::Serialize>(
    output: P,
    obj: &S,
) -> AppResult<()> {
    let data = serde_json::to_string_pretty(obj)?;
    write_file(output, data).await
}

/// Write raw string data to a file, overwriting any existing content.
async fn write_file<P: AsRef<Path> + std::fmt::Debug>(output: P, data: String) -> AppResult<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(output)
        .await?;
    file.write_all(data.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

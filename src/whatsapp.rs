use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::AppResult;
use crate::time_utils::whatsapp_datetime;

/// One parsed WhatsApp message. Continuation lines are already folded in.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WhatsAppMessage {
    #[serde(with = "crate::serde_helpers::offset_datetime")]
    pub date_time: OffsetDateTime,
    pub contributor: String,
    pub text: String,
}

// Header lines look like `08/23/25, 7:21 PM - Marta: text`. `\s` also eats
// the narrow no-break space some exports put before AM/PM.
static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{2}),\s*(\d{1,2}):(\d{2})\s*([AP])M\s*-\s*(.+)$")
        .expect("header pattern is valid")
});

/// Parse a WhatsApp chat export into structured messages.
///
/// A line matching the header pattern starts a new message; any other
/// non-empty line continues the previous one. Lines with dates the calendar
/// rejects are logged and dropped rather than failing the whole export.
pub fn parse_chat(content: &str) -> Vec<WhatsAppMessage> {
    let mut messages: Vec<WhatsAppMessage> = Vec::new();
    let mut current: Option<WhatsAppMessage> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = HEADER.captures(line) {
            let parsed = parse_header(&caps);
            let date_time = match parsed {
                Ok(dt) => dt,
                Err(e) => {
                    warn!("Could not parse message date in '{}': {}", line, e);
                    continue;
                }
            };

            // System notices ("Marta changed the group name") carry no colon.
            let rest = &caps[7];
            let (contributor, text) = match rest.split_once(':') {
                Some((who, what)) => (who.trim().to_string(), what.trim().to_string()),
                None => (rest.trim().to_string(), String::new()),
            };

            if let Some(done) = current.replace(WhatsAppMessage {
                date_time,
                contributor,
                text,
            }) {
                messages.push(done);
            }
        } else if let Some(msg) = current.as_mut() {
            msg.text.push(' ');
            msg.text.push_str(line);
        }
    }

    if let Some(done) = current {
        messages.push(done);
    }

    debug!("Parsed {} WhatsApp messages", messages.len());
    messages
}

fn parse_header(caps: &regex::Captures<'_>) -> AppResult<OffsetDateTime> {
    let month: u8 = caps[1].parse()?;
    let day: u8 = caps[2].parse()?;
    let year2: u8 = caps[3].parse()?;
    let hour12: u8 = caps[4].parse()?;
    let minute: u8 = caps[5].parse()?;
    let pm = &caps[6] == "P";
    whatsapp_datetime(month, day, year2, hour12, minute, pm)
}

/// Keep only messages strictly newer than the corpus cutoff.
pub fn filter_after(
    messages: Vec<WhatsAppMessage>,
    cutoff: Option<OffsetDateTime>,
) -> Vec<WhatsAppMessage> {
    match cutoff {
        Some(cutoff) => {
            let filtered: Vec<WhatsAppMessage> = messages
                .into_iter()
                .filter(|m| m.date_time > cutoff)
                .collect();
            debug!("{} messages newer than {}", filtered.len(), cutoff);
            filtered
        }
        None => messages,
    }
}

#[tracing::instrument(name = "Parsing WhatsApp export", level = "debug")]
pub async fn parse_export<P: AsRef<Path> + std::fmt::Debug>(
    path: P,
) -> AppResult<Vec<WhatsAppMessage>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(parse_chat(&content))
}

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::whatsapp::WhatsAppMessage;

/// Similarity above which two cleaned dichos count as the same saying.
pub const VARIANT_THRESHOLD: f64 = 0.85;

/// Phrases that mark a message as noise rather than a dicho.
static SKIP_MARKERS: &[&str] = &[
    "<media omitted>",
    "changed the group",
    "jajaja",
    "this message was edited",
    "message was deleted",
];

/// Openings and fragments that recur across Costa Rican dichos. A message
/// containing none of these is almost certainly chat commentary.
static DICHO_MARKERS: &[&str] = &[
    "mas ",
    "más ",
    "el que",
    "la que",
    "no hay",
    "por un",
    "a dios",
    "en boca",
    "agua que",
    "perro que",
    "sapo verde",
    "el diablo",
    "feliz como",
    "arrieros",
    "se le metió",
    "se le corrieron",
    "se quedó",
    "no tiene pelos",
    "come santos",
    "quien quita",
    "los lunes",
    "patitas pa",
    "a ojo de buen",
    "luz de la calle",
    "nunca falta un",
    "llovieron",
    "salió",
    "llego por",
];

static STRIP: LazyLock<Regex> = LazyLock::new(|| {
    // Keep letters, digits, whitespace, and basic (including inverted
    // Spanish) punctuation; emoji and decorations go.
    Regex::new(r"[^\w\s.,!?;:()¿¡-]").expect("strip pattern is valid")
});
static MULTI_WS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));
static WS_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([.,!?;:])").expect("punct pattern is valid"));
static DUP_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([.,!?;:])\s*[.,!?;:]").expect("dup punct pattern is valid"));

/// Spelling fixes and canonical spellings applied after stripping.
static CANONICAL_FORMS: &[(&str, &str)] = &[
    ("que que", "que"),
    ("mas vale", "más vale"),
    ("...", ","),
    ("!!", "!"),
    ("??", "?"),
];

/// Normalize a dicho's surface form for storage and comparison.
pub fn clean_dicho_text(text: &str) -> String {
    let mut cleaned = STRIP.replace_all(text, "").into_owned();
    for (variant, canonical) in CANONICAL_FORMS {
        cleaned = cleaned.replace(variant, canonical);
    }
    cleaned = MULTI_WS.replace_all(&cleaned, " ").into_owned();
    cleaned = WS_BEFORE_PUNCT.replace_all(&cleaned, "$1").into_owned();
    cleaned = DUP_PUNCT.replace_all(&cleaned, "$1").into_owned();
    cleaned.trim().to_string()
}

/// Does this message look like an actual dicho rather than commentary?
pub fn is_candidate(text: &str) -> bool {
    let lowered = text.to_lowercase();
    if SKIP_MARKERS.iter().any(|skip| lowered.contains(skip)) {
        return false;
    }
    if text.chars().count() < 10 {
        return false;
    }
    DICHO_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Classic two-row Levenshtein over characters.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Similarity in [0, 1]: 1 minus the normalized edit distance.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Two texts are variants of one saying if they clean to the same string or
/// sit above the similarity threshold.
pub fn is_semantic_variant(a: &str, b: &str) -> bool {
    let clean_a = clean_dicho_text(a).to_lowercase();
    let clean_b = clean_dicho_text(b).to_lowercase();
    if clean_a == clean_b {
        return true;
    }
    similarity_ratio(&clean_a, &clean_b) > VARIANT_THRESHOLD
}

/// A message that survived candidate detection, cleaned for enrichment.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CandidateDicho {
    pub original: String,
    pub cleaned: String,
    #[serde(with = "crate::serde_helpers::offset_datetime")]
    pub date_time: OffsetDateTime,
    pub contributor: String,
}

/// A candidate rejected because the corpus already carries the saying.
#[derive(Debug, Serialize, Clone)]
pub struct DuplicateMatch {
    pub candidate: CandidateDicho,
    pub existing_id: i64,
    pub existing_dicho: String,
    pub similarity: f64,
}

/// Pull candidate dichos out of parsed messages.
pub fn extract_candidates(messages: &[WhatsAppMessage]) -> Vec<CandidateDicho> {
    let candidates: Vec<CandidateDicho> = messages
        .iter()
        .filter(|m| is_candidate(&m.text))
        .map(|m| CandidateDicho {
            original: m.text.clone(),
            cleaned: clean_dicho_text(&m.text),
            date_time: m.date_time,
            contributor: m.contributor.clone(),
        })
        .filter(|c| c.cleaned.chars().count() > 5)
        .collect();
    debug!("{} candidate dichos identified", candidates.len());
    candidates
}

/// Split candidates into unique dichos and duplicates of stored ones.
pub fn split_unique(
    candidates: Vec<CandidateDicho>,
    existing: &[(i64, String)],
) -> (Vec<CandidateDicho>, Vec<DuplicateMatch>) {
    let mut unique = Vec::new();
    let mut duplicates = Vec::new();

    for candidate in candidates {
        let hit = existing
            .iter()
            .find(|(_, text)| is_semantic_variant(&candidate.cleaned, text));
        match hit {
            Some((id, text)) => {
                let similarity = similarity_ratio(
                    &clean_dicho_text(&candidate.cleaned).to_lowercase(),
                    &clean_dicho_text(text).to_lowercase(),
                );
                duplicates.push(DuplicateMatch {
                    candidate,
                    existing_id: *id,
                    existing_dicho: text.clone(),
                    similarity,
                });
            }
            None => unique.push(candidate),
        }
    }

    (unique, duplicates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleaning_strips_emoji_and_collapses_whitespace() {
        let cleaned = clean_dicho_text("Feliz   como una lombriz 😀🎉");
        assert_eq!(cleaned, "Feliz como una lombriz");
    }

    #[test]
    fn cleaning_preserves_spanish_characters() {
        let cleaned = clean_dicho_text("¡Qué agua fiestas! ¿No hay más?");
        assert_eq!(cleaned, "¡Qué agua fiestas! ¿No hay más?");
    }

    #[test]
    fn cleaning_applies_canonical_forms() {
        assert_eq!(
            clean_dicho_text("mas vale toro suelto!!"),
            "más vale toro suelto!"
        );
        assert_eq!(clean_dicho_text("el que que canta"), "el que canta");
    }

    #[test]
    fn cleaning_is_idempotent() {
        let once = clean_dicho_text("El  que madruga ,come pechuga 🐔");
        let twice = clean_dicho_text(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn levenshtein_matches_known_distances() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", "abc"), 0);
    }

    #[test]
    fn ratio_is_one_for_identical_and_zero_for_disjoint() {
        assert!((similarity_ratio("hola", "hola") - 1.0).abs() < 1e-12);
        assert!(similarity_ratio("abcd", "wxyz") < 1e-12);
    }

    #[test]
    fn close_variants_are_detected() {
        assert!(is_semantic_variant(
            "El que se duerme se lo lleva la corriente",
            "El que se duerme se lo lleva la corriente!"
        ));
        assert!(is_semantic_variant(
            "No hay peor sordo que el que no quiere oír",
            "No hay peor sordo que el que no quiere oir"
        ));
        assert!(!is_semantic_variant(
            "Feliz como una lombriz",
            "En boca cerrada no entran moscas"
        ));
    }

    #[test]
    fn candidate_detection_filters_noise() {
        assert!(is_candidate("El que madruga come pechuga"));
        assert!(!is_candidate("<Media omitted>"));
        assert!(!is_candidate("jajajaja el que madruga"));
        assert!(!is_candidate("corto"));
        assert!(!is_candidate("Nos vemos mañana a las ocho en el parque"));
    }

    #[test]
    fn split_unique_flags_near_matches() {
        let candidate = CandidateDicho {
            original: "El que canta su mal espanta!".to_string(),
            cleaned: clean_dicho_text("El que canta su mal espanta!"),
            date_time: crate::time_utils::parse_db("2025-08-24 10:00:00").unwrap(),
            contributor: "Luis".to_string(),
        };
        let fresh = CandidateDicho {
            original: "Los lunes, ni las gallinas ponen".to_string(),
            cleaned: clean_dicho_text("Los lunes, ni las gallinas ponen"),
            ..candidate.clone()
        };
        let existing = vec![(7_i64, "El que canta su mal espanta".to_string())];

        let (unique, duplicates) = split_unique(vec![candidate, fresh], &existing);
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].original, "Los lunes, ni las gallinas ponen");
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].existing_id, 7);
        assert!(duplicates[0].similarity > VARIANT_THRESHOLD);
    }
}

pub(super) mod assigner;
#[cfg(feature = "local-ml")]
pub(super) mod bert;
pub(super) mod convert;
pub(super) mod linalg;
pub(super) mod openai;
pub mod traits;

use sqlx::SqlitePool;
use tracing::{debug, info_span, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::style::ProgressStyle;

use crate::cluster::assigner::{AssignerConfig, rank_clusters};
use crate::cluster::traits::Embedder;
use crate::store;
use crate::{AppError, AppResult};

/// Text embedded for a dicho or a cluster: its keyword set joined into one
/// string, so the sentence encoder sees the meaning rather than the (often
/// idiomatic, untranslatable) surface form.
pub fn semantic_text(keywords: &[String]) -> String {
    keywords.join(" ")
}

/// Outcome of a batch assignment run. One bad dicho never aborts the batch;
/// it lands in `skipped` with the reason.
#[derive(Debug, Default)]
pub struct AssignReport {
    pub processed: usize,
    pub skipped: Vec<(i64, String)>,
}

/// Recompute cluster assignments for the whole corpus, or for one dicho.
///
/// Cluster representatives are embedded once per run; each dicho's prior
/// assignment rows are replaced wholesale inside a transaction, so re-running
/// over unchanged inputs reproduces the stored assignments exactly.
#[tracing::instrument(name = "Assigning dichos to clusters", level = "info", skip(embedder, pool))]
pub async fn assign_corpus(
    embedder: &dyn Embedder,
    pool: &SqlitePool,
    config: &AssignerConfig,
    only_dicho: Option<i64>,
) -> AppResult<AssignReport> {
    config.validate()?;

    let clusters = store::load_clusters(pool).await?;
    if clusters.is_empty() {
        return Err(AppError::InvalidConfiguration(
            "no clusters defined; load cluster definitions first".to_string(),
        ));
    }

    let cluster_texts: Vec<String> = clusters
        .iter()
        .map(|c| semantic_text(&c.representative_keywords))
        .collect();
    let cluster_embs = embedder.embed(&cluster_texts).await?;
    if cluster_embs.len() != clusters.len() {
        return Err(AppError::EmbeddingProvider(format!(
            "expected {} cluster embeddings, got {}",
            clusters.len(),
            cluster_embs.len()
        )));
    }
    let cluster_embeddings: Vec<(i64, ndarray::Array1<f64>)> = clusters
        .iter()
        .zip(cluster_embs.iter())
        .map(|(c, emb)| (c.id, convert::embedding_to_ndarray(emb)))
        .collect();
    debug!("Embedded {} cluster representatives", cluster_embeddings.len());

    let dichos = match only_dicho {
        Some(id) => vec![store::dicho_by_id(pool, id).await?],
        None => store::all_dichos(pool).await?,
    };

    let dicho_texts: Vec<String> = dichos
        .iter()
        .map(|d| semantic_text(&d.semantic_keywords))
        .collect();
    let dicho_embs = embedder.embed(&dicho_texts).await?;
    if dicho_embs.len() != dichos.len() {
        return Err(AppError::EmbeddingProvider(format!(
            "expected {} dicho embeddings, got {}",
            dichos.len(),
            dicho_embs.len()
        )));
    }

    let header_span = info_span!("Assigning dichos");
    header_span.pb_set_message("Assigning...");
    header_span.pb_set_finish_message("Assignment complete");
    header_span.pb_set_length(dichos.len() as u64);
    header_span.pb_set_style(
        &ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap(),
    );
    let header_span_enter = header_span.enter();

    let mut report = AssignReport::default();
    for (dicho, emb) in dichos.iter().zip(dicho_embs.iter()) {
        let item = convert::embedding_to_ndarray(emb);
        let outcome = match rank_clusters(item.view(), &cluster_embeddings, config) {
            Ok(assignments) => store::replace_assignments(pool, dicho.id, &assignments).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => report.processed += 1,
            Err(e) => {
                warn!("Skipping dicho {} ({}): {}", dicho.id, dicho.dicho, e);
                report.skipped.push((dicho.id, e.to_string()));
            }
        }
        header_span.pb_inc(1);
    }

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    Ok(report)
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use futures::future::BoxFuture;

    use super::*;
    use crate::enrich::EnrichedDicho;
    use crate::store::ClusterDef;

    /// Deterministic stand-in for the sentence encoder: each known text maps
    /// to a fixed unit vector.
    struct StubEmbedder;

    impl Embedder for StubEmbedder {
        fn embed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, AppResult<Vec<Vec<f32>>>> {
            async move {
                texts
                    .iter()
                    .map(|t| match t.as_str() {
                        "work effort" => Ok(vec![1.0, 0.0, 0.0]),
                        "humor irony" => Ok(vec![0.0, 1.0, 0.0]),
                        "nature animals" => Ok(vec![0.0, 0.0, 1.0]),
                        // Mostly work, a strong humor component.
                        "effort humor" => Ok(vec![0.8, 0.6, 0.0]),
                        other => Err(AppError::EmbeddingProvider(format!(
                            "unexpected text: {other}"
                        ))),
                    })
                    .collect()
            }
            .boxed()
        }
    }

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    async fn seeded_pool() -> SqlitePool {
        let pool = store::connect_memory().await.unwrap();
        for (id, name, kws) in [
            (1_i64, "Work and Productivity", &["work", "effort"][..]),
            (2, "Humor and Irony", &["humor", "irony"]),
            (3, "Nature", &["nature", "animals"]),
        ] {
            store::upsert_cluster(
                &pool,
                &ClusterDef {
                    id,
                    name: name.to_string(),
                    description: format!("{name} dichos"),
                    icon: "✨".to_string(),
                    representative_keywords: kws.iter().map(|w| w.to_string()).collect(),
                },
            )
            .await
            .unwrap();
        }
        let dicho = EnrichedDicho {
            dicho: "El que madruga come pechuga".to_string(),
            translation: "He who rises early eats chicken breast".to_string(),
            expanded_context_usage: "Said to praise early effort.".to_string(),
            semantic_keywords: keywords(&["effort", "humor"]),
            cultural_context: "Rural work ethic".to_string(),
            emotion_tone: "Playful".to_string(),
            difficulty_level: 2,
            learning_notes: None,
            date_time: crate::time_utils::parse_db("2025-08-23 19:21:00").unwrap(),
            contributor_first: Some("Marta".to_string()),
        };
        store::insert_dicho(&pool, &dicho).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn assigns_and_persists_ranked_clusters() {
        let pool = seeded_pool().await;
        let report = assign_corpus(&StubEmbedder, &pool, &AssignerConfig::default(), None)
            .await
            .unwrap();
        assert_eq!(report.processed, 1);
        assert!(report.skipped.is_empty());

        let rows = store::assignments_for(&pool, 1).await.unwrap();
        // cos(work) = 0.8, cos(humor) = 0.6, cos(nature) = 0.0. The humor
        // cluster clears the 0.35 absolute threshold; nature clears nothing.
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].cluster_id, rows[0].rank), (1, 1));
        assert_eq!((rows[1].cluster_id, rows[1].rank), (2, 2));
        assert!(rows[0].similarity_score >= rows[1].similarity_score);
    }

    #[tokio::test]
    async fn reprocessing_replaces_rather_than_appends() {
        let pool = seeded_pool().await;
        let cfg = AssignerConfig::default();
        assign_corpus(&StubEmbedder, &pool, &cfg, None).await.unwrap();
        let first = store::assignments_for(&pool, 1).await.unwrap();

        assign_corpus(&StubEmbedder, &pool, &cfg, Some(1)).await.unwrap();
        let second = store::assignments_for(&pool, 1).await.unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!((a.cluster_id, a.rank), (b.cluster_id, b.rank));
            assert_eq!(a.similarity_score, b.similarity_score);
        }
    }

    #[tokio::test]
    async fn missing_clusters_fail_fast() {
        let pool = store::connect_memory().await.unwrap();
        let err = assign_corpus(&StubEmbedder, &pool, &AssignerConfig::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidConfiguration(_)));
    }
}

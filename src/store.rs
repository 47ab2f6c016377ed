use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use time::OffsetDateTime;
use tracing::{debug, trace};

use crate::cluster::assigner::RankedAssignment;
use crate::enrich::EnrichedDicho;
use crate::time_utils::{format_db, parse_db};
use crate::AppResult;

/// One proverb with its enrichment fields, as stored.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Dicho {
    pub id: i64,
    pub dicho: String,
    pub translation: String,
    pub expanded_context_usage: String,
    pub semantic_keywords: Vec<String>,
    pub cultural_context: String,
    pub emotion_tone: String,
    pub difficulty_level: i64,
    pub learning_notes: Option<String>,
    #[serde(with = "crate::serde_helpers::offset_datetime")]
    pub date_time: OffsetDateTime,
    pub contributor_first: Option<String>,
}

/// A semantic category. Human-authored and effectively permanent; only the
/// keyword set grows when new dichos introduce novel concepts.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterDef {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub icon: String,
    #[serde(rename = "keywords")]
    pub representative_keywords: Vec<String>,
}

/// One stored cluster membership row.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AssignmentRow {
    pub dicho_id: i64,
    pub cluster_id: i64,
    pub rank: i64,
    pub similarity_score: f64,
}

#[derive(Debug, Serialize, Clone)]
pub struct SearchHit {
    pub dicho: String,
    pub translation: String,
    pub difficulty_level: i64,
    pub cultural_context: String,
}

/// Which columns a text search runs over.
#[derive(Debug, Clone, Copy)]
pub enum SearchLanguage {
    Spanish,
    English,
    Both,
}

#[derive(Debug, Serialize, Clone)]
pub struct ClusterMember {
    pub dicho_id: i64,
    pub dicho: String,
    pub rank: i64,
    pub similarity_score: f64,
}

#[derive(Debug, Serialize, Clone)]
pub struct OverlapPair {
    pub cluster_a: String,
    pub cluster_b: String,
    pub shared_dichos: i64,
}

#[derive(Debug, Serialize, Clone)]
pub struct RankStats {
    pub rank: i64,
    pub count: i64,
    pub mean_score: f64,
    pub min_score: f64,
    pub max_score: f64,
}

#[derive(Debug, Serialize, Clone)]
pub struct DifficultyBucket {
    pub difficulty_level: i64,
    pub count: i64,
}

#[tracing::instrument(level = "trace")]
fn resolve_db_path(explicit: Option<PathBuf>) -> AppResult<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Ok(env_path) = env::var("DICHOTECA_DB_PATH") {
        return Ok(PathBuf::from(env_path));
    }
    if let Ok(curpath) = env::current_dir()
        && curpath.join("dichoteca.db").is_file()
    {
        return Ok(curpath.join("dichoteca.db"));
    }
    Ok(dichoteca_dirs::DirType::Data
        .ensure_dir()?
        .join("dichoteca.db"))
}

/// Open (creating if needed) the corpus database and ensure its schema.
#[tracing::instrument(level = "debug")]
pub async fn connect(db_path: Option<PathBuf>) -> AppResult<SqlitePool> {
    let path = resolve_db_path(db_path)?;
    trace!("Connecting to corpus database at {}", path.display());
    let pool = connect_to_file(&path).await?;
    init_schema(&pool).await?;
    Ok(pool)
}

async fn connect_to_file<P: AsRef<Path>>(path: P) -> AppResult<SqlitePool> {
    let opts = SqliteConnectOptions::new()
        .filename(path.as_ref())
        .create_if_missing(true)
        .foreign_keys(true);
    Ok(SqlitePoolOptions::new().connect_with(opts).await?)
}

/// In-memory database with the full schema. A single connection keeps every
/// query on the same in-memory instance.
#[cfg(test)]
pub async fn connect_memory() -> AppResult<SqlitePool> {
    let opts = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

async fn init_schema(pool: &SqlitePool) -> AppResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS dichos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dicho TEXT NOT NULL UNIQUE,
            translation TEXT NOT NULL,
            expanded_context_usage TEXT NOT NULL,
            semantic_keywords TEXT NOT NULL,
            cultural_context TEXT NOT NULL,
            emotion_tone TEXT NOT NULL,
            difficulty_level INTEGER NOT NULL CHECK (difficulty_level BETWEEN 1 AND 5),
            learning_notes TEXT,
            date_time TEXT NOT NULL,
            contributor_first TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS clusters (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL,
            icon TEXT NOT NULL,
            representative_keywords TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS cluster_assignments (
            dicho_id INTEGER NOT NULL REFERENCES dichos (id),
            cluster_id INTEGER NOT NULL REFERENCES clusters (id),
            rank INTEGER NOT NULL CHECK (rank BETWEEN 1 AND 3),
            similarity_score REAL NOT NULL CHECK (similarity_score BETWEEN -1.0 AND 1.0),
            created_at TEXT NOT NULL,
            PRIMARY KEY (dicho_id, cluster_id),
            UNIQUE (dicho_id, rank)
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_assignments_cluster
            ON cluster_assignments (cluster_id)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Timestamp of the newest stored dicho, the cutoff for incremental ingestion.
pub async fn max_date_time(pool: &SqlitePool) -> AppResult<Option<OffsetDateTime>> {
    let raw: Option<String> = sqlx::query_scalar("SELECT MAX(date_time) FROM dichos")
        .fetch_one(pool)
        .await?;
    raw.map(|s| parse_db(&s)).transpose()
}

/// All stored source texts, for duplicate checking during ingestion.
pub async fn existing_dicho_texts(pool: &SqlitePool) -> AppResult<Vec<(i64, String)>> {
    let rows = sqlx::query("SELECT id, dicho FROM dichos ORDER BY id")
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|row| Ok((row.try_get("id")?, row.try_get("dicho")?)))
        .collect()
}

pub async fn insert_dicho(pool: &SqlitePool, dicho: &EnrichedDicho) -> AppResult<i64> {
    let now = format_db(&OffsetDateTime::now_utc())?;
    let result = sqlx::query(
        "INSERT INTO dichos (
            dicho, translation, expanded_context_usage, semantic_keywords,
            cultural_context, emotion_tone, difficulty_level, learning_notes,
            date_time, contributor_first, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&dicho.dicho)
    .bind(&dicho.translation)
    .bind(&dicho.expanded_context_usage)
    .bind(serde_json::to_string(&dicho.semantic_keywords)?)
    .bind(&dicho.cultural_context)
    .bind(&dicho.emotion_tone)
    .bind(dicho.difficulty_level as i64)
    .bind(dicho.learning_notes.as_deref())
    .bind(format_db(&dicho.date_time)?)
    .bind(dicho.contributor_first.as_deref())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

fn dicho_from_row(row: &SqliteRow) -> AppResult<Dicho> {
    let keywords_raw: String = row.try_get("semantic_keywords")?;
    let date_raw: String = row.try_get("date_time")?;
    Ok(Dicho {
        id: row.try_get("id")?,
        dicho: row.try_get("dicho")?,
        translation: row.try_get("translation")?,
        expanded_context_usage: row.try_get("expanded_context_usage")?,
        semantic_keywords: serde_json::from_str(&keywords_raw)?,
        cultural_context: row.try_get("cultural_context")?,
        emotion_tone: row.try_get("emotion_tone")?,
        difficulty_level: row.try_get("difficulty_level")?,
        learning_notes: row.try_get("learning_notes")?,
        date_time: parse_db(&date_raw)?,
        contributor_first: row.try_get("contributor_first")?,
    })
}

pub async fn all_dichos(pool: &SqlitePool) -> AppResult<Vec<Dicho>> {
    let rows = sqlx::query("SELECT * FROM dichos ORDER BY id")
        .fetch_all(pool)
        .await?;
    debug!("Fetched {} dichos", rows.len());
    rows.iter().map(dicho_from_row).collect()
}

pub async fn dicho_by_id(pool: &SqlitePool, id: i64) -> AppResult<Dicho> {
    let row = sqlx::query("SELECT * FROM dichos WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    dicho_from_row(&row)
}

fn cluster_from_row(row: &SqliteRow) -> AppResult<ClusterDef> {
    let keywords_raw: String = row.try_get("representative_keywords")?;
    Ok(ClusterDef {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        icon: row.try_get("icon")?,
        representative_keywords: serde_json::from_str(&keywords_raw)?,
    })
}

pub async fn load_clusters(pool: &SqlitePool) -> AppResult<Vec<ClusterDef>> {
    let rows = sqlx::query("SELECT * FROM clusters ORDER BY id")
        .fetch_all(pool)
        .await?;
    rows.iter().map(cluster_from_row).collect()
}

pub async fn upsert_cluster(pool: &SqlitePool, def: &ClusterDef) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO clusters (id, name, description, icon, representative_keywords)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            icon = excluded.icon,
            representative_keywords = excluded.representative_keywords",
    )
    .bind(def.id)
    .bind(&def.name)
    .bind(&def.description)
    .bind(&def.icon)
    .bind(serde_json::to_string(&def.representative_keywords)?)
    .execute(pool)
    .await?;
    Ok(())
}

/// Grow a cluster's keyword set, ignoring keywords it already carries.
pub async fn extend_cluster_keywords(
    pool: &SqlitePool,
    cluster_id: i64,
    keywords: &[String],
) -> AppResult<ClusterDef> {
    let row = sqlx::query("SELECT * FROM clusters WHERE id = ?")
        .bind(cluster_id)
        .fetch_one(pool)
        .await?;
    let mut def = cluster_from_row(&row)?;
    for keyword in keywords {
        if !def.representative_keywords.contains(keyword) {
            def.representative_keywords.push(keyword.clone());
        }
    }
    sqlx::query("UPDATE clusters SET representative_keywords = ? WHERE id = ?")
        .bind(serde_json::to_string(&def.representative_keywords)?)
        .bind(cluster_id)
        .execute(pool)
        .await?;
    Ok(def)
}

/// Replace a dicho's assignment rows wholesale. Delete-then-insert inside one
/// transaction keeps reprocessing idempotent and never leaves stale ranks.
pub async fn replace_assignments(
    pool: &SqlitePool,
    dicho_id: i64,
    assignments: &[RankedAssignment],
) -> AppResult<()> {
    let now = format_db(&OffsetDateTime::now_utc())?;
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM cluster_assignments WHERE dicho_id = ?")
        .bind(dicho_id)
        .execute(&mut *tx)
        .await?;
    for assignment in assignments {
        sqlx::query(
            "INSERT INTO cluster_assignments
                (dicho_id, cluster_id, rank, similarity_score, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(dicho_id)
        .bind(assignment.cluster_id)
        .bind(assignment.rank as i64)
        .bind(assignment.score)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn assignments_for(pool: &SqlitePool, dicho_id: i64) -> AppResult<Vec<AssignmentRow>> {
    let rows = sqlx::query(
        "SELECT dicho_id, cluster_id, rank, similarity_score
         FROM cluster_assignments WHERE dicho_id = ? ORDER BY rank",
    )
    .bind(dicho_id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(AssignmentRow {
                dicho_id: row.try_get("dicho_id")?,
                cluster_id: row.try_get("cluster_id")?,
                rank: row.try_get("rank")?,
                similarity_score: row.try_get("similarity_score")?,
            })
        })
        .collect()
}

pub async fn search_dichos(
    pool: &SqlitePool,
    query: &str,
    language: SearchLanguage,
    limit: u32,
) -> AppResult<Vec<SearchHit>> {
    let pattern = format!("%{}%", query);
    let sql = match language {
        SearchLanguage::Spanish => {
            "SELECT dicho, translation, difficulty_level, cultural_context
             FROM dichos
             WHERE dicho LIKE ?1 OR expanded_context_usage LIKE ?1
             ORDER BY difficulty_level LIMIT ?2"
        }
        SearchLanguage::English => {
            "SELECT dicho, translation, difficulty_level, cultural_context
             FROM dichos
             WHERE translation LIKE ?1
             ORDER BY difficulty_level LIMIT ?2"
        }
        SearchLanguage::Both => {
            "SELECT dicho, translation, difficulty_level, cultural_context
             FROM dichos
             WHERE dicho LIKE ?1 OR translation LIKE ?1 OR expanded_context_usage LIKE ?1
             ORDER BY difficulty_level LIMIT ?2"
        }
    };
    let rows = sqlx::query(sql)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    rows.iter()
        .map(|row| {
            Ok(SearchHit {
                dicho: row.try_get("dicho")?,
                translation: row.try_get("translation")?,
                difficulty_level: row.try_get("difficulty_level")?,
                cultural_context: row.try_get("cultural_context")?,
            })
        })
        .collect()
}

/// Membership of one cluster, strongest ranks first.
pub async fn cluster_members(pool: &SqlitePool, cluster_id: i64) -> AppResult<Vec<ClusterMember>> {
    let rows = sqlx::query(
        "SELECT d.id AS dicho_id, d.dicho, a.rank, a.similarity_score
         FROM cluster_assignments a
         JOIN dichos d ON d.id = a.dicho_id
         WHERE a.cluster_id = ?
         ORDER BY a.rank, a.similarity_score DESC",
    )
    .bind(cluster_id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(ClusterMember {
                dicho_id: row.try_get("dicho_id")?,
                dicho: row.try_get("dicho")?,
                rank: row.try_get("rank")?,
                similarity_score: row.try_get("similarity_score")?,
            })
        })
        .collect()
}

/// Pairs of clusters sharing dichos, most-overlapping first.
pub async fn cluster_overlap(pool: &SqlitePool) -> AppResult<Vec<OverlapPair>> {
    let rows = sqlx::query(
        "SELECT ca.name AS cluster_a, cb.name AS cluster_b, COUNT(*) AS shared_dichos
         FROM cluster_assignments a
         JOIN cluster_assignments b
            ON a.dicho_id = b.dicho_id AND a.cluster_id < b.cluster_id
         JOIN clusters ca ON ca.id = a.cluster_id
         JOIN clusters cb ON cb.id = b.cluster_id
         GROUP BY a.cluster_id, b.cluster_id
         ORDER BY shared_dichos DESC, cluster_a, cluster_b",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(OverlapPair {
                cluster_a: row.try_get("cluster_a")?,
                cluster_b: row.try_get("cluster_b")?,
                shared_dichos: row.try_get("shared_dichos")?,
            })
        })
        .collect()
}

/// Per-rank similarity score statistics over the whole corpus.
pub async fn rank_statistics(pool: &SqlitePool) -> AppResult<Vec<RankStats>> {
    let rows = sqlx::query(
        "SELECT rank, COUNT(*) AS count, AVG(similarity_score) AS mean_score,
                MIN(similarity_score) AS min_score, MAX(similarity_score) AS max_score
         FROM cluster_assignments
         GROUP BY rank
         ORDER BY rank",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(RankStats {
                rank: row.try_get("rank")?,
                count: row.try_get("count")?,
                mean_score: row.try_get("mean_score")?,
                min_score: row.try_get("min_score")?,
                max_score: row.try_get("max_score")?,
            })
        })
        .collect()
}

pub async fn difficulty_distribution(pool: &SqlitePool) -> AppResult<Vec<DifficultyBucket>> {
    let rows = sqlx::query(
        "SELECT difficulty_level, COUNT(*) AS count
         FROM dichos
         GROUP BY difficulty_level
         ORDER BY difficulty_level",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(DifficultyBucket {
                difficulty_level: row.try_get("difficulty_level")?,
                count: row.try_get("count")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::assigner::RankedAssignment;
    use crate::time_utils::parse_db;

    fn sample_dicho(text: &str, difficulty: u8) -> EnrichedDicho {
        EnrichedDicho {
            dicho: text.to_string(),
            translation: format!("{text} (translated)"),
            expanded_context_usage: "Used among friends.".to_string(),
            semantic_keywords: vec!["wisdom".to_string(), "patience".to_string()],
            cultural_context: "Rural".to_string(),
            emotion_tone: "Warm".to_string(),
            difficulty_level: difficulty,
            learning_notes: None,
            date_time: parse_db("2025-08-23 19:21:00").unwrap(),
            contributor_first: Some("Ana".to_string()),
        }
    }

    fn sample_cluster(id: i64, name: &str) -> ClusterDef {
        ClusterDef {
            id,
            name: name.to_string(),
            description: format!("{name} dichos"),
            icon: "🌿".to_string(),
            representative_keywords: vec!["wisdom".to_string()],
        }
    }

    #[tokio::test]
    async fn empty_corpus_has_no_cutoff() {
        let pool = connect_memory().await.unwrap();
        assert!(max_date_time(&pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_then_fetch_roundtrips() {
        let pool = connect_memory().await.unwrap();
        let id = insert_dicho(&pool, &sample_dicho("A quien madruga, Dios le ayuda", 2))
            .await
            .unwrap();
        let stored = dicho_by_id(&pool, id).await.unwrap();
        assert_eq!(stored.dicho, "A quien madruga, Dios le ayuda");
        assert_eq!(stored.semantic_keywords, vec!["wisdom", "patience"]);
        assert_eq!(
            max_date_time(&pool).await.unwrap().unwrap(),
            parse_db("2025-08-23 19:21:00").unwrap()
        );
    }

    #[tokio::test]
    async fn duplicate_source_text_is_rejected() {
        let pool = connect_memory().await.unwrap();
        insert_dicho(&pool, &sample_dicho("En boca cerrada no entran moscas", 1))
            .await
            .unwrap();
        let err = insert_dicho(&pool, &sample_dicho("En boca cerrada no entran moscas", 1)).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn difficulty_outside_ordinal_range_is_rejected() {
        let pool = connect_memory().await.unwrap();
        let err = insert_dicho(&pool, &sample_dicho("Sapo verde serás tú", 6)).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn reassignment_replaces_prior_rows() {
        let pool = connect_memory().await.unwrap();
        let dicho_id = insert_dicho(&pool, &sample_dicho("Feliz como una lombriz", 1))
            .await
            .unwrap();
        for id in 1..=3 {
            upsert_cluster(&pool, &sample_cluster(id, &format!("Cluster {id}")))
                .await
                .unwrap();
        }

        let first = vec![
            RankedAssignment {
                cluster_id: 1,
                rank: 1,
                score: 0.8,
            },
            RankedAssignment {
                cluster_id: 2,
                rank: 2,
                score: 0.5,
            },
        ];
        replace_assignments(&pool, dicho_id, &first).await.unwrap();

        let second = vec![RankedAssignment {
            cluster_id: 3,
            rank: 1,
            score: 0.9,
        }];
        replace_assignments(&pool, dicho_id, &second).await.unwrap();

        let rows = assignments_for(&pool, dicho_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cluster_id, 3);
        assert_eq!(rows[0].rank, 1);
    }

    #[tokio::test]
    async fn search_by_translation_only_matches_english() {
        let pool = connect_memory().await.unwrap();
        insert_dicho(&pool, &sample_dicho("El que canta su mal espanta", 2))
            .await
            .unwrap();

        let english = search_dichos(&pool, "translated", SearchLanguage::English, 10)
            .await
            .unwrap();
        assert_eq!(english.len(), 1);

        let spanish = search_dichos(&pool, "translated", SearchLanguage::Spanish, 10)
            .await
            .unwrap();
        assert!(spanish.is_empty());
    }

    #[tokio::test]
    async fn rank_statistics_group_by_rank() {
        let pool = connect_memory().await.unwrap();
        upsert_cluster(&pool, &sample_cluster(1, "Wisdom")).await.unwrap();
        upsert_cluster(&pool, &sample_cluster(2, "Humor")).await.unwrap();
        for (text, scores) in [
            ("Dicho uno", vec![(1_i64, 0.9), (2, 0.4)]),
            ("Dicho dos", vec![(2, 0.7)]),
        ] {
            let id = insert_dicho(&pool, &sample_dicho(text, 3)).await.unwrap();
            let assignments: Vec<RankedAssignment> = scores
                .iter()
                .enumerate()
                .map(|(i, &(cluster_id, score))| RankedAssignment {
                    cluster_id,
                    rank: (i + 1) as u8,
                    score,
                })
                .collect();
            replace_assignments(&pool, id, &assignments).await.unwrap();
        }

        let stats = rank_statistics(&pool).await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!((stats[0].rank, stats[0].count), (1, 2));
        assert_eq!((stats[1].rank, stats[1].count), (2, 1));
        assert!((stats[0].mean_score - 0.8).abs() < 1e-9);

        let overlap = cluster_overlap(&pool).await.unwrap();
        assert_eq!(overlap.len(), 1);
        assert_eq!(overlap[0].shared_dichos, 1);
    }

    #[tokio::test]
    async fn extending_keywords_skips_duplicates() {
        let pool = connect_memory().await.unwrap();
        upsert_cluster(&pool, &sample_cluster(1, "Wisdom")).await.unwrap();
        let updated = extend_cluster_keywords(
            &pool,
            1,
            &["wisdom".to_string(), "prudence".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(updated.representative_keywords, vec!["wisdom", "prudence"]);
    }
}

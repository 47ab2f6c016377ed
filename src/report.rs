use tracing_indicatif::indicatif_println;

use crate::cluster::AssignReport;
use crate::dedup::{CandidateDicho, DuplicateMatch};
use crate::store::{
    AssignmentRow, ClusterDef, ClusterMember, Dicho, DifficultyBucket, OverlapPair, RankStats,
    SearchHit,
};

pub fn print_search_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        indicatif_println!("No dichos matched.");
        return;
    }
    for hit in hits {
        indicatif_println!(
            "[{}] {}\n    {}\n    {}",
            hit.difficulty_level,
            hit.dicho,
            hit.translation,
            hit.cultural_context
        );
    }
}

pub fn print_clusters(clusters: &[ClusterDef]) {
    if clusters.is_empty() {
        indicatif_println!("No clusters defined.");
        return;
    }
    for cluster in clusters {
        indicatif_println!(
            "{:3} {} {} — {}\n    keywords: {}",
            cluster.id,
            cluster.icon,
            cluster.name,
            cluster.description,
            cluster.representative_keywords.join(", ")
        );
    }
}

pub fn print_members(cluster: &ClusterDef, members: &[ClusterMember]) {
    indicatif_println!(
        "{} {} — {} member(s)",
        cluster.icon,
        cluster.name,
        members.len()
    );
    for member in members {
        indicatif_println!(
            "  rank {} ({:.4})  #{} {}",
            member.rank,
            member.similarity_score,
            member.dicho_id,
            member.dicho
        );
    }
}

pub fn print_overlap(pairs: &[OverlapPair]) {
    if pairs.is_empty() {
        indicatif_println!("No clusters share any dichos.");
        return;
    }
    for pair in pairs {
        indicatif_println!(
            "{:3} shared  {} <-> {}",
            pair.shared_dichos,
            pair.cluster_a,
            pair.cluster_b
        );
    }
}

pub fn print_rank_stats(stats: &[RankStats]) {
    if stats.is_empty() {
        indicatif_println!("No assignments stored yet.");
        return;
    }
    indicatif_println!("rank  count   mean     min      max");
    for s in stats {
        indicatif_println!(
            "{:4}  {:5}  {:.4}   {:.4}   {:.4}",
            s.rank,
            s.count,
            s.mean_score,
            s.min_score,
            s.max_score
        );
    }
}

pub fn print_difficulty(buckets: &[DifficultyBucket]) {
    if buckets.is_empty() {
        indicatif_println!("The corpus is empty.");
        return;
    }
    for bucket in buckets {
        indicatif_println!(
            "difficulty {}: {} dicho(s)",
            bucket.difficulty_level,
            bucket.count
        );
    }
}

pub fn print_dicho(dicho: &Dicho, assignments: &[AssignmentRow], clusters: &[ClusterDef]) {
    indicatif_println!("#{} {}", dicho.id, dicho.dicho);
    indicatif_println!("  translation: {}", dicho.translation);
    indicatif_println!("  usage: {}", dicho.expanded_context_usage);
    indicatif_println!("  keywords: {}", dicho.semantic_keywords.join(", "));
    indicatif_println!(
        "  context: {} | tone: {} | difficulty: {}",
        dicho.cultural_context,
        dicho.emotion_tone,
        dicho.difficulty_level
    );
    if let Some(notes) = &dicho.learning_notes {
        indicatif_println!("  notes: {}", notes);
    }
    if assignments.is_empty() {
        indicatif_println!("  no cluster assignments yet; run `assign`");
        return;
    }
    for row in assignments {
        let label = clusters
            .iter()
            .find(|c| c.id == row.cluster_id)
            .map(|c| format!("{} {}", c.icon, c.name))
            .unwrap_or_else(|| format!("cluster {}", row.cluster_id));
        indicatif_println!(
            "  rank {} ({:.4})  {}",
            row.rank,
            row.similarity_score,
            label
        );
    }
}

pub fn print_assign_report(report: &AssignReport) {
    indicatif_println!("Assigned clusters for {} dicho(s)", report.processed);
    for (id, reason) in &report.skipped {
        indicatif_println!("  skipped dicho {}: {}", id, reason);
    }
}

pub fn print_ingest_summary(unique: &[CandidateDicho], duplicates: &[DuplicateMatch]) {
    indicatif_println!(
        "{} unique candidate(s), {} duplicate(s)",
        unique.len(),
        duplicates.len()
    );
    for dup in duplicates {
        indicatif_println!(
            "  duplicate of #{} ({:.2}): {}",
            dup.existing_id,
            dup.similarity,
            dup.candidate.cleaned
        );
    }
}

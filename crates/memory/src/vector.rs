//! Similarity scoring shared by every memory backend.
//!
//! - Cosine similarity between embeddings
//! - Substring heuristic when the query carries no embedding

use rago_core::memory::{Memory, MemoryQuery, ScoredMemory};

/// Score for a substring hit at the start of the content.
pub const PREFIX_SCORE: f32 = 0.8;
/// Score for a substring hit anywhere else.
pub const SUBSTRING_SCORE: f32 = 0.5;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Case-insensitive substring score, `None` on no match.
pub fn substring_score(content: &str, needle: &str) -> Option<f32> {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    let content = content.trim_start().to_lowercase();
    if content.starts_with(&needle) {
        Some(PREFIX_SCORE)
    } else if content.contains(&needle) {
        Some(SUBSTRING_SCORE)
    } else {
        None
    }
}

/// Score one memory against a query. Memories without an embedding never
/// match an embedded query.
pub fn score(memory: &Memory, query: &MemoryQuery) -> Option<f32> {
    match &query.embedding {
        Some(embedding) => memory
            .embedding
            .as_deref()
            .map(|e| cosine_similarity(e, embedding)),
        None => substring_score(&memory.content, &query.text),
    }
}

/// Rank `memories` for `query`: scope filter, threshold, best first, capped.
pub fn rank(memories: impl IntoIterator<Item = Memory>, query: &MemoryQuery) -> Vec<ScoredMemory> {
    let mut scored: Vec<ScoredMemory> = memories
        .into_iter()
        .filter(|m| query.scope.matches(m))
        .filter_map(|memory| {
            let score = score(&memory, query)?;
            (score >= query.min_score).then_some(ScoredMemory { memory, score })
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(query.limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use rago_core::memory::{MemoryScope, MemoryType};

    #[test]
    fn identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn mismatched_or_zero_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn substring_prefix_beats_infix() {
        assert_eq!(substring_score("Alice likes tea", "alice"), Some(PREFIX_SCORE));
        assert_eq!(substring_score("User is Alice", "ALICE"), Some(SUBSTRING_SCORE));
        assert_eq!(substring_score("User is Bob", "alice"), None);
        assert_eq!(substring_score("anything", "  "), None);
    }

    #[test]
    fn rank_orders_filters_and_caps() {
        let near = Memory::new(MemoryType::Fact, "near").with_embedding(vec![1.0, 0.1]);
        let far = Memory::new(MemoryType::Fact, "far").with_embedding(vec![0.1, 1.0]);
        let opposite = Memory::new(MemoryType::Fact, "opposite").with_embedding(vec![-1.0, 0.0]);
        let bare = Memory::new(MemoryType::Fact, "no embedding");
        let scoped = Memory::new(MemoryType::Fact, "session").with_embedding(vec![1.0, 0.0]).with_session("s1");

        let query = MemoryQuery::text("q")
            .with_embedding(Some(vec![1.0, 0.0]))
            .with_scope(MemoryScope::Global)
            .with_min_score(0.01)
            .with_limit(5);
        let ranked = rank(vec![far, opposite, bare, near, scoped], &query);

        let contents: Vec<&str> = ranked.iter().map(|s| s.memory.content.as_str()).collect();
        assert_eq!(contents, ["near", "far"]);
        assert!(ranked[0].score > ranked[1].score);

        let capped = rank(ranked.into_iter().map(|s| s.memory), &query.clone().with_limit(1));
        assert_eq!(capped.len(), 1);
    }
}

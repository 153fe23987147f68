//! Heuristic gate deciding whether web search should supplement retrieval.
//!
//! Three independent signals are ORed together; a false positive costs one
//! extra external call, a false negative risks a stale answer.

use super::vector_index::ScoredChunk;

/// Keywords denoting a need for recent information.
const TEMPORAL_KEYWORDS: [&str; 12] = [
    "latest",
    "recent",
    "current",
    "today",
    "now",
    "this year",
    "2024",
    "2025",
    "update",
    "new",
    "breaking",
    "recently",
];

/// Topics that are inherently time-sensitive or external to any document set.
const WEB_TOPIC_KEYWORDS: [&str; 10] = [
    "news",
    "weather",
    "stock",
    "price",
    "market",
    "election",
    "policy",
    "law",
    "web",
    "internet",
];

/// A document hit beyond this distance is not considered a confident match.
const LOW_CONFIDENCE_DISTANCE: f32 = 0.8;

/// Returns true when the query or the document results suggest that web
/// search should supplement document retrieval:
/// 1. the query contains a temporal keyword,
/// 2. no document hit is sufficiently similar (or there are none),
/// 3. the query touches a web-dependent topic.
///
/// Substring matching is intentionally loose; callers that must not reach
/// the network disable web search outright instead of tuning this gate.
pub fn should_search_web(query: &str, document_hits: &[ScoredChunk]) -> bool {
    let query_lower = query.to_lowercase();

    let has_temporal = TEMPORAL_KEYWORDS
        .iter()
        .any(|keyword| query_lower.contains(keyword));

    let low_document_confidence = document_hits.is_empty()
        || document_hits
            .iter()
            .all(|hit| hit.distance > LOW_CONFIDENCE_DISTANCE);

    let has_web_topic = WEB_TOPIC_KEYWORDS
        .iter()
        .any(|topic| query_lower.contains(topic));

    has_temporal || low_document_confidence || has_web_topic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::ChunkMetadata;

    fn hit(distance: f32) -> ScoredChunk {
        ScoredChunk {
            metadata: ChunkMetadata {
                document_id: "doc".to_string(),
                page: 0,
                text: "chunk".to_string(),
                filename: "doc.pdf".to_string(),
                file_path: "/tmp/doc.pdf".to_string(),
            },
            distance,
        }
    }

    #[test]
    fn temporal_and_topical_query_triggers_search() {
        let hits = vec![hit(0.2)];
        assert!(should_search_web(
            "What is the latest news on interest rates?",
            &hits
        ));
    }

    #[test]
    fn confident_document_query_does_not_trigger_search() {
        let hits = vec![hit(0.1)];
        assert!(!should_search_web("Summarize section 2", &hits));
    }

    #[test]
    fn empty_results_trigger_search() {
        assert!(should_search_web("Summarize section 2", &[]));
    }

    #[test]
    fn uniformly_distant_results_trigger_search() {
        let hits = vec![hit(0.85), hit(1.4)];
        assert!(should_search_web("Summarize section 2", &hits));
    }

    #[test]
    fn one_confident_hit_suppresses_the_distance_signal() {
        let hits = vec![hit(0.85), hit(0.3)];
        assert!(!should_search_web("Summarize section 2", &hits));
    }

    #[test]
    fn keyword_matching_is_case_insensitive() {
        let hits = vec![hit(0.1)];
        assert!(should_search_web("BREAKING developments in the case", &hits));
    }
}

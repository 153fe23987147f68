use serde::{Deserialize, Serialize};

/// Fixed relevance assigned to web results.
pub const WEB_RELEVANCE_SCORE: f32 = 0.9;

/// Provenance record for one piece of grounding context.
///
/// The two variants carry scores on unrelated scales: document scores are
/// raw squared-Euclidean distances (lower = closer match) copied from the
/// vector search, while web scores are the fixed `WEB_RELEVANCE_SCORE`
/// constant on a higher-is-better scale. Sorting across variants by score
/// is therefore undefined; consumers that need a single ordering must
/// normalize themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source_type", rename_all = "snake_case")]
pub enum SourceReference {
    Document {
        document_id: String,
        filename: String,
        page: u32,
        relevance_score: f32,
    },
    Web {
        url: String,
        title: String,
        domain: Option<String>,
        description: String,
        published_date: Option<String>,
        relevance_score: f32,
    },
}

#[allow(dead_code)]
impl SourceReference {
    /// Stable identifier: the document id, or `web_<url>` for web sources
    /// (kept for wire compatibility with consumers of the legacy shape).
    pub fn id(&self) -> String {
        match self {
            SourceReference::Document { document_id, .. } => document_id.clone(),
            SourceReference::Web { url, .. } => format!("web_{}", url),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            SourceReference::Document { filename, .. } => filename,
            SourceReference::Web { title, .. } => title,
        }
    }

    pub fn relevance_score(&self) -> f32 {
        match self {
            SourceReference::Document {
                relevance_score, ..
            }
            | SourceReference::Web {
                relevance_score, ..
            } => *relevance_score,
        }
    }

    pub fn is_web(&self) -> bool {
        matches!(self, SourceReference::Web { .. })
    }
}

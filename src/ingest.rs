//! PDF ingestion: per-page text extraction and character-window chunking.

use serde_json::Value;

use crate::core::errors::ApiError;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Chunk size in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 200,
        }
    }
}

impl IngestConfig {
    pub fn from_config(config: &Value) -> Self {
        let defaults = Self::default();
        let ingest = config.get("ingest");
        let get = |key: &str, fallback: usize| {
            ingest
                .and_then(|v| v.get(key))
                .and_then(|v| v.as_u64())
                .map(|v| v as usize)
                .unwrap_or(fallback)
        };

        Self {
            chunk_size: get("chunk_size", defaults.chunk_size),
            chunk_overlap: get("chunk_overlap", defaults.chunk_overlap),
        }
    }
}

/// Extracts text per page from an in-memory PDF.
pub fn extract_pdf_pages(data: &[u8]) -> Result<Vec<String>, ApiError> {
    pdf_extract::extract_text_from_mem_by_pages(data)
        .map_err(|err| ApiError::BadRequest(format!("Failed to extract PDF text: {}", err)))
}

/// Splits text into overlapping character windows. Boundaries fall on char
/// boundaries, not sentence boundaries; the window step is
/// `chunk_size - chunk_overlap`, clamped to at least one character.
pub fn chunk_text(text: &str, config: &IngestConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let step = config
        .chunk_size
        .saturating_sub(config.chunk_overlap)
        .max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start += step;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", &IngestConfig::default()).is_empty());
    }

    #[test]
    fn short_text_yields_one_chunk() {
        let chunks = chunk_text("short", &IngestConfig::default());
        assert_eq!(chunks, vec!["short".to_string()]);
    }

    #[test]
    fn windows_overlap_by_the_configured_amount() {
        let config = IngestConfig {
            chunk_size: 10,
            chunk_overlap: 4,
        };
        let text = "abcdefghijklmnopqrstuvwxyz";

        let chunks = chunk_text(text, &config);

        assert_eq!(chunks[0], "abcdefghij");
        assert_eq!(chunks[1], "ghijklmnop");
        assert_eq!(chunks[2], "mnopqrstuv");
        // No chunk exceeds the configured size.
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 10));
    }

    #[test]
    fn overlap_larger_than_size_still_makes_progress() {
        let config = IngestConfig {
            chunk_size: 4,
            chunk_overlap: 10,
        };
        let chunks = chunk_text("abcdefgh", &config);
        assert!(chunks.len() <= 8);
        assert_eq!(chunks[0], "abcd");
    }

    #[test]
    fn ingest_config_reads_overrides() {
        let config = serde_json::json!({
            "ingest": { "chunk_size": 100 }
        });

        let parsed = IngestConfig::from_config(&config);
        assert_eq!(parsed.chunk_size, 100);
        assert_eq!(parsed.chunk_overlap, 200);
    }
}

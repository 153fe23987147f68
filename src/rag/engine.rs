//! RAG orchestrator.
//!
//! Composes the vector index, the web-search gate and the web search
//! adapter into one operation: given conversation history, produce an
//! augmented message list plus the provenance record of every snippet
//! that contributed to the grounding context.

use std::sync::Arc;

use serde_json::Value;

use super::heuristic::should_search_web;
use super::sources::{SourceReference, WEB_RELEVANCE_SCORE};
use super::vector_index::VectorIndex;
use crate::core::errors::ApiError;
use crate::llm::ChatMessage;
use crate::tools::search::{BraveSearchClient, SearchResult};

const SNIPPET_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Number of document chunks retrieved per query.
    pub top_k: usize,
    /// Number of web results requested when the gate fires.
    pub web_result_count: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            web_result_count: 3,
        }
    }
}

impl RagConfig {
    pub fn from_config(config: &Value) -> Self {
        let defaults = Self::default();
        let rag = config.get("rag");
        let get = |key: &str, fallback: usize| {
            rag.and_then(|v| v.get(key))
                .and_then(|v| v.as_u64())
                .map(|v| v as usize)
                .unwrap_or(fallback)
        };

        Self {
            top_k: get("top_k", defaults.top_k),
            web_result_count: get("web_result_count", defaults.web_result_count),
        }
    }
}

/// Per-request orchestrator. Construct one per `augment` call; the source
/// accumulator it carries stays valid after the call returns, so callers
/// can read provenance once the completion has finished streaming.
pub struct RagEngine {
    index: Arc<VectorIndex>,
    search: Arc<BraveSearchClient>,
    config: RagConfig,
    last_sources: Vec<SourceReference>,
}

impl RagEngine {
    pub fn new(
        index: Arc<VectorIndex>,
        search: Arc<BraveSearchClient>,
        config: RagConfig,
    ) -> Self {
        Self {
            index,
            search,
            config,
            last_sources: Vec::new(),
        }
    }

    /// Pulls grounding context for the most recent user message and returns
    /// a new message list with one synthetic system message prepended. The
    /// input history is never mutated. When there is no user message, or no
    /// context could be gathered, the history is returned unchanged and the
    /// source record is empty.
    ///
    /// Document retrieval failures propagate; web search degrades silently
    /// to document-only grounding. `allow_web` forces web search off
    /// regardless of what the heuristic decides.
    pub async fn augment(
        &mut self,
        history: &[ChatMessage],
        allow_web: bool,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        self.last_sources.clear();

        let Some(last_user) = history.iter().rev().find(|m| m.role == "user") else {
            return Ok(history.to_vec());
        };
        let user_query = last_user.content.trim();

        let docs = self.index.search(user_query, self.config.top_k).await?;

        let mut context_snippets: Vec<String> = Vec::new();
        for hit in &docs {
            context_snippets.push(hit.text().to_string());
            self.last_sources.push(SourceReference::Document {
                document_id: hit.metadata.document_id.clone(),
                filename: hit.metadata.filename.clone(),
                page: hit.metadata.page,
                // Raw distance, lower = closer; see SourceReference.
                relevance_score: hit.distance,
            });
        }

        let search_web = allow_web && should_search_web(user_query, &docs);

        if search_web {
            let web_results = self
                .search
                .search(user_query, self.config.web_result_count)
                .await;
            if !web_results.is_empty() {
                context_snippets.push(format!(
                    "Recent Web Information:\n{}",
                    format_web_results(&web_results)
                ));

                for result in web_results {
                    self.last_sources.push(SourceReference::Web {
                        url: result.url,
                        title: result.title,
                        domain: result.domain,
                        description: result.description,
                        published_date: result.published_date,
                        relevance_score: WEB_RELEVANCE_SCORE,
                    });
                }
            }
        }

        if context_snippets.is_empty() {
            return Ok(history.to_vec());
        }

        let context_text = context_snippets.join(SNIPPET_SEPARATOR);
        let system_message = build_system_message(&context_text, search_web);

        let mut augmented = Vec::with_capacity(history.len() + 1);
        augmented.push(system_message);
        augmented.extend_from_slice(history);
        Ok(augmented)
    }

    /// Sources gathered by the most recent `augment` call, in the order
    /// their snippets entered the context block.
    pub fn last_sources(&self) -> &[SourceReference] {
        &self.last_sources
    }

    #[allow(dead_code)]
    pub fn document_sources(&self) -> Vec<SourceReference> {
        self.last_sources
            .iter()
            .filter(|s| !s.is_web())
            .cloned()
            .collect()
    }

    #[allow(dead_code)]
    pub fn web_sources(&self) -> Vec<SourceReference> {
        self.last_sources
            .iter()
            .filter(|s| s.is_web())
            .cloned()
            .collect()
    }
}

fn format_web_results(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            format!(
                "{}. {}\n   {}\n   Source: {}",
                i + 1,
                result.title,
                result.description,
                result.domain.as_deref().unwrap_or(&result.url)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_system_message(context_text: &str, include_web: bool) -> ChatMessage {
    let provenance = if include_web {
        "uploaded documents and recent web search results"
    } else {
        "uploaded documents"
    };

    ChatMessage::system(format!(
        "You are a helpful assistant. Use the following context to answer \
         the user's question. The context comes from {}.\n\n\
         Context:\n{}\n\n\
         When referencing information, indicate whether it comes from \
         uploaded documents or web sources.",
        provenance, context_text
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use tokio::sync::mpsc;

    use crate::llm::{ChatRequest, LlmProvider};
    use crate::rag::ChunkMetadata;

    const TEST_DIM: usize = 4;

    struct MockEmbedder;

    fn mock_vector(text: &str) -> Vec<f32> {
        let mut v = [0.0f32; TEST_DIM];
        for (i, byte) in text.bytes().enumerate() {
            v[i % TEST_DIM] += byte as f32;
        }
        v.to_vec()
    }

    #[async_trait]
    impl LlmProvider for MockEmbedder {
        fn name(&self) -> &str {
            "mock"
        }

        async fn chat(&self, _request: ChatRequest) -> Result<String, ApiError> {
            Err(ApiError::Internal("chat not supported in tests".to_string()))
        }

        async fn stream_chat(
            &self,
            _request: ChatRequest,
        ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
            Err(ApiError::Internal("streaming not supported in tests".to_string()))
        }

        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
            Ok(inputs.iter().map(|text| mock_vector(text)).collect())
        }
    }

    fn open_index(dir: &Path) -> Arc<VectorIndex> {
        Arc::new(VectorIndex::open(dir, TEST_DIM, Arc::new(MockEmbedder)).unwrap())
    }

    fn engine(index: Arc<VectorIndex>) -> RagEngine {
        // No API key: web search degrades to empty results.
        RagEngine::new(
            index,
            Arc::new(BraveSearchClient::new(None)),
            RagConfig::default(),
        )
    }

    fn chunk_meta(document_id: &str, page: u32, text: &str) -> ChunkMetadata {
        ChunkMetadata {
            document_id: document_id.to_string(),
            page,
            text: text.to_string(),
            filename: format!("{}.pdf", document_id),
            file_path: format!("/tmp/{}.pdf", document_id),
        }
    }

    #[tokio::test]
    async fn history_without_user_message_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(open_index(dir.path()));

        let history = vec![
            ChatMessage::system("existing instructions"),
            ChatMessage::assistant("hello"),
        ];

        let augmented = engine.augment(&history, true).await.unwrap();

        assert_eq!(augmented.len(), history.len());
        assert_eq!(augmented[0].content, "existing instructions");
        assert!(engine.last_sources().is_empty());
    }

    #[tokio::test]
    async fn empty_index_and_failed_web_search_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(open_index(dir.path()));

        let history = vec![ChatMessage::user("Summarize section 2")];
        let augmented = engine.augment(&history, true).await.unwrap();

        assert_eq!(augmented.len(), 1);
        assert!(engine.last_sources().is_empty());
    }

    #[tokio::test]
    async fn document_hits_produce_context_and_sources() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        index
            .add(
                &["Section 2 covers revenue.".to_string()],
                vec![chunk_meta("doc-1", 2, "Section 2 covers revenue.")],
            )
            .await
            .unwrap();

        let mut engine = engine(index);
        let history = vec![ChatMessage::user("Section 2 covers revenue.")];

        let augmented = engine.augment(&history, false).await.unwrap();

        assert_eq!(augmented.len(), 2);
        assert_eq!(augmented[0].role, "system");
        assert!(augmented[0].content.contains("Section 2 covers revenue."));
        assert!(!augmented[0].content.contains("web search results"));
        // Original history untouched at the tail.
        assert_eq!(augmented[1].content, "Section 2 covers revenue.");

        let sources = engine.last_sources();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id(), "doc-1");
        assert_eq!(sources[0].relevance_score(), 0.0);
        assert_eq!(engine.document_sources().len(), 1);
        assert!(engine.web_sources().is_empty());
    }

    #[tokio::test]
    async fn scans_from_the_end_for_the_user_message() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());
        index
            .add(
                &["about cats".to_string()],
                vec![chunk_meta("doc-1", 0, "about cats")],
            )
            .await
            .unwrap();

        let mut engine = engine(index);
        let history = vec![
            ChatMessage::user("old question"),
            ChatMessage::assistant("old answer"),
            ChatMessage::user("about cats"),
        ];

        let augmented = engine.augment(&history, false).await.unwrap();

        let sources = engine.last_sources();
        assert_eq!(sources.len(), 1);
        // The retrieved chunk matches the newest user message exactly.
        assert_eq!(sources[0].relevance_score(), 0.0);
        assert_eq!(augmented.len(), 4);
    }

    #[test]
    fn web_results_are_formatted_as_numbered_paragraphs() {
        let results = vec![
            SearchResult {
                title: "First".to_string(),
                url: "https://a.example.com/x".to_string(),
                description: "Alpha".to_string(),
                published_date: None,
                domain: Some("a.example.com".to_string()),
            },
            SearchResult {
                title: "Second".to_string(),
                url: "https://b.example.com/y".to_string(),
                description: "Beta".to_string(),
                published_date: None,
                domain: None,
            },
        ];

        let formatted = format_web_results(&results);
        assert!(formatted.starts_with("1. First"));
        assert!(formatted.contains("2. Second"));
        assert!(formatted.contains("Source: a.example.com"));
        // Missing domain falls back to the url.
        assert!(formatted.contains("Source: https://b.example.com/y"));
    }

    #[test]
    fn rag_config_reads_overrides_and_defaults() {
        let config = serde_json::json!({
            "rag": { "top_k": 8 }
        });

        let parsed = RagConfig::from_config(&config);
        assert_eq!(parsed.top_k, 8);
        assert_eq!(parsed.web_result_count, 3);
    }
}

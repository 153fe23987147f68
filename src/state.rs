use std::sync::Arc;

use crate::core::config::{AppPaths, ConfigService};
use crate::core::errors::ApiError;
use crate::history::HistoryStore;
use crate::llm::{AzureOpenAiProvider, LlmProvider};
use crate::rag::VectorIndex;
use crate::tools::search::BraveSearchClient;

const DEFAULT_VECTOR_DIM: usize = 1536;

/// Global application state shared across all routes.
///
/// The LLM provider is constructed once and injected wherever embeddings
/// or completions are needed; the vector index owns the persisted
/// vector/metadata pair as one coupled resource.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub history: HistoryStore,
    pub llm: Arc<dyn LlmProvider>,
    pub index: Arc<VectorIndex>,
    pub search: Arc<BraveSearchClient>,
}

impl AppState {
    pub async fn initialize() -> Result<Arc<Self>, ApiError> {
        let paths = Arc::new(AppPaths::new());
        let config = ConfigService::new(paths.clone());
        let loaded = config.load_config()?;

        let history = HistoryStore::new(paths.db_path.clone()).await?;

        let llm: Arc<dyn LlmProvider> = Arc::new(AzureOpenAiProvider::from_config(&loaded));

        let vector_dim = loaded
            .get("rag")
            .and_then(|v| v.get("vector_dim"))
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_VECTOR_DIM);
        let index = Arc::new(VectorIndex::open(
            &paths.vector_store_dir,
            vector_dim,
            llm.clone(),
        )?);
        tracing::info!("Vector index loaded with {} chunks", index.len().await);

        let search = Arc::new(BraveSearchClient::from_config(&loaded));

        Ok(Arc::new(AppState {
            paths,
            config,
            history,
            llm,
            index,
            search,
        }))
    }
}

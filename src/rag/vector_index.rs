//! Disk-persisted flat vector index over document chunks.
//!
//! Vectors live in one contiguous f32 buffer (row `i` occupies
//! `vectors[i*dim..(i+1)*dim]`) with a parallel metadata vec; the row
//! position is the only join key. Search is a brute-force scan by squared
//! Euclidean distance, which is exact and fast enough at this corpus size.
//! Every mutation rewrites both files together (binary vectors + JSON
//! metadata) so the pair never diverges on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::errors::ApiError;
use crate::llm::LlmProvider;

const VECTOR_FILE: &str = "vectors.bin";
const METADATA_FILE: &str = "metadata.json";
const VECTOR_MAGIC: [u8; 4] = *b"PVX1";
const VECTOR_HEADER_LEN: usize = 16;

/// Embedding requests are batched to bound individual request size.
const EMBED_BATCH_SIZE: usize = 20;

/// Metadata for one indexed chunk, aligned by row position with its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub page: u32,
    pub text: String,
    pub filename: String,
    pub file_path: String,
}

/// One similarity-search hit. Smaller distance means closer.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub metadata: ChunkMetadata,
    pub distance: f32,
}

impl ScoredChunk {
    pub fn text(&self) -> &str {
        &self.metadata.text
    }
}

#[derive(Default)]
struct IndexState {
    vectors: Vec<f32>,
    metadata: Vec<ChunkMetadata>,
}

impl IndexState {
    fn rows(&self, dim: usize) -> usize {
        // Defensive: never trust more rows than both sides can cover.
        (self.vectors.len() / dim).min(self.metadata.len())
    }
}

pub struct VectorIndex {
    embedder: Arc<dyn LlmProvider>,
    dim: usize,
    index_path: PathBuf,
    meta_path: PathBuf,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    /// Opens the index in `dir`, loading the persisted vector/metadata pair
    /// when both files exist, otherwise starting empty at `dim` dimensions.
    pub fn open(
        dir: &Path,
        dim: usize,
        embedder: Arc<dyn LlmProvider>,
    ) -> Result<Self, ApiError> {
        if dim == 0 {
            return Err(ApiError::BadRequest(
                "Vector dimension must be non-zero".to_string(),
            ));
        }

        let index_path = dir.join(VECTOR_FILE);
        let meta_path = dir.join(METADATA_FILE);

        let state = if index_path.exists() && meta_path.exists() {
            load_state(&index_path, &meta_path, dim)
        } else {
            IndexState::default()
        };

        Ok(Self {
            embedder,
            dim,
            index_path,
            meta_path,
            state: RwLock::new(state),
        })
    }

    pub async fn len(&self) -> usize {
        let state = self.state.read().await;
        state.rows(self.dim)
    }

    #[allow(dead_code)]
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Embeds and appends `texts` with their metadata, persisting after each
    /// embedding batch. A provider failure mid-way leaves the batches already
    /// appended persisted; there is no rollback.
    pub async fn add(
        &self,
        texts: &[String],
        metadata: Vec<ChunkMetadata>,
    ) -> Result<(), ApiError> {
        if texts.len() != metadata.len() {
            return Err(ApiError::BadRequest(format!(
                "Text/metadata length mismatch: {} != {}",
                texts.len(),
                metadata.len()
            )));
        }
        if texts.is_empty() {
            return Ok(());
        }

        for (batch_texts, batch_meta) in texts
            .chunks(EMBED_BATCH_SIZE)
            .zip(metadata.chunks(EMBED_BATCH_SIZE))
        {
            let embeddings = self.embedder.embed(batch_texts).await?;
            if embeddings.len() != batch_texts.len() {
                return Err(ApiError::Internal(format!(
                    "Embedding provider returned {} vectors for {} inputs",
                    embeddings.len(),
                    batch_texts.len()
                )));
            }

            let mut state = self.state.write().await;
            for (embedding, meta) in embeddings.into_iter().zip(batch_meta.iter()) {
                if embedding.len() != self.dim {
                    return Err(ApiError::Internal(format!(
                        "Embedding dimension mismatch: expected {}, got {}",
                        self.dim,
                        embedding.len()
                    )));
                }
                state.vectors.extend_from_slice(&embedding);
                state.metadata.push(meta.clone());
            }
            self.persist(&state)?;
        }

        Ok(())
    }

    /// Brute-force nearest-neighbor search, ascending by squared Euclidean
    /// distance. Returns fewer than `k` hits when the index is smaller.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, ApiError> {
        let embeddings = self.embedder.embed(&[query.to_string()]).await?;
        let query_vec = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Internal("Embedding provider returned no vector".to_string()))?;
        if query_vec.len() != self.dim {
            return Err(ApiError::Internal(format!(
                "Query embedding dimension mismatch: expected {}, got {}",
                self.dim,
                query_vec.len()
            )));
        }

        let state = self.state.read().await;
        let rows = state.rows(self.dim);

        let mut scored: Vec<(usize, f32)> = (0..rows)
            .map(|row| {
                let offset = row * self.dim;
                let candidate = &state.vectors[offset..offset + self.dim];
                (row, squared_l2_distance(&query_vec, candidate))
            })
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .filter(|(row, _)| *row < state.metadata.len())
            .map(|(row, distance)| ScoredChunk {
                metadata: state.metadata[row].clone(),
                distance,
            })
            .collect())
    }

    /// Clears the index and re-adds the given chunks. O(n): every retained
    /// text is re-embedded. Used by deletion, where correctness matters more
    /// than latency at this scale.
    pub async fn rebuild(
        &self,
        texts: &[String],
        metadata: Vec<ChunkMetadata>,
    ) -> Result<(), ApiError> {
        {
            let mut state = self.state.write().await;
            state.vectors.clear();
            state.metadata.clear();
            self.persist(&state)?;
        }

        self.add(texts, metadata).await
    }

    /// Removes every chunk belonging to `document_id` by rebuilding the
    /// index from the retained chunks. Returns the number of removed rows.
    pub async fn delete_document(&self, document_id: &str) -> Result<usize, ApiError> {
        let (retained_texts, retained_meta, removed) = {
            let state = self.state.read().await;
            let rows = state.rows(self.dim);
            let mut texts = Vec::new();
            let mut meta = Vec::new();
            for entry in state.metadata.iter().take(rows) {
                if entry.document_id != document_id {
                    texts.push(entry.text.clone());
                    meta.push(entry.clone());
                }
            }
            let removed = rows - meta.len();
            (texts, meta, removed)
        };

        if removed == 0 {
            return Ok(0);
        }

        self.rebuild(&retained_texts, retained_meta).await?;
        Ok(removed)
    }

    /// Snapshot of all chunk metadata in insertion order.
    pub async fn metadata_snapshot(&self) -> Vec<ChunkMetadata> {
        let state = self.state.read().await;
        let rows = state.rows(self.dim);
        state.metadata.iter().take(rows).cloned().collect()
    }

    fn persist(&self, state: &IndexState) -> Result<(), ApiError> {
        let rows = state.rows(self.dim);

        let mut buf = Vec::with_capacity(VECTOR_HEADER_LEN + rows * self.dim * 4);
        buf.extend_from_slice(&VECTOR_MAGIC);
        buf.extend_from_slice(&(self.dim as u32).to_le_bytes());
        buf.extend_from_slice(&(rows as u64).to_le_bytes());
        for value in &state.vectors[..rows * self.dim] {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        write_replace(&self.index_path, &buf)?;

        let metadata_json = serde_json::to_vec_pretty(&state.metadata[..rows])
            .map_err(ApiError::internal)?;
        write_replace(&self.meta_path, &metadata_json)?;

        Ok(())
    }
}

/// Write via a sibling temp file and rename so a crash mid-write never
/// leaves a half-written artifact in place.
fn write_replace(path: &Path, contents: &[u8]) -> Result<(), ApiError> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents).map_err(ApiError::internal)?;
    fs::rename(&tmp_path, path).map_err(ApiError::internal)?;
    Ok(())
}

fn load_state(index_path: &Path, meta_path: &Path, dim: usize) -> IndexState {
    let bytes = match fs::read(index_path) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!("Failed to read vector file, starting empty: {}", err);
            return IndexState::default();
        }
    };

    if bytes.len() < VECTOR_HEADER_LEN || bytes[..4] != VECTOR_MAGIC {
        tracing::warn!("Vector file has an unrecognized header, starting empty");
        return IndexState::default();
    }

    let stored_dim = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if stored_dim != dim {
        tracing::warn!(
            "Vector file dimension {} does not match configured {}, starting empty",
            stored_dim,
            dim
        );
        return IndexState::default();
    }

    let stored_rows = u64::from_le_bytes([
        bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    ]) as usize;
    let available_rows = (bytes.len() - VECTOR_HEADER_LEN) / (dim * 4);
    let rows = stored_rows.min(available_rows);

    let mut vectors = Vec::with_capacity(rows * dim);
    for chunk in bytes[VECTOR_HEADER_LEN..VECTOR_HEADER_LEN + rows * dim * 4].chunks_exact(4) {
        vectors.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }

    let mut metadata: Vec<ChunkMetadata> = match fs::read(meta_path)
        .map_err(ApiError::internal)
        .and_then(|raw| serde_json::from_slice(&raw).map_err(ApiError::internal))
    {
        Ok(metadata) => metadata,
        Err(err) => {
            tracing::warn!("Failed to load chunk metadata, starting empty: {}", err);
            return IndexState::default();
        }
    };

    // Truncate both sides to the rows they can jointly cover.
    let rows = rows.min(metadata.len());
    vectors.truncate(rows * dim);
    metadata.truncate(rows);

    IndexState { vectors, metadata }
}

fn squared_l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::llm::ChatRequest;

    const TEST_DIM: usize = 4;

    /// Deterministic embedder: identical texts map to identical vectors.
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

    fn chunk_meta(document_id: &str, page: u32, text: &str) -> ChunkMetadata {
        ChunkMetadata {
            document_id: document_id.to_string(),
            page,
            text: text.to_string(),
            filename: format!("{}.pdf", document_id),
            file_path: format!("/tmp/{}.pdf", document_id),
        }
    }

    fn open_index(dir: &Path) -> VectorIndex {
        VectorIndex::open(dir, TEST_DIM, Arc::new(MockEmbedder)).unwrap()
    }

    #[tokio::test]
    async fn add_then_search_finds_exact_match_first() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());

        let texts = vec![
            "alpha".to_string(),
            "bravo".to_string(),
            "charlie".to_string(),
        ];
        let metadata = vec![
            chunk_meta("d1", 0, "alpha"),
            chunk_meta("d1", 1, "bravo"),
            chunk_meta("d2", 0, "charlie"),
        ];
        index.add(&texts, metadata).await.unwrap();

        assert_eq!(index.len().await, 3);

        let hits = index.search("bravo", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].text(), "bravo");
        assert_eq!(hits[0].distance, 0.0);
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[tokio::test]
    async fn search_returns_at_most_k() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());

        let texts: Vec<String> = (0..5).map(|i| format!("chunk number {}", i)).collect();
        let metadata: Vec<ChunkMetadata> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| chunk_meta("doc", i as u32, text))
            .collect();
        index.add(&texts, metadata).await.unwrap();

        let hits = index.search("chunk number 0", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn add_rejects_length_mismatch_and_allows_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());

        let result = index
            .add(&["one".to_string()], vec![])
            .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        index.add(&[], vec![]).await.unwrap();
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn delete_document_removes_only_matching_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());

        let texts = vec![
            "first of keep".to_string(),
            "doomed chunk".to_string(),
            "second of keep".to_string(),
        ];
        let metadata = vec![
            chunk_meta("keep", 0, "first of keep"),
            chunk_meta("gone", 0, "doomed chunk"),
            chunk_meta("keep", 1, "second of keep"),
        ];
        index.add(&texts, metadata).await.unwrap();

        let removed = index.delete_document("gone").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.len().await, 2);

        let snapshot = index.metadata_snapshot().await;
        assert!(snapshot.iter().all(|meta| meta.document_id == "keep"));

        let removed_again = index.delete_document("gone").await.unwrap();
        assert_eq!(removed_again, 0);
    }

    #[tokio::test]
    async fn persisted_index_survives_reload() {
        let dir = tempfile::tempdir().unwrap();

        {
            let index = open_index(dir.path());
            let texts = vec!["stored text".to_string(), "other text".to_string()];
            let metadata = vec![
                chunk_meta("doc", 0, "stored text"),
                chunk_meta("doc", 1, "other text"),
            ];
            index.add(&texts, metadata).await.unwrap();
        }

        let reloaded = open_index(dir.path());
        assert_eq!(reloaded.len().await, 2);

        let hits = reloaded.search("stored text", 2).await.unwrap();
        assert_eq!(hits[0].text(), "stored text");
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits[0].metadata, chunk_meta("doc", 0, "stored text"));
    }

    #[tokio::test]
    async fn rebuild_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(dir.path());

        index
            .add(
                &["old".to_string()],
                vec![chunk_meta("old", 0, "old")],
            )
            .await
            .unwrap();

        index
            .rebuild(
                &["new".to_string()],
                vec![chunk_meta("new", 0, "new")],
            )
            .await
            .unwrap();

        let snapshot = index.metadata_snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].document_id, "new");
    }
}

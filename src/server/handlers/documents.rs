use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::ingest::{self, IngestConfig};
use crate::rag::ChunkMetadata;
use crate::state::AppState;

/// Accepts a multipart PDF upload, chunks it per page and indexes the
/// chunks. The original file is kept on disk so deletion can remove it.
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart payload: {}", e)))?
    {
        if field.name() == Some("file") {
            let filename = field
                .file_name()
                .unwrap_or("upload.pdf")
                .to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
            file = Some((filename, data.to_vec()));
            break;
        }
    }

    let Some((filename, data)) = file else {
        return Err(ApiError::BadRequest(
            "Missing 'file' field in upload".to_string(),
        ));
    };

    if !filename.to_lowercase().ends_with(".pdf") {
        return Err(ApiError::BadRequest(
            "Only PDF files are supported.".to_string(),
        ));
    }

    let doc_id = Uuid::new_v4().to_string();
    let persistent_path = state
        .paths
        .uploads_dir
        .join(format!("{}_{}", doc_id, filename));
    fs::write(&persistent_path, &data).map_err(ApiError::internal)?;

    let pages = ingest::extract_pdf_pages(&data)?;

    let config = state.config.load_config()?;
    let ingest_config = IngestConfig::from_config(&config);

    let mut chunks = Vec::new();
    let mut metadata = Vec::new();
    for (page_num, page_text) in pages.iter().enumerate() {
        for chunk in ingest::chunk_text(page_text, &ingest_config) {
            metadata.push(ChunkMetadata {
                document_id: doc_id.clone(),
                page: page_num as u32,
                text: chunk.clone(),
                filename: filename.clone(),
                file_path: persistent_path.to_string_lossy().to_string(),
            });
            chunks.push(chunk);
        }
    }

    tracing::info!("Indexing {} chunks from {}", chunks.len(), filename);
    state.index.add(&chunks, metadata).await?;

    Ok(Json(json!({ "id": doc_id, "chunks": chunks.len() })))
}

pub async fn list_documents(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.index.metadata_snapshot().await;

    let mut order: Vec<String> = Vec::new();
    let mut summaries: std::collections::HashMap<String, (String, String, usize, HashSet<u32>)> =
        std::collections::HashMap::new();

    for meta in snapshot {
        let entry = summaries
            .entry(meta.document_id.clone())
            .or_insert_with(|| {
                order.push(meta.document_id.clone());
                (meta.filename.clone(), meta.file_path.clone(), 0, HashSet::new())
            });
        entry.2 += 1;
        entry.3.insert(meta.page);
    }

    let documents: Vec<Value> = order
        .into_iter()
        .filter_map(|doc_id| {
            summaries.get(&doc_id).map(|(filename, file_path, chunks, pages)| {
                json!({
                    "document_id": doc_id,
                    "filename": filename,
                    "file_path": file_path,
                    "chunks": chunks,
                    "pages": pages.len()
                })
            })
        })
        .collect();

    Ok(Json(json!({ "documents": documents })))
}

pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.index.metadata_snapshot().await;

    let matching: Vec<_> = snapshot
        .into_iter()
        .filter(|meta| meta.document_id == document_id)
        .collect();

    let Some(first) = matching.first() else {
        return Err(ApiError::NotFound("Document not found".to_string()));
    };

    let document = json!({
        "document_id": document_id,
        "filename": first.filename,
        "file_path": first.file_path
    });

    let chunks: Vec<Value> = matching
        .iter()
        .enumerate()
        .map(|(chunk_id, meta)| {
            json!({
                "chunk_id": chunk_id,
                "page": meta.page,
                "text": meta.text
            })
        })
        .collect();

    Ok(Json(json!({
        "document": document,
        "chunks": chunks,
        "total_chunks": chunks.len()
    })))
}

/// Deletes a document: removes its stored file(s) and rebuilds the index
/// without its chunks.
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.index.metadata_snapshot().await;

    let file_paths: HashSet<String> = snapshot
        .iter()
        .filter(|meta| meta.document_id == document_id && !meta.file_path.is_empty())
        .map(|meta| meta.file_path.clone())
        .collect();

    for file_path in file_paths {
        if let Err(err) = fs::remove_file(&file_path) {
            tracing::warn!("Could not delete file {}: {}", file_path, err);
        }
    }

    let removed = state.index.delete_document(&document_id).await?;

    Ok(Json(json!({ "success": true, "removed_chunks": removed })))
}

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::core::errors::ApiError;
use crate::history::HistoryStore;
use crate::llm::{ChatMessage, ChatRequest};
use crate::rag::{RagConfig, RagEngine, SourceReference};
use crate::state::AppState;

const HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ChatMessageRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatParams {
    pub session_id: Option<String>,
    /// Forces web search off for this request regardless of the heuristic.
    pub web_search: Option<bool>,
}

struct PreparedChat {
    session_id: String,
    request: ChatRequest,
    sources: Vec<SourceReference>,
}

/// Shared preamble for both chat endpoints: persist the user message,
/// assemble the conversation, and run retrieval augmentation.
async fn prepare_chat(
    state: &AppState,
    params: ChatParams,
    message: &str,
) -> Result<PreparedChat, ApiError> {
    let session_id = params
        .session_id
        .unwrap_or_else(|| "default".to_string());
    let allow_web = params.web_search.unwrap_or(true);

    let config = state.config.load_config()?;

    state.history.ensure_session(&session_id).await?;
    state
        .history
        .append_message(&session_id, "user", message, &[])
        .await?;

    let history = state.history.get_history(&session_id, HISTORY_LIMIT).await?;
    let messages: Vec<ChatMessage> = history
        .into_iter()
        .map(|m| ChatMessage {
            role: m.role,
            content: m.content,
        })
        .collect();

    let mut engine = RagEngine::new(
        state.index.clone(),
        state.search.clone(),
        RagConfig::from_config(&config),
    );
    let augmented = engine.augment(&messages, allow_web).await?;
    let sources = engine.last_sources().to_vec();

    let request = ChatRequest::new(augmented).with_config(&config);

    Ok(PreparedChat {
        session_id,
        request,
        sources,
    })
}

/// Streaming chat endpoint (SSE).
///
/// Emits the assistant's reply as `data:` chunks, then one
/// `data: [SOURCES]{json}` event carrying the provenance record, then
/// `data: [DONE]`. The assistant message is persisted with its sources
/// once the stream finishes.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ChatParams>,
    Json(payload): Json<ChatMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let prepared = prepare_chat(&state, params, &payload.message).await?;
    let mut chunk_rx = state.llm.stream_chat(prepared.request).await?;

    let (tx, event_rx) = mpsc::channel::<Event>(32);
    let history: HistoryStore = state.history.clone();
    let session_id = prepared.session_id;
    let sources = prepared.sources;

    tokio::spawn(async move {
        let mut assistant_response = String::new();

        while let Some(item) = chunk_rx.recv().await {
            match item {
                Ok(chunk) => {
                    assistant_response.push_str(&chunk);
                    if tx.send(Event::default().data(chunk)).await.is_err() {
                        // Client went away; still persist what we have.
                        break;
                    }
                }
                Err(err) => {
                    tracing::error!("Streaming completion failed: {}", err);
                    let _ = tx
                        .send(Event::default().data(format!("Error: {}", err)))
                        .await;
                    break;
                }
            }
        }

        if !sources.is_empty() {
            match serde_json::to_string(&json!({ "sources": sources })) {
                Ok(metadata) => {
                    let _ = tx
                        .send(Event::default().data(format!("[SOURCES]{}", metadata)))
                        .await;
                }
                Err(err) => tracing::error!("Failed to serialize sources: {}", err),
            }
        }
        let _ = tx.send(Event::default().data("[DONE]")).await;

        if !assistant_response.is_empty() {
            if let Err(err) = history
                .append_message(&session_id, "assistant", &assistant_response, &sources)
                .await
            {
                tracing::error!("Failed to persist assistant message: {}", err);
            }
        }
    });

    let stream = futures_util::stream::unfold(event_rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|event| (Ok::<Event, Infallible>(event), rx))
    });

    Ok(Sse::new(stream))
}

/// Non-streaming chat endpoint: one JSON response with the reply and the
/// sources that grounded it.
pub async fn send_message_sync(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ChatParams>,
    Json(payload): Json<ChatMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let prepared = prepare_chat(&state, params, &payload.message).await?;

    let response = state.llm.chat(prepared.request).await?;

    state
        .history
        .append_message(
            &prepared.session_id,
            "assistant",
            &response,
            &prepared.sources,
        )
        .await?;

    Ok(Json(json!({
        "response": response,
        "sources": prepared.sources
    })))
}

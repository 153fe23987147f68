use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::LlmProvider;
use super::types::ChatRequest;
use crate::core::errors::ApiError;

const API_VERSION: &str = "2024-05-01-preview";

/// Azure OpenAI provider.
///
/// Speaks the deployment-scoped Azure REST surface: the chat and embedding
/// models are addressed by deployment name rather than model id, and the
/// credential travels in the `api-key` header.
#[derive(Clone)]
pub struct AzureOpenAiProvider {
    endpoint: String,
    api_key: String,
    chat_deployment: String,
    embedding_deployment: String,
    client: Client,
}

impl AzureOpenAiProvider {
    pub fn new(
        endpoint: String,
        api_key: String,
        chat_deployment: String,
        embedding_deployment: String,
    ) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            chat_deployment,
            embedding_deployment,
            client: Client::new(),
        }
    }

    pub fn from_config(config: &Value) -> Self {
        let llm = config.get("llm");
        let get = |key: &str| {
            llm.and_then(|v| v.get(key))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };

        Self::new(
            get("azure_endpoint"),
            get("azure_api_key"),
            get("chat_deployment"),
            get("embedding_deployment"),
        )
    }

    fn deployment_url(&self, deployment: &str, operation: &str) -> String {
        format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            self.endpoint, deployment, operation, API_VERSION
        )
    }

    fn chat_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "messages": request.messages,
            "stream": stream,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
        }

        body
    }
}

#[async_trait]
impl LlmProvider for AzureOpenAiProvider {
    fn name(&self) -> &str {
        "azure_openai"
    }

    async fn chat(&self, request: ChatRequest) -> Result<String, ApiError> {
        let url = self.deployment_url(&self.chat_deployment, "chat/completions");
        let body = self.chat_body(&request, false);

        let res = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::internal)?;

        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Internal(format!("Azure chat error: {}", text)));
        }

        let payload: Value = res.json().await.map_err(ApiError::internal)?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(content)
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
        let url = self.deployment_url(&self.chat_deployment, "chat/completions");
        let body = self.chat_body(&request, true);

        let res = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::internal)?;

        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Internal(format!("Azure stream error: {}", text)));
        }

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        let chunk_str = String::from_utf8_lossy(&bytes);
                        for line in chunk_str.lines() {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            if line == "data: [DONE]" {
                                return;
                            }

                            if let Some(data) = line.strip_prefix("data: ") {
                                if let Ok(json) = serde_json::from_str::<Value>(data) {
                                    if let Some(content) =
                                        json["choices"][0]["delta"]["content"].as_str()
                                    {
                                        if !content.is_empty()
                                            && tx.send(Ok(content.to_string())).await.is_err()
                                        {
                                            return;
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ApiError::internal(e))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let url = self.deployment_url(&self.embedding_deployment, "embeddings");
        let body = json!({ "input": inputs });

        let res = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::internal)?;

        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Internal(format!("Azure embed error: {}", text)));
        }

        let payload: Value = res.json().await.map_err(ApiError::internal)?;

        let mut embeddings = Vec::new();
        if let Some(data) = payload["data"].as_array() {
            for item in data {
                if let Some(vals) = item["embedding"].as_array() {
                    let vec: Vec<f32> = vals
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect();
                    embeddings.push(vec);
                }
            }
        }

        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;

    #[test]
    fn deployment_url_includes_api_version() {
        let provider = AzureOpenAiProvider::new(
            "https://example.openai.azure.com/".to_string(),
            "key".to_string(),
            "gpt-4o".to_string(),
            "text-embedding-3-large".to_string(),
        );

        let url = provider.deployment_url("gpt-4o", "chat/completions");
        assert_eq!(
            url,
            format!(
                "https://example.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version={}",
                API_VERSION
            )
        );
    }

    #[test]
    fn chat_body_carries_sampling_params() {
        let provider = AzureOpenAiProvider::new(
            "https://example.openai.azure.com".to_string(),
            "key".to_string(),
            "gpt-4o".to_string(),
            "text-embedding-3-large".to_string(),
        );

        let mut request = ChatRequest::new(vec![ChatMessage::user("hi")]);
        request.temperature = Some(0.7);

        let body = provider.chat_body(&request, true);
        assert_eq!(body["stream"], serde_json::json!(true));
        assert_eq!(body["temperature"], serde_json::json!(0.7));
        assert!(body.get("max_tokens").is_none());
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    #[allow(dead_code)]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    #[allow(dead_code)]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_config(mut self, config: &Value) -> Self {
        if let Some(llm) = config.get("llm") {
            self.temperature = llm
                .get("temperature")
                .and_then(|v| v.as_f64())
                .or(self.temperature);
            self.max_tokens = llm
                .get("max_tokens")
                .and_then(|v| v.as_i64())
                .map(|v| v as i32)
                .or(self.max_tokens);
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn with_config_reads_llm_section() {
        let config = json!({
            "llm": { "temperature": 0.3, "max_tokens": 512 }
        });

        let request = ChatRequest::new(vec![ChatMessage::user("hi")]).with_config(&config);

        assert_eq!(request.temperature, Some(0.3));
        assert_eq!(request.max_tokens, Some(512));
    }

    #[test]
    fn with_config_keeps_defaults_when_section_missing() {
        let request = ChatRequest::new(vec![]).with_config(&json!({}));

        assert_eq!(request.temperature, None);
        assert_eq!(request.max_tokens, None);
    }
}

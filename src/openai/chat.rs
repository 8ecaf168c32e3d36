//! `/chat/completions` endpoint, text in and text out.

use serde::{Deserialize, Serialize};

use super::{OpenAiClient, OpenAiError};

pub const DEFAULT_CHAT_MODEL: &str = "gpt-4";

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// One system + user exchange with a chat model.
///
/// `Ok(None)` means the call succeeded but the model produced no text;
/// `Err` is reserved for transport, HTTP and decoding failures.
pub trait ChatCompletion: Send + Sync {
    fn complete(&self, system: &str, user: &str) -> Result<Option<String>, OpenAiError>;
}

/// Single-turn chat completion with a fixed system instruction per call.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: OpenAiClient,
    model: String,
}

impl ChatClient {
    pub fn new(client: OpenAiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl ChatCompletion for ChatClient {
    /// Returns the trimmed reply of the first choice.
    fn complete(&self, system: &str, user: &str) -> Result<Option<String>, OpenAiError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
        };

        let response: ChatCompletionResponse =
            self.client.post_json("chat/completions", &request)?;
        Ok(extract_text(response))
    }
}

fn extract_text(response: ChatCompletionResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_trims_reply() {
        let response: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"  reject\n"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(response).as_deref(), Some("reject"));
    }

    #[test]
    fn test_extract_text_without_choices() {
        let response: ChatCompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(extract_text(response).is_none());

        let response: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert!(extract_text(response).is_none());
    }

    #[test]
    fn test_request_shape() {
        let request = ChatCompletionRequest {
            model: DEFAULT_CHAT_MODEL,
            messages: [
                ChatMessage {
                    role: "system",
                    content: "answer confirm or reject",
                },
                ChatMessage {
                    role: "user",
                    content: "context",
                },
            ],
            temperature: 0.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "context");
    }
}

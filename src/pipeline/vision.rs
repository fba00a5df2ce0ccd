//! Vision model client: OpenAI-compatible chat completions with an
//! inline base64 image payload.

use std::collections::VecDeque;
use std::sync::Mutex;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::config::ExtractionConfig;

use super::PipelineError;

/// Abstraction over the vision-capable LLM. Everything downstream of
/// decoding talks to this trait, which keeps the model swappable and the
/// pipeline testable with scripted responses.
pub trait VisionModel {
    /// Send one prompt plus one JPEG page image, return the raw text of
    /// the model's reply.
    fn complete_with_image(
        &self,
        model: &str,
        prompt: &str,
        image_jpeg: &[u8],
    ) -> Result<String, PipelineError>;
}

/// HTTP client for any OpenAI-compatible /chat/completions endpoint.
pub struct OpenAiVision {
    base_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OpenAiVision {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            timeout_secs,
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(
            &config.api_base_url,
            &config.api_key,
            config.request_timeout_secs,
        )
    }

    #[cfg(test)]
    fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageBody,
}

#[derive(Deserialize)]
struct MessageBody {
    content: String,
}

impl VisionModel for OpenAiVision {
    fn complete_with_image(
        &self,
        model: &str,
        prompt: &str,
        image_jpeg: &[u8],
    ) -> Result<String, PipelineError> {
        let url = format!("{}/chat/completions", self.base_url);

        let b64 = base64::engine::general_purpose::STANDARD.encode(image_jpeg);
        let data_uri = format!("data:image/jpeg;base64,{b64}");

        let body = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_uri },
                    },
                ],
            }],
            max_tokens: 2000,
            temperature: 0.1,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    PipelineError::VisionConnection(self.base_url.clone())
                } else if e.is_timeout() {
                    PipelineError::HttpClient(format!(
                        "Request timed out after {}s",
                        self.timeout_secs
                    ))
                } else {
                    PipelineError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(PipelineError::VisionApi {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| PipelineError::MalformedResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PipelineError::MalformedResponse("Response has no choices".into()))
    }
}

/// Mock vision model returning one fixed response.
pub struct MockVisionModel {
    response: String,
}

impl MockVisionModel {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
        }
    }
}

impl VisionModel for MockVisionModel {
    fn complete_with_image(
        &self,
        _model: &str,
        _prompt: &str,
        _image_jpeg: &[u8],
    ) -> Result<String, PipelineError> {
        Ok(self.response.clone())
    }
}

/// Mock vision model that plays back a script of replies in order.
/// Useful when one pipeline run makes several model calls (detection,
/// then extraction) and each needs a different answer or failure.
pub struct ScriptedVisionModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
}

impl ScriptedVisionModel {
    pub fn new(replies: Vec<Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
        }
    }
}

impl VisionModel for ScriptedVisionModel {
    fn complete_with_image(
        &self,
        _model: &str,
        _prompt: &str,
        _image_jpeg: &[u8],
    ) -> Result<String, PipelineError> {
        let next = self
            .replies
            .lock()
            .map_err(|_| PipelineError::HttpClient("Scripted replies lock poisoned".into()))?
            .pop_front();

        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(msg)) => Err(PipelineError::HttpClient(msg)),
            None => Err(PipelineError::MalformedResponse(
                "Scripted replies exhausted".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = OpenAiVision::new("https://api.example.com/v1/", "key", 30);
        assert_eq!(client.base_url(), "https://api.example.com/v1");
    }

    #[test]
    fn mock_returns_configured_response() {
        let model = MockVisionModel::new("{\"fields\": {}}");
        let out = model.complete_with_image("m", "p", b"img").unwrap();
        assert_eq!(out, "{\"fields\": {}}");
    }

    #[test]
    fn scripted_model_plays_replies_in_order() {
        let model = ScriptedVisionModel::new(vec![
            Ok("first".into()),
            Err("network down".into()),
            Ok("third".into()),
        ]);

        assert_eq!(model.complete_with_image("m", "p", b"i").unwrap(), "first");
        let err = model.complete_with_image("m", "p", b"i").unwrap_err();
        assert!(matches!(err, PipelineError::HttpClient(ref m) if m == "network down"));
        assert_eq!(model.complete_with_image("m", "p", b"i").unwrap(), "third");
    }

    #[test]
    fn scripted_model_fails_when_exhausted() {
        let model = ScriptedVisionModel::new(vec![]);
        let err = model.complete_with_image("m", "p", b"i").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse(_)));
    }

    #[test]
    fn request_body_carries_image_part() {
        let body = ChatRequest {
            model: "gpt-4-vision-preview",
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: "describe" },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: "data:image/jpeg;base64,AAAA".into(),
                        },
                    },
                ],
            }],
            max_tokens: 2000,
            temperature: 0.1,
        };

        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"type\":\"image_url\""));
        assert!(json.contains("data:image/jpeg;base64,AAAA"));
        assert!(json.contains("\"max_tokens\":2000"));
    }
}

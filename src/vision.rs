// src/vision.rs
//
// Client for an OpenAI-compatible chat completions endpoint with image input.

use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::analysis::{self, ParsedAnalysis};
use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("vision api error status={status} body={body}")]
    Api { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

const RUBRIC: &str = r#"You are a strict podiatrist assistant. Look at the photo.

First decide whether it actually shows a human foot or feet. If not, reply with {"isFootDetected": false}.

Otherwise score each category from 1 to 10, where 8-10 is reserved for nearly perfect, well cared for feet,
6-7 means minor issues, 4-5 moderate problems and 1-3 serious issues needing care:
- skinCondition: dryness, cracking, calluses, discoloration, texture
- nailHealth: discoloration, trimming, fungal signs, damage
- footStructure: deformities, bunions, arch, alignment
- symmetry: balance between the left and right side
- cleanliness: visible dirt, hygiene, general upkeep

Reply with strict JSON only, using exactly this structure:
{
  "isFootDetected": true,
  "skinCondition": {"score": 0, "feedback": "", "issues": []},
  "nailHealth": {"score": 0, "feedback": "", "issues": []},
  "footStructure": {"score": 0, "feedback": "", "issues": []},
  "symmetry": {"score": 0, "feedback": "", "issues": []},
  "cleanliness": {"score": 0, "feedback": "", "issues": []},
  "overallScore": 0,
  "detectedIssues": [],
  "improvementTips": [],
  "confidenceScore": 0,
  "medicalRecommendation": ""
}"#;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Encodes raw image bytes as a `data:` URL the chat API accepts inline.
pub fn image_data_url(mime: &str, bytes: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{encoded}")
}

#[derive(Clone)]
pub struct VisionClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl VisionClient {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, VisionError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, VisionError> {
        Self::new(
            &config.openai_api_key,
            &config.openai_base_url,
            &config.openai_model,
            config.vision_timeout,
        )
    }

    /// Sends one image with the scoring rubric. Transport and HTTP failures
    /// are errors; whatever text comes back is always parsed into a result.
    pub async fn analyze(&self, image_data_url: &str) -> Result<ParsedAnalysis, VisionError> {
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": RUBRIC },
                    { "type": "image_url", "image_url": { "url": image_data_url, "detail": "high" } }
                ]
            }],
            "response_format": { "type": "json_object" },
            "max_tokens": 1500,
            "temperature": 0.1
        });

        let resp = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(VisionError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| VisionError::InvalidResponse(format!("{e}; body={text}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content);

        match content {
            Some(content) => Ok(analysis::parse_response(&content)),
            None => Ok(ParsedAnalysis::Failed("no response from model".to_string())),
        }
    }
}

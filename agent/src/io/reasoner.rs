//! Reasoning collaborator seam and the Gemini-backed implementation.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::prompt::SYSTEM_INSTRUCTION;
use crate::core::types::{Role, Turn};

/// Produces the next responder turn from the full rendered history.
///
/// Implementations receive every turn so far (ending with an initiator turn)
/// and return the raw responder text. Any failure is reported as `Err`.
pub trait Reasoner: Send + Sync {
    fn generate(&self, history: &[Turn]) -> Result<String>;
}

impl<T: Reasoner + ?Sized> Reasoner for Box<T> {
    fn generate(&self, history: &[Turn]) -> Result<String> {
        (**self).generate(history)
    }
}

/// Gemini API settings (`[gemini]` table of the server config).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeminiConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.5-flash".to_string(),
            temperature: 0.2,
            timeout_secs: 120,
            api_key_env: "GEMINI_API_KEY".to_string(),
        }
    }
}

impl GeminiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(anyhow!("gemini.base_url must be non-empty"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("gemini.model must be non-empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(anyhow!("gemini.temperature must be within 0.0..=2.0"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("gemini.timeout_secs must be > 0"));
        }
        if self.api_key_env.trim().is_empty() {
            return Err(anyhow!("gemini.api_key_env must be non-empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Calls the Gemini `generateContent` endpoint with the whole history.
pub struct GeminiReasoner {
    client: Client,
    config: GeminiConfig,
    api_key: String,
}

impl GeminiReasoner {
    /// Build a reasoner, reading the API key from `config.api_key_env`.
    pub fn from_config(config: GeminiConfig) -> Result<Self> {
        config.validate()?;
        let api_key = env::var(&config.api_key_env)
            .with_context(|| format!("read API key from ${}", config.api_key_env))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: GeminiConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("build gemini HTTP client")?;
        Ok(Self {
            client,
            config,
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

impl Reasoner for GeminiReasoner {
    #[instrument(skip_all, fields(model = %self.config.model, turns = history.len()))]
    fn generate(&self, history: &[Turn]) -> Result<String> {
        let request = build_request(history, self.config.temperature);
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .context("gemini request failed")?;

        let status = response.status();
        let body = response.text().context("read gemini response")?;
        if !status.is_success() {
            return Err(anyhow!("gemini returned {status}: {}", api_error_message(&body)));
        }

        let text = extract_text(&body)?;
        debug!(response_len = text.len(), "gemini responded");
        Ok(text)
    }
}

fn build_request(history: &[Turn], temperature: f32) -> GenerateRequest<'_> {
    let contents = history
        .iter()
        .map(|turn| Content {
            role: Some(match turn.role {
                Role::Initiator => "user",
                Role::Responder => "model",
            }),
            parts: vec![Part {
                text: &turn.content,
            }],
        })
        .collect();
    GenerateRequest {
        system_instruction: Content {
            role: None,
            parts: vec![Part {
                text: SYSTEM_INSTRUCTION,
            }],
        },
        contents,
        generation_config: GenerationConfig {
            temperature,
            response_mime_type: "application/json",
        },
    }
}

fn extract_text(body: &str) -> Result<String> {
    let response: GenerateResponse =
        serde_json::from_str(body).context("parse gemini response")?;
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("gemini returned no candidates"))?;
    let text: String = candidate
        .content
        .map(|content| content.parts.into_iter().map(|part| part.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(anyhow!("gemini returned an empty candidate"));
    }
    Ok(text)
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

use serde::{Deserialize, Serialize};
use std::env;

use crate::services::nutrition::{AnalysisError, TextGenerator};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

// Upstream signals a rejected credential only through its error message.
// Brittle against wording changes, but no structured code is documented.
const INVALID_KEY_SIGNATURE: &str = "API key not valid";

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Client for the Gemini `generateContent` endpoint.
///
/// The key is optional at construction: a missing credential is a
/// call-time failure, raised before any network I/O. The inner
/// `reqwest::Client` is reused across calls and safe to share.
pub struct GeminiClient {
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>, model: String) -> Self {
        Self {
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        let api_key = env::var("GEMINI_API_KEY").ok();
        let model = env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(api_key, model)
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait::async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, AnalysisError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(AnalysisError::MissingCredential)?;

        let url = format!("{}/{}:generateContent", GEMINI_API_BASE, self.model);
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        log::debug!("Sending generateContent request to model {}", self.model);

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisError::Provider(e.to_string()))?;

        let status = response.status();
        log::debug!("Gemini response status: {}", status);

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .map_err(|e| AnalysisError::Provider(e.to_string()))?;
            log::error!("Gemini API error ({}): {}", status, error_text);
            return Err(classify_error_body(status.as_u16(), &error_text));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Provider(e.to_string()))?;

        extract_text(body)
    }
}

/// Map a non-success HTTP response onto the analyzer's error taxonomy. A
/// rejected credential is told apart from generic failures by the
/// upstream message text.
fn classify_error_body(status: u16, body: &str) -> AnalysisError {
    if body.contains(INVALID_KEY_SIGNATURE) {
        AnalysisError::CredentialRejected(body.to_string())
    } else {
        AnalysisError::Provider(format!("Gemini API error ({}): {}", status, body))
    }
}

fn extract_text(body: GenerateResponse) -> Result<String, AnalysisError> {
    // A policy block comes back as prompt feedback, with no candidates.
    if let Some(feedback) = &body.prompt_feedback {
        if let Some(reason) = &feedback.block_reason {
            return Err(AnalysisError::Blocked {
                reason: reason.clone(),
            });
        }
    }

    let candidate = body
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AnalysisError::Provider("Gemini returned no candidates".to_string()))?;

    let text: String = candidate
        .content
        .parts
        .into_iter()
        .map(|part| part.text)
        .collect();

    Ok(text)
}

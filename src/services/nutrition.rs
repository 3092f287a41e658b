use std::sync::Arc;

use thiserror::Error;

use crate::models::NutritionEstimate;

/// Failure taxonomy for the meal analyzer. Callers translate these into
/// transport semantics; none are retried here.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Gemini API key is missing. Please set GEMINI_API_KEY in your environment")]
    MissingCredential,

    #[error("Invalid Gemini API key. Please check your configuration: {0}")]
    CredentialRejected(String),

    #[error("AI blocked the request: {reason}")]
    Blocked { reason: String },

    #[error("Failed to analyze: {0}")]
    Provider(String),

    #[error("Received invalid JSON from AI. Please try again")]
    Parse {
        /// Sanitized response text that failed to parse. Kept for
        /// diagnostics, never shown to end users.
        raw: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Text-generation provider seam. The production implementation is the
/// Gemini client; tests swap in a stub.
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AnalysisError>;
}

pub struct NutritionAnalyzer {
    provider: Arc<dyn TextGenerator>,
}

impl NutritionAnalyzer {
    pub fn new(provider: Arc<dyn TextGenerator>) -> Self {
        Self { provider }
    }

    /// Analyze a free-text meal description into a five-field estimate.
    ///
    /// Stateless per invocation: one provider call, sanitize, parse. Any
    /// failure surfaces as a typed [`AnalysisError`]; a partial record is
    /// never returned.
    pub async fn analyze(&self, description: &str) -> Result<NutritionEstimate, AnalysisError> {
        log::info!("Analyzing nutrition for text: {}", description);

        let prompt = build_prompt(description);
        let response = self.provider.generate(&prompt).await?;
        log::debug!("Raw provider response: {}", response);

        let json_str = strip_code_fences(&response);

        match serde_json::from_str::<NutritionEstimate>(json_str) {
            Ok(estimate) => Ok(estimate),
            Err(source) => {
                log::error!("Failed to parse JSON from provider: {}", json_str);
                Err(AnalysisError::Parse {
                    raw: json_str.to_string(),
                    source,
                })
            }
        }
    }
}

fn build_prompt(description: &str) -> String {
    format!(
        "Analyze the food description and return a JSON object with the following fields:\n\
         - foodName (string): A short, descriptive name of the food\n\
         - calories (number): Estimated calories\n\
         - protein (number): Estimated protein in grams\n\
         - carbs (number): Estimated carbs in grams\n\
         - fat (number): Estimated fat in grams\n\
         \n\
         Return ONLY the JSON object, no markdown or text. If the input is not food or \
         invalid, return null values or reasonable estimates based on best guess.\n\
         \n\
         Food description: {}",
        description
    )
}

/// The provider sometimes wraps the JSON payload in markdown fences
/// (```json ... ```). Strip a leading fence with an optional language tag
/// and a trailing fence, then trim.
fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        // Language tags vary in case ("json", "JSON"); drop the whole tag.
        text = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    }

    text = text.trim_end();
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }

    text.trim()
}

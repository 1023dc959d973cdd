//! Gemini REST adapter for the generative-model collaborators.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::llm::{MetadataGenerator, MomentSuggester, metadata_prompt, moments_prompt, translation_prompt};
use crate::transcript::Transcript;
use crate::translate::{TranslationItem, Translator};
use crate::{Error, Result};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

const SERVICE: &str = "gemini";

/// Blocking Gemini client. Every call carries the configured deadline.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::msg("Gemini API key must be provided"));
        }

        let client = Client::builder()
            .user_agent("podclip")
            .timeout(timeout)
            .build()
            .map_err(|err| Error::external(SERVICE, format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            api_key,
            model: DEFAULT_MODEL.to_owned(),
            endpoint: DEFAULT_ENDPOINT.to_owned(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different base URL (proxies, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_owned();
        self
    }

    /// Send one prompt and return the concatenated text parts of the first candidate.
    pub fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = serde_json::to_vec(&request_body(prompt))?;

        debug!(model = %self.model, prompt_bytes = prompt.len(), "calling gemini");
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .map_err(|err| Error::external(SERVICE, err))?;

        let status = resp.status();
        let text = resp.text().map_err(|err| Error::external(SERVICE, err))?;
        if !status.is_success() {
            return Err(Error::external(SERVICE, format!("HTTP {status}")));
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|err| Error::external(SERVICE, format!("unreadable response: {err}")))?;
        response_text(&value).ok_or_else(|| Error::external(SERVICE, "response has no text candidate"))
    }
}

fn request_body(prompt: &str) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
        "generationConfig": { "responseMimeType": "application/json" },
    })
}

fn response_text(value: &Value) -> Option<String> {
    let parts = value
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

impl MomentSuggester for GeminiClient {
    fn suggest_moments(&self, transcript: &Transcript) -> Result<String> {
        let raw = self.generate(&moments_prompt(transcript)?)?;
        info!(response_bytes = raw.len(), "moment suggestions received");
        Ok(raw)
    }
}

impl Translator for GeminiClient {
    fn translate_batch(&self, items: &[TranslationItem], target_language: &str) -> Result<String> {
        self.generate(&translation_prompt(items, target_language)?)
    }
}

impl MetadataGenerator for GeminiClient {
    fn generate_metadata(&self, script_text: &str, language: Option<&str>) -> Result<String> {
        self.generate(&metadata_prompt(script_text, language))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_joins_text_parts() {
        let value = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "[{\"start\":" }, { "text": "1,\"end\":2}]" }] }
            }]
        });
        assert_eq!(
            response_text(&value).as_deref(),
            Some("[{\"start\":1,\"end\":2}]")
        );
    }

    #[test]
    fn blocked_or_empty_responses_have_no_text() {
        assert_eq!(response_text(&json!({ "promptFeedback": { "blockReason": "SAFETY" } })), None);
        assert_eq!(
            response_text(&json!({ "candidates": [{ "content": { "parts": [] } }] })),
            None
        );
    }

    #[test]
    fn requests_json_responses() {
        let body = request_body("hi");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn rejects_blank_keys() {
        assert!(GeminiClient::new("  ", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn unreachable_endpoints_are_external_errors() -> anyhow::Result<()> {
        let client = GeminiClient::new("key", Duration::from_millis(500))?
            .with_endpoint("http://127.0.0.1:9/");
        let err = client.generate("hi").unwrap_err();
        assert!(err.is_window_scoped());
        Ok(())
    }
}

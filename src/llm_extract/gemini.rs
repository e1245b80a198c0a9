use super::{DocumentExtractor, EXTRACTION_PROMPT, parse_extraction, response_schema};
use crate::config::EndpointConfig;
use crate::document::SourceDocument;
use crate::error::ExtractionError;
use crate::margin::ExtractedData;
use async_trait::async_trait;
use base64::prelude::*;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use urlencoding::encode;

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    text: Option<String>,
}

/// Sends the documents inline to Gemini and asks for schema-constrained JSON.
pub struct GeminiExtractor {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiExtractor {
    pub fn new(client: Client, endpoint: &EndpointConfig, api_key: String) -> Self {
        info!(url = %endpoint.base_url, model = %endpoint.model, "Using Gemini backend");
        Self {
            client,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            model: endpoint.model.clone(),
            api_key,
        }
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, encode(&self.model))
    }
}

fn request_body(primary: &SourceDocument, secondary: Option<&SourceDocument>) -> Value {
    let mut parts: Vec<Value> = std::iter::once(primary)
        .chain(secondary)
        .map(|doc| {
            json!({
                "inlineData": {
                    "mimeType": doc.mime_type,
                    "data": BASE64_STANDARD.encode(&doc.bytes),
                }
            })
        })
        .collect();
    parts.push(json!({ "text": EXTRACTION_PROMPT }));

    json!({
        "contents": [{ "parts": parts }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": response_schema(),
        }
    })
}

/// Concatenated text of the first candidate.
fn response_text(response: GenerateContentResponse) -> Result<String, ExtractionError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or(ExtractionError::EmptyResponse)?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        warn!(finish_reason = ?candidate.finish_reason, "Gemini returned no text");
        return Err(ExtractionError::EmptyResponse);
    }
    Ok(text)
}

#[async_trait]
impl DocumentExtractor for GeminiExtractor {
    async fn extract(
        &self,
        primary: &SourceDocument,
        secondary: Option<&SourceDocument>,
    ) -> Result<ExtractedData, ExtractionError> {
        let body = request_body(primary, secondary);

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Status { status, body });
        }

        let parsed: GenerateContentResponse = response.json().await?;
        let text = response_text(parsed)?;
        parse_extraction(&text)
    }
}

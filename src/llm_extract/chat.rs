use super::{DocumentExtractor, EXTRACTION_PROMPT, parse_extraction, response_schema};
use crate::config::EndpointConfig;
use crate::document::SourceDocument;
use crate::error::ExtractionError;
use crate::margin::ExtractedData;
use crate::pdf_text::{self, PdfText};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Per-document cap to stay within context limits.
const MAX_DOCUMENT_CHARS: usize = 12_000;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible `/chat/completions` backend. Documents are turned
/// into text locally, so scanned PDFs and images cannot be used here.
pub struct ChatExtractor {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    local: bool,
}

impl ChatExtractor {
    pub fn new(client: Client, endpoint: &EndpointConfig, api_key: String, local: bool) -> Self {
        info!(
            url = %endpoint.base_url,
            model = %endpoint.model,
            local,
            "Using chat-completions backend"
        );
        Self {
            client,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            model: endpoint.model.clone(),
            api_key,
            local,
        }
    }

    /// Ollama's health endpoint is at the root (not under /v1).
    async fn check_health(&self) -> Result<(), ExtractionError> {
        let health_url = self.base_url.trim_end_matches("/v1");

        match self
            .client
            .get(health_url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                info!("Ollama server is reachable");
                Ok(())
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "Ollama server returned non-OK status");
                Err(ExtractionError::BackendUnavailable(format!(
                    "Ollama at {health_url} returned {}",
                    resp.status()
                )))
            }
            Err(e) => {
                warn!(error = %e, "Ollama server not reachable");
                Err(ExtractionError::BackendUnavailable(format!(
                    "Ollama is not running at {health_url}. Start it with: ollama serve"
                )))
            }
        }
    }
}

/// Text of a document, or why it cannot be read as text.
fn document_text(doc: &SourceDocument) -> Result<String, ExtractionError> {
    if !doc.is_pdf() {
        return Err(ExtractionError::UnreadableDocument(format!(
            "{} is an image; use the gemini backend for images",
            doc.name
        )));
    }
    match pdf_text::read_text(&doc.bytes) {
        PdfText::Readable(text) => Ok(pdf_text::truncate_chars(&text, MAX_DOCUMENT_CHARS).to_string()),
        PdfText::Scanned(finding) => Err(ExtractionError::UnreadableDocument(format!(
            "{} looks scanned ({finding}); use the gemini backend for scans",
            doc.name
        ))),
        PdfText::Unparseable(e) => Err(ExtractionError::UnreadableDocument(format!("{}: {e}", doc.name))),
    }
}

/// The first choice's answer, parsed as an extraction.
fn parse_chat_response(response: ChatResponse) -> Result<ExtractedData, ExtractionError> {
    let choice = response.choices.into_iter().next().ok_or(ExtractionError::EmptyResponse)?;
    parse_extraction(&choice.message.content)
}

fn system_prompt() -> String {
    format!(
        "{EXTRACTION_PROMPT}\n\nResponda SOMENTE com um objeto JSON válido, sem markdown nem comentários, \
         seguindo exatamente este schema:\n{}",
        response_schema()
    )
}

fn user_prompt(primary_text: &str, secondary_text: Option<&str>) -> String {
    let mut prompt = format!("--- CONTRACHEQUE ---\n{primary_text}\n");
    if let Some(text) = secondary_text {
        prompt.push_str(&format!("\n--- EXTRATO DE CONSIGNAÇÕES ---\n{text}\n"));
    }
    prompt
}

#[async_trait]
impl DocumentExtractor for ChatExtractor {
    async fn extract(
        &self,
        primary: &SourceDocument,
        secondary: Option<&SourceDocument>,
    ) -> Result<ExtractedData, ExtractionError> {
        let primary_text = document_text(primary)?;
        let secondary_text = secondary.map(document_text).transpose()?;

        if self.local {
            self.check_health().await?;
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt(&primary_text, secondary_text.as_deref()),
                },
            ],
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Status { status, body });
        }

        let chat_response: ChatResponse = response.json().await?;
        parse_chat_response(chat_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf_text::test_pdf::{Page, build};

    #[test]
    fn test_scanned_pdf_names_the_image_pages() {
        let doc = SourceDocument::from_bytes("contracheque.pdf", build(&[Page::Image, Page::Image])).unwrap();
        match document_text(&doc) {
            Err(ExtractionError::UnreadableDocument(reason)) => {
                assert!(reason.starts_with("contracheque.pdf looks scanned"));
                assert!(reason.contains("page(s) 1, 2 of 2"));
            }
            other => panic!("expected unreadable document, got {other:?}"),
        }
    }

    #[test]
    fn test_no_choices_is_empty_response() {
        let response: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(parse_chat_response(response), Err(ExtractionError::EmptyResponse)));
    }

    #[test]
    fn test_fenced_answer_is_parsed() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "```json\n{\"baseIR\": 2000.0, \"items\": [{\"description\": \"EMPREST BCO BMG\", \"value\": 150.5}]}\n```"
                }
            }]
        }))
        .unwrap();
        let data = parse_chat_response(response).unwrap();
        assert_eq!(data.base_ir, 2000.0);
        assert_eq!(data.items.len(), 1);
        assert_eq!(data.items[0].description, "EMPREST BCO BMG");
        assert_eq!(data.items[0].value, 150.5);
    }

    #[test]
    fn test_only_first_choice_is_used() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [
                {"message": {"role": "assistant", "content": "sem dados"}},
                {"message": {"role": "assistant", "content": "{\"baseIR\": 1.0, \"items\": []}"}}
            ]
        }))
        .unwrap();
        assert!(parse_chat_response(response).is_err());
    }

    #[test]
    fn test_images_are_unreadable_as_text() {
        let doc = SourceDocument::from_bytes("foto.jpg", vec![0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
        assert!(matches!(document_text(&doc), Err(ExtractionError::UnreadableDocument(_))));
    }

    #[test]
    fn test_user_prompt_labels_documents() {
        let prompt = user_prompt("BASE CÁLCULO DO I.R. 1.000,00", Some("EMPREST BCO PAN"));
        assert!(prompt.starts_with("--- CONTRACHEQUE ---"));
        assert!(prompt.contains("--- EXTRATO DE CONSIGNAÇÕES ---\nEMPREST BCO PAN"));
        assert!(!user_prompt("x", None).contains("EXTRATO"));
    }

    #[test]
    fn test_system_prompt_embeds_schema() {
        let prompt = system_prompt();
        assert!(prompt.contains("\"baseIR\""));
        assert!(prompt.contains("Demonstrativo de uso da margem"));
    }

    #[tokio::test]
    async fn test_ollama_health_check_fails_fast_when_unreachable() {
        let endpoint = EndpointConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            model: "m".to_string(),
        };
        let extractor = ChatExtractor::new(Client::new(), &endpoint, "ollama".to_string(), true);
        let err = extractor.check_health().await.unwrap_err();
        assert!(matches!(err, ExtractionError::BackendUnavailable(_)));
    }
}

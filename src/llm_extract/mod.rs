// src/llm_extract/mod.rs

mod chat;
mod gemini;

pub use chat::ChatExtractor;
pub use gemini::GeminiExtractor;

use crate::config::{LlmBackend, LlmSection};
use crate::document::SourceDocument;
use crate::error::{ConfigError, ExtractionError};
use crate::margin::{ExtractedData, LineItem, PayslipIdentity};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

/// Instruction sent alongside the documents.
pub const EXTRACTION_PROMPT: &str = r#"Analise os documentos SIAPE anexados (Contracheque e Extrato de Consignações).

REGRAS DE EXTRAÇÃO:
1. Localize no CONTRACHEQUE o campo "VALOR BASE PENSÃO I.R." (se for pensionista) OU "BASE CÁLCULO DO I.R." (se não for). Este valor é a base para todos os cálculos.
2. No EXTRATO DE CONSIGNAÇÕES, identifique a tabela "Demonstrativo de uso da margem".
3. Extraia cada linha individualmente, capturando:
   - Número do Contrato
   - Rubrica completa (ex: EMPREST BCO PRIVADOS...)
   - Banco (extraído da rubrica)
   - Parcela (ex: 44/96)
   - Valor da Parcela (R$)
   - Datas de Início e Fim.

Certifique-se de não pular nenhum empréstimo ou amortização de cartão."#;

/// JSON schema of the expected answer, in the OpenAPI subset Gemini accepts.
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "baseIR": {
                "type": "NUMBER",
                "description": "O valor numérico encontrado EXATAMENTE no campo 'VALOR BASE PENSÃO I.R.' ou 'BASE CÁLCULO DO I.R.' no rodapé do contracheque. Retorne apenas o número."
            },
            "contrachequeData": {
                "type": "OBJECT",
                "properties": {
                    "servidor": { "type": "STRING", "description": "Nome completo do servidor/pensionista" },
                    "matricula": { "type": "STRING", "description": "Matrícula SIAPE (ex: 1160815/2774526)" },
                    "orgao": { "type": "STRING", "description": "Órgão pagador" },
                    "competencia": { "type": "STRING", "description": "Mês/Ano de referência" }
                }
            },
            "items": {
                "type": "ARRAY",
                "description": "Lista de todas as consignações vigentes encontradas no extrato.",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "description": { "type": "STRING", "description": "Descrição/Rubrica (ex: 34228 - EMPREST BCO PRIVADOS - PAN)" },
                        "value": { "type": "NUMBER", "description": "Valor da Parcela (R$)" },
                        "bank": { "type": "STRING", "description": "Nome do banco (ex: PAN, BANRISUL, BMG)" },
                        "contract": { "type": "STRING", "description": "Número do Contrato" },
                        "installmentIndex": { "type": "STRING", "description": "Parcela (ex: 44/96)" },
                        "startDate": { "type": "STRING", "description": "Início (MM/AAAA)" },
                        "endDate": { "type": "STRING", "description": "Fim (MM/AAAA)" }
                    },
                    "required": ["description", "value"]
                }
            }
        },
        "required": ["baseIR", "items"]
    })
}

/// Turns payroll documents into [`ExtractedData`].
///
/// Implementations never return partially-parsed data: either the whole
/// answer validates or the call fails.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(
        &self,
        primary: &SourceDocument,
        secondary: Option<&SourceDocument>,
    ) -> Result<ExtractedData, ExtractionError>;
}

/// Build the extractor for the configured backend.
pub fn build_extractor(llm: &LlmSection) -> Result<Box<dyn DocumentExtractor>, ConfigError> {
    let api_key = match llm.backend.api_key_var() {
        Some(var) => std::env::var(var).map_err(|_| ConfigError::MissingApiKey(var))?,
        None => "ollama".to_string(), // required by the API shape but ignored
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(llm.timeout_secs))
        .build()
        .map_err(|e| ConfigError::Http(e.to_string()))?;

    let endpoint = llm.active();
    Ok(match llm.backend {
        LlmBackend::Gemini => Box::new(GeminiExtractor::new(client, endpoint, api_key)),
        LlmBackend::Remote => Box::new(ChatExtractor::new(client, endpoint, api_key, false)),
        LlmBackend::Ollama => Box::new(ChatExtractor::new(client, endpoint, api_key, true)),
    })
}

/// Wire shape of the model's answer. Everything optional so that
/// absence can be reported precisely instead of as a serde error.
#[derive(Debug, Deserialize)]
struct ExtractionPayload {
    #[serde(rename = "baseIR")]
    base_ir: Option<f64>,
    items: Option<Vec<ItemPayload>>,
    #[serde(rename = "contrachequeData")]
    identity: Option<PayslipIdentity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemPayload {
    description: Option<String>,
    value: Option<f64>,
    bank: Option<String>,
    contract: Option<String>,
    installment_index: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

impl TryFrom<ExtractionPayload> for ExtractedData {
    type Error = ExtractionError;

    fn try_from(payload: ExtractionPayload) -> Result<Self, Self::Error> {
        let base_ir = payload.base_ir.ok_or(ExtractionError::MissingField("baseIR"))?;
        if !base_ir.is_finite() || base_ir < 0.0 {
            return Err(ExtractionError::InvalidValue(format!("baseIR = {base_ir}")));
        }

        let items = payload
            .items
            .ok_or(ExtractionError::MissingField("items"))?
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                let description = item
                    .description
                    .ok_or(ExtractionError::MissingField("items[].description"))?;
                let value = item.value.ok_or(ExtractionError::MissingField("items[].value"))?;
                if !value.is_finite() || value < 0.0 {
                    return Err(ExtractionError::InvalidValue(format!("items[{idx}].value = {value}")));
                }
                Ok(LineItem {
                    description,
                    value,
                    bank: item.bank,
                    contract: item.contract,
                    installment_index: item.installment_index,
                    start_date: item.start_date,
                    end_date: item.end_date,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ExtractedData {
            base_ir,
            items,
            identity: payload.identity,
        })
    }
}

/// Parse and validate the model's text answer.
pub fn parse_extraction(content: &str) -> Result<ExtractedData, ExtractionError> {
    if content.trim().is_empty() {
        return Err(ExtractionError::EmptyResponse);
    }

    // Strip markdown fences if the model added them despite instructions
    let json_str = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let json_str = extract_json_object(json_str)?;

    let payload: ExtractionPayload =
        serde_json::from_str(json_str).map_err(|e| ExtractionError::InvalidJson(e.to_string()))?;
    ExtractedData::try_from(payload)
}

/// Extract the outermost JSON object from a string that may contain
/// surrounding text (e.g. reasoning tokens).
fn extract_json_object(s: &str) -> Result<&str, ExtractionError> {
    let start = s
        .find('{')
        .ok_or_else(|| ExtractionError::InvalidJson("no '{' in response".to_string()))?;
    let end = s
        .rfind('}')
        .ok_or_else(|| ExtractionError::InvalidJson("no '}' in response".to_string()))?;
    if end <= start {
        return Err(ExtractionError::InvalidJson("malformed JSON in response".to_string()));
    }
    Ok(&s[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let data = parse_extraction(
            r#"{"baseIR": 1000, "items": [{"description": "EMPREST BCO PAN", "value": 200.5, "bank": "PAN"}]}"#,
        )
        .unwrap();
        assert_eq!(data.base_ir, 1000.0);
        assert_eq!(data.items[0].value, 200.5);
        assert_eq!(data.items[0].bank.as_deref(), Some("PAN"));
        assert!(data.identity.is_none());
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let content = "Claro! Aqui está:\n```json\n{\"baseIR\": 10, \"items\": []}\n```";
        let data = parse_extraction(content).unwrap();
        assert_eq!(data.base_ir, 10.0);
        assert!(data.items.is_empty());
    }

    #[test]
    fn test_empty_answer() {
        assert!(matches!(parse_extraction("  \n"), Err(ExtractionError::EmptyResponse)));
    }

    #[test]
    fn test_missing_base_ir_is_an_error() {
        let err = parse_extraction(r#"{"items": []}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingField("baseIR")));
    }

    #[test]
    fn test_missing_items_is_an_error() {
        let err = parse_extraction(r#"{"baseIR": 1}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingField("items")));
    }

    #[test]
    fn test_item_without_value_is_an_error() {
        let err = parse_extraction(r#"{"baseIR": 1, "items": [{"description": "EMPREST"}]}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingField("items[].value")));
    }

    #[test]
    fn test_negative_value_is_rejected() {
        let err = parse_extraction(r#"{"baseIR": 1, "items": [{"description": "X", "value": -3}]}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidValue(_)));
    }

    #[test]
    fn test_not_json() {
        let err = parse_extraction("não consegui ler o documento").unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidJson(_)));
    }

    #[test]
    fn test_schema_requires_base_and_items() {
        let schema = response_schema();
        assert_eq!(schema["required"], json!(["baseIR", "items"]));
        assert_eq!(schema["properties"]["items"]["items"]["required"], json!(["description", "value"]));
    }
}

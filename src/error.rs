use thiserror::Error;

/// Message shown to the user for any extraction failure.
pub const EXTRACTION_FAILED_MESSAGE: &str = "Erro ao processar o documento. Certifique-se de que o campo \
'VALOR BASE PENSÃO I.R.' (ou 'BASE CÁLCULO DO I.R.') e as tabelas de empréstimos estão visíveis.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config document: {0}")]
    Edit(#[from] toml_edit::TomlError),

    #[error("environment variable {0} is required for the selected backend")]
    MissingApiKey(&'static str),

    #[error("failed to build HTTP client: {0}")]
    Http(String),
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("{name} is empty")]
    Empty { name: String },

    #[error("{name} is not a PDF or image")]
    Unsupported { name: String },

    #[error("{name} is not a valid PDF: {reason}")]
    InvalidPdf { name: String, reason: String },
}

/// Why the extraction service could not produce usable data.
///
/// Every variant renders to the user as [`EXTRACTION_FAILED_MESSAGE`];
/// the technical detail is only available through `Debug` and `detail()`.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("{}", EXTRACTION_FAILED_MESSAGE)]
    Http(#[from] reqwest::Error),

    #[error("{}", EXTRACTION_FAILED_MESSAGE)]
    Status { status: u16, body: String },

    #[error("{}", EXTRACTION_FAILED_MESSAGE)]
    EmptyResponse,

    #[error("{}", EXTRACTION_FAILED_MESSAGE)]
    InvalidJson(String),

    #[error("{}", EXTRACTION_FAILED_MESSAGE)]
    MissingField(&'static str),

    #[error("{}", EXTRACTION_FAILED_MESSAGE)]
    InvalidValue(String),

    #[error("{}", EXTRACTION_FAILED_MESSAGE)]
    UnreadableDocument(String),

    #[error("{}", EXTRACTION_FAILED_MESSAGE)]
    BackendUnavailable(String),
}

impl ExtractionError {
    /// Technical cause, for logs.
    pub fn detail(&self) -> String {
        match self {
            ExtractionError::Http(e) => format!("request failed: {e}"),
            ExtractionError::Status { status, body } => format!("service returned {status}: {body}"),
            ExtractionError::EmptyResponse => "service returned no text".to_string(),
            ExtractionError::InvalidJson(e) => format!("response is not valid extraction JSON: {e}"),
            ExtractionError::MissingField(field) => format!("response is missing `{field}`"),
            ExtractionError::InvalidValue(e) => format!("response has an invalid value: {e}"),
            ExtractionError::UnreadableDocument(e) => format!("document cannot be sent: {e}"),
            ExtractionError::BackendUnavailable(e) => format!("backend unavailable: {e}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("O contracheque é obrigatório para extrair a base de cálculo (PENSÃO I.R / BASE I.R).")]
    MissingPrimaryDocument,

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

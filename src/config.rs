use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::{fs, io, path::Path};
use toml_edit::{DocumentMut, value};
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = ".config/consig_margin.toml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmSection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    /// Google Gemini `generateContent`, documents sent inline.
    #[default]
    Gemini,
    /// Any OpenAI-compatible `/chat/completions` endpoint, documents sent as text.
    Remote,
    /// Local Ollama server, same wire as `Remote`.
    Ollama,
}

impl LlmBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            LlmBackend::Gemini => "gemini",
            LlmBackend::Remote => "remote",
            LlmBackend::Ollama => "ollama",
        }
    }

    /// Environment variable holding the API key, if the backend needs one.
    pub fn api_key_var(self) -> Option<&'static str> {
        match self {
            LlmBackend::Gemini => Some("GEMINI_API_KEY"),
            LlmBackend::Remote => Some("LLM_API_KEY"),
            LlmBackend::Ollama => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmSection {
    #[serde(default)]
    pub backend: LlmBackend,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_gemini")]
    pub gemini: EndpointConfig,
    #[serde(default = "default_remote")]
    pub remote: EndpointConfig,
    #[serde(default = "default_ollama")]
    pub ollama: EndpointConfig,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: LlmBackend::default(),
            timeout_secs: default_timeout_secs(),
            gemini: default_gemini(),
            remote: default_remote(),
            ollama: default_ollama(),
        }
    }
}

impl LlmSection {
    /// Endpoint settings of the selected backend.
    pub fn active(&self) -> &EndpointConfig {
        match self.backend {
            LlmBackend::Gemini => &self.gemini,
            LlmBackend::Remote => &self.remote,
            LlmBackend::Ollama => &self.ollama,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model: String,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_gemini() -> EndpointConfig {
    EndpointConfig {
        base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        model: "gemini-3-flash-preview".to_string(),
    }
}

fn default_remote() -> EndpointConfig {
    EndpointConfig {
        base_url: "https://api.openai.com/v1".to_string(),
        model: "gpt-4o-mini".to_string(),
    }
}

fn default_ollama() -> EndpointConfig {
    EndpointConfig {
        base_url: "http://localhost:11434/v1".to_string(),
        model: "qwen3:8b".to_string(),
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match Self::load(path) {
            Err(ConfigError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Set the model of the selected backend, keeping the rest of the file intact.
    pub fn update_model(path: impl AsRef<Path>, new_model: &str) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        let updated = set_model_in_document(&content, new_model)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.display().to_string(),
                source,
            })?;
        }
        fs::write(path, updated).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), model = %new_model, "Config updated");
        Ok(())
    }
}

fn set_model_in_document(content: &str, new_model: &str) -> Result<String, ConfigError> {
    let current: Config = toml::from_str(content)?;
    let backend = current.llm.backend;

    let mut doc = content.parse::<DocumentMut>()?;
    let table = &mut doc["llm"][backend.as_str()];
    if table.get("base_url").is_none() {
        table["base_url"] = value(current.llm.active().base_url.as_str());
    }
    table["model"] = value(new_model);

    Ok(doc.to_string())
}

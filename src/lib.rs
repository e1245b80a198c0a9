pub mod config;
pub mod document;
pub mod error;
pub mod llm_extract;
pub mod margin;
pub mod pdf_text;
pub mod report;
pub mod session;

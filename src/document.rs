// src/document.rs

use crate::error::DocumentError;
use lopdf::Document;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::info;

pub const MIME_PDF: &str = "application/pdf";

/// A payslip or statement file as handed to the extraction service.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    /// Read a file from disk, detect its type and validate PDFs locally.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| DocumentError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_bytes(name, bytes)
    }

    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, DocumentError> {
        let name = name.into();
        if bytes.is_empty() {
            return Err(DocumentError::Empty { name });
        }

        let mime_type = sniff_mime(&bytes)
            .or_else(|| mime_from_extension(&name))
            .ok_or_else(|| DocumentError::Unsupported { name: name.clone() })?;

        if mime_type == MIME_PDF {
            let doc = Document::load_mem(&bytes).map_err(|e| DocumentError::InvalidPdf {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            info!(name = %name, pages = doc.get_pages().len(), "PDF structure ok");
        }

        Ok(Self {
            name,
            mime_type,
            bytes,
        })
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type == MIME_PDF
    }

    /// SHA-256 of the file contents, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        format!("{:x}", hasher.finalize())
    }

    pub fn size_mb(&self) -> f64 {
        self.bytes.len() as f64 / 1024.0 / 1024.0
    }
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"%PDF-") {
        Some(MIME_PDF)
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else {
        None
    }
}

fn mime_from_extension(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_png_detected_by_magic() {
        let mut bytes = PNG_HEADER.to_vec();
        bytes.extend_from_slice(b"rest of image");
        let doc = SourceDocument::from_bytes("scan.bin", bytes).unwrap();
        assert_eq!(doc.mime_type, "image/png");
        assert!(!doc.is_pdf());
    }

    #[test]
    fn test_extension_fallback() {
        let doc = SourceDocument::from_bytes("foto.JPG", b"not really a jpeg".to_vec()).unwrap();
        assert_eq!(doc.mime_type, "image/jpeg");
    }

    #[test]
    fn test_empty_file_rejected() {
        let err = SourceDocument::from_bytes("vazio.pdf", Vec::new()).unwrap_err();
        assert!(matches!(err, DocumentError::Empty { .. }));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = SourceDocument::from_bytes("notas.txt", b"hello".to_vec()).unwrap_err();
        assert!(matches!(err, DocumentError::Unsupported { .. }));
    }

    #[test]
    fn test_corrupt_pdf_rejected_locally() {
        let err = SourceDocument::from_bytes("contracheque.pdf", b"%PDF-1.7 garbage".to_vec()).unwrap_err();
        assert!(matches!(err, DocumentError::InvalidPdf { .. }));
    }

    #[test]
    fn test_fingerprint_stable_and_content_based() {
        let a = SourceDocument::from_bytes("a.png", PNG_HEADER.to_vec()).unwrap();
        let b = SourceDocument::from_bytes("b.png", PNG_HEADER.to_vec()).unwrap();
        let mut other = PNG_HEADER.to_vec();
        other.push(0);
        let c = SourceDocument::from_bytes("a.png", other).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}

// src/pdf_text.rs
//
// Text layer of payslip and statement PDFs, for the chat backends that only
// receive text. Gemini gets the file itself and never comes through here.

use lopdf::{Dictionary, Document};
use std::fmt;
use tracing::{debug, info, warn};

/// A payslip carries at least the servant's name and the base IR line.
const MIN_PAYSLIP_CHARS: usize = 30;

/// Share of image-only pages, in percent, at which the file counts as a scan.
const SCANNED_PAGE_PERCENT: usize = 80;

#[derive(Debug)]
pub enum PdfText {
    Readable(String),
    Scanned(ScanFinding),
    Unparseable(String),
}

/// Why a structurally valid PDF has no usable text.
#[derive(Debug, PartialEq)]
pub enum ScanFinding {
    /// These pages (1-based) draw images and load no font.
    ImagePages { pages: Vec<u32>, total: usize },
    SparseText { chars: usize },
    /// pdf-extract could not walk the content streams.
    NoTextLayer(String),
}

impl fmt::Display for ScanFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanFinding::ImagePages { pages, total } => {
                let list: Vec<String> = pages.iter().map(u32::to_string).collect();
                write!(f, "page(s) {} of {total} are images without text", list.join(", "))
            }
            ScanFinding::SparseText { chars } => {
                write!(f, "only {chars} characters of text, expected at least {MIN_PAYSLIP_CHARS}")
            }
            ScanFinding::NoTextLayer(reason) => write!(f, "no text layer: {reason}"),
        }
    }
}

/// Read the text of a payslip or statement PDF.
pub fn read_text(pdf_bytes: &[u8]) -> PdfText {
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfText::Unparseable(e.to_string()),
    };

    let total = doc.get_pages().len();
    let image_pages = image_only_pages(&doc);
    if total > 0 && image_pages.len() * 100 >= total * SCANNED_PAGE_PERCENT {
        info!(total_pages = total, image_pages = ?image_pages, "PDF pages are scans");
        return PdfText::Scanned(ScanFinding::ImagePages {
            pages: image_pages,
            total,
        });
    }

    match ::pdf_extract::extract_text_from_mem(pdf_bytes) {
        Ok(text) => {
            let chars = text.chars().filter(|c| !c.is_whitespace()).count();
            if chars < MIN_PAYSLIP_CHARS {
                info!(chars, "PDF text layer too thin for a payslip");
                PdfText::Scanned(ScanFinding::SparseText { chars })
            } else {
                debug!(chars, total_pages = total, "PDF text read");
                PdfText::Readable(text)
            }
        }
        Err(e) => {
            warn!(error = %e, "pdf-extract could not read the text layer");
            PdfText::Scanned(ScanFinding::NoTextLayer(e.to_string()))
        }
    }
}

/// Page numbers whose resources hold XObjects but no fonts.
pub fn image_only_pages(doc: &Document) -> Vec<u32> {
    doc.get_pages()
        .into_iter()
        .filter(|(_, page_id)| {
            let Ok(page) = doc.get_object(*page_id).and_then(|o| o.as_dict()) else {
                return false;
            };
            has_resource(doc, page, b"XObject") && !has_resource(doc, page, b"Font")
        })
        .map(|(number, _)| number)
        .collect()
}

fn has_resource(doc: &Document, page: &Dictionary, kind: &[u8]) -> bool {
    page.get(b"Resources")
        .ok()
        .and_then(|r| doc.dereference(r).ok())
        .and_then(|(_, resources)| resources.as_dict().ok())
        .and_then(|resources| resources.get(kind).ok())
        .and_then(|entry| doc.dereference(entry).ok())
        .and_then(|(_, entry)| entry.as_dict().ok())
        .is_some_and(|entries| !entries.is_empty())
}

/// Cut `s` to at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}


#[cfg(test)]
mod tests {
    use super::test_pdf::{Page, build};
    use super::*;

    const PAYSLIP_LINE: &str = "SERVIDOR MARIA DA SILVA BASE CALCULO DO I.R. 4.321,50";

    #[test]
    fn test_garbage_bytes() {
        let result = read_text(b"this is not a pdf");
        assert!(matches!(result, PdfText::Unparseable(_)));
    }

    #[test]
    fn test_text_payslip_is_readable() {
        match read_text(&build(&[Page::Text(PAYSLIP_LINE)])) {
            PdfText::Readable(text) => assert!(text.contains("MARIA DA SILVA")),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn test_image_only_payslip_is_scanned() {
        let result = read_text(&build(&[Page::Image]));
        match result {
            PdfText::Scanned(finding) => {
                assert_eq!(finding, ScanFinding::ImagePages { pages: vec![1], total: 1 });
                assert_eq!(finding.to_string(), "page(s) 1 of 1 are images without text");
            }
            other => panic!("expected scan, got {other:?}"),
        }
    }

    #[test]
    fn test_near_empty_text_is_scanned() {
        let result = read_text(&build(&[Page::Text("PAG 1")]));
        assert!(matches!(result, PdfText::Scanned(_)), "got {result:?}");
    }

    #[test]
    fn test_image_pages_are_numbered_from_one() {
        let bytes = build(&[Page::Text(PAYSLIP_LINE), Page::Image, Page::Image]);
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(image_only_pages(&doc), vec![2, 3]);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "ÇÃOÇÃO";
        assert_eq!(truncate_chars(s, 3), "ÇÃO");
        assert_eq!(truncate_chars(s, 100), s);
    }
}

// src/session.rs

use crate::document::SourceDocument;
use crate::error::AnalysisError;
use crate::llm_extract::DocumentExtractor;
use crate::margin::{self, CalculationResult, ExtractedData};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use time::OffsetDateTime;
use tracing::{Instrument, info, warn};

/// Name and content hash of a document that fed an analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRef {
    pub name: String,
    pub fingerprint: String,
}

impl From<&SourceDocument> for DocumentRef {
    fn from(doc: &SourceDocument) -> Self {
        Self {
            name: doc.name.clone(),
            fingerprint: doc.fingerprint(),
        }
    }
}

/// The analysis currently on display.
#[derive(Debug, Clone)]
pub struct AnalysisRecord {
    pub data: ExtractedData,
    pub result: CalculationResult,
    pub documents: Vec<DocumentRef>,
    pub analyzed_at: OffsetDateTime,
}

impl AnalysisRecord {
    fn new(data: ExtractedData, documents: Vec<DocumentRef>) -> Self {
        let result = margin::calculate(&data);
        Self {
            data,
            result,
            documents,
            analyzed_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// The result is now the current analysis.
    Committed,
    /// A newer request started while this one was in flight; its data was dropped.
    Superseded,
}

/// Holds the single current analysis. Requests may overlap; only the most
/// recently started one is allowed to commit.
#[derive(Debug, Default)]
pub struct AnalysisSession {
    generation: AtomicU64,
    current: Mutex<Option<AnalysisRecord>>,
}

impl AnalysisSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_ticket(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_latest(&self, ticket: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket
    }

    fn lock(&self) -> MutexGuard<'_, Option<AnalysisRecord>> {
        // writers only ever assign a whole Option, so a poisoned value is still whole
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run one extraction and, if still the latest request, make it current.
    ///
    /// Fails before contacting the extractor when `primary` is missing.
    /// On failure the previous analysis stays in place.
    pub async fn analyze(
        &self,
        extractor: &dyn DocumentExtractor,
        primary: Option<&SourceDocument>,
        secondary: Option<&SourceDocument>,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let Some(primary) = primary else {
            warn!("Analysis requested without the primary document");
            return Err(AnalysisError::MissingPrimaryDocument);
        };

        let ticket = self.next_ticket();
        let span = tracing::info_span!("analysis", ticket, primary = %primary.name);
        self.run(ticket, extractor, primary, secondary)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        ticket: u64,
        extractor: &dyn DocumentExtractor,
        primary: &SourceDocument,
        secondary: Option<&SourceDocument>,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        info!(
            fingerprint = %primary.fingerprint(),
            secondary = ?secondary.map(|d| d.name.as_str()),
            "Starting extraction"
        );

        let data = match extractor.extract(primary, secondary).await {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e.detail(), "Extraction failed");
                return Err(e.into());
            }
        };

        let documents = std::iter::once(primary)
            .chain(secondary)
            .map(DocumentRef::from)
            .collect();
        let record = AnalysisRecord::new(data, documents);

        let mut current = self.lock();
        if !self.is_latest(ticket) {
            info!("Newer analysis started, discarding this result");
            return Ok(AnalysisOutcome::Superseded);
        }

        info!(
            base_ir = record.result.base_ir,
            items = record.result.raw_items.len(),
            negative = record.result.has_negative_margin(),
            "Analysis committed"
        );
        *current = Some(record);
        Ok(AnalysisOutcome::Committed)
    }

    /// Make an existing extraction current, e.g. one saved from an earlier run.
    pub fn load(&self, data: ExtractedData, documents: Vec<DocumentRef>) {
        self.next_ticket();
        *self.lock() = Some(AnalysisRecord::new(data, documents));
    }

    pub fn current(&self) -> Option<AnalysisRecord> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.next_ticket();
        *self.lock() = None;
    }
}

//! Checkpointed extraction over books → chapters → batches.

use holocron_db::{CheckpointStatus, CheckpointUpdate};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::chunks::{Book, Chapter};
use crate::errors::KnowledgeError;
use crate::extract::{BatchUnit, Extractor};

/// Checkpoint phase written by [`run_extraction`].
pub const EXTRACTION_PHASE: &str = "extraction";

/// Parameters of one extraction run.
#[derive(Debug, Clone)]
pub struct ExtractionRun {
    pub era: String,
    /// Skip chapters whose checkpoint is already completed
    pub resume: bool,
    /// Restrict the run to one book (case-insensitive title match)
    pub book_filter: Option<String>,
    pub chunks_per_call: usize,
}

impl ExtractionRun {
    pub fn new(era: impl Into<String>) -> Self {
        Self {
            era: era.into(),
            resume: false,
            book_filter: None,
            chunks_per_call: 3,
        }
    }

    fn wants(&self, book: &Book) -> bool {
        self.book_filter
            .as_deref()
            .is_none_or(|title| title.trim().eq_ignore_ascii_case(book.title.trim()))
    }
}

/// Totals for a run, in chapters unless noted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// LLM batches attempted
    pub batches: usize,
    /// Batches that ended on the empty fallback
    pub fallbacks: usize,
    pub warnings: Vec<String>,
}

struct ChapterFailure {
    chunk_id: Option<String>,
    error: KnowledgeError,
}

/// Run extraction over `books`. Never fails as a whole: a chapter that hits a
/// store error is marked failed and the run moves on.
pub async fn run_extraction(extractor: &Extractor, books: &[Book], run: &ExtractionRun) -> RunReport {
    let mut report = RunReport::default();
    let selected: Vec<&Book> = books.iter().filter(|book| run.wants(book)).collect();
    if let Some(filter) = &run.book_filter
        && selected.is_empty()
    {
        warn!(book = %filter, "no book matches the filter");
        report.warnings.push(format!("no book titled '{filter}'"));
    }

    for book in selected {
        info!(book = %book.title, chapters = book.chapters.len(), "extracting book");
        for chapter in &book.chapters {
            run_chapter(extractor, book, chapter, run, &mut report).await;
        }
    }

    info!(
        era = %run.era,
        processed = report.processed,
        skipped = report.skipped,
        failed = report.failed,
        batches = report.batches,
        fallbacks = report.fallbacks,
        "extraction run finished"
    );
    report
}

async fn run_chapter(
    extractor: &Extractor,
    book: &Book,
    chapter: &Chapter,
    run: &ExtractionRun,
    report: &mut RunReport,
) {
    let store = extractor.store();
    let title = chapter.title.as_deref();

    if run.resume {
        match store.get_checkpoint(&book.title, title, EXTRACTION_PHASE).await {
            Ok(Some(checkpoint)) if checkpoint.status == CheckpointStatus::Completed => {
                info!(book = %book.title, chapter = chapter.label(), "chapter already completed, skipping");
                report.skipped += 1;
                return;
            }
            Ok(_) => {}
            Err(e) => warn!(book = %book.title, chapter = chapter.label(), error = %e, "checkpoint lookup failed"),
        }
    }

    let started = CheckpointUpdate::new(&book.title, title, EXTRACTION_PHASE, CheckpointStatus::InProgress);
    let result = match store.set_checkpoint(started).await {
        Ok(_) => extract_chapter(extractor, book, chapter, run, report).await,
        Err(e) => Err(ChapterFailure {
            chunk_id: None,
            error: e.into(),
        }),
    };

    let finished = match result {
        Ok(()) => {
            report.processed += 1;
            CheckpointUpdate::new(&book.title, title, EXTRACTION_PHASE, CheckpointStatus::Completed)
        }
        Err(failure) => {
            report.failed += 1;
            let chunk_id = failure.chunk_id.unwrap_or_default();
            error!(
                book = %book.title,
                chapter = chapter.label(),
                chunk_id = %chunk_id,
                error_kind = failure.error.kind(),
                error = %failure.error,
                "chapter extraction failed"
            );
            report.warnings.push(format!(
                "{} / {}: failed at chunk '{chunk_id}': {}",
                book.title,
                chapter.label(),
                failure.error
            ));
            let mut update =
                CheckpointUpdate::new(&book.title, title, EXTRACTION_PHASE, CheckpointStatus::Failed)
                    .error(failure.error.to_string());
            if !chunk_id.is_empty() {
                update = update.chunk_id(chunk_id);
            }
            update
        }
    };

    if let Err(e) = store.set_checkpoint(finished).await {
        error!(book = %book.title, chapter = chapter.label(), error = %e, "could not record checkpoint");
    }
}

async fn extract_chapter(
    extractor: &Extractor,
    book: &Book,
    chapter: &Chapter,
    run: &ExtractionRun,
    report: &mut RunReport,
) -> Result<(), ChapterFailure> {
    for (part, batch) in chapter.batches(run.chunks_per_call).enumerate() {
        let unit = BatchUnit {
            era: &run.era,
            book: &book.title,
            chapter: chapter.title.as_deref(),
            chapter_index: chapter.index,
            part: part as i64,
            chunks: batch,
        };
        report.batches += 1;
        let outcome = extractor
            .extract_batch(&unit)
            .await
            .map_err(|error| ChapterFailure {
                chunk_id: batch.first().map(|c| c.chunk_id.clone()),
                error,
            })?;

        if outcome.fell_back {
            report.fallbacks += 1;
        }
        report.warnings.extend(
            outcome
                .warnings
                .into_iter()
                .map(|w| format!("{} / {}: {w}", book.title, chapter.label())),
        );
        info!(
            book = %book.title,
            chapter = chapter.label(),
            part,
            entities = outcome.entities,
            triples = outcome.triples,
            "batch extracted"
        );
    }
    Ok(())
}

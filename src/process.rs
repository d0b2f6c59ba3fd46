//! Pipeline orchestrator: one document in, one output bundle out.
//!
//! ## Stage order
//!
//! ```text
//! describer ─▶ input ─▶ scope ─▶ decode ─▶ clear stale ─▶ tables ─▶ pictures (+ descriptions) ─▶ assemble ─▶ write
//! ```
//!
//! The order is fixed: the assembler needs every artifact's token before it
//! can emit references. Failures before and during decoding are fatal and
//! returned as [`ProcessError`]; files from an earlier run of the same
//! document are only removed once decoding has succeeded. Per-element failures afterwards are folded
//! into the [`RunSummary`] and never abort the run.

use crate::config::ProcessingConfig;
use crate::document::DecodedDocument;
use crate::error::ProcessError;
use crate::output::{
    ArtifactId, ArtifactResult, DocumentOverview, RunStats, RunSummary, Stage,
};
use crate::pipeline::assemble::{assemble, RunMetadata};
use crate::pipeline::decode::{self, DecodeOptions};
use crate::pipeline::describe::{resolve_describer, ImageDescriber};
use crate::pipeline::images::{extract_images, PictureOutcome};
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::tables::extract_tables;
use crate::pipeline::writer::{self, artifact_token, content_file_name, ArtifactWriter, OutputScope};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Process a document file or URL into an output bundle under `output_root`.
///
/// # Arguments
/// * `input`: Local file path or HTTP/HTTPS URL
/// * `output_root`: Directory the output scope is created in (created if absent)
/// * `config`: Processing configuration
///
/// # Returns
/// `Ok(RunSummary)` whenever the content file was written, even if some
/// tables or pictures failed (check `summary.failures`).
///
/// # Errors
/// Returns `Err(ProcessError)` only for fatal errors:
/// - Remote services enabled without a credential
/// - Input not found, unreadable, or not downloadable
/// - Output root not creatable
/// - Decoding failed, or the run was cancelled before decoding finished
///
/// # Example
/// ```rust,no_run
/// use edgequake_docbundle::{process, ProcessingConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ProcessingConfig::builder()
///     .enable_remote_services(false)
///     .build()?;
/// let summary = process("report.pdf", "output", &config).await?;
/// println!("{} artifacts in {}", summary.artifacts.len(), summary.output_dir.display());
/// # Ok(())
/// # }
/// ```
pub async fn process(
    input: impl AsRef<str>,
    output_root: impl AsRef<Path>,
    config: &ProcessingConfig,
) -> Result<RunSummary, ProcessError> {
    let source = input.as_ref();
    info!("Starting run: {}", source);

    // ── Step 1: Credentials ──────────────────────────────────────────────
    let describer = resolve_describer(config)?;

    // ── Step 2: Resolve input ────────────────────────────────────────────
    let resolved = input::resolve_input(source, config.download_timeout_secs).await?;

    run(source, &resolved, output_root.as_ref(), config, describer).await
}

/// Process in-memory document bytes.
///
/// `file_name` supplies the base name and extension (`report.pdf`), exactly
/// as if the bytes had been read from that file. The bytes are written to a
/// managed temp directory that is removed on return.
pub async fn process_bytes(
    bytes: &[u8],
    file_name: &str,
    output_root: impl AsRef<Path>,
    config: &ProcessingConfig,
) -> Result<RunSummary, ProcessError> {
    info!("Starting run: {} ({} bytes in memory)", file_name, bytes.len());
    let describer = resolve_describer(config)?;
    let resolved = input::resolve_bytes(bytes, file_name)?;
    run(file_name, &resolved, output_root.as_ref(), config, describer).await
}

/// Synchronous wrapper around [`process`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync(
    input: impl AsRef<str>,
    output_root: impl AsRef<Path>,
    config: &ProcessingConfig,
) -> Result<RunSummary, ProcessError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ProcessError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process(input, output_root, config))
}

/// Decode a document and report what a run would produce.
///
/// Makes no remote calls and writes nothing.
pub async fn inspect(
    input: impl AsRef<str>,
    config: &ProcessingConfig,
) -> Result<DocumentOverview, ProcessError> {
    let source = input.as_ref();
    let resolved = input::resolve_input(source, config.download_timeout_secs).await?;
    let decoder = config
        .decoder
        .clone()
        .unwrap_or_else(|| decode::decoder_for(resolved.path()));
    let decoder_name = decoder.name().to_string();

    let mut options = DecodeOptions::from(config);
    options.generate_page_images = false;
    let doc = decode::decode(decoder, resolved.path(), options).await?;

    let doc_base = resolved.doc_base();
    let tables = doc.tables().count();
    let pictures = doc.pictures().count();

    let mut planned_artifacts = Vec::new();
    if config.do_table_structure {
        planned_artifacts.extend((1..=tables).map(|n| artifact_token(&doc_base, ArtifactId::table(n))));
    }
    if config.do_picture_extraction {
        planned_artifacts
            .extend((1..=pictures).map(|n| artifact_token(&doc_base, ArtifactId::picture(n))));
    }

    Ok(DocumentOverview {
        source: source.to_string(),
        scope_name: OutputScope::name_for(&doc_base, resolved.extension().as_deref()),
        content_file: content_file_name(&doc_base),
        doc_base,
        decoder: decoder_name,
        pages: doc.pages.len(),
        text_blocks: doc.text_blocks(),
        tables,
        pictures,
        planned_artifacts,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn run(
    source: &str,
    resolved: &ResolvedInput,
    output_root: &Path,
    config: &ProcessingConfig,
    describer: Option<Arc<dyn ImageDescriber>>,
) -> Result<RunSummary, ProcessError> {
    let started_at = Utc::now();
    let total_start = Instant::now();
    let doc_base = resolved.doc_base();

    // ── Step 3: Output scope ─────────────────────────────────────────────
    let scope = OutputScope::create(output_root, &doc_base, resolved.extension().as_deref())?;
    debug!("Output scope: {}", scope.dir().display());

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(source);
    }

    // ── Step 4: Decode ───────────────────────────────────────────────────
    let cancelled = || ProcessError::Cancelled {
        source_name: source.to_string(),
    };
    if config.cancellation.is_cancelled() {
        return Err(cancelled());
    }
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(Stage::Decode, 0);
    }

    let decoder = config
        .decoder
        .clone()
        .unwrap_or_else(|| decode::decoder_for(resolved.path()));
    let decode_start = Instant::now();
    let doc: DecodedDocument = tokio::select! {
        result = decode::decode(decoder, resolved.path(), DecodeOptions::from(config)) => result?,
        _ = config.cancellation.cancelled() => return Err(cancelled()),
    };
    let decode_duration_ms = decode_start.elapsed().as_millis() as u64;
    info!(
        "Decoded {} pages: {} tables, {} pictures in {}ms",
        doc.pages.len(),
        doc.tables().count(),
        doc.pictures().count(),
        decode_duration_ms
    );

    // A fatal error up to here leaves an earlier bundle untouched.
    scope.clear_stale().await?;
    let writer = ArtifactWriter::new(scope.clone());

    // ── Step 5: Tables ───────────────────────────────────────────────────
    let tables_start = Instant::now();
    let tables = extract_tables(&doc, &writer, config).await;
    let tables_duration_ms = tables_start.elapsed().as_millis() as u64;

    // ── Step 6: Pictures and descriptions ────────────────────────────────
    let pictures_start = Instant::now();
    let pictures = extract_images(&doc, &writer, config, describer.as_ref()).await;
    let pictures_duration_ms = pictures_start.elapsed().as_millis() as u64;

    // ── Step 7: Assemble and write the content file ──────────────────────
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(Stage::Assemble, doc.elements.len());
    }
    let meta = RunMetadata {
        source,
        doc_base: &doc_base,
        elapsed: total_start.elapsed(),
        tables_enabled: config.do_table_structure,
        pictures_enabled: config.do_picture_extraction,
    };
    let content = assemble(&doc, &tables, &pictures, &meta);
    let content_path = writer::write_content(&scope, &content).await?;

    // ── Step 8: Summary ──────────────────────────────────────────────────
    let mut summary = RunSummary {
        source: source.to_string(),
        doc_base: doc_base.clone(),
        output_dir: scope.dir().to_path_buf(),
        content_path,
        started_at,
        finished_at: started_at,
        stats: RunStats {
            pages: doc.pages.len(),
            tables_found: doc.tables().count(),
            pictures_found: doc.pictures().count(),
            decode_duration_ms,
            tables_duration_ms,
            pictures_duration_ms,
            ..Default::default()
        },
        artifacts: Vec::new(),
        descriptions: Vec::new(),
        failures: Vec::new(),
        cancelled: config.cancellation.is_cancelled(),
    };
    fold_outcomes(&mut summary, tables, pictures);
    summary.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    summary.finished_at = Utc::now();

    if summary.failures.is_empty() {
        info!(
            "Run complete: {} artifacts in {}ms",
            summary.artifacts.len(),
            summary.stats.total_duration_ms
        );
    } else {
        warn!(
            "Run complete with {} failure(s): {} artifacts in {}ms",
            summary.failures.len(),
            summary.artifacts.len(),
            summary.stats.total_duration_ms
        );
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(&summary);
    }
    Ok(summary)
}

/// Fold per-element results into the summary: artifacts, descriptions, failures.
fn fold_outcomes(summary: &mut RunSummary, tables: Vec<ArtifactResult>, pictures: Vec<PictureOutcome>) {
    for result in tables {
        match result {
            Ok(artifact) => {
                summary.stats.tables_extracted += 1;
                summary.artifacts.push(artifact);
            }
            Err(e) => summary.failures.push(e),
        }
    }

    for outcome in pictures {
        match outcome.artifact {
            Ok(artifact) => {
                summary.stats.pictures_extracted += 1;
                summary.artifacts.push(artifact);
            }
            Err(e) => summary.failures.push(e),
        }
        match outcome.description {
            Some(Ok(description)) => {
                summary.stats.pictures_described += 1;
                summary.stats.total_input_tokens += description.input_tokens as u64;
                summary.stats.total_output_tokens += description.output_tokens as u64;
                summary.descriptions.push(description);
            }
            Some(Err(e)) => summary.failures.push(e),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::output::{ExtractedArtifact, ImageDescription};
    use std::path::PathBuf;

    fn empty_summary() -> RunSummary {
        RunSummary {
            source: "doc.pdf".into(),
            doc_base: "doc".into(),
            output_dir: PathBuf::new(),
            content_path: PathBuf::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            stats: RunStats::default(),
            artifacts: vec![],
            descriptions: vec![],
            failures: vec![],
            cancelled: false,
        }
    }

    fn artifact(id: ArtifactId) -> ExtractedArtifact {
        ExtractedArtifact {
            id,
            token: id.to_string(),
            path: PathBuf::new(),
        }
    }

    #[test]
    fn fold_separates_artifacts_and_failures() {
        let mut summary = empty_summary();
        let tables = vec![
            Ok(artifact(ArtifactId::table(1))),
            Err(StageError::TableConversion {
                index: 2,
                detail: "x".into(),
            }),
        ];
        let pictures = vec![
            PictureOutcome {
                artifact: Ok(artifact(ArtifactId::picture(1))),
                description: Some(Ok(ImageDescription {
                    artifact: ArtifactId::picture(1),
                    text: "t".into(),
                    input_tokens: 100,
                    output_tokens: 20,
                    duration_ms: 5,
                })),
            },
            PictureOutcome {
                artifact: Ok(artifact(ArtifactId::picture(2))),
                description: Some(Err(StageError::DescriptionTimeout { index: 2, secs: 1 })),
            },
        ];

        fold_outcomes(&mut summary, tables, pictures);

        assert_eq!(summary.artifacts.len(), 3);
        assert_eq!(summary.stats.tables_extracted, 1);
        assert_eq!(summary.stats.pictures_extracted, 2);
        assert_eq!(summary.stats.pictures_described, 1);
        assert_eq!(summary.stats.total_input_tokens, 100);
        assert_eq!(summary.stats.total_output_tokens, 20);
        assert_eq!(
            summary.failures.iter().map(|f| f.artifact()).collect::<Vec<_>>(),
            vec![ArtifactId::table(2), ArtifactId::picture(2)]
        );
        assert!(summary.description_for(ArtifactId::picture(1)).is_some());
    }

    #[tokio::test]
    async fn missing_input_is_fatal_before_any_write() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ProcessingConfig::builder()
            .enable_remote_services(false)
            .build()
            .unwrap();
        let err = process("/no/such/doc.pdf", tmp.path(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::FileNotFound { .. }));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}

//! Error types for the edgequake-docbundle library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ProcessError`] is **fatal**: the run cannot proceed at all (input
//!   unreadable, decoder failure, output root not writable, remote analysis
//!   enabled without a credential). Returned as `Err(ProcessError)` from the
//!   top-level `process*` functions.
//!
//! * [`StageError`] is **non-fatal**: a single table or picture failed (grid
//!   malformed, bitmap missing, description timed out) while every other
//!   artifact is fine. Stored in [`crate::output::RunSummary::failures`] and
//!   rendered as a placeholder in the content file.
//!
//! [`RemoteServiceError`] is what an [`crate::pipeline::describe::ImageDescriber`]
//! reports; the Image Extraction Stage folds it into a [`StageError`].

use crate::output::{ArtifactId, ArtifactKind, Stage};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-docbundle library.
///
/// Per-artifact failures use [`StageError`] and are stored in
/// [`crate::output::RunSummary`] rather than propagated here.
#[derive(Debug, Error)]
pub enum ProcessError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file has a `.pdf` extension but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Decode errors ─────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Place libpdfium next to the binary, install it system-wide,\n\
or set PDFIUM_LIB_PATH=/path/to/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    /// The decoding collaborator failed; nothing downstream is well-defined.
    #[error("Decoding '{path}' with the {decoder} decoder failed: {detail}")]
    DecodeFailed {
        path: PathBuf,
        decoder: String,
        detail: String,
    },

    // ── Remote analysis errors ────────────────────────────────────────────
    /// Remote analysis is enabled but the API credential is absent.
    #[error(
        "Remote image analysis is enabled but {variable} is not set.\n\
Export it, or disable remote services with --no-remote-services."
    )]
    MissingCredential { variable: String },

    /// The configured provider could not be initialised.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The output root or the per-document scope directory cannot be created.
    #[error("Cannot create output directory '{path}': {source}")]
    OutputRootUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not write the final content file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Run outcome ───────────────────────────────────────────────────────
    /// The run was cancelled before the document was decoded.
    #[error("Processing of '{source_name}' was cancelled before decoding completed")]
    Cancelled { source_name: String },

    /// The run completed but at least one artifact failed.
    ///
    /// Returned by [`crate::output::RunSummary::into_result`] when the caller
    /// wants to treat any stage failure as an error.
    #[error("{failed} artifact failure(s) while processing '{source_name}'")]
    PartialFailure { source_name: String, failed: usize },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single table or picture.
///
/// Stored in [`crate::output::RunSummary::failures`]. The run continues and
/// the element is rendered with a placeholder in the content file.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum StageError {
    /// The table's cell grid could not be turned into a rectangular grid.
    #[error("Table {index}: conversion failed: {detail}")]
    TableConversion { index: usize, detail: String },

    /// No bitmap could be obtained for the picture.
    #[error("Picture {index}: extraction failed: {detail}")]
    PictureExtraction { index: usize, detail: String },

    /// The artifact writer could not persist the payload.
    #[error("{kind} {index}: failed to write '{path}': {detail}")]
    ArtifactWrite {
        kind: ArtifactKind,
        index: usize,
        path: PathBuf,
        detail: String,
    },

    /// The remote description call exceeded its timeout.
    #[error("Picture {index}: description timed out after {secs}s")]
    DescriptionTimeout { index: usize, secs: u64 },

    /// The remote description call failed.
    #[error("Picture {index}: description failed after {attempts} attempt(s): {detail}")]
    DescriptionFailed {
        index: usize,
        attempts: u32,
        detail: String,
    },

    /// The run was cancelled before this item was handled.
    #[error("{kind} {index}: cancelled during {stage}")]
    Cancelled {
        kind: ArtifactKind,
        index: usize,
        stage: Stage,
    },
}

impl StageError {
    /// The artifact this failure belongs to.
    pub fn artifact(&self) -> ArtifactId {
        match self {
            StageError::TableConversion { index, .. } => ArtifactId::table(*index),
            StageError::PictureExtraction { index, .. }
            | StageError::DescriptionTimeout { index, .. }
            | StageError::DescriptionFailed { index, .. } => ArtifactId::picture(*index),
            StageError::ArtifactWrite { kind, index, .. }
            | StageError::Cancelled { kind, index, .. } => ArtifactId::new(*kind, *index),
        }
    }

    /// The pipeline stage that produced this failure.
    pub fn stage(&self) -> Stage {
        match self {
            StageError::TableConversion { .. } => Stage::Tables,
            StageError::PictureExtraction { .. } => Stage::Pictures,
            StageError::ArtifactWrite { kind, .. } => match kind {
                ArtifactKind::Table => Stage::Tables,
                ArtifactKind::Picture => Stage::Pictures,
            },
            StageError::DescriptionTimeout { .. } | StageError::DescriptionFailed { .. } => {
                Stage::Descriptions
            }
            StageError::Cancelled { stage, .. } => *stage,
        }
    }

    /// Whether the artifact itself is missing (as opposed to only its description).
    pub fn is_artifact_lost(&self) -> bool {
        self.stage() != Stage::Descriptions
    }
}

/// Failure reported by a remote analysis collaborator.
#[derive(Debug, Clone, Error)]
pub enum RemoteServiceError {
    /// The call did not complete in time.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Authentication was rejected (401/403); retrying will not help.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Network or API error.
    #[error("{0}")]
    Api(String),
}

//! Result types: artifact identity, descriptions, and the run summary.
//!
//! An artifact is addressed by its [`ArtifactId`], `(kind, 1-based index)` in
//! document order, never by extraction or completion order. The same id always
//! maps to the same reference token for a given document, so the content file
//! and the extracted files stay cross-referenced across runs.

use crate::error::{ProcessError, StageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The two kinds of extracted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Table,
    Picture,
}

impl ArtifactKind {
    /// Name used inside reference tokens (`{doc}-table-{n}.csv`).
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Table => "table",
            ArtifactKind::Picture => "picture",
        }
    }

    /// File extension of the persisted payload.
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Table => "csv",
            ArtifactKind::Picture => "png",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one artifact: its kind plus its 1-based sequence index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactId {
    pub kind: ArtifactKind,
    pub index: usize,
}

impl ArtifactId {
    pub fn new(kind: ArtifactKind, index: usize) -> Self {
        Self { kind, index }
    }

    pub fn table(index: usize) -> Self {
        Self::new(ArtifactKind::Table, index)
    }

    pub fn picture(index: usize) -> Self {
        Self::new(ArtifactKind::Picture, index)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.index)
    }
}

/// A persisted artifact. The payload itself lives on disk only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedArtifact {
    pub id: ArtifactId,
    /// Reference token: the file name, also used as the link target in the content file.
    pub token: String,
    /// Full path of the written file.
    pub path: PathBuf,
}

/// Outcome of extracting one table or picture.
pub type ArtifactResult = Result<ExtractedArtifact, StageError>;

/// A description returned by the remote analysis collaborator for one picture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescription {
    pub artifact: ArtifactId,
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Decode,
    Tables,
    Pictures,
    Descriptions,
    Assemble,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Decode => "decoding",
            Stage::Tables => "table extraction",
            Stage::Pictures => "picture extraction",
            Stage::Descriptions => "picture description",
            Stage::Assemble => "content assembly",
        };
        f.write_str(s)
    }
}

/// Counts and timings for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub pages: usize,
    pub tables_found: usize,
    pub tables_extracted: usize,
    pub pictures_found: usize,
    pub pictures_extracted: usize,
    pub pictures_described: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub decode_duration_ms: u64,
    pub tables_duration_ms: u64,
    pub pictures_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// End-of-run report. Produced once; read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Input locator as given by the caller.
    pub source: String,
    /// Base name every artifact token is derived from.
    pub doc_base: String,
    /// The output scope directory.
    pub output_dir: PathBuf,
    /// The structured content file.
    pub content_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stats: RunStats,
    /// Persisted artifacts, tables first then pictures, each in index order.
    pub artifacts: Vec<ExtractedArtifact>,
    /// Descriptions received, in picture order.
    pub descriptions: Vec<ImageDescription>,
    /// Non-fatal failures, in artifact order.
    pub failures: Vec<StageError>,
    /// Whether the run was cancelled after decoding.
    pub cancelled: bool,
}

impl RunSummary {
    /// True when every artifact and description succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    /// Artifacts of one kind, in index order.
    pub fn artifacts_of(&self, kind: ArtifactKind) -> impl Iterator<Item = &ExtractedArtifact> {
        self.artifacts.iter().filter(move |a| a.id.kind == kind)
    }

    /// The description received for a picture, if any.
    pub fn description_for(&self, id: ArtifactId) -> Option<&ImageDescription> {
        self.descriptions.iter().find(|d| d.artifact == id)
    }

    /// Treat any recorded failure as an error.
    pub fn into_result(self) -> Result<RunSummary, ProcessError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(ProcessError::PartialFailure {
                source_name: self.source,
                failed: self.failures.len(),
            })
        }
    }
}

/// What a run would produce, computed from the decoded document alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentOverview {
    pub source: String,
    pub doc_base: String,
    pub decoder: String,
    pub pages: usize,
    pub text_blocks: usize,
    pub tables: usize,
    pub pictures: usize,
    /// Name of the output scope directory.
    pub scope_name: String,
    /// Content file name.
    pub content_file: String,
    /// Artifact tokens a run with tables and pictures enabled would write.
    pub planned_artifacts: Vec<String>,
}

//! Output scope and artifact persistence.
//!
//! Every file a run writes lives in one directory, the output scope:
//!
//! ```text
//! {output_root}/{doc_base}_output.{ext}/
//!     {doc_base}-table-{n}.csv
//!     {doc_base}-picture-{n}.png
//!     {doc_base}.md
//! ```
//!
//! Names depend only on the document base name, the artifact kind and its
//! 1-based index, so two runs over the same input produce the same file names.

use crate::error::ProcessError;
use crate::output::{ArtifactId, ArtifactKind, ExtractedArtifact};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Fixed suffix appended to the document base name to form the scope directory.
pub const SCOPE_SUFFIX: &str = "_output";

/// The per-run output directory.
#[derive(Debug, Clone)]
pub struct OutputScope {
    dir: PathBuf,
    doc_base: String,
}

impl OutputScope {
    /// Scope directory name for a document.
    ///
    /// `report` + `pdf` → `report_output.pdf`; no extension → `report_output`.
    pub fn name_for(doc_base: &str, extension: Option<&str>) -> String {
        match extension {
            Some(ext) if !ext.is_empty() => format!("{doc_base}{SCOPE_SUFFIX}.{ext}"),
            _ => format!("{doc_base}{SCOPE_SUFFIX}"),
        }
    }

    /// Create (or reuse) the scope under `output_root`.
    ///
    /// Creates `output_root` when absent. Files already in the scope are left
    /// in place until [`OutputScope::clear_stale`] is called.
    pub fn create(
        output_root: &Path,
        doc_base: &str,
        extension: Option<&str>,
    ) -> Result<Self, ProcessError> {
        let dir = output_root.join(Self::name_for(doc_base, extension));
        std::fs::create_dir_all(&dir).map_err(|e| ProcessError::OutputRootUnavailable {
            path: dir.clone(),
            source: e,
        })?;

        Ok(Self {
            dir,
            doc_base: doc_base.to_string(),
        })
    }

    /// Remove the artifacts and content file an earlier run of the same
    /// document left behind. Unrelated files are left alone.
    pub async fn clear_stale(&self) -> Result<usize, ProcessError> {
        let removed = self
            .remove_stale()
            .await
            .map_err(|e| ProcessError::OutputRootUnavailable {
                path: self.dir.clone(),
                source: e,
            })?;
        if removed > 0 {
            info!(
                "Removed {} stale file(s) from {}",
                removed,
                self.dir.display()
            );
        }
        Ok(removed)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn doc_base(&self) -> &str {
        &self.doc_base
    }

    /// Reference token (file name) of an artifact.
    pub fn token(&self, id: ArtifactId) -> String {
        artifact_token(&self.doc_base, id)
    }

    /// Path of the structured content file.
    pub fn content_path(&self) -> PathBuf {
        self.dir.join(content_file_name(&self.doc_base))
    }

    /// Delete files this document's naming pattern owns.
    async fn remove_stale(&self) -> io::Result<usize> {
        let content = content_file_name(&self.doc_base);
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == content || is_artifact_name(&self.doc_base, &name) {
                debug!("Removing stale {}", name);
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// `{doc_base}-{kind}-{n}.{ext}`
pub fn artifact_token(doc_base: &str, id: ArtifactId) -> String {
    format!(
        "{}-{}-{}.{}",
        doc_base,
        id.kind.as_str(),
        id.index,
        id.kind.extension()
    )
}

/// `{doc_base}.md`
pub fn content_file_name(doc_base: &str) -> String {
    format!("{doc_base}.md")
}

/// Whether `name` is `{doc_base}-table-<digits>.csv` or `{doc_base}-picture-<digits>.png`.
fn is_artifact_name(doc_base: &str, name: &str) -> bool {
    let Some(rest) = name.strip_prefix(doc_base).and_then(|r| r.strip_prefix('-')) else {
        return false;
    };
    [ArtifactKind::Table, ArtifactKind::Picture].iter().any(|kind| {
        rest.strip_prefix(kind.as_str())
            .and_then(|r| r.strip_prefix('-'))
            .and_then(|r| r.strip_suffix(kind.extension()))
            .and_then(|r| r.strip_suffix('.'))
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    })
}

/// Bytes to persist for one artifact.
#[derive(Debug, Clone, Copy)]
pub enum ArtifactPayload<'a> {
    /// A rectangular grid; written as CSV with one record per row.
    Table(&'a [Vec<String>]),
    /// Encoded PNG bytes.
    Picture(&'a [u8]),
}

impl ArtifactPayload<'_> {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            ArtifactPayload::Table(_) => ArtifactKind::Table,
            ArtifactPayload::Picture(_) => ArtifactKind::Picture,
        }
    }
}

/// Persists artifacts into an [`OutputScope`].
///
/// Each artifact has its own path, so writers for different artifacts never
/// touch the same file.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    scope: OutputScope,
}

impl ArtifactWriter {
    pub fn new(scope: OutputScope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &OutputScope {
        &self.scope
    }

    /// Write one artifact and return its reference.
    pub async fn write(
        &self,
        index: usize,
        payload: ArtifactPayload<'_>,
    ) -> io::Result<ExtractedArtifact> {
        let id = ArtifactId::new(payload.kind(), index);
        let token = self.scope.token(id);
        let path = self.scope.dir.join(&token);

        match payload {
            ArtifactPayload::Table(rows) => tokio::fs::write(&path, encode_csv(rows)?).await?,
            ArtifactPayload::Picture(png) => tokio::fs::write(&path, png).await?,
        }
        debug!("Wrote {} → {}", id, path.display());

        Ok(ExtractedArtifact { id, token, path })
    }

    /// Path an artifact would be written to.
    pub fn path_for(&self, id: ArtifactId) -> PathBuf {
        self.scope.dir.join(self.scope.token(id))
    }
}

/// One CSV record per row, no header.
fn encode_csv(rows: &[Vec<String>]) -> io::Result<Vec<u8>> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for row in rows {
        wtr.write_record(row).map_err(io::Error::from)?;
    }
    wtr.into_inner().map_err(|e| e.into_error())
}

/// Write the content file atomically: temp file in the scope, then rename.
pub async fn write_content(scope: &OutputScope, content: &str) -> Result<PathBuf, ProcessError> {
    let path = scope.content_path();
    let tmp_path = path.with_extension("md.tmp");

    tokio::fs::write(&tmp_path, content)
        .await
        .map_err(|e| ProcessError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, &path)
        .await
        .map_err(|e| ProcessError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;

    Ok(path)
}

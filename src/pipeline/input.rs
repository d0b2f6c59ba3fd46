//! Input resolution: normalise a user-supplied path or URL to a local file.
//!
//! Decoders need a file-system path. URL inputs are downloaded into a
//! `TempDir` that lives as long as the returned [`ResolvedInput`], so cleanup
//! happens automatically when the run ends, even on panic.
//!
//! The document base name (`report` for `report.pdf`) is taken from the
//! resolved file name; every artifact token is derived from it.

use crate::error::ProcessError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// The resolved input: either a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL (or in-memory bytes); written to a temp directory.
    /// The `TempDir` is kept alive to prevent cleanup until processing completes.
    Temporary { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the document regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Temporary { path, .. } => path,
        }
    }

    /// Base name of the document: the file name without its extension.
    pub fn doc_base(&self) -> String {
        doc_base(self.path())
    }

    /// Lower-cased extension of the document, if any.
    pub fn extension(&self) -> Option<String> {
        extension(self.path())
    }
}

/// Base name of a document path.
pub fn doc_base(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string())
}

/// Lower-cased extension of a path, if any.
pub fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .filter(|e| !e.is_empty())
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a readable local file.
///
/// If the input is a URL, download it to a temporary directory.
/// If the input is a local file, validate it exists and is readable.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, ProcessError> {
    if input.trim().is_empty() {
        return Err(ProcessError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// Write in-memory document bytes to a temp directory under `file_name`.
pub fn resolve_bytes(bytes: &[u8], file_name: &str) -> Result<ResolvedInput, ProcessError> {
    let name = Path::new(file_name)
        .file_name()
        .ok_or_else(|| ProcessError::InvalidInput {
            input: file_name.to_string(),
        })?;

    let temp_dir = TempDir::new().map_err(|e| ProcessError::Internal(format!("tempdir: {e}")))?;
    let path = temp_dir.path().join(name);
    std::fs::write(&path, bytes)
        .map_err(|e| ProcessError::Internal(format!("Failed to write temp file: {e}")))?;
    check_pdf_magic(&path, bytes)?;

    Ok(ResolvedInput::Temporary {
        path,
        _temp_dir: temp_dir,
    })
}

/// Resolve a local file path, validating existence and readability.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, ProcessError> {
    let path = PathBuf::from(path_str);

    if !path.is_file() {
        return Err(ProcessError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut magic = [0u8; 4];
            let n = f.read(&mut magic).unwrap_or(0);
            check_pdf_magic(&path, &magic[..n])?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ProcessError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(ProcessError::FileNotFound { path });
        }
    }

    debug!("Resolved local document: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// `.pdf` inputs must start with `%PDF`; other formats are left to their decoder.
fn check_pdf_magic(path: &Path, head: &[u8]) -> Result<(), ProcessError> {
    if extension(path).as_deref() != Some("pdf") || head.len() < 4 {
        return Ok(());
    }
    if &head[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&head[..4]);
        return Err(ProcessError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, ProcessError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ProcessError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ProcessError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ProcessError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ProcessError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = filename_from_url(url);

    let temp_dir = TempDir::new().map_err(|e| ProcessError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProcessError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| ProcessError::Internal(format!("Failed to write temp file: {}", e)))?;

    check_pdf_magic(&file_path, &bytes)?;

    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Temporary {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Extract a reasonable file name from the URL path.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

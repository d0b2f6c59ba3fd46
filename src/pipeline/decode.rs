//! Decoding collaborator seam.
//!
//! A [`DocumentDecoder`] turns a document file into a [`DecodedDocument`].
//! Decoders are synchronous and usually CPU-bound (pdfium is not async-safe),
//! so [`decode`] runs them on the blocking pool. Any decoder failure is fatal
//! to the run.

use crate::config::{ProcessingConfig, TableMatchMode};
use crate::document::DecodedDocument;
use crate::error::ProcessError;
use crate::pipeline::docling_json::DoclingJsonDecoder;
use crate::pipeline::input::extension;
use crate::pipeline::pdfium::PdfiumDecoder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Options forwarded to the decoder. Stages never read these.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOptions {
    pub do_ocr: bool,
    pub do_table_structure: bool,
    pub table_mode: TableMatchMode,
    pub do_cell_matching: bool,
    pub generate_page_images: bool,
    pub page_image_max_pixels: u32,
    pub password: Option<String>,
}

impl From<&ProcessingConfig> for DecodeOptions {
    fn from(config: &ProcessingConfig) -> Self {
        Self {
            do_ocr: config.do_ocr,
            do_table_structure: config.do_table_structure,
            table_mode: config.table_mode,
            do_cell_matching: config.do_cell_matching,
            generate_page_images: config.generate_page_images,
            page_image_max_pixels: config.page_image_max_pixels,
            password: config.password.clone(),
        }
    }
}

/// Turns a document file into the Decoded Document Model.
pub trait DocumentDecoder: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Decode the whole document.
    fn decode(&self, path: &Path, options: &DecodeOptions) -> Result<DecodedDocument, ProcessError>;
}

/// Pick a built-in decoder from the file extension.
///
/// `.json` files are read as docling-style document exports; everything else
/// goes through pdfium.
pub fn decoder_for(path: &Path) -> Arc<dyn DocumentDecoder> {
    match extension(path).as_deref() {
        Some("json") => Arc::new(DoclingJsonDecoder),
        _ => Arc::new(PdfiumDecoder),
    }
}

/// Run `decoder` on the blocking pool.
pub async fn decode(
    decoder: Arc<dyn DocumentDecoder>,
    path: &Path,
    options: DecodeOptions,
) -> Result<DecodedDocument, ProcessError> {
    let path: PathBuf = path.to_path_buf();
    debug!("Decoding {} with {}", path.display(), decoder.name());

    tokio::task::spawn_blocking(move || decoder.decode(&path, &options))
        .await
        .map_err(|e| ProcessError::Internal(format!("Decode task panicked: {}", e)))?
}

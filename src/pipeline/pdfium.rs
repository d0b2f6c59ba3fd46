//! PDF decoding via pdfium.
//!
//! pdfium gives us page text, embedded image objects, and page rendering; it
//! has no layout or table-structure model. This decoder therefore reports, per
//! page, the page text as paragraph blocks followed by the page's embedded
//! images, and never reports table regions. OCR and table options are logged
//! and otherwise ignored.
//!
//! ## Binding
//!
//! The pdfium shared library is looked up in this order: `PDFIUM_LIB_PATH`,
//! the current working directory, then the system library path.

use crate::document::{DecodedDocument, DocElement, PageInfo, PictureElement, Provenance, TextElement};
use crate::error::ProcessError;
use crate::pipeline::decode::{DecodeOptions, DocumentDecoder};
use pdfium_render::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decoder backed by the pdfium C++ library.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumDecoder;

impl DocumentDecoder for PdfiumDecoder {
    fn name(&self) -> &str {
        "pdfium"
    }

    fn decode(&self, path: &Path, options: &DecodeOptions) -> Result<DecodedDocument, ProcessError> {
        let pdfium = bind_pdfium()?;
        decode_with(&pdfium, path, options)
    }
}

/// Bind to a pdfium library.
fn bind_pdfium() -> Result<Pdfium, ProcessError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(lib) if !lib.is_empty() => Pdfium::bind_to_library(lib),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| ProcessError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

fn decode_with(
    pdfium: &Pdfium,
    pdf_path: &Path,
    options: &DecodeOptions,
) -> Result<DecodedDocument, ProcessError> {
    let password = options.password.as_deref();
    let document = pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                ProcessError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                ProcessError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            ProcessError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })?;

    if options.do_table_structure {
        debug!("pdfium backend has no table-structure model; no table regions will be reported");
    }
    if options.do_ocr {
        debug!("pdfium backend has no OCR engine; bitmap-only text is not recovered");
    }

    let render_config = PdfRenderConfig::new()
        .set_target_width(options.page_image_max_pixels as i32)
        .set_maximum_height(options.page_image_max_pixels as i32);

    let mut pages = Vec::new();
    let mut elements = Vec::new();

    for (idx, page) in document.pages().iter().enumerate() {
        let page_no = idx + 1;

        let text = page
            .text()
            .map_err(|e| ProcessError::DecodeFailed {
                path: pdf_path.to_path_buf(),
                decoder: "pdfium".into(),
                detail: format!("page {page_no}: text extraction failed: {:?}", e),
            })?
            .all();
        for paragraph in split_paragraphs(&text) {
            elements.push(DocElement::Text(TextElement::paragraph(paragraph, page_no)));
        }

        for object in page.objects().iter() {
            if let Some(image_object) = object.as_image_object() {
                let image = match image_object.get_raw_image() {
                    Ok(img) => Some(img),
                    Err(e) => {
                        warn!("Page {}: embedded image unreadable: {:?}", page_no, e);
                        None
                    }
                };
                elements.push(DocElement::Picture(PictureElement {
                    image,
                    caption: None,
                    prov: Provenance::page(page_no),
                }));
            }
        }

        let image = if options.generate_page_images {
            match page.render_with_config(&render_config) {
                Ok(bitmap) => Some(Arc::new(bitmap.as_image())),
                Err(e) => {
                    warn!("Page {}: rendering failed: {:?}", page_no, e);
                    None
                }
            }
        } else {
            None
        };

        pages.push(PageInfo {
            page_no,
            width: page.width().value,
            height: page.height().value,
            image,
        });
    }

    info!(
        "PDF decoded: {} pages, {} elements",
        pages.len(),
        elements.len()
    );

    Ok(DecodedDocument {
        name: pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        pages,
        elements,
    })
}

/// Split raw page text into paragraphs at blank lines.
fn split_paragraphs(text: &str) -> Vec<String> {
    let normalised = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in normalised.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let text = "Title line\r\nsecond line\r\n\r\nNext para\n  \nLast";
        assert_eq!(
            split_paragraphs(text),
            vec!["Title line\nsecond line", "Next para", "Last"]
        );
    }

    #[test]
    fn empty_text_yields_no_paragraphs() {
        assert!(split_paragraphs("").is_empty());
        assert!(split_paragraphs("\n\n  \r\n").is_empty());
    }
}

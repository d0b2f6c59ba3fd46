//! Image Extraction Stage.
//!
//! For every picture element, in document order: obtain a bitmap, encode it
//! as PNG, persist it, and, when a describer is available, queue a
//! description request for the persisted bytes. Bitmap extraction and
//! persistence happen in order on the calling task; only the remote
//! descriptions run concurrently.
//!
//! A picture without an embedded bitmap is cropped from its rendered page
//! when the decoder supplied both a page image and a bounding box.

use crate::config::ProcessingConfig;
use crate::document::{DecodedDocument, PictureElement};
use crate::error::StageError;
use crate::output::{ArtifactId, ArtifactKind, ArtifactResult, ExtractedArtifact, Stage};
use crate::pipeline::describe::{describe_all, DescriptionOutcome, DescriptionRequest, ImageDescriber};
use crate::pipeline::encode;
use crate::pipeline::writer::{ArtifactPayload, ArtifactWriter};
use crate::prompts::{description_prompt, DEFAULT_DESCRIPTION_PROMPT};
use image::DynamicImage;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result for one picture element.
#[derive(Debug, Clone)]
pub struct PictureOutcome {
    pub artifact: ArtifactResult,
    /// `None` when no description was requested: remote analysis is off, or
    /// the picture itself could not be extracted.
    pub description: Option<DescriptionOutcome>,
}

/// Extract every picture in document order and describe the ones persisted.
///
/// Returns one outcome per picture element, position `i` holding picture
/// `i + 1`. Returns an empty list when picture extraction is disabled.
pub async fn extract_images(
    doc: &DecodedDocument,
    writer: &ArtifactWriter,
    config: &ProcessingConfig,
    describer: Option<&Arc<dyn ImageDescriber>>,
) -> Vec<PictureOutcome> {
    if !config.do_picture_extraction {
        debug!("Picture extraction disabled");
        return Vec::new();
    }

    let pictures: Vec<&PictureElement> = doc.pictures().collect();
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(Stage::Pictures, pictures.len());
    }

    let base_prompt = config
        .description_prompt
        .as_deref()
        .unwrap_or(DEFAULT_DESCRIPTION_PROMPT);

    let mut artifacts = Vec::with_capacity(pictures.len());
    let mut requests = Vec::new();

    for (i, picture) in pictures.into_iter().enumerate() {
        let index = i + 1;
        let result = if config.cancellation.is_cancelled() {
            Err(StageError::Cancelled {
                kind: ArtifactKind::Picture,
                index,
                stage: Stage::Pictures,
            })
        } else {
            extract_one(doc, picture, index, writer).await
        };

        match result {
            Ok((artifact, png)) => {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_artifact_complete(artifact.id, &artifact.token);
                }
                if describer.is_some() {
                    requests.push(DescriptionRequest {
                        artifact: artifact.id,
                        png: Arc::from(png),
                        prompt: description_prompt(base_prompt, picture.caption.as_deref()),
                    });
                }
                artifacts.push(Ok(artifact));
            }
            Err(e) => {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_artifact_error(ArtifactId::picture(index), &e);
                }
                artifacts.push(Err(e));
            }
        }
    }

    let mut descriptions = match describer {
        Some(describer) if !requests.is_empty() => describe_all(describer, requests, config).await,
        _ => Default::default(),
    };

    artifacts
        .into_iter()
        .map(|artifact| {
            let description = artifact
                .as_ref()
                .ok()
                .and_then(|a| descriptions.remove(&a.id));
            PictureOutcome {
                artifact,
                description,
            }
        })
        .collect()
}

async fn extract_one(
    doc: &DecodedDocument,
    picture: &PictureElement,
    index: usize,
    writer: &ArtifactWriter,
) -> Result<(ExtractedArtifact, Vec<u8>), StageError> {
    let bitmap = picture_bitmap(doc, picture).ok_or_else(|| {
        warn!("Picture {}: no bitmap available", index);
        StageError::PictureExtraction {
            index,
            detail: "no bitmap in document and no page image to crop from".into(),
        }
    })?;

    let png = encode::encode_png(&bitmap).map_err(|e| StageError::PictureExtraction {
        index,
        detail: format!("PNG encoding failed: {e}"),
    })?;

    let artifact = writer
        .write(index, ArtifactPayload::Picture(&png))
        .await
        .map_err(|e| StageError::ArtifactWrite {
            kind: ArtifactKind::Picture,
            index,
            path: writer.path_for(ArtifactId::picture(index)),
            detail: e.to_string(),
        })?;

    Ok((artifact, png))
}

/// The picture's own bitmap, or a crop of its rendered page.
fn picture_bitmap<'a>(doc: &'a DecodedDocument, picture: &'a PictureElement) -> Option<Cow<'a, DynamicImage>> {
    if let Some(ref img) = picture.image {
        return Some(Cow::Borrowed(img));
    }

    let bbox = picture.prov.bbox?;
    let page = doc.page(picture.prov.page_no)?;
    let page_image = page.image.as_ref()?;
    if page.width <= 0.0 || page.height <= 0.0 {
        return None;
    }

    let sx = page_image.width() as f32 / page.width;
    let sy = page_image.height() as f32 / page.height;
    let x0 = (bbox.l.min(bbox.r) * sx).max(0.0) as u32;
    let y0 = (bbox.t.min(bbox.b) * sy).max(0.0) as u32;
    let x1 = ((bbox.l.max(bbox.r) * sx).ceil() as u32).min(page_image.width());
    let y1 = ((bbox.t.max(bbox.b) * sy).ceil() as u32).min(page_image.height());
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    debug!(
        "Cropping page {} at ({}, {}) {}x{}",
        page.page_no,
        x0,
        y0,
        x1 - x0,
        y1 - y0
    );
    Some(Cow::Owned(page_image.crop_imm(x0, y0, x1 - x0, y1 - y0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{BoundingBox, DocElement, PageInfo, Provenance};
    use crate::pipeline::writer::OutputScope;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn bitmap(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([0, 128, 255, 255])))
    }

    fn page_with_image() -> PageInfo {
        PageInfo {
            page_no: 1,
            width: 100.0,
            height: 200.0,
            image: Some(Arc::new(bitmap(200, 400))),
        }
    }

    #[test]
    fn crop_scales_points_to_pixels() {
        let doc = DecodedDocument {
            name: "d".into(),
            pages: vec![page_with_image()],
            elements: vec![],
        };
        let picture = PictureElement {
            image: None,
            caption: None,
            prov: Provenance {
                page_no: 1,
                bbox: Some(BoundingBox {
                    l: 10.0,
                    t: 20.0,
                    r: 60.0,
                    b: 45.0,
                }),
            },
        };
        let crop = picture_bitmap(&doc, &picture).unwrap();
        assert_eq!((crop.width(), crop.height()), (100, 50));
    }

    #[test]
    fn no_bitmap_without_page_image() {
        let doc = DecodedDocument::default();
        assert!(picture_bitmap(&doc, &PictureElement::default()).is_none());
    }

    #[tokio::test]
    async fn pictures_persisted_without_descriptions_when_remote_off() {
        let tmp = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(OutputScope::create(tmp.path(), "doc", Some("pdf")).unwrap());
        let doc = DecodedDocument {
            name: "doc".into(),
            pages: vec![],
            elements: vec![
                DocElement::Picture(PictureElement {
                    image: Some(bitmap(3, 3)),
                    ..Default::default()
                }),
                DocElement::Picture(PictureElement::default()),
            ],
        };
        let config = ProcessingConfig::builder()
            .enable_remote_services(false)
            .build()
            .unwrap();

        let outcomes = extract_images(&doc, &writer, &config, None).await;

        assert_eq!(outcomes.len(), 2);
        let first = outcomes[0].artifact.as_ref().unwrap();
        assert_eq!(first.token, "doc-picture-1.png");
        assert!(first.path.exists());
        assert!(outcomes[0].description.is_none());
        assert!(matches!(
            outcomes[1].artifact,
            Err(StageError::PictureExtraction { index: 2, .. })
        ));
    }
}

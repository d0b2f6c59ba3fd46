//! Content Assembler: the Markdown file that ties a bundle together.
//!
//! The decoded elements are walked in document order. Tables and pictures are
//! matched to their extraction results by kind and position (the `n`-th
//! table element is table `n`), never by content, so the references always
//! appear in document order whatever order the work finished in.

use crate::document::{DecodedDocument, DocElement, TextElement, TextLabel};
use crate::output::ArtifactResult;
use crate::pipeline::images::PictureOutcome;
use std::time::Duration;

/// Run facts shown in the header, and which stages ran.
#[derive(Debug, Clone)]
pub struct RunMetadata<'a> {
    pub source: &'a str,
    pub doc_base: &'a str,
    pub elapsed: Duration,
    pub tables_enabled: bool,
    pub pictures_enabled: bool,
}

/// Build the content document.
pub fn assemble(
    doc: &DecodedDocument,
    tables: &[ArtifactResult],
    pictures: &[PictureOutcome],
    meta: &RunMetadata<'_>,
) -> String {
    let mut blocks: Vec<String> = vec![header(tables, pictures, meta)];

    let mut table_n = 0;
    let mut picture_n = 0;

    for element in &doc.elements {
        match element {
            DocElement::Text(text) => {
                if let Some(block) = text_block(text) {
                    blocks.push(block);
                }
            }
            DocElement::Table(table) => {
                table_n += 1;
                if !meta.tables_enabled {
                    continue;
                }
                match tables.get(table_n - 1) {
                    Some(Ok(artifact)) => {
                        let mut block = format!(
                            "**Table {}:** [{}]({})",
                            table_n,
                            artifact.token,
                            link_target(&artifact.token)
                        );
                        if let Some(caption) = non_blank(table.caption.as_deref()) {
                            block.push_str(&format!("\n\n*{}*", caption));
                        }
                        blocks.push(block);
                    }
                    Some(Err(e)) => blocks.push(unavailable("Table", table_n, &e.to_string())),
                    None => blocks.push(unavailable("Table", table_n, "not extracted")),
                }
            }
            DocElement::Picture(picture) => {
                picture_n += 1;
                if !meta.pictures_enabled {
                    continue;
                }
                let Some(outcome) = pictures.get(picture_n - 1) else {
                    blocks.push(unavailable("Picture", picture_n, "not extracted"));
                    continue;
                };
                match &outcome.artifact {
                    Ok(artifact) => {
                        let alt = non_blank(picture.caption.as_deref()).unwrap_or(&artifact.token);
                        blocks.push(format!(
                            "![{}]({})",
                            escape_alt(alt),
                            link_target(&artifact.token)
                        ));
                        // Every persisted picture carries a description line.
                        match &outcome.description {
                            Some(Ok(description)) => {
                                blocks.push(format!("**Description:** {}", description.text))
                            }
                            Some(Err(_)) | None => blocks.push(NO_DESCRIPTION.to_string()),
                        }
                    }
                    Err(e) => blocks.push(unavailable("Picture", picture_n, &e.to_string())),
                }
            }
        }
    }

    let mut out = blocks.join("\n\n");
    out.push('\n');
    out
}

const NO_DESCRIPTION: &str = "*No description available.*";

fn header(tables: &[ArtifactResult], pictures: &[PictureOutcome], meta: &RunMetadata<'_>) -> String {
    let table_failed = tables.iter().filter(|r| r.is_err()).count();
    let picture_failed = pictures.iter().filter(|p| p.artifact.is_err()).count();

    format!(
        "# {}\n\n- Source: `{}`\n- Processing time: {:.2} seconds\n- Tables: {}\n- Pictures: {}",
        meta.doc_base,
        meta.source,
        meta.elapsed.as_secs_f64(),
        count_line(tables.len() - table_failed, table_failed),
        count_line(pictures.len() - picture_failed, picture_failed),
    )
}

fn count_line(extracted: usize, failed: usize) -> String {
    if failed == 0 {
        extracted.to_string()
    } else {
        format!("{extracted} ({failed} failed)")
    }
}

fn text_block(text: &TextElement) -> Option<String> {
    let body = text.text.trim();
    if body.is_empty() {
        return None;
    }
    let block = match text.label {
        TextLabel::Title => format!("# {body}"),
        TextLabel::SectionHeader(level) => {
            format!("{} {}", "#".repeat((level + 1).clamp(2, 6)), body)
        }
        TextLabel::ListItem => format!("- {body}"),
        TextLabel::Caption => format!("*{body}*"),
        TextLabel::Code => format!("```\n{}\n```", text.text.trim_end()),
        TextLabel::Paragraph => body.to_string(),
    };
    Some(block)
}

fn unavailable(kind: &str, n: usize, reason: &str) -> String {
    format!("> **{kind} {n} unavailable:** {reason}")
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Link destination for a token; wrapped in `<>` when it contains spaces.
fn link_target(token: &str) -> String {
    if token.contains(' ') {
        format!("<{token}>")
    } else {
        token.to_string()
    }
}

fn escape_alt(alt: &str) -> String {
    alt.replace('[', "\\[").replace(']', "\\]").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{PictureElement, TableElement};
    use crate::error::StageError;
    use crate::output::{ArtifactId, ArtifactKind, ExtractedArtifact, ImageDescription, Stage};
    use std::path::PathBuf;

    fn artifact(id: ArtifactId) -> ExtractedArtifact {
        ExtractedArtifact {
            id,
            token: format!("doc-{}-{}.{}", id.kind.as_str(), id.index, id.kind.extension()),
            path: PathBuf::from("unused"),
        }
    }

    fn described(index: usize, text: &str) -> PictureOutcome {
        PictureOutcome {
            artifact: Ok(artifact(ArtifactId::picture(index))),
            description: Some(Ok(ImageDescription {
                artifact: ArtifactId::picture(index),
                text: text.into(),
                input_tokens: 0,
                output_tokens: 0,
                duration_ms: 0,
            })),
        }
    }

    fn meta() -> RunMetadata<'static> {
        RunMetadata {
            source: "doc.pdf",
            doc_base: "doc",
            elapsed: Duration::from_millis(1500),
            tables_enabled: true,
            pictures_enabled: true,
        }
    }

    fn sample_doc() -> DecodedDocument {
        DecodedDocument {
            name: "doc".into(),
            pages: vec![],
            elements: vec![
                DocElement::Text(TextElement {
                    label: TextLabel::SectionHeader(1),
                    text: "Intro".into(),
                    prov: Default::default(),
                }),
                DocElement::Picture(PictureElement {
                    caption: Some("Figure 1".into()),
                    ..Default::default()
                }),
                DocElement::Text(TextElement::paragraph("Body text.", 1)),
                DocElement::Table(TableElement::default()),
                DocElement::Picture(PictureElement::default()),
            ],
        }
    }

    #[test]
    fn header_reports_counts_and_time() {
        let out = assemble(&DecodedDocument::default(), &[], &[], &meta());
        assert_eq!(
            out,
            "# doc\n\n- Source: `doc.pdf`\n- Processing time: 1.50 seconds\n- Tables: 0\n- Pictures: 0\n"
        );
    }

    #[test]
    fn references_follow_document_order() {
        let tables = vec![Ok(artifact(ArtifactId::table(1)))];
        let pictures = vec![described(1, "A map."), described(2, "A logo.")];
        let out = assemble(&sample_doc(), &tables, &pictures, &meta());

        let order: Vec<usize> = ["## Intro", "![Figure 1](doc-picture-1.png)", "**Description:** A map.",
            "Body text.", "**Table 1:** [doc-table-1.csv](doc-table-1.csv)",
            "![doc-picture-2.png](doc-picture-2.png)", "**Description:** A logo."]
            .iter()
            .map(|needle| out.find(needle).unwrap_or_else(|| panic!("missing {needle}")))
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]), "{out}");
    }

    #[test]
    fn failures_render_placeholders() {
        let tables = vec![Err(StageError::TableConversion {
            index: 1,
            detail: "empty grid (0x0)".into(),
        })];
        let pictures = vec![
            PictureOutcome {
                artifact: Ok(artifact(ArtifactId::picture(1))),
                description: Some(Err(StageError::DescriptionTimeout { index: 1, secs: 60 })),
            },
            PictureOutcome {
                artifact: Err(StageError::PictureExtraction {
                    index: 2,
                    detail: "no bitmap".into(),
                }),
                description: None,
            },
        ];
        let out = assemble(&sample_doc(), &tables, &pictures, &meta());

        assert!(out.contains("- Tables: 0 (1 failed)"));
        assert!(out.contains("- Pictures: 1 (1 failed)"));
        assert!(out.contains("> **Table 1 unavailable:** Table 1: conversion failed: empty grid (0x0)"));
        assert!(out.contains("*No description available.*"));
        assert!(out.contains("> **Picture 2 unavailable:**"));
        assert!(!out.contains("doc-table-1.csv"));
    }

    #[test]
    fn disabled_stages_emit_nothing() {
        let m = RunMetadata {
            tables_enabled: false,
            pictures_enabled: false,
            ..meta()
        };
        let out = assemble(&sample_doc(), &[], &[], &m);
        assert!(!out.contains("Table 1"));
        assert!(!out.contains("Picture 1"));
        assert!(!out.contains("!["));
        assert!(out.contains("- Tables: 0\n- Pictures: 0"));
        assert!(out.contains("Body text."));
    }

    #[test]
    fn undescribed_picture_gets_a_note() {
        let doc = DecodedDocument {
            elements: vec![
                DocElement::Picture(PictureElement::default()),
                DocElement::Picture(PictureElement::default()),
            ],
            ..Default::default()
        };
        let pictures = vec![
            // Remote analysis off: nothing was requested.
            PictureOutcome {
                artifact: Ok(artifact(ArtifactId::picture(1))),
                description: None,
            },
            PictureOutcome {
                artifact: Ok(artifact(ArtifactId::picture(2))),
                description: Some(Err(StageError::Cancelled {
                    kind: ArtifactKind::Picture,
                    index: 2,
                    stage: Stage::Descriptions,
                })),
            },
        ];
        let out = assemble(&doc, &[], &pictures, &meta());

        assert_eq!(out.matches(NO_DESCRIPTION).count(), 2, "{out}");
        let image_at = out.find("![doc-picture-1.png](doc-picture-1.png)").unwrap();
        let note_at = out.find(NO_DESCRIPTION).unwrap();
        assert!(image_at < note_at);
        assert!(!out.contains("**Description:**"));
    }

    #[test]
    fn text_labels_render() {
        let t = |label, text: &str| TextElement {
            label,
            text: text.into(),
            prov: Default::default(),
        };
        assert_eq!(text_block(&t(TextLabel::Title, "T")).unwrap(), "# T");
        assert_eq!(text_block(&t(TextLabel::SectionHeader(2), "S")).unwrap(), "### S");
        assert_eq!(text_block(&t(TextLabel::SectionHeader(9), "S")).unwrap(), "###### S");
        assert_eq!(text_block(&t(TextLabel::ListItem, "i")).unwrap(), "- i");
        assert_eq!(text_block(&t(TextLabel::Caption, "c")).unwrap(), "*c*");
        assert_eq!(text_block(&t(TextLabel::Code, "x = 1\n")).unwrap(), "```\nx = 1\n```");
        assert!(text_block(&t(TextLabel::Paragraph, "  ")).is_none());
    }

    #[test]
    fn tokens_with_spaces_use_angle_brackets() {
        assert_eq!(link_target("my doc-table-1.csv"), "<my doc-table-1.csv>");
        assert_eq!(link_target("doc-table-1.csv"), "doc-table-1.csv");
    }
}

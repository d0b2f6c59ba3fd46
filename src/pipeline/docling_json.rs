//! Decoder for docling-style `DoclingDocument` JSON exports.
//!
//! Layout analysis and table-structure recognition have already been done by
//! whatever produced the export; this decoder only maps its node tree onto the
//! Decoded Document Model. Reading order is the depth-first walk of
//! `body.children`, following `$ref` pointers into `texts`, `groups`,
//! `tables` and `pictures`.
//!
//! Texts referenced as a table or picture caption are attached to that element
//! and not emitted again as prose. Page furniture (`page_header`,
//! `page_footer`, or anything outside the `body` content layer) is dropped.

use crate::document::{
    BoundingBox, DecodedDocument, DocElement, PageInfo, PictureElement, Provenance, TableCell,
    TableElement, TextElement, TextLabel,
};
use crate::error::ProcessError;
use crate::pipeline::decode::{DecodeOptions, DocumentDecoder};
use base64::Engine;
use image::DynamicImage;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DECODER_NAME: &str = "docling-json";

/// Reads `DoclingDocument` JSON files.
#[derive(Debug, Default, Clone, Copy)]
pub struct DoclingJsonDecoder;

impl DocumentDecoder for DoclingJsonDecoder {
    fn name(&self) -> &str {
        DECODER_NAME
    }

    fn decode(&self, path: &Path, options: &DecodeOptions) -> Result<DecodedDocument, ProcessError> {
        let raw = std::fs::read(path).map_err(|e| decode_error(path, format!("read failed: {e}")))?;
        let export: DlDocument = serde_json::from_slice(&raw)
            .map_err(|e| decode_error(path, format!("invalid document JSON: {e}")))?;

        if options.do_ocr || options.do_table_structure {
            debug!(
                "OCR/table options have no effect on pre-analysed exports (table_mode={:?})",
                options.table_mode
            );
        }

        let mut doc = to_document(&export, options.generate_page_images);
        if doc.name.is_empty() {
            doc.name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
        }

        info!(
            "Export decoded: {} pages, {} elements",
            doc.pages.len(),
            doc.elements.len()
        );
        Ok(doc)
    }
}

fn decode_error(path: &Path, detail: String) -> ProcessError {
    ProcessError::DecodeFailed {
        path: path.to_path_buf(),
        decoder: DECODER_NAME.into(),
        detail,
    }
}

// ── Export schema ────────────────────────────────────────────────────────
//
// Only the fields this decoder reads. Everything is defaulted so exports from
// older and newer schema versions both load.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DlDocument {
    name: String,
    body: DlNode,
    groups: Vec<DlNode>,
    texts: Vec<DlText>,
    tables: Vec<DlTable>,
    pictures: Vec<DlPicture>,
    pages: BTreeMap<String, DlPage>,
}

#[derive(Debug, Clone, Deserialize)]
struct DlRef {
    #[serde(rename = "$ref")]
    cref: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DlNode {
    children: Vec<DlRef>,
    content_layer: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DlText {
    children: Vec<DlRef>,
    content_layer: Option<String>,
    label: String,
    text: String,
    level: Option<i64>,
    prov: Vec<DlProv>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DlTable {
    content_layer: Option<String>,
    data: DlTableData,
    prov: Vec<DlProv>,
    captions: Vec<DlRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DlTableData {
    num_rows: i64,
    num_cols: i64,
    table_cells: Vec<DlTableCell>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DlTableCell {
    text: String,
    start_row_offset_idx: i64,
    end_row_offset_idx: i64,
    start_col_offset_idx: i64,
    end_col_offset_idx: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DlPicture {
    content_layer: Option<String>,
    prov: Vec<DlProv>,
    captions: Vec<DlRef>,
    image: Option<DlImageRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DlImageRef {
    uri: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DlProv {
    page_no: usize,
    bbox: Option<DlBox>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(default)]
struct DlBox {
    l: f32,
    t: f32,
    r: f32,
    b: f32,
    coord_origin: Option<DlOrigin>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum DlOrigin {
    Topleft,
    Bottomleft,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DlPage {
    page_no: usize,
    size: DlSize,
    image: Option<DlImageRef>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(default)]
struct DlSize {
    width: f32,
    height: f32,
}

// ── Conversion ───────────────────────────────────────────────────────────

/// A resolved `$ref` pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NodeRef {
    Body,
    Group(usize),
    Text(usize),
    Table(usize),
    Picture(usize),
}

impl NodeRef {
    fn parse(cref: &str) -> Option<Self> {
        let path = cref.strip_prefix("#/")?;
        if path == "body" {
            return Some(NodeRef::Body);
        }
        let (collection, index) = path.split_once('/')?;
        let index: usize = index.parse().ok()?;
        match collection {
            "groups" => Some(NodeRef::Group(index)),
            "texts" => Some(NodeRef::Text(index)),
            "tables" => Some(NodeRef::Table(index)),
            "pictures" => Some(NodeRef::Picture(index)),
            _ => None,
        }
    }
}

struct Walker<'a> {
    export: &'a DlDocument,
    page_heights: BTreeMap<usize, f32>,
    captions: HashSet<usize>,
    visited: HashSet<NodeRef>,
    elements: Vec<DocElement>,
}

fn to_document(export: &DlDocument, with_page_images: bool) -> DecodedDocument {
    let mut pages: Vec<PageInfo> = export
        .pages
        .iter()
        .map(|(key, page)| PageInfo {
            page_no: if page.page_no > 0 {
                page.page_no
            } else {
                key.parse().unwrap_or(0)
            },
            width: page.size.width,
            height: page.size.height,
            image: if with_page_images {
                page.image
                    .as_ref()
                    .and_then(|img| decode_data_uri(&img.uri))
                    .map(Arc::new)
            } else {
                None
            },
        })
        .collect();
    pages.sort_by_key(|p| p.page_no);

    let captions = export
        .tables
        .iter()
        .flat_map(|t| t.captions.iter())
        .chain(export.pictures.iter().flat_map(|p| p.captions.iter()))
        .filter_map(|r| match NodeRef::parse(&r.cref) {
            Some(NodeRef::Text(i)) => Some(i),
            _ => None,
        })
        .collect();

    let mut walker = Walker {
        export,
        page_heights: pages.iter().map(|p| (p.page_no, p.height)).collect(),
        captions,
        visited: HashSet::new(),
        elements: Vec::new(),
    };
    walker.visit_children(&export.body.children);

    DecodedDocument {
        name: export.name.clone(),
        pages,
        elements: walker.elements,
    }
}

impl Walker<'_> {
    fn visit_children(&mut self, children: &[DlRef]) {
        for child in children {
            match NodeRef::parse(&child.cref) {
                Some(node) => self.visit(node),
                None => warn!("Skipping unresolvable reference {}", child.cref),
            }
        }
    }

    fn visit(&mut self, node: NodeRef) {
        if !self.visited.insert(node) {
            return;
        }
        let export = self.export;

        match node {
            NodeRef::Body => {}
            NodeRef::Group(i) => {
                if let Some(group) = export.groups.get(i) {
                    if is_body_layer(&group.content_layer) {
                        self.visit_children(&group.children);
                    }
                }
            }
            NodeRef::Text(i) => {
                let Some(text) = export.texts.get(i) else {
                    warn!("Dangling text reference #{}", i);
                    return;
                };
                if !is_body_layer(&text.content_layer) {
                    return;
                }
                if !self.captions.contains(&i) {
                    if let Some(label) = text_label(&text.label, text.level) {
                        if !text.text.trim().is_empty() {
                            self.elements.push(DocElement::Text(TextElement {
                                label,
                                text: text.text.clone(),
                                prov: self.provenance(&text.prov),
                            }));
                        }
                    }
                }
                self.visit_children(&text.children);
            }
            NodeRef::Table(i) => {
                let Some(table) = export.tables.get(i) else {
                    warn!("Dangling table reference #{}", i);
                    return;
                };
                if is_body_layer(&table.content_layer) {
                    let element = TableElement {
                        num_rows: table.data.num_rows.max(0) as usize,
                        num_cols: table.data.num_cols.max(0) as usize,
                        cells: table.data.table_cells.iter().map(table_cell).collect(),
                        caption: self.caption_text(&table.captions),
                        prov: self.provenance(&table.prov),
                    };
                    self.elements.push(DocElement::Table(element));
                }
            }
            NodeRef::Picture(i) => {
                let Some(picture) = export.pictures.get(i) else {
                    warn!("Dangling picture reference #{}", i);
                    return;
                };
                if is_body_layer(&picture.content_layer) {
                    let element = PictureElement {
                        image: picture
                            .image
                            .as_ref()
                            .and_then(|img| decode_data_uri(&img.uri)),
                        caption: self.caption_text(&picture.captions),
                        prov: self.provenance(&picture.prov),
                    };
                    self.elements.push(DocElement::Picture(element));
                }
            }
        }
    }

    fn caption_text(&self, refs: &[DlRef]) -> Option<String> {
        let parts: Vec<&str> = refs
            .iter()
            .filter_map(|r| match NodeRef::parse(&r.cref) {
                Some(NodeRef::Text(i)) => self.export.texts.get(i),
                _ => None,
            })
            .map(|t| t.text.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    fn provenance(&self, prov: &[DlProv]) -> Provenance {
        let Some(first) = prov.first() else {
            return Provenance::default();
        };
        let bbox = first.bbox.map(|b| {
            let height = self.page_heights.get(&first.page_no).copied().unwrap_or(0.0);
            to_top_left(b, height)
        });
        Provenance {
            page_no: first.page_no,
            bbox,
        }
    }
}

fn is_body_layer(layer: &Option<String>) -> bool {
    layer.as_deref().map_or(true, |l| l == "body")
}

/// Map an export text label to a text kind. Furniture yields `None`.
fn text_label(label: &str, level: Option<i64>) -> Option<TextLabel> {
    let kind = match label {
        "title" => TextLabel::Title,
        "section_header" => {
            TextLabel::SectionHeader(level.unwrap_or(1).clamp(1, 5) as usize)
        }
        "list_item" => TextLabel::ListItem,
        "caption" => TextLabel::Caption,
        "code" => TextLabel::Code,
        "page_header" | "page_footer" => return None,
        _ => TextLabel::Paragraph,
    };
    Some(kind)
}

fn table_cell(cell: &DlTableCell) -> TableCell {
    let row = cell.start_row_offset_idx.max(0) as usize;
    let col = cell.start_col_offset_idx.max(0) as usize;
    let row_span = (cell.end_row_offset_idx - cell.start_row_offset_idx).max(0) as usize;
    let col_span = (cell.end_col_offset_idx - cell.start_col_offset_idx).max(0) as usize;
    TableCell::new(cell.text.clone(), row, col).with_span(row_span, col_span)
}

/// Convert a box to top-left page coordinates.
fn to_top_left(b: DlBox, page_height: f32) -> BoundingBox {
    match b.coord_origin {
        Some(DlOrigin::Bottomleft) => BoundingBox {
            l: b.l,
            t: page_height - b.t,
            r: b.r,
            b: page_height - b.b,
        },
        _ => BoundingBox {
            l: b.l,
            t: b.t,
            r: b.r,
            b: b.b,
        },
    }
}

/// Decode a `data:<mime>;base64,<payload>` URI into a bitmap.
fn decode_data_uri(uri: &str) -> Option<DynamicImage> {
    let rest = uri.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    if !meta.ends_with(";base64") {
        debug!("Ignoring non-base64 image URI");
        return None;
    }
    let bytes = match base64::engine::general_purpose::STANDARD.decode(payload.trim()) {
        Ok(b) => b,
        Err(e) => {
            warn!("Embedded image has invalid base64: {}", e);
            return None;
        }
    };
    match image::load_from_memory(&bytes) {
        Ok(img) => Some(img),
        Err(e) => {
            warn!("Embedded image could not be decoded: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn png_data_uri() -> String {
        let img = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(4, 3, Rgba([255, 0, 0, 255])));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(buf.into_inner())
        )
    }

    fn sample_json() -> String {
        serde_json::json!({
            "schema_name": "DoclingDocument",
            "name": "report",
            "body": { "children": [
                { "$ref": "#/texts/0" },
                { "$ref": "#/texts/1" },
                { "$ref": "#/tables/0" },
                { "$ref": "#/texts/2" },
                { "$ref": "#/groups/0" },
                { "$ref": "#/pictures/0" },
                { "$ref": "#/texts/5" }
            ]},
            "groups": [
                { "label": "list", "children": [ { "$ref": "#/texts/3" }, { "$ref": "#/texts/4" } ] }
            ],
            "texts": [
                { "label": "title", "text": "Quarterly Report",
                  "prov": [ { "page_no": 1, "bbox": { "l": 10.0, "t": 780.0, "r": 200.0, "b": 760.0, "coord_origin": "BOTTOMLEFT" } } ] },
                { "label": "section_header", "level": 2, "text": "Revenue" },
                { "label": "caption", "text": "Table 1: Revenue by region" },
                { "label": "list_item", "text": "North grew" },
                { "label": "list_item", "text": "South shrank" },
                { "label": "page_footer", "text": "Page 1" },
                { "label": "caption", "text": "Figure 1: Map" }
            ],
            "tables": [
                { "label": "table", "captions": [ { "$ref": "#/texts/2" } ],
                  "prov": [ { "page_no": 1 } ],
                  "data": { "num_rows": 2, "num_cols": 3, "table_cells": [
                      { "text": "Region", "start_row_offset_idx": 0, "end_row_offset_idx": 1, "start_col_offset_idx": 0, "end_col_offset_idx": 1 },
                      { "text": "Totals", "start_row_offset_idx": 0, "end_row_offset_idx": 1, "start_col_offset_idx": 1, "end_col_offset_idx": 3 },
                      { "text": "North", "start_row_offset_idx": 1, "end_row_offset_idx": 2, "start_col_offset_idx": 0, "end_col_offset_idx": 1 }
                  ]}}
            ],
            "pictures": [
                { "label": "picture", "captions": [ { "$ref": "#/texts/6" } ],
                  "prov": [ { "page_no": 2 } ],
                  "image": { "mimetype": "image/png", "uri": png_data_uri() } }
            ],
            "pages": {
                "1": { "page_no": 1, "size": { "width": 612.0, "height": 792.0 } },
                "2": { "page_no": 2, "size": { "width": 612.0, "height": 792.0 } }
            }
        })
        .to_string()
    }

    fn decode_sample() -> DecodedDocument {
        let export: DlDocument = serde_json::from_str(&sample_json()).unwrap();
        to_document(&export, false)
    }

    #[test]
    fn reading_order_follows_body_tree() {
        let doc = decode_sample();
        let kinds: Vec<&str> = doc
            .elements
            .iter()
            .map(|e| match e {
                DocElement::Text(t) => match t.label {
                    TextLabel::Title => "title",
                    TextLabel::SectionHeader(_) => "header",
                    TextLabel::ListItem => "item",
                    _ => "text",
                },
                DocElement::Table(_) => "table",
                DocElement::Picture(_) => "picture",
            })
            .collect();
        // Caption and footer texts are not emitted as prose.
        assert_eq!(kinds, vec!["title", "header", "table", "item", "item", "picture"]);
        assert_eq!(doc.name, "report");
        assert_eq!(doc.pages.len(), 2);
    }

    #[test]
    fn captions_attach_to_their_element() {
        let doc = decode_sample();
        let table = doc.tables().next().unwrap();
        assert_eq!(table.caption.as_deref(), Some("Table 1: Revenue by region"));
        let picture = doc.pictures().next().unwrap();
        assert_eq!(picture.caption.as_deref(), Some("Figure 1: Map"));
        assert_eq!(picture.prov.page_no, 2);
    }

    #[test]
    fn table_offsets_become_spans() {
        let doc = decode_sample();
        let table = doc.tables().next().unwrap();
        assert_eq!((table.num_rows, table.num_cols), (2, 3));
        assert_eq!(table.cells[1], TableCell::new("Totals", 0, 1).with_span(1, 2));
        assert_eq!(table.cells[2], TableCell::new("North", 1, 0));
    }

    #[test]
    fn picture_bitmap_decoded_from_data_uri() {
        let doc = decode_sample();
        let image = doc.pictures().next().unwrap().image.as_ref().unwrap();
        assert_eq!((image.width(), image.height()), (4, 3));
    }

    #[test]
    fn bottom_left_boxes_are_flipped() {
        let doc = decode_sample();
        let DocElement::Text(title) = &doc.elements[0] else {
            panic!("expected title first");
        };
        let bbox = title.prov.bbox.unwrap();
        assert_eq!(bbox.t, 12.0);
        assert_eq!(bbox.b, 32.0);
        assert_eq!(bbox.height(), 20.0);
    }

    #[test]
    fn section_header_level_kept() {
        let doc = decode_sample();
        let DocElement::Text(header) = &doc.elements[1] else {
            panic!("expected header second");
        };
        assert_eq!(header.label, TextLabel::SectionHeader(2));
    }

    #[test]
    fn refs_parse() {
        assert_eq!(NodeRef::parse("#/texts/12"), Some(NodeRef::Text(12)));
        assert_eq!(NodeRef::parse("#/body"), Some(NodeRef::Body));
        assert_eq!(NodeRef::parse("#/furniture"), None);
        assert_eq!(NodeRef::parse("texts/1"), None);
    }

    #[test]
    fn invalid_json_is_a_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let options = DecodeOptions::from(&crate::config::ProcessingConfig::default());
        let err = DoclingJsonDecoder.decode(&path, &options).unwrap_err();
        assert!(matches!(err, ProcessError::DecodeFailed { .. }));
    }

    #[test]
    fn non_base64_uri_is_ignored() {
        assert!(decode_data_uri("data:image/png,raw").is_none());
        assert!(decode_data_uri("file:///tmp/x.png").is_none());
    }
}

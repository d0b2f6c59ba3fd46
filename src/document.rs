//! Decoded Document Model: the in-memory shape every decoder produces.
//!
//! Elements are stored in reading order. Tables and pictures are numbered by
//! their position among elements of the same kind, which is how both the
//! extraction stages and the content assembler address them.

use image::DynamicImage;
use std::sync::Arc;

/// A decoded document.
#[derive(Debug, Clone, Default)]
pub struct DecodedDocument {
    /// Name reported by the decoder (usually the file name).
    pub name: String,
    pub pages: Vec<PageInfo>,
    /// Content elements in reading order.
    pub elements: Vec<DocElement>,
}

impl DecodedDocument {
    /// Table elements in document order.
    pub fn tables(&self) -> impl Iterator<Item = &TableElement> {
        self.elements.iter().filter_map(|e| match e {
            DocElement::Table(t) => Some(t),
            _ => None,
        })
    }

    /// Picture elements in document order.
    pub fn pictures(&self) -> impl Iterator<Item = &PictureElement> {
        self.elements.iter().filter_map(|e| match e {
            DocElement::Picture(p) => Some(p),
            _ => None,
        })
    }

    pub fn text_blocks(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| matches!(e, DocElement::Text(_)))
            .count()
    }

    /// Look up a page by its 1-based number.
    pub fn page(&self, page_no: usize) -> Option<&PageInfo> {
        self.pages.iter().find(|p| p.page_no == page_no)
    }
}

/// Page geometry and an optional rendered bitmap.
#[derive(Debug, Clone)]
pub struct PageInfo {
    /// 1-based page number.
    pub page_no: usize,
    /// Page width in points.
    pub width: f32,
    /// Page height in points.
    pub height: f32,
    /// Rendered page, present when page images were requested.
    pub image: Option<Arc<DynamicImage>>,
}

/// One content element.
#[derive(Debug, Clone)]
pub enum DocElement {
    Text(TextElement),
    Table(TableElement),
    Picture(PictureElement),
}

/// Where an element sits in the source document.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Provenance {
    pub page_no: usize,
    pub bbox: Option<BoundingBox>,
}

impl Provenance {
    pub fn page(page_no: usize) -> Self {
        Self {
            page_no,
            bbox: None,
        }
    }
}

/// Axis-aligned box in page points, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub l: f32,
    pub t: f32,
    pub r: f32,
    pub b: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        (self.r - self.l).abs()
    }

    pub fn height(&self) -> f32 {
        (self.b - self.t).abs()
    }
}

/// Role of a text block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextLabel {
    Title,
    /// Section header with its nesting level (1 = top level).
    SectionHeader(usize),
    Paragraph,
    ListItem,
    Caption,
    Code,
}

#[derive(Debug, Clone)]
pub struct TextElement {
    pub label: TextLabel,
    pub text: String,
    pub prov: Provenance,
}

impl TextElement {
    pub fn paragraph(text: impl Into<String>, page_no: usize) -> Self {
        Self {
            label: TextLabel::Paragraph,
            text: text.into(),
            prov: Provenance::page(page_no),
        }
    }
}

/// A table region as the decoder recognised it.
///
/// `cells` lists each logical cell once, with its top-left grid position and
/// spans. Positions not covered by any cell are empty.
#[derive(Debug, Clone, Default)]
pub struct TableElement {
    pub num_rows: usize,
    pub num_cols: usize,
    pub cells: Vec<TableCell>,
    pub caption: Option<String>,
    pub prov: Provenance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableCell {
    pub text: String,
    /// 0-based row of the cell's top-left corner.
    pub row: usize,
    /// 0-based column of the cell's top-left corner.
    pub col: usize,
    pub row_span: usize,
    pub col_span: usize,
}

impl TableCell {
    pub fn new(text: impl Into<String>, row: usize, col: usize) -> Self {
        Self {
            text: text.into(),
            row,
            col,
            row_span: 1,
            col_span: 1,
        }
    }

    pub fn with_span(mut self, row_span: usize, col_span: usize) -> Self {
        self.row_span = row_span;
        self.col_span = col_span;
        self
    }
}

/// An embedded picture.
#[derive(Debug, Clone, Default)]
pub struct PictureElement {
    /// Bitmap decoded from the document, if the decoder could extract one.
    pub image: Option<DynamicImage>,
    pub caption: Option<String>,
    pub prov: Provenance,
}

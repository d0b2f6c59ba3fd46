//! Pipeline stages and their collaborators.
//!
//! Each submodule implements one step. The orchestrator in
//! [`crate::process`] sequences them; no stage calls another stage.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ decode ──▶ tables ──┐
//!            │                  ├──▶ assemble ──▶ writer
//!            └──────▶ images ───┘
//!                      │
//!                      └──▶ describe (VLM, concurrent)
//! ```
//!
//! 1. [`input`]: canonicalise the user-supplied path or URL to a local file
//! 2. [`decode`]: the [`decode::DocumentDecoder`] seam; [`pdfium`] and
//!    [`docling_json`] are the built-in backends
//! 3. [`tables`]: cell grids to rectangular CSV rows
//! 4. [`images`]: bitmaps to PNG, plus description requests
//! 5. [`describe`]: the [`describe::ImageDescriber`] seam with timeout and
//!    retry; the only stage with network I/O besides URL download
//! 6. [`assemble`]: the Markdown content file
//! 7. [`writer`]: output scope, deterministic naming, persistence
//!
//! [`encode`] and [`postprocess`] are helpers for the picture path.

pub mod assemble;
pub mod decode;
pub mod describe;
pub mod docling_json;
pub mod encode;
pub mod images;
pub mod input;
pub mod pdfium;
pub mod postprocess;
pub mod tables;
pub mod writer;

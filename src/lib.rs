//! # edgequake-docbundle
//!
//! Turn a paged document into a self-contained output bundle: one Markdown
//! content file, one CSV per table, one PNG per picture, and, optionally, a
//! natural-language description of every picture from a vision model.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Scope     create {output_root}/{doc}_output.{ext}/
//!  ├─ 3. Decode    pdfium or docling JSON → Decoded Document Model (spawn_blocking)
//!  ├─ 4. Tables    cell grids → {doc}-table-{n}.csv
//!  ├─ 5. Pictures  bitmaps → {doc}-picture-{n}.png, concurrent VLM descriptions
//!  └─ 6. Assemble  {doc}.md referencing every artifact in document order
//! ```
//!
//! A failure in a single table or picture never aborts the run; it is
//! recorded in [`RunSummary::failures`] and rendered as a placeholder.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docbundle::{process, ProcessingConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Descriptions use OPENAI_API_KEY (or another configured provider).
//!     let config = ProcessingConfig::default();
//!     let summary = process("report.pdf", "output", &config).await?;
//!     println!("{}", summary.content_path.display());
//!     for failure in &summary.failures {
//!         eprintln!("warning: {failure}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2bundle` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-docbundle = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CancelToken, ProcessingConfig, ProcessingConfigBuilder, TableMatchMode};
pub use document::{DecodedDocument, DocElement};
pub use error::{ProcessError, RemoteServiceError, StageError};
pub use output::{
    ArtifactId, ArtifactKind, DocumentOverview, ExtractedArtifact, ImageDescription, RunStats,
    RunSummary, Stage,
};
pub use pipeline::decode::{DecodeOptions, DocumentDecoder};
pub use pipeline::describe::{Description, DescriptionRequest, ImageDescriber};
pub use process::{inspect, process, process_bytes, process_sync};
pub use progress::{NoopProgressCallback, ProcessProgressCallback, ProgressCallback};

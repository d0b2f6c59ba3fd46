//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn ProcessProgressCallback>`] via
//! [`crate::config::ProcessingConfigBuilder::progress_callback`] to receive
//! events as the orchestrator moves through its stages.
//!
//! # Example
//!
//! ```rust
//! use edgequake_docbundle::{ArtifactId, ProcessProgressCallback, ProcessingConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     written: AtomicUsize,
//! }
//!
//! impl ProcessProgressCallback for CountingCallback {
//!     fn on_artifact_complete(&self, id: ArtifactId, token: &str) {
//!         let n = self.written.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{n}: {id} → {token}");
//!     }
//! }
//!
//! let config = ProcessingConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { written: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::StageError;
use crate::output::{ArtifactId, RunSummary, Stage};
use std::sync::Arc;

/// Called by the orchestrator as a run progresses.
///
/// All methods default to no-ops. During the description phase
/// `on_description_complete` may be called concurrently from different
/// tasks, so implementations must protect shared mutable state.
pub trait ProcessProgressCallback: Send + Sync {
    /// Called once, after the input is resolved and before decoding.
    fn on_run_start(&self, source: &str) {
        let _ = source;
    }

    /// Called when a stage begins.
    ///
    /// # Arguments
    /// * `stage`: the stage starting
    /// * `items`: number of items the stage will handle (0 when unknown)
    fn on_stage_start(&self, stage: Stage, items: usize) {
        let _ = (stage, items);
    }

    /// Called when an artifact has been persisted.
    fn on_artifact_complete(&self, id: ArtifactId, token: &str) {
        let _ = (id, token);
    }

    /// Called when a table or picture could not be extracted.
    fn on_artifact_error(&self, id: ArtifactId, error: &StageError) {
        let _ = (id, error);
    }

    /// Called when a description request finishes, successfully or not.
    fn on_description_complete(&self, id: ArtifactId, described: bool) {
        let _ = (id, described);
    }

    /// Called once with the final summary.
    fn on_run_complete(&self, summary: &RunSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ProcessProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ProcessingConfig`].
pub type ProgressCallback = Arc<dyn ProcessProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        stages: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        described: AtomicUsize,
    }

    impl ProcessProgressCallback for TrackingCallback {
        fn on_stage_start(&self, _stage: Stage, _items: usize) {
            self.stages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_artifact_complete(&self, _id: ArtifactId, _token: &str) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_artifact_error(&self, _id: ArtifactId, _error: &StageError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_description_complete(&self, _id: ArtifactId, described: bool) {
            if described {
                self.described.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start("doc.pdf");
        cb.on_stage_start(Stage::Tables, 3);
        cb.on_artifact_complete(ArtifactId::table(1), "doc-table-1.csv");
        cb.on_description_complete(ArtifactId::picture(1), false);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_stage_start(Stage::Tables, 2);
        tracker.on_artifact_complete(ArtifactId::table(1), "doc-table-1.csv");
        tracker.on_artifact_error(
            ArtifactId::table(2),
            &StageError::TableConversion {
                index: 2,
                detail: "bad span".into(),
            },
        );
        tracker.on_stage_start(Stage::Descriptions, 1);
        tracker.on_description_complete(ArtifactId::picture(1), true);

        assert_eq!(tracker.stages.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.described.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage_start(Stage::Decode, 0);
    }
}

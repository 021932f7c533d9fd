//! Progress-callback trait for conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves a document through submission, polling and
//! per-chunk conversion.
//!
//! The callback is the pipeline's only observability hook besides `tracing`:
//! the service's `percent_done` value, for instance, is surfaced here and
//! nowhere else.
//!
//! # Example
//!
//! ```rust
//! use scipdf2txt::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     converted: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_chunk_complete(&self, _index: usize, total: usize, _kind: &str, _len: usize) {
//!         let done = self.converted.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}/{total} segments converted");
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { converted: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(cb as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::JobStatus;
use std::path::Path;
use std::sync::Arc;

/// Called by the conversion pipeline as it processes a document.
///
/// Implementations must be `Send + Sync`: batch conversion drives several
/// documents at once, and chunk conversion may run concurrently. All methods
/// have default no-op implementations.
pub trait ConversionProgressCallback: Send + Sync {
    /// A document's job moved to a new lifecycle state.
    fn on_status_change(&self, source: &Path, status: JobStatus) {
        let _ = (source, status);
    }

    /// The OCR service reported progress. `percent_done` never decreases
    /// for a given job.
    fn on_poll_progress(&self, job_id: &str, percent_done: u8) {
        let _ = (job_id, percent_done);
    }

    /// A table or image chunk is about to be sent to a model.
    ///
    /// `index` is the 0-based position among the document's chunks.
    fn on_chunk_start(&self, index: usize, total: usize, kind: &str) {
        let _ = (index, total, kind);
    }

    /// A table or image chunk was converted.
    fn on_chunk_complete(&self, index: usize, total: usize, kind: &str, output_len: usize) {
        let _ = (index, total, kind, output_len);
    }

    /// The document finished, successfully (`Some(text_len)`) or not (`None`).
    fn on_document_complete(&self, source: &Path, text_len: Option<usize>) {
        let _ = (source, text_len);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        statuses: Mutex<Vec<JobStatus>>,
        chunk_starts: AtomicUsize,
        chunk_completes: AtomicUsize,
        last_percent: AtomicUsize,
    }

    impl ConversionProgressCallback for TrackingCallback {
        fn on_status_change(&self, _source: &Path, status: JobStatus) {
            self.statuses.lock().unwrap().push(status);
        }

        fn on_poll_progress(&self, _job_id: &str, percent_done: u8) {
            self.last_percent
                .store(percent_done as usize, Ordering::SeqCst);
        }

        fn on_chunk_start(&self, _index: usize, _total: usize, _kind: &str) {
            self.chunk_starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_chunk_complete(&self, _index: usize, _total: usize, _kind: &str, _len: usize) {
            self.chunk_completes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_status_change(Path::new("a.pdf"), JobStatus::Polling);
        cb.on_poll_progress("job", 40);
        cb.on_chunk_start(1, 3, "table");
        cb.on_chunk_complete(1, 3, "table", 12);
        cb.on_document_complete(Path::new("a.pdf"), Some(100));
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_status_change(Path::new("a.pdf"), JobStatus::Polling);
        tracker.on_status_change(Path::new("a.pdf"), JobStatus::Complete);
        tracker.on_poll_progress("job", 75);
        tracker.on_chunk_start(0, 2, "image");
        tracker.on_chunk_complete(0, 2, "image", 300);

        assert_eq!(
            *tracker.statuses.lock().unwrap(),
            vec![JobStatus::Polling, JobStatus::Complete]
        );
        assert_eq!(tracker.last_percent.load(Ordering::SeqCst), 75);
        assert_eq!(tracker.chunk_starts.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.chunk_completes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn ConversionProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_poll_progress("job", 10);
    }
}

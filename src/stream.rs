//! Streaming conversion API: emit documents as they complete.
//!
//! [`Converter::convert`] handles one document. When a caller has many, most
//! of the wall-clock time is spent waiting on the OCR service, so documents
//! are driven concurrently over a bounded pool and each outcome is yielded as
//! soon as it is ready. Outcomes arrive in completion order, not input order.
//!
//! A failed document is an ordinary item in the stream; it never ends the
//! stream early.

use crate::convert::Converter;
use crate::error::Pdf2TxtError;
use crate::output::ConversionResult;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// One finished document.
#[derive(Debug)]
pub struct DocumentOutcome {
    pub path: PathBuf,
    pub result: Result<ConversionResult, Pdf2TxtError>,
}

impl DocumentOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// A boxed stream of per-document outcomes.
pub type DocumentStream = Pin<Box<dyn Stream<Item = DocumentOutcome> + Send>>;

/// Convert `paths` with at most `concurrency` documents in flight.
///
/// `concurrency` of 0 is treated as 1.
///
/// # Example
/// ```rust,no_run
/// use scipdf2txt::{convert_stream, ConversionConfig, Converter};
/// use futures::StreamExt;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let converter = Arc::new(Converter::from_config(ConversionConfig::default())?);
/// let paths = vec!["a.pdf".into(), "b.pdf".into()];
/// let mut outcomes = convert_stream(converter, paths, 2);
/// while let Some(outcome) = outcomes.next().await {
///     match outcome.result {
///         Ok(r) => println!("{}: {} chars", outcome.path.display(), r.text.len()),
///         Err(e) => eprintln!("{}: {e}", outcome.path.display()),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn convert_stream(
    converter: Arc<Converter>,
    paths: Vec<PathBuf>,
    concurrency: usize,
) -> DocumentStream {
    let concurrency = concurrency.max(1);
    info!(
        "Streaming conversion of {} document(s), {} at a time",
        paths.len(),
        concurrency
    );

    let s = stream::iter(paths.into_iter().map(move |path| {
        let converter = Arc::clone(&converter);
        async move {
            let result = converter.convert(&path).await;
            DocumentOutcome { path, result }
        }
    }))
    .buffer_unordered(concurrency);

    Box::pin(s)
}

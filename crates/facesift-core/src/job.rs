//! The batch job: ingest-then-match as one cancellable unit of work on
//! a dedicated worker thread.
//!
//! The observer never blocks the worker and the worker never blocks on
//! the observer: progress, completion, cancellation, and failure all
//! arrive as [`JobEvent`]s on an unbounded channel, and the only state
//! shared across the boundary is the cancellation flag. Nothing
//! propagates across the boundary as a panic or an `Err`.

use crate::ingest::{self, IngestError};
use crate::matcher::{self, QueryError};
use crate::model::{FaceEmbedder, FaceLocalizer};
use crate::store::{FaceStore, MatchResult};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Cooperative cancellation flag shared between observer and worker.
///
/// Requesting cancellation is idempotent and can happen at any time;
/// the worker polls the flag once per candidate file, never mid-file.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything one batch run needs to know.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Folder scanned recursively for candidate images.
    pub input_folder: PathBuf,
    /// Directory receiving the normalized face crops.
    pub crop_dir: PathBuf,
    /// Photo whose faces are searched for after ingestion.
    pub query_image: PathBuf,
    /// Cosine-distance match threshold.
    pub threshold: f32,
}

/// Notifications delivered from the worker to the observer.
#[derive(Debug)]
pub enum JobEvent {
    /// Percentage of candidate files visited, strictly increasing
    /// within one run.
    Progress(f32),
    /// Ingestion and matching both finished; ownership of the store is
    /// handed to the observer.
    Done {
        matches: Vec<MatchResult>,
        store: FaceStore,
    },
    /// Cancellation was honored. Carries whatever partial store was
    /// built; deliberate cancellation is neither a completion nor an
    /// error.
    Cancelled { store: FaceStore },
    /// The run died: a query-side failure or an unexpected worker
    /// error. No completion follows.
    Failed(String),
}

#[derive(Error, Debug)]
enum JobError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Observer-side handle: the event stream plus cancellation control.
pub struct JobHandle {
    events: mpsc::UnboundedReceiver<JobEvent>,
    cancel: CancelToken,
}

impl JobHandle {
    /// Next event, or `None` once the worker is gone and the channel
    /// drained.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Blocking variant for synchronous observers. Must not be called
    /// from an async context.
    pub fn blocking_next_event(&mut self) -> Option<JobEvent> {
        self.events.blocking_recv()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn request_cancel(&self) {
        self.cancel.request_cancel();
    }
}

/// Spawn one batch run on a dedicated worker thread.
///
/// The models are moved into the worker: they are long-lived process
/// resources loaded once by the caller, not re-instantiated per call.
/// All decode and inference work happens on this thread only.
pub fn spawn(
    request: JobRequest,
    mut localizer: Box<dyn FaceLocalizer>,
    mut embedder: Box<dyn FaceEmbedder>,
) -> JobHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();

    std::thread::Builder::new()
        .name("facesift-job".into())
        .spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                run_job(
                    &request,
                    localizer.as_mut(),
                    embedder.as_mut(),
                    &tx,
                    &worker_cancel,
                )
            }));
            let event = match outcome {
                Ok(Ok(event)) => event,
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "batch job failed");
                    JobEvent::Failed(err.to_string())
                }
                Err(_) => {
                    tracing::error!("batch job worker panicked");
                    JobEvent::Failed("unexpected worker panic".into())
                }
            };
            let _ = tx.send(event);
        })
        .expect("failed to spawn job worker thread");

    JobHandle { events: rx, cancel }
}

fn run_job(
    request: &JobRequest,
    localizer: &mut dyn FaceLocalizer,
    embedder: &mut dyn FaceEmbedder,
    tx: &mpsc::UnboundedSender<JobEvent>,
    cancel: &CancelToken,
) -> Result<JobEvent, JobError> {
    let mut on_progress = |percent: f32| {
        // An unbounded send never blocks the worker; a dropped handle
        // just means nobody is listening any more.
        let _ = tx.send(JobEvent::Progress(percent));
    };

    let store = ingest::ingest(
        &request.input_folder,
        &request.crop_dir,
        localizer,
        embedder,
        &mut on_progress,
        cancel,
    )?;

    if cancel.is_cancelled() {
        return Ok(JobEvent::Cancelled { store });
    }

    let matches = matcher::find_matches(
        &request.query_image,
        &store,
        localizer,
        embedder,
        request.threshold,
    )?;

    Ok(JobEvent::Done { matches, store })
}

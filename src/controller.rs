use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use summarizer::{is_cancelled, new_cancel_signal, CancelSignal, SummarizeError, Summarizer};
use tracing::{info, warn};

use crate::compaction::{CompactionPlan, TierTexts};
use crate::error::TierlogError;

pub type JobId = u64;

/// Terminal outcome of one background summarization.
#[derive(Debug)]
pub enum CompactionEvent {
    Finished {
        job_id: JobId,
        session: String,
        texts: TierTexts,
    },
    Failed {
        job_id: JobId,
        session: String,
        error: TierlogError,
    },
    Cancelled {
        job_id: JobId,
        session: String,
    },
}

impl CompactionEvent {
    #[must_use]
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Finished { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Cancelled { job_id, .. } => *job_id,
        }
    }

    #[must_use]
    pub fn session(&self) -> &str {
        match self {
            Self::Finished { session, .. }
            | Self::Failed { session, .. }
            | Self::Cancelled { session, .. } => session,
        }
    }
}

struct ActiveJob {
    job_id: JobId,
    session: String,
    cancel: CancelSignal,
    join_handle: Option<JoinHandle<()>>,
}

/// Runs at most one summarization at a time off the calling thread.
///
/// The worker only produces tier texts. Its outcome is queued and picked up
/// with [`CompactionController::drain`] on the thread that owns the session,
/// which then applies it. A job stays active, and further starts are
/// rejected, until its outcome has been drained.
pub struct CompactionController {
    summarizer: Arc<dyn Summarizer>,
    pending_events: Arc<Mutex<VecDeque<CompactionEvent>>>,
    next_job_id: AtomicU64,
    active_job: Mutex<Option<ActiveJob>>,
}

impl CompactionController {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Arc<Self> {
        Arc::new(Self {
            summarizer,
            pending_events: Arc::new(Mutex::new(VecDeque::new())),
            next_job_id: AtomicU64::new(1),
            active_job: Mutex::new(None),
        })
    }

    /// Spawns a worker for `plan`. Rejected immediately while another job is
    /// pending; nothing is queued.
    pub fn start(
        self: &Arc<Self>,
        session: &str,
        plan: CompactionPlan,
    ) -> Result<JobId, TierlogError> {
        let mut active_job = self.lock_active_job();
        if let Some(active) = active_job.as_ref() {
            warn!(
                session,
                pending_session = active.session.as_str(),
                "compaction rejected, another one is pending"
            );
            return Err(TierlogError::busy(session));
        }

        let job_id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        let cancel = new_cancel_signal();
        let join_handle =
            self.spawn_worker(job_id, session.to_string(), plan, Arc::clone(&cancel))?;

        *active_job = Some(ActiveJob {
            job_id,
            session: session.to_string(),
            cancel,
            join_handle: Some(join_handle),
        });
        info!(session, job_id, "compaction started");
        Ok(job_id)
    }

    fn spawn_worker(
        self: &Arc<Self>,
        job_id: JobId,
        session: String,
        plan: CompactionPlan,
        cancel: CancelSignal,
    ) -> Result<JoinHandle<()>, TierlogError> {
        let controller = Arc::clone(self);
        let thread_session = session.clone();
        thread::Builder::new()
            .name(format!("tierlog-compaction-{job_id}"))
            .spawn(move || controller.run_worker(job_id, thread_session, plan, cancel))
            .map_err(|source| TierlogError::WorkerSpawn { session, source })
    }

    fn run_worker(
        self: Arc<Self>,
        job_id: JobId,
        session: String,
        plan: CompactionPlan,
        cancel: CancelSignal,
    ) {
        let summarizer = Arc::clone(&self.summarizer);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            plan.summarize(summarizer.as_ref(), &cancel)
        }));

        let event = match outcome {
            _ if is_cancelled(&cancel) => CompactionEvent::Cancelled { job_id, session },
            Ok(Ok(texts)) => CompactionEvent::Finished {
                job_id,
                session,
                texts,
            },
            Ok(Err(TierlogError::Summarization(SummarizeError::Cancelled))) => {
                CompactionEvent::Cancelled { job_id, session }
            }
            Ok(Err(error)) => CompactionEvent::Failed {
                job_id,
                session,
                error,
            },
            Err(_) => {
                let error = TierlogError::WorkerPanicked {
                    session: session.clone(),
                };
                CompactionEvent::Failed {
                    job_id,
                    session,
                    error,
                }
            }
        };

        lock_unpoisoned(&self.pending_events).push_back(event);
    }

    /// Takes every queued outcome. The job an outcome belongs to stops being
    /// active here.
    pub fn drain(&self) -> Vec<CompactionEvent> {
        let mut drained = Vec::new();

        loop {
            let event = {
                let mut pending_events = lock_unpoisoned(&self.pending_events);
                pending_events.pop_front()
            };

            match event {
                Some(event) => {
                    self.clear_active_job_if_matching(event.job_id());
                    drained.push(event);
                }
                None => break,
            }
        }

        drained
    }

    /// Blocks until the active worker thread has exited. Its outcome is then
    /// ready for [`CompactionController::drain`].
    pub fn wait(&self) {
        let join_handle = self
            .lock_active_job()
            .as_mut()
            .and_then(|active| active.join_handle.take());

        if let Some(join_handle) = join_handle {
            if join_handle.thread().id() != thread::current().id() {
                let _ = join_handle.join();
            }
        }
    }

    /// Asks the active worker to stop. Its outcome is discarded as
    /// [`CompactionEvent::Cancelled`].
    pub fn cancel(&self) -> Option<JobId> {
        let active_job = self.lock_active_job();
        let active = active_job.as_ref()?;
        active.cancel.store(true, Ordering::SeqCst);
        info!(
            session = active.session.as_str(),
            job_id = active.job_id,
            "compaction cancel requested"
        );
        Some(active.job_id)
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.lock_active_job().is_some()
    }

    #[must_use]
    pub fn active_session(&self) -> Option<String> {
        self.lock_active_job()
            .as_ref()
            .map(|active| active.session.clone())
    }

    fn clear_active_job_if_matching(&self, job_id: JobId) {
        let mut active_job = self.lock_active_job();
        let matches = active_job.as_ref().map(|active| active.job_id) == Some(job_id);
        if !matches {
            return;
        }

        let mut completed = match active_job.take() {
            Some(completed) => completed,
            None => return,
        };

        if let Some(join_handle) = completed.join_handle.take() {
            let is_current_thread = join_handle.thread().id() == thread::current().id();
            if !is_current_thread && join_handle.is_finished() {
                let _ = join_handle.join();
            }
        }
    }

    fn lock_active_job(&self) -> MutexGuard<'_, Option<ActiveJob>> {
        lock_unpoisoned(&self.active_job)
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

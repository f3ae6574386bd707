use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::engine::{Engine, Job};
use crate::error::{Error, Result};
use crate::oracle::panic_message;
use crate::orchestrator::PassState;

struct Pending {
    rx: oneshot::Receiver<Job>,
    handle: Option<JoinHandle<()>>,
    /// The submitted job, used to report a crashed worker.
    submitted: Job,
    cancel: Arc<AtomicBool>,
    finished: Option<Job>,
}

impl Pending {
    fn crashed(&mut self) -> Job {
        let cause = match self.handle.take() {
            Some(handle) if handle.is_finished() => match handle.join() {
                Err(payload) => format!("packing worker panicked: {}", panic_message(payload.as_ref())),
                Ok(()) => "packing worker exited without a result".to_string(),
            },
            _ => "packing worker exited without a result".to_string(),
        };
        tracing::error!(cause = %cause, "packing pass crashed");

        let mut job = self.submitted.clone();
        let pass = PassState::all_crashed(job.materials(), &cause);
        job.finish_pass(pass);
        job
    }

    fn poll(&mut self) -> bool {
        if self.finished.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(job) => {
                self.finished = Some(job);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Closed) => {
                self.finished = Some(self.crashed());
                true
            }
        }
    }
}

pub struct JobRunner {
    engine: Engine,
    pending: Option<Pending>,
}

impl JobRunner {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            pending: None,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Starts a pass over `job` on a worker thread. Fails with
    /// [`Error::PassInFlight`] while a previous pass has not been taken back.
    pub fn pack_async(&mut self, job: Job) -> Result<()> {
        if self.pending.is_some() {
            return Err(Error::PassInFlight);
        }

        let (tx, rx) = oneshot::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let engine = self.engine.clone();
        let flag = Arc::clone(&cancel);
        let submitted = job.clone();

        let handle = std::thread::Builder::new()
            .name("packing-pass".to_string())
            .spawn(move || {
                let mut job = job;
                let pass = engine.run_pass(&job, Some(&flag));
                job.finish_pass(pass);
                // The receiver may already be gone; the result is then unused.
                let _ = tx.send(job);
            })?;

        tracing::info!(materials = submitted.materials().len(), "packing pass submitted");
        self.pending = Some(Pending {
            rx,
            handle: Some(handle),
            submitted,
            cancel,
            finished: None,
        });
        Ok(())
    }

    /// True when no pass is outstanding or the outstanding one has
    /// completed, including by crashing.
    pub fn is_done(&mut self) -> bool {
        match self.pending.as_mut() {
            None => true,
            Some(pending) => pending.poll(),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn take_finished(&mut self) -> Result<Job> {
        let pending = self.pending.as_mut().ok_or(Error::NoPassOutstanding)?;
        if !pending.poll() {
            return Err(Error::PassInFlight);
        }
        let mut pending = self.pending.take().ok_or(Error::NoPassOutstanding)?;
        pending.finished.take().ok_or(Error::NoPassOutstanding)
    }

    /// Hands back the job of a pass that has completed but was never taken.
    /// Returns `None` while idle or while the pass is still running.
    pub fn collect(&mut self) -> Option<Job> {
        if !self.has_pending() || !self.is_done() {
            return None;
        }
        self.take_finished().ok()
    }

    pub async fn wait(&mut self) -> Result<Job> {
        let mut pending = self.pending.take().ok_or(Error::NoPassOutstanding)?;
        if let Some(job) = pending.finished.take() {
            return Ok(job);
        }
        let rx = std::mem::replace(&mut pending.rx, oneshot::channel().1);
        match rx.await {
            Ok(job) => Ok(job),
            Err(_) => Ok(pending.crashed()),
        }
    }

    /// Asks the outstanding pass to stop before its next material. A nesting
    /// call already running is not interrupted.
    pub fn cancel(&self) {
        if let Some(pending) = &self.pending {
            pending.cancel.store(true, Ordering::Relaxed);
            tracing::info!("packing pass cancellation requested");
        }
    }
}

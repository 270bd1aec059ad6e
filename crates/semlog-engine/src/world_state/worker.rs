//! Background world-state logging.
//!
//! The [`WorldStateLogger`] owns a named worker thread that owns the
//! writer. Each sample hands the sampler itself to the worker together with
//! the captured frame; the worker compares, writes, commits and hands the
//! sampler back. While a write is in flight the simulation thread has no
//! sampler, so no new sample can be taken: slow writes lower the sample
//! rate instead of queuing.

use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use semlog_core::handle::ObjectHandle;
use semlog_core::registry::EntityRegistry;
use semlog_events::lifecycle::Lifecycle;

use super::sampler::{PoseSource, SampleFrame, WorldStateSampler};
use super::writer::{WorldStateWriter, WriterError};

/// Result of one sample pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A document was stored, possibly with no entity records.
    Written,
    /// Nothing is tracked any more.
    Untracked,
    /// The write failed; poses were not committed.
    Failed,
}

/// Running totals of a logger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggerStats {
    pub samples: u64,
    pub written: u64,
    pub untracked: u64,
    pub failed: u64,
    pub removed: u64,
}

/// Apply `frame`, write the document and commit on success.
pub fn run_pass(
    sampler: &mut WorldStateSampler,
    frame: &SampleFrame,
    writer: &mut dyn WorldStateWriter,
) -> (Vec<ObjectHandle>, WriteOutcome) {
    let pass = sampler.apply(frame);
    let outcome = match &pass.document {
        None => WriteOutcome::Untracked,
        Some(document) => match writer.write(document) {
            Ok(()) => {
                sampler.commit(pass.commit);
                WriteOutcome::Written
            }
            Err(e) => {
                tracing::error!(error = %e, timestamp = frame.time, "world state write failed");
                WriteOutcome::Failed
            }
        },
    };
    (pass.removed, outcome)
}

enum Job {
    Sample {
        sampler: WorldStateSampler,
        frame: SampleFrame,
    },
    Finish,
}

enum Reply {
    Sampled {
        sampler: WorldStateSampler,
        removed: Vec<ObjectHandle>,
        outcome: WriteOutcome,
    },
    Finished(Result<u64, WriterError>),
}

fn worker_loop(mut writer: Box<dyn WorldStateWriter>, jobs: Receiver<Job>, replies: Sender<Reply>) {
    while let Ok(job) = jobs.recv() {
        match job {
            Job::Sample { mut sampler, frame } => {
                let (removed, outcome) = run_pass(&mut sampler, &frame, writer.as_mut());
                let reply = Reply::Sampled {
                    sampler,
                    removed,
                    outcome,
                };
                if replies.send(reply).is_err() {
                    break;
                }
            }
            Job::Finish => {
                let result = writer.finish().map(|()| writer.written());
                if let Err(e) = replies.send(Reply::Finished(result)) {
                    if let Reply::Finished(Err(error)) = e.into_inner() {
                        tracing::warn!(%error, "world state writer failed to finish, logger already gone");
                    } else {
                        tracing::warn!("world state logger gone before finish was acknowledged");
                    }
                }
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// WorldStateLogger
// ---------------------------------------------------------------------------

pub struct WorldStateLogger {
    state: Lifecycle,
    update_interval: f64,
    next_sample: f64,
    idle: Option<WorldStateSampler>,
    jobs: Option<Sender<Job>>,
    replies: Receiver<Reply>,
    worker: Option<JoinHandle<()>>,
    stats: LoggerStats,
}

impl std::fmt::Debug for WorldStateLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldStateLogger")
            .field("state", &self.state)
            .field("update_interval", &self.update_interval)
            .field("in_flight", &self.idle.is_none())
            .field("stats", &self.stats)
            .finish()
    }
}

impl WorldStateLogger {
    /// Start the worker thread. `update_interval` is the minimum sim time
    /// between samples; `0.0` samples every tick.
    pub fn spawn(
        sampler: WorldStateSampler,
        writer: Box<dyn WorldStateWriter>,
        update_interval: f64,
    ) -> std::io::Result<Self> {
        let (job_tx, job_rx) = bounded::<Job>(1);
        let (reply_tx, reply_rx) = bounded::<Reply>(1);
        let worker = std::thread::Builder::new()
            .name("semlog-world-state".into())
            .spawn(move || worker_loop(writer, job_rx, reply_tx))?;
        Ok(Self {
            state: Lifecycle::Initialized,
            update_interval: update_interval.max(0.0),
            next_sample: 0.0,
            idle: Some(sampler),
            jobs: Some(job_tx),
            replies: reply_rx,
            worker: Some(worker),
            stats: LoggerStats::default(),
        })
    }

    /// First sample is taken at `now`.
    pub fn start(&mut self, now: f64) {
        if self.state == Lifecycle::Initialized {
            self.next_sample = now;
            self.state = Lifecycle::Started;
        }
    }

    /// Collect a finished write, then sample if due and no write is in
    /// flight.
    pub fn update(&mut self, now: f64, source: &dyn PoseSource, registry: &mut dyn EntityRegistry) {
        if !self.state.is_running() {
            return;
        }
        self.collect(registry, false);
        if now < self.next_sample {
            return;
        }
        let Some(sampler) = self.idle.take() else {
            return;
        };
        let frame = sampler.capture(now, source, &*registry);
        let Some(jobs) = self.jobs.as_ref() else {
            return;
        };
        if jobs.send(Job::Sample { sampler, frame }).is_err() {
            tracing::error!("world state worker stopped; disabling world state logging");
            self.state = Lifecycle::Finished;
            return;
        }
        self.stats.samples += 1;
        self.next_sample = now + self.update_interval;
    }

    /// Block until an in-flight write completes.
    pub fn wait_idle(&mut self, registry: &mut dyn EntityRegistry) {
        if self.state.is_running() && self.idle.is_none() {
            self.collect(registry, true);
        }
    }

    /// Wait for the in-flight write, finish the writer (indexes) and join
    /// the worker. Returns the number of documents written.
    pub fn finish(&mut self, registry: &mut dyn EntityRegistry) -> Result<u64, WriterError> {
        if self.state.is_finished() {
            return Ok(self.stats.written);
        }
        if self.idle.is_none() {
            self.collect(registry, true);
        }
        self.state = Lifecycle::Finished;
        let jobs = self.jobs.take().ok_or(WriterError::WorkerGone)?;
        jobs.send(Job::Finish).map_err(|_| WriterError::WorkerGone)?;
        let result = match self.replies.recv() {
            Ok(Reply::Finished(result)) => result,
            _ => Err(WriterError::WorkerGone),
        };
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("world state worker panicked");
            }
        }
        let written = result?;
        tracing::info!(written, samples = self.stats.samples, failed = self.stats.failed, "world state logger finished");
        Ok(written)
    }

    fn collect(&mut self, registry: &mut dyn EntityRegistry, block: bool) {
        let reply = if block {
            self.replies.recv().ok()
        } else {
            self.replies.try_recv().ok()
        };
        let Some(Reply::Sampled {
            sampler,
            removed,
            outcome,
        }) = reply
        else {
            return;
        };
        match outcome {
            WriteOutcome::Written => self.stats.written += 1,
            WriteOutcome::Untracked => self.stats.untracked += 1,
            WriteOutcome::Failed => self.stats.failed += 1,
        }
        for handle in removed {
            registry.remove(handle);
            self.stats.removed += 1;
        }
        self.idle = Some(sampler);
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn stats(&self) -> LoggerStats {
        self.stats
    }

    pub fn is_in_flight(&self) -> bool {
        self.idle.is_none()
    }

    /// The sampler, when no write is in flight.
    pub fn sampler(&self) -> Option<&WorldStateSampler> {
        self.idle.as_ref()
    }
}

impl Drop for WorldStateLogger {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

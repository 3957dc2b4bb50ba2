// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! Background batch analysis.
//!
//! One worker thread owns the samples being analyzed and the content cache for the
//! duration of the batch; the caller only receives events and gets both back on join.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use super::{AnalysisError, AnalysisPipeline};
use crate::cache::ContentCache;
use crate::sample::Sample;
use crate::util::short_hash;

/// A cooperative cancellation flag, checked between files.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Progress notifications from the worker.
#[derive(Clone, Debug, PartialEq)]
pub enum AnalysisEvent {
    Started {
        total: usize,
    },
    Progress {
        current: usize,
        total: usize,
        path: PathBuf,
    },
    Failed {
        path: PathBuf,
        reason: String,
    },
    Finished {
        analyzed: usize,
        failed: usize,
        cancelled: bool,
    },
}

/// Everything the worker hands back once it stops.
#[derive(Debug)]
pub struct BatchOutcome {
    /// Every sample given to the worker, analyzed or not, in the original order.
    pub samples: Vec<Sample>,
    pub analyzed: usize,
    pub failures: Vec<(PathBuf, AnalysisError)>,
    pub cancelled: bool,
    pub cache: ContentCache,
}

/// Handle to a running batch.
pub struct AnalysisWorker {
    handle: JoinHandle<BatchOutcome>,
    events: Receiver<AnalysisEvent>,
    cancel: CancelToken,
}

impl AnalysisWorker {
    /// Starts analyzing the samples in order on a new thread.
    pub fn spawn(
        pipeline: Arc<AnalysisPipeline>,
        samples: Vec<Sample>,
        cache: ContentCache,
        cancel: CancelToken,
    ) -> Result<AnalysisWorker, AnalysisError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name("analysis".to_string())
            .spawn(move || run(&pipeline, samples, cache, &worker_cancel, &tx))
            .map_err(|e| AnalysisError::Worker(e.to_string()))?;

        Ok(AnalysisWorker {
            handle,
            events: rx,
            cancel,
        })
    }

    /// Events from the worker. The channel disconnects when the worker finishes.
    pub fn events(&self) -> &Receiver<AnalysisEvent> {
        &self.events
    }

    /// Asks the worker to stop after the file in progress.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the worker and returns its samples and cache.
    pub fn join(self) -> Result<BatchOutcome, AnalysisError> {
        self.handle
            .join()
            .map_err(|_| AnalysisError::Worker("analysis thread panicked".to_string()))
    }
}

fn run(
    pipeline: &AnalysisPipeline,
    samples: Vec<Sample>,
    mut cache: ContentCache,
    cancel: &CancelToken,
    events: &Sender<AnalysisEvent>,
) -> BatchOutcome {
    let total = samples.len();
    // Send errors only mean nobody is listening any more.
    let _ = events.send(AnalysisEvent::Started { total });

    let mut finished = Vec::with_capacity(total);
    let mut analyzed = 0;
    let mut failures = Vec::new();
    let mut cancelled = false;

    let mut pending = samples.into_iter();
    for (i, mut sample) in pending.by_ref().enumerate() {
        if cancel.is_cancelled() {
            cancelled = true;
            finished.push(sample);
            break;
        }

        match pipeline.analyze_sample(&mut sample) {
            Ok(()) => {
                analyzed += 1;
                store_in_cache(&mut cache, &mut sample);
            }
            Err(e) => {
                warn!(path = ?sample.path(), err = %e, "Analysis failed");
                let _ = events.send(AnalysisEvent::Failed {
                    path: sample.path().to_path_buf(),
                    reason: e.to_string(),
                });
                failures.push((sample.path().to_path_buf(), e));
            }
        }

        let _ = events.send(AnalysisEvent::Progress {
            current: i + 1,
            total,
            path: sample.path().to_path_buf(),
        });
        finished.push(sample);
    }
    finished.extend(pending);

    info!(
        analyzed,
        failed = failures.len(),
        cancelled,
        "Analysis batch finished"
    );
    let _ = events.send(AnalysisEvent::Finished {
        analyzed,
        failed: failures.len(),
        cancelled,
    });

    BatchOutcome {
        samples: finished,
        analyzed,
        failures,
        cancelled,
        cache,
    }
}

fn store_in_cache(cache: &mut ContentCache, sample: &mut Sample) {
    if sample.hash().is_none() {
        match cache.hash(sample.path()) {
            Ok(hash) => sample.set_hash(hash),
            Err(e) => {
                warn!(err = %e, "Not caching sample");
                return;
            }
        }
    }
    if let Some(hash) = sample.hash() {
        match cache.put(hash, sample.record()) {
            Ok(()) => debug!(path = ?sample.path(), hash = %short_hash(hash), "Cached analysis"),
            Err(e) => warn!(path = ?sample.path(), err = %e, "Unable to cache analysis"),
        }
    }
}

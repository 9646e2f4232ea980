// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A single batching worker.
//!
//! Each worker owns its batch and its HTTP connection pool, so the hot path takes no
//! locks beyond claiming a job from the shared queue. The loop waits on the first of:
//! - a job arriving, which is filtered and appended to the batch
//! - a periodic tick, which only exists so that old batches get flushed when traffic
//!   stops
//! - the shutdown signal
//!
//! After a job or a tick the flush policy is checked. A flush is attempted exactly
//! once; whatever the outcome the batch is reset. Data still buffered at shutdown is
//! not flushed.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::batch::{Batch, FlushThresholds};
use crate::constants::{STAT_FAILED_WRITES, STAT_RECEIVED, STAT_WRITE_REQUESTS};
use crate::filter::LineFilter;
use crate::flusher::Flusher;
use crate::pool::{Job, JobReceiver};
use crate::stats::Stats;

pub struct Worker {
    id: usize,
    jobs: JobReceiver,
    batch: Batch,
    thresholds: FlushThresholds,
    filter: LineFilter,
    flusher: Flusher,
    stats: Arc<Stats>,
    tick: Duration,
    cancel: CancellationToken,
}

/// Everything workers of one pool share.
#[derive(Clone)]
pub struct WorkerContext {
    pub jobs: JobReceiver,
    pub thresholds: FlushThresholds,
    pub filter: LineFilter,
    pub stats: Arc<Stats>,
    pub tick: Duration,
    pub cancel: CancellationToken,
}

impl Worker {
    #[must_use]
    pub fn new(id: usize, ctx: WorkerContext, flusher: Flusher) -> Self {
        Self {
            id,
            jobs: ctx.jobs,
            batch: Batch::new(),
            thresholds: ctx.thresholds,
            filter: ctx.filter,
            flusher,
            stats: ctx.stats,
            tick: ctx.tick,
            cancel: ctx.cancel,
        }
    }

    pub async fn run(mut self) {
        debug!("Worker {} started", self.id);
        let mut tick = interval(self.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                job = self.jobs.recv() => match job {
                    Some(job) => self.handle_job(&job),
                    None => {
                        debug!("Worker {}: job queue closed", self.id);
                        break;
                    }
                },
                // Wake up regularly to check batch age
                _ = tick.tick() => {}
            }

            self.maybe_flush().await;
        }

        if !self.batch.is_empty() {
            debug!(
                "Worker {} exiting with {} unflushed writes",
                self.id,
                self.batch.writes()
            );
        }
        debug!("Worker {} stopped", self.id);
    }

    fn handle_job(&mut self, job: &Job) {
        self.stats.inc(STAT_RECEIVED);
        for line in self.filter.lines(&job.payload) {
            if let Err(e) = self.batch.write(line) {
                error!("Error: {e}");
            }
        }
    }

    /// Flushes the batch if the policy says so. Returns whether a flush was attempted.
    pub async fn maybe_flush(&mut self) -> bool {
        if !self.batch.should_flush(&self.thresholds) {
            return false;
        }

        self.stats.inc(STAT_WRITE_REQUESTS);
        debug!(
            "Worker {}: flushing {} writes ({} bytes)",
            self.id,
            self.batch.writes(),
            self.batch.size()
        );
        // The batch is emptied whatever the outcome; it is never sent again
        if let Err(e) = self.flusher.send(self.batch.take()).await {
            self.stats.inc(STAT_FAILED_WRITES);
            error!("Error: {e}");
        }
        true
    }
}

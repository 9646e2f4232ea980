// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded job queue shared by a fixed pool of workers.
//!
//! Bus deliveries go in through [`JobInjector`]; every job is claimed by exactly one
//! worker through the shared [`JobReceiver`]. The queue bound only limits undispatched
//! messages: when it fills up injectors wait, and the subscription's pending-bytes
//! limit upstream is what eventually sheds load.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::debug;

use crate::worker::Worker;

/// One message as delivered by the bus.
#[derive(Debug, Clone)]
pub struct Job {
    pub subject: Arc<str>,
    pub payload: Bytes,
}

impl Job {
    pub fn new(subject: impl Into<Arc<str>>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
        }
    }
}

/// Creates the shared queue.
#[must_use]
pub fn job_queue(capacity: usize) -> (JobInjector, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        JobInjector { tx },
        JobReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Sending half of the job queue, handed to every bus subscription.
#[derive(Debug, Clone)]
pub struct JobInjector {
    tx: mpsc::Sender<Job>,
}

impl JobInjector {
    /// Enqueues a job, waiting for room only when the queue is saturated.
    pub async fn inject(&self, job: Job) -> Result<(), mpsc::error::SendError<Job>> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                debug!("Job queue full, waiting for a worker");
                self.tx.send(job).await
            }
            Err(mpsc::error::TrySendError::Closed(job)) => Err(mpsc::error::SendError(job)),
        }
    }
}

/// Receiving half of the job queue, shared by all workers of a pool.
#[derive(Debug, Clone)]
pub struct JobReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl JobReceiver {
    /// Waits for the next job. `None` once every injector is gone and the queue is
    /// drained. Cancel-safe: dropping the future never loses a job.
    pub async fn recv(&self) -> Option<Job> {
        self.rx.lock().await.recv().await
    }
}

/// Fixed-size set of workers sharing one job queue.
pub struct WorkerPool;

impl WorkerPool {
    /// Spawns every worker onto `tasks`. The pool never grows or shrinks.
    pub fn spawn(workers: Vec<Worker>, tasks: &mut JoinSet<()>) {
        debug!("Starting {} workers", workers.len());
        for worker in workers {
            tasks.spawn(worker.run());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_each_job_claimed_once() {
        let (injector, receiver) = job_queue(16);
        for i in 0..10 {
            injector
                .inject(Job::new("spout", format!("line{i}\n")))
                .await
                .unwrap();
        }
        drop(injector);

        let mut consumers = JoinSet::new();
        for _ in 0..3 {
            let receiver = receiver.clone();
            consumers.spawn(async move {
                let mut seen = Vec::new();
                while let Some(job) = receiver.recv().await {
                    seen.push(job.payload);
                }
                seen
            });
        }

        let mut all = Vec::new();
        while let Some(seen) = consumers.join_next().await {
            all.extend(seen.unwrap());
        }
        all.sort();
        let mut expected: Vec<Bytes> = (0..10).map(|i| Bytes::from(format!("line{i}\n"))).collect();
        expected.sort();
        assert_eq!(all, expected);
    }

    #[tokio::test]
    async fn test_inject_waits_when_full() {
        let (injector, receiver) = job_queue(1);
        injector.inject(Job::new("s", "a")).await.unwrap();

        let blocked = timeout(Duration::from_millis(50), injector.inject(Job::new("s", "b"))).await;
        assert!(blocked.is_err(), "second inject should wait for room");

        let pending = tokio::spawn({
            let injector = injector.clone();
            async move { injector.inject(Job::new("s", "c")).await }
        });
        assert_eq!(receiver.recv().await.unwrap().payload, "a");
        pending.await.unwrap().unwrap();
        assert_eq!(receiver.recv().await.unwrap().payload, "c");
    }

    #[tokio::test]
    async fn test_inject_fails_once_closed() {
        let (injector, receiver) = job_queue(4);
        drop(receiver);
        assert!(injector.inject(Job::new("s", "a")).await.is_err());
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! NATS implementation of the bus.
//!
//! Core NATS has no server-side backlog for plain subscriptions, so each subscription
//! keeps its own pending accounting: messages read off the connection but not yet
//! handed to the job queue count against a pending-bytes limit. A message that would
//! push the backlog past the limit is discarded and counted as dropped, which is what
//! the backpressure monitor reports on.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{Bus, Subscription};
use crate::constants::BUS_OPERATION_TIMEOUT;
use crate::errors::BusError;
use crate::pool::{Job, JobInjector};

const CLIENT_NAME: &str = "spout-writer";

pub struct NatsBus {
    /// Taken on close; every later operation fails with `Disconnected`.
    client: Mutex<Option<async_nats::Client>>,
    shutdown: CancellationToken,
    op_timeout: Duration,
}

impl NatsBus {
    pub async fn connect(address: &str) -> Result<Self, BusError> {
        let client = async_nats::ConnectOptions::new()
            .name(CLIENT_NAME)
            .connect(address)
            .await
            .map_err(|e| BusError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        info!("Connected to NATS at {address}");
        Ok(Self {
            client: Mutex::new(Some(client)),
            shutdown: CancellationToken::new(),
            op_timeout: BUS_OPERATION_TIMEOUT,
        })
    }

    /// Bounds every publish, flush and subscribe.
    #[must_use]
    pub fn with_operation_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    fn client(&self) -> Result<async_nats::Client, BusError> {
        let client = self.client.lock().map_err(|_| BusError::Disconnected)?;
        client.as_ref().cloned().ok_or(BusError::Disconnected)
    }

    async fn bounded<T, E: Display>(
        &self,
        operation: impl Future<Output = Result<T, E>>,
    ) -> Result<T, String> {
        match timeout(self.op_timeout, operation).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.op_timeout)),
        }
    }
}

#[async_trait]
impl Bus for NatsBus {
    async fn subscribe(
        &self,
        subject: &str,
        max_pending_bytes: u64,
        injector: JobInjector,
    ) -> Result<Arc<dyn Subscription>, BusError> {
        if max_pending_bytes == 0 {
            return Err(BusError::PendingLimits {
                subject: subject.to_string(),
                reason: "pending bytes limit must be greater than 0".to_string(),
            });
        }

        let client = self.client()?;
        let subscriber = self
            .bounded(client.subscribe(subject.to_string()))
            .await
            .map_err(|reason| BusError::Subscribe {
                subject: subject.to_string(),
                reason,
            })?;

        let pending = Arc::new(Pending::new(max_pending_bytes));
        let cancel = self.shutdown.child_token();
        let (backlog_tx, backlog_rx) = mpsc::unbounded_channel();

        tokio::spawn(read_messages(
            subject.to_string(),
            subscriber,
            Arc::clone(&pending),
            backlog_tx,
            cancel.clone(),
        ));
        tokio::spawn(deliver_backlog(backlog_rx, Arc::clone(&pending), injector));

        Ok(Arc::new(NatsSubscription {
            subject: subject.to_string(),
            pending,
            cancel,
        }))
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        let client = self.client()?;
        self.bounded(client.publish(subject.to_string(), payload))
            .await
            .map_err(|reason| BusError::Publish {
                subject: subject.to_string(),
                reason,
            })
    }

    async fn flush(&self) -> Result<(), BusError> {
        let client = self.client()?;
        self.bounded(client.flush()).await.map_err(BusError::Flush)
    }

    async fn close(&self) {
        self.shutdown.cancel();
        let client = match self.client.lock() {
            Ok(mut client) => client.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(client) = client else {
            return;
        };
        if let Err(e) = self.bounded(client.flush()).await {
            debug!("NATS flush on close failed: {e}");
        }
        // The connection task exits once the client and all subscribers are gone
        drop(client);
        debug!("NATS connection closed");
    }
}

/// Backlog accounting for one subscription. Only the reader task admits messages and
/// only the delivery task releases them.
#[derive(Debug)]
struct Pending {
    limit_bytes: u64,
    msgs: AtomicU64,
    bytes: AtomicU64,
    max_msgs: AtomicU64,
    max_bytes: AtomicU64,
    dropped: AtomicU64,
}

impl Pending {
    fn new(limit_bytes: u64) -> Self {
        Self {
            limit_bytes,
            msgs: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            max_msgs: AtomicU64::new(0),
            max_bytes: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Counts a message into the backlog, or as dropped when it does not fit.
    fn admit(&self, len: u64) -> bool {
        if self.bytes.load(Ordering::Acquire) + len > self.limit_bytes {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let bytes = self.bytes.fetch_add(len, Ordering::AcqRel) + len;
        let msgs = self.msgs.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_bytes.fetch_max(bytes, Ordering::Relaxed);
        self.max_msgs.fetch_max(msgs, Ordering::Relaxed);
        true
    }

    fn release(&self, len: u64) {
        self.bytes.fetch_sub(len, Ordering::AcqRel);
        self.msgs.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn read_messages(
    subject: String,
    mut subscriber: async_nats::Subscriber,
    pending: Arc<Pending>,
    backlog: mpsc::UnboundedSender<Job>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                match timeout(BUS_OPERATION_TIMEOUT, subscriber.unsubscribe()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("Failed to unsubscribe from {subject:?}: {e}"),
                    Err(_) => debug!("Timed out unsubscribing from {subject:?}"),
                }
                break;
            }
            msg = subscriber.next() => {
                let Some(msg) = msg else {
                    error!("NATS subscription for {subject:?} ended");
                    break;
                };
                let len = msg.payload.len() as u64;
                if pending.admit(len) {
                    let job = Job::new(&*msg.subject, msg.payload);
                    if backlog.send(job).is_err() {
                        break;
                    }
                }
            }
        }
    }
    debug!("Stopped reading {subject:?}");
}

async fn deliver_backlog(
    mut backlog: mpsc::UnboundedReceiver<Job>,
    pending: Arc<Pending>,
    injector: JobInjector,
) {
    while let Some(job) = backlog.recv().await {
        let len = job.payload.len() as u64;
        let delivered = injector.inject(job).await;
        pending.release(len);
        if delivered.is_err() {
            debug!("Job queue closed, dropping subscription backlog");
            break;
        }
    }
}

struct NatsSubscription {
    subject: String,
    pending: Arc<Pending>,
    cancel: CancellationToken,
}

impl NatsSubscription {
    fn check_open(&self) -> Result<(), BusError> {
        if self.cancel.is_cancelled() {
            return Err(BusError::Closed(self.subject.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl Subscription for NatsSubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn dropped(&self) -> Result<u64, BusError> {
        self.check_open()?;
        Ok(self.pending.dropped.load(Ordering::Relaxed))
    }

    fn max_pending(&self) -> Result<(u64, u64), BusError> {
        self.check_open()?;
        Ok((
            self.pending.max_msgs.load(Ordering::Relaxed),
            self.pending.max_bytes.load(Ordering::Relaxed),
        ))
    }

    async fn unsubscribe(&self) -> Result<(), BusError> {
        self.check_open()?;
        self.cancel.cancel();
        Ok(())
    }
}

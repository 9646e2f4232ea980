// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bus doubles shared by unit tests.

#![cfg(test)]
#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::bus::{Bus, Subscription};
use crate::errors::BusError;
use crate::pool::{Job, JobInjector};

/// Subscription replaying scripted samples. Once a script is down to its last entry
/// that entry repeats; an `Err(())` entry makes the query fail.
pub(crate) struct ScriptedSubscription {
    pub subject: String,
    pub dropped: Mutex<VecDeque<Result<u64, ()>>>,
    pub max_pending: Mutex<VecDeque<u64>>,
    pub unsubscribed: AtomicBool,
}

impl ScriptedSubscription {
    pub(crate) fn new(subject: &str, dropped: &[u64], max_pending: &[u64]) -> Self {
        Self {
            subject: subject.to_string(),
            dropped: Mutex::new(dropped.iter().map(|d| Ok(*d)).collect()),
            max_pending: Mutex::new(max_pending.iter().copied().collect()),
            unsubscribed: AtomicBool::new(false),
        }
    }

    fn next<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
        let mut queue = queue.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Subscription for ScriptedSubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn dropped(&self) -> Result<u64, BusError> {
        match Self::next(&self.dropped) {
            Some(Ok(d)) => Ok(d),
            _ => Err(BusError::Closed(self.subject.clone())),
        }
    }

    fn max_pending(&self) -> Result<(u64, u64), BusError> {
        Ok((0, Self::next(&self.max_pending).unwrap_or_default()))
    }

    async fn unsubscribe(&self) -> Result<(), BusError> {
        self.unsubscribed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// In-process bus that records publishes and hands out scripted subscriptions.
#[derive(Default)]
pub(crate) struct RecordingBus {
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
    pub flushes: AtomicUsize,
    pub closes: AtomicUsize,
    /// Subscribing to this subject fails.
    pub fail_subject: Option<String>,
    /// Flushes never complete, like a client waiting on an unreachable server.
    pub stall_flush: bool,
    pub subscriptions: Mutex<Vec<Arc<ScriptedSubscription>>>,
    pub injectors: Mutex<Vec<JobInjector>>,
}

impl RecordingBus {
    pub(crate) fn failing_on(subject: &str) -> Self {
        Self {
            fail_subject: Some(subject.to_string()),
            ..Default::default()
        }
    }

    pub(crate) fn stalling() -> Self {
        Self {
            stall_flush: true,
            ..Default::default()
        }
    }

    pub(crate) fn payloads(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| String::from_utf8_lossy(p).into_owned())
            .collect()
    }

    /// Sample lines of every published payload, without `#` comment lines.
    pub(crate) fn samples(&self) -> Vec<String> {
        self.payloads()
            .iter()
            .flat_map(|p| p.lines().map(str::to_string).collect::<Vec<_>>())
            .filter(|line| !line.starts_with('#'))
            .collect()
    }

    /// Delivers a message the way a subscription would.
    pub(crate) async fn deliver(&self, subject: &str, payload: &'static str) {
        let injector = self.injectors.lock().unwrap()[0].clone();
        injector.inject(Job::new(subject, payload)).await.unwrap();
    }
}

#[async_trait]
impl Bus for RecordingBus {
    async fn subscribe(
        &self,
        subject: &str,
        _max_pending_bytes: u64,
        injector: JobInjector,
    ) -> Result<Arc<dyn Subscription>, BusError> {
        if self.fail_subject.as_deref() == Some(subject) {
            return Err(BusError::Subscribe {
                subject: subject.to_string(),
                reason: "permissions violation".to_string(),
            });
        }
        let subscription = Arc::new(ScriptedSubscription::new(subject, &[0], &[0]));
        self.subscriptions
            .lock()
            .unwrap()
            .push(Arc::clone(&subscription));
        self.injectors.lock().unwrap().push(injector);
        Ok(subscription)
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.published
            .lock()
            .unwrap()
            .push((subject.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn flush(&self) -> Result<(), BusError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        if self.stall_flush {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

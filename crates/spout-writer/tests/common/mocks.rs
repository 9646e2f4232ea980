// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory bus standing in for NATS

use async_trait::async_trait;
use bytes::Bytes;
use spout_writer::bus::{Bus, Subscription};
use spout_writer::errors::BusError;
use spout_writer::pool::{Job, JobInjector};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Subscription whose dropped total follows a script, repeating the last value
pub struct MockSubscription {
    subject: String,
    dropped: Mutex<VecDeque<u64>>,
    pub max_pending_bytes: AtomicU64,
    pub unsubscribed: AtomicBool,
}

impl MockSubscription {
    fn new(subject: &str, dropped: &[u64]) -> Self {
        Self {
            subject: subject.to_string(),
            dropped: Mutex::new(dropped.iter().copied().collect()),
            max_pending_bytes: AtomicU64::new(0),
            unsubscribed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Subscription for MockSubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn dropped(&self) -> Result<u64, BusError> {
        let mut dropped = self.dropped.lock().unwrap();
        let value = if dropped.len() > 1 {
            dropped.pop_front()
        } else {
            dropped.front().copied()
        };
        Ok(value.unwrap_or_default())
    }

    fn max_pending(&self) -> Result<(u64, u64), BusError> {
        Ok((0, self.max_pending_bytes.load(Ordering::SeqCst)))
    }

    async fn unsubscribe(&self) -> Result<(), BusError> {
        self.unsubscribed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Bus delivering published messages straight into the writer's job queue
#[derive(Default)]
pub struct MemoryBus {
    dropped_script: Vec<u64>,
    injectors: Mutex<HashMap<String, JobInjector>>,
    subscriptions: Mutex<Vec<Arc<MockSubscription>>>,
    published: Mutex<Vec<(String, Bytes)>>,
    pub closes: AtomicUsize,
}

#[allow(dead_code)]
impl MemoryBus {
    /// Every subscription reports these dropped totals, one per query
    pub fn with_dropped(script: &[u64]) -> Self {
        Self {
            dropped_script: script.to_vec(),
            ..Default::default()
        }
    }

    /// Hands a message to whoever subscribed to `subject`
    pub async fn send(&self, subject: &str, payload: &str) {
        let injector = self
            .injectors
            .lock()
            .unwrap()
            .get(subject)
            .cloned()
            .expect("no subscription for subject");
        injector
            .inject(Job::new(subject, payload.to_string()))
            .await
            .unwrap();
    }

    pub fn subscriptions(&self) -> Vec<Arc<MockSubscription>> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Lines published to `subject` starting with `metric`
    pub fn records(&self, subject: &str, metric: &str) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == subject)
            .flat_map(|(_, p)| {
                String::from_utf8_lossy(p)
                    .lines()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|line| line.starts_with(&format!("{metric}{{")))
            .collect()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn subscribe(
        &self,
        subject: &str,
        _max_pending_bytes: u64,
        injector: JobInjector,
    ) -> Result<Arc<dyn Subscription>, BusError> {
        let script = if self.dropped_script.is_empty() {
            vec![0]
        } else {
            self.dropped_script.clone()
        };
        let subscription = Arc::new(MockSubscription::new(subject, &script));
        self.subscriptions
            .lock()
            .unwrap()
            .push(Arc::clone(&subscription));
        self.injectors
            .lock()
            .unwrap()
            .insert(subject.to_string(), injector);
        Ok(subscription)
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.published
            .lock()
            .unwrap()
            .push((subject.to_string(), payload));
        Ok(())
    }

    async fn flush(&self) -> Result<(), BusError> {
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

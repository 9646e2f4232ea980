// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Backpressure monitoring for a single subscription.
//!
//! Workers never see messages the bus discarded because a subscription exceeded its
//! pending limit, so this loop watches the subscription directly. Every tick it
//! records the pending high-water mark and, when the dropped total moved, logs the
//! delta and publishes a `dropped` counter to the monitoring subject.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::{Bus, Subscription};
use crate::constants::{DROPPED_METRIC, STAT_MAX_PENDING};
use crate::stats::{counter_to_prometheus, Labels, Stats};

pub struct Monitor {
    subscription: Arc<dyn Subscription>,
    bus: Arc<dyn Bus>,
    stats: Arc<Stats>,
    monitor_subject: String,
    labels: Labels,
    last: u64,
}

impl Monitor {
    /// `labels` are the writer's static labels; the subscription's subject is added.
    pub fn new(
        subscription: Arc<dyn Subscription>,
        bus: Arc<dyn Bus>,
        stats: Arc<Stats>,
        monitor_subject: String,
        mut labels: Labels,
    ) -> Self {
        labels.insert("subject".to_string(), subscription.subject().to_string());
        let last = match subscription.dropped() {
            Ok(dropped) => dropped,
            Err(e) => {
                warn!("NATS warning: failed to get the number of dropped messages from NATS: {e}");
                0
            }
        };
        Self {
            subscription,
            bus,
            stats,
            monitor_subject,
            labels,
            last,
        }
    }

    pub async fn run(mut self, period: Duration, cancel: CancellationToken) {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.check() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }
        }

        if let Err(e) = self.subscription.unsubscribe().await {
            debug!("Failed to unsubscribe from {:?}: {e}", self.subscription.subject());
        }
        debug!("Monitor for {:?} stopped", self.subscription.subject());
    }

    /// Samples the subscription once. Returns the number of newly dropped messages if
    /// a drop was signalled.
    pub async fn check(&mut self) -> Option<u64> {
        let (_, max_bytes) = match self.subscription.max_pending() {
            Ok(pending) => pending,
            Err(e) => {
                warn!("NATS warning: failed to get the max pending stats from NATS: {e}");
                return None;
            }
        };
        self.stats.max(STAT_MAX_PENDING, max_bytes);

        let dropped = match self.subscription.dropped() {
            Ok(dropped) => dropped,
            Err(e) => {
                warn!("NATS warning: failed to get the number of dropped messages from NATS: {e}");
                return None;
            }
        };

        if dropped == self.last {
            return None;
        }
        let delta = dropped.saturating_sub(self.last);
        self.last = dropped;
        self.signal_drop(dropped, delta).await;
        Some(delta)
    }

    async fn signal_drop(&self, dropped: u64, delta: u64) {
        // this writer is overloaded and the bus had to drop messages
        warn!(
            "Warning: dropped {delta} for subject {:?} (total dropped: {dropped})",
            self.subscription.subject()
        );

        let line =
            match counter_to_prometheus(DROPPED_METRIC, dropped, SystemTime::now(), &self.labels) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to render drop event: {e}");
                    return;
                }
            };
        if let Err(e) = self.bus.publish(&self.monitor_subject, Bytes::from(line)).await {
            warn!("Failed to publish drop event: {e}");
            return;
        }
        if let Err(e) = self.bus.flush().await {
            warn!("Failed to flush drop event: {e}");
        }
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic publication of the writer's counters to the monitoring subject.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::Bus;
use crate::stats::{snapshot_to_prometheus, Labels, Stats};

pub struct Statistician {
    stats: Arc<Stats>,
    bus: Arc<dyn Bus>,
    monitor_subject: String,
    labels: Labels,
}

impl Statistician {
    #[must_use]
    pub fn new(
        stats: Arc<Stats>,
        bus: Arc<dyn Bus>,
        monitor_subject: String,
        labels: Labels,
    ) -> Self {
        Self {
            stats,
            bus,
            monitor_subject,
            labels,
        }
    }

    /// Publishes a snapshot right away and then once per `period` until cancelled.
    pub async fn run(self, period: Duration, cancel: CancellationToken) {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => self.publish().await,
            }
        }
        debug!("Statistician stopped");
    }

    pub async fn publish(&self) {
        let lines =
            match snapshot_to_prometheus(&self.stats.snapshot(), SystemTime::now(), &self.labels) {
                Ok(lines) => lines,
                Err(e) => {
                    warn!("Failed to render stats: {e}");
                    return;
                }
            };
        if let Err(e) = self.bus.publish(&self.monitor_subject, Bytes::from(lines)).await {
            warn!("Failed to publish stats: {e}");
        }
    }
}

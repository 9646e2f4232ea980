// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide counters shared by workers and monitors, and their rendering into
//! Prometheus text exposition for the monitoring subject.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use prometheus::proto::{Counter, Gauge, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};
use tracing::debug;

use crate::constants::GAUGE_STATS;

/// Labels attached to every published sample, rendered sorted by key.
pub type Labels = BTreeMap<String, String>;

/// Fixed set of named counters. Names are registered up front so the hot path
/// never allocates or locks.
#[derive(Debug)]
pub struct Stats {
    counters: Vec<(&'static str, AtomicU64)>,
}

impl Stats {
    #[must_use]
    pub fn new(names: &[&'static str]) -> Self {
        Self {
            counters: names.iter().map(|&n| (n, AtomicU64::new(0))).collect(),
        }
    }

    fn counter(&self, name: &str) -> Option<&AtomicU64> {
        let counter = self
            .counters
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, c)| c);
        if counter.is_none() {
            debug!("Ignoring unregistered stat {name}");
        }
        counter
    }

    pub fn inc(&self, name: &str) {
        if let Some(counter) = self.counter(name) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Raises `name` to `value` if it is currently lower.
    pub fn max(&self, name: &str, value: u64) {
        if let Some(counter) = self.counter(name) {
            counter.fetch_max(value, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<u64> {
        self.counter(name).map(|c| c.load(Ordering::Relaxed))
    }

    /// Current values in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        self.counters
            .iter()
            .map(|(name, c)| (*name, c.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Renders a snapshot as one metric family per stat, in snapshot order.
pub fn snapshot_to_prometheus(
    snapshot: &[(&str, u64)],
    now: SystemTime,
    labels: &Labels,
) -> Result<Vec<u8>, prometheus::Error> {
    let families: Vec<MetricFamily> = snapshot
        .iter()
        .map(|(name, value)| family(name, metric_type(name), *value, now, labels))
        .collect();
    encode(&families)
}

/// Renders a single counter sample.
pub fn counter_to_prometheus(
    name: &str,
    value: u64,
    now: SystemTime,
    labels: &Labels,
) -> Result<Vec<u8>, prometheus::Error> {
    encode(&[family(name, MetricType::COUNTER, value, now, labels)])
}

fn metric_type(name: &str) -> MetricType {
    if GAUGE_STATS.contains(&name) {
        MetricType::GAUGE
    } else {
        MetricType::COUNTER
    }
}

fn family(
    name: &str,
    kind: MetricType,
    value: u64,
    now: SystemTime,
    labels: &Labels,
) -> MetricFamily {
    let mut metric = Metric::default();
    for (key, val) in labels {
        let mut pair = LabelPair::default();
        pair.set_name(key.clone());
        pair.set_value(val.clone());
        metric.mut_label().push(pair);
    }

    let value = value as f64;
    match kind {
        MetricType::GAUGE => {
            let mut gauge = Gauge::default();
            gauge.set_value(value);
            metric.set_gauge(gauge);
        }
        _ => {
            let mut counter = Counter::default();
            counter.set_value(value);
            metric.set_counter(counter);
        }
    }

    let millis = now
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default();
    metric.set_timestamp_ms(millis);

    let mut family = MetricFamily::default();
    family.set_name(name.to_string());
    family.set_field_type(kind);
    family.mut_metric().push(metric);
    family
}

fn encode(families: &[MetricFamily]) -> Result<Vec<u8>, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(families, &mut buffer)?;
    Ok(buffer)
}

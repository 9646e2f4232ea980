// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Counter: messages pulled off the job queue by a worker.
pub const STAT_RECEIVED: &str = "received";
/// Counter: batch POSTs attempted.
pub const STAT_WRITE_REQUESTS: &str = "write_requests";
/// Counter: batch POSTs that failed at the transport or returned status >= 300.
pub const STAT_FAILED_WRITES: &str = "failed_writes";
/// Gauge: highest pending-bytes backlog seen on any subscription.
pub const STAT_MAX_PENDING: &str = "max_pending";

pub const WRITER_STATS: [&str; 4] = [
    STAT_RECEIVED,
    STAT_WRITE_REQUESTS,
    STAT_FAILED_WRITES,
    STAT_MAX_PENDING,
];

/// Stats published as gauges rather than counters.
pub const GAUGE_STATS: [&str; 1] = [STAT_MAX_PENDING];

/// Outstanding jobs the shared queue holds before injectors have to wait.
pub const JOB_QUEUE_CAPACITY: usize = 1024;

pub const WORKER_TICK_INTERVAL: Duration = Duration::from_secs(1);
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(1);
pub const STATS_INTERVAL: Duration = Duration::from_secs(3);

/// Upper bound on a bus publish or flush. The NATS client reconnects forever, so
/// without it these never return while the server is unreachable.
pub const BUS_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

// HTTP client pool limits, per worker
pub const MAX_IDLE_CONNS_PER_HOST: usize = 10;
pub const IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(30);

pub const WRITE_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

pub const COMPONENT: &str = "writer";
pub const DROPPED_METRIC: &str = "dropped";

pub const MB: usize = 1024 * 1024;

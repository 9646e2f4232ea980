// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use mockito::Server;
use spout_writer::config::WriterConfig;
use std::time::Duration;

pub const SUBJECT: &str = "spout";
pub const MONITOR_SUBJECT: &str = "spout-monitor";

/// Single worker writing to the mock server, batches of 3 writes, 1MB or 5s
pub fn config_for(server: &Server) -> WriterConfig {
    let addr = server.socket_address();
    WriterConfig {
        name: "it".to_string(),
        nats_subjects: vec![SUBJECT.to_string()],
        nats_subject_monitor: MONITOR_SUBJECT.to_string(),
        workers: 1,
        batch_max_count: 3,
        batch_max_mb: 1,
        batch_max_secs: 5,
        write_timeout_secs: 5,
        influxdb_address: addr.ip().to_string(),
        influxdb_port: addr.port(),
        influxdb_dbname: "metrics".to_string(),
        worker_tick: Duration::from_millis(50),
        monitor_interval: Duration::from_millis(20),
        stats_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

/// Polls `condition` until it holds or `limit` elapses
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

/// Value of a `name{labels} value timestamp` sample
pub fn sample_value(line: &str) -> u64 {
    line.rsplit('}')
        .next()
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
        .expect("malformed sample")
}

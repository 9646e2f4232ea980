// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::batch::FlushThresholds;
use crate::constants::{COMPONENT, MB, MONITOR_INTERVAL, STATS_INTERVAL, WORKER_TICK_INTERVAL};
use crate::errors::WriterError;
use crate::flusher::write_url;
use crate::rules::RuleConfig;
use crate::stats::Labels;

/// Configuration for a writer instance
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Instance name, attached to every monitoring record
    pub name: String,
    /// NATS server URL
    pub nats_address: String,
    /// Subjects to consume line protocol from
    pub nats_subjects: Vec<String>,
    /// Subject monitoring records are published to
    pub nats_subject_monitor: String,
    /// Number of batching workers
    pub workers: usize,
    /// Flush once a batch holds this many writes
    pub batch_max_count: usize,
    /// Flush once a batch holds this many megabytes
    pub batch_max_mb: usize,
    /// Flush once the oldest write in a batch is this old
    pub batch_max_secs: u64,
    /// Timeout of a single POST to InfluxDB
    pub write_timeout_secs: u64,
    /// Per-subscription backlog limit before messages are dropped
    pub nats_max_pending_mb: u64,
    /// Include response bodies in write errors
    pub debug: bool,
    pub influxdb_address: String,
    pub influxdb_port: u16,
    pub influxdb_dbname: String,
    /// Line filtering rules; empty disables filtering
    pub rules: Vec<RuleConfig>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    pub worker_tick: Duration,
    pub monitor_interval: Duration,
    pub stats_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            name: "spout-writer".to_string(),
            nats_address: "nats://localhost:4222".to_string(),
            nats_subjects: vec!["influx-spout".to_string()],
            nats_subject_monitor: "influx-spout-monitor".to_string(),
            workers: 8,
            batch_max_count: 10,
            batch_max_mb: 10,
            batch_max_secs: 300,
            write_timeout_secs: 30,
            nats_max_pending_mb: 200,
            debug: false,
            influxdb_address: "localhost".to_string(),
            influxdb_port: 8086,
            influxdb_dbname: "influx-spout-junk".to_string(),
            rules: Vec::new(),
            log_level: "info".to_string(),
            worker_tick: WORKER_TICK_INTERVAL,
            monitor_interval: MONITOR_INTERVAL,
            stats_interval: STATS_INTERVAL,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|val| val.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_subjects(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl WriterConfig {
    /// Create configuration from `SPOUT_*` environment variables
    pub fn from_env() -> Result<Self, WriterError> {
        let defaults = Self::default();

        let rules = match env::var("SPOUT_RULES") {
            Ok(val) if !val.trim().is_empty() => serde_json::from_str(&val).map_err(|e| {
                WriterError::InvalidConfig(format!("SPOUT_RULES is not a valid rule list: {e}"))
            })?,
            _ => Vec::new(),
        };

        let config = Self {
            name: env::var("SPOUT_NAME").unwrap_or(defaults.name),
            nats_address: env::var("SPOUT_NATS_ADDRESS").unwrap_or(defaults.nats_address),
            nats_subjects: env::var("SPOUT_NATS_SUBJECT")
                .map(|val| parse_subjects(&val))
                .unwrap_or(defaults.nats_subjects),
            nats_subject_monitor: env::var("SPOUT_NATS_SUBJECT_MONITOR")
                .unwrap_or(defaults.nats_subject_monitor),
            workers: parse_env("SPOUT_WORKERS", defaults.workers),
            batch_max_count: parse_env("SPOUT_BATCH_MAX_COUNT", defaults.batch_max_count),
            batch_max_mb: parse_env("SPOUT_BATCH_MAX_MB", defaults.batch_max_mb),
            batch_max_secs: parse_env("SPOUT_BATCH_MAX_SECS", defaults.batch_max_secs),
            write_timeout_secs: parse_env("SPOUT_WRITE_TIMEOUT_SECS", defaults.write_timeout_secs),
            nats_max_pending_mb: parse_env(
                "SPOUT_NATS_MAX_PENDING_MB",
                defaults.nats_max_pending_mb,
            ),
            debug: env::var("SPOUT_DEBUG")
                .map(|val| val.to_lowercase() == "true")
                .unwrap_or(defaults.debug),
            influxdb_address: env::var("SPOUT_INFLUXDB_ADDRESS")
                .unwrap_or(defaults.influxdb_address),
            influxdb_port: parse_env("SPOUT_INFLUXDB_PORT", defaults.influxdb_port),
            influxdb_dbname: env::var("SPOUT_INFLUXDB_DBNAME").unwrap_or(defaults.influxdb_dbname),
            rules,
            log_level: env::var("SPOUT_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), WriterError> {
        if self.nats_subjects.is_empty() {
            return Err(WriterError::InvalidConfig(
                "at least one NATS subject is required".to_string(),
            ));
        }
        if self.nats_subject_monitor.trim().is_empty() {
            return Err(WriterError::InvalidConfig(
                "SPOUT_NATS_SUBJECT_MONITOR cannot be empty".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(WriterError::InvalidConfig(
                "workers must be greater than 0".to_string(),
            ));
        }
        if self.batch_max_count == 0 || self.batch_max_mb == 0 || self.batch_max_secs == 0 {
            return Err(WriterError::InvalidConfig(
                "batch thresholds must be greater than 0".to_string(),
            ));
        }
        if self.write_timeout_secs == 0 {
            return Err(WriterError::InvalidConfig(
                "write timeout must be greater than 0".to_string(),
            ));
        }
        if self.nats_max_pending_mb == 0 {
            return Err(WriterError::InvalidConfig(
                "NATS max pending size must be greater than 0".to_string(),
            ));
        }
        if self.influxdb_port == 0 {
            return Err(WriterError::InvalidConfig(
                "InfluxDB port must be greater than 0".to_string(),
            ));
        }
        if self.influxdb_address.trim().is_empty() || self.influxdb_dbname.trim().is_empty() {
            return Err(WriterError::InvalidConfig(
                "InfluxDB address and database name cannot be empty".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(WriterError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn thresholds(&self) -> FlushThresholds {
        FlushThresholds {
            max_count: self.batch_max_count,
            max_bytes: self.batch_max_mb.saturating_mul(MB),
            max_age: Duration::from_secs(self.batch_max_secs),
        }
    }

    #[must_use]
    pub fn write_url(&self) -> String {
        write_url(
            &self.influxdb_address,
            self.influxdb_port,
            &self.influxdb_dbname,
        )
    }

    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    #[must_use]
    pub fn max_pending_bytes(&self) -> u64 {
        self.nats_max_pending_mb.saturating_mul(MB as u64)
    }

    /// Static labels of every monitoring record this instance publishes.
    #[must_use]
    pub fn labels(&self) -> Labels {
        Labels::from([
            ("component".to_string(), COMPONENT.to_string()),
            ("name".to_string(), self.name.clone()),
            ("influxdb_address".to_string(), self.influxdb_address.clone()),
            ("influxdb_port".to_string(), self.influxdb_port.to_string()),
            ("influxdb_dbname".to_string(), self.influxdb_dbname.clone()),
        ])
    }
}

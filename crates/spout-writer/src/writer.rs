// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of a writer: wiring the job queue, workers, subscriptions, monitors and
//! the statistician together, and tearing them down again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bus::nats::NatsBus;
use crate::bus::Bus;
use crate::config::WriterConfig;
use crate::constants::{JOB_QUEUE_CAPACITY, WRITER_STATS};
use crate::errors::WriterError;
use crate::filter::LineFilter;
use crate::flusher::Flusher;
use crate::monitor::Monitor;
use crate::pool::{job_queue, WorkerPool};
use crate::rules::{RuleMatcher, RuleSet};
use crate::statistician::Statistician;
use crate::stats::Stats;
use crate::worker::{Worker, WorkerContext};

/// Handle to a running writer.
pub struct Writer {
    bus: Arc<dyn Bus>,
    stats: Arc<Stats>,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl Writer {
    /// Starts every component of the writer on `bus`.
    ///
    /// If any step fails whatever was already started is stopped, the bus is closed
    /// and the error returned.
    pub async fn start(
        config: Arc<WriterConfig>,
        bus: Arc<dyn Bus>,
        rules: Arc<dyn RuleMatcher>,
    ) -> Result<Self, WriterError> {
        let writer = Self {
            bus,
            stats: Arc::new(Stats::new(&WRITER_STATS)),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        };

        if let Err(e) = writer.launch(&config, rules).await {
            error!("Failed to start writer: {e}");
            writer.stop().await;
            return Err(e);
        }

        info!(
            "writer subscribed to {:?} at {} with {} workers",
            config.nats_subjects, config.nats_address, config.workers
        );
        info!("POST timeout: {}s", config.write_timeout_secs);
        info!("maximum NATS subject size: {}MB", config.nats_max_pending_mb);
        Ok(writer)
    }

    async fn launch(
        &self,
        config: &WriterConfig,
        rules: Arc<dyn RuleMatcher>,
    ) -> Result<(), WriterError> {
        config.validate()?;

        let url = config.write_url();
        let flushers = (0..config.workers)
            .map(|_| Flusher::new(url.clone(), config.write_timeout(), config.debug))
            .collect::<Result<Vec<_>, _>>()
            .map_err(WriterError::HttpClient)?;

        let mut tasks = self.tasks.lock().await;

        let (injector, jobs) = job_queue(JOB_QUEUE_CAPACITY);
        let ctx = WorkerContext {
            jobs,
            thresholds: config.thresholds(),
            filter: LineFilter::new(rules),
            stats: Arc::clone(&self.stats),
            tick: config.worker_tick,
            cancel: self.cancel.clone(),
        };
        let workers = flushers
            .into_iter()
            .enumerate()
            .map(|(id, flusher)| Worker::new(id, ctx.clone(), flusher))
            .collect();
        WorkerPool::spawn(workers, &mut tasks);

        let labels = config.labels();
        for subject in &config.nats_subjects {
            let subscription = self
                .bus
                .subscribe(subject, config.max_pending_bytes(), injector.clone())
                .await?;
            let monitor = Monitor::new(
                subscription,
                Arc::clone(&self.bus),
                Arc::clone(&self.stats),
                config.nats_subject_monitor.clone(),
                labels.clone(),
            );
            tasks.spawn(monitor.run(config.monitor_interval, self.cancel.clone()));
        }

        // Subscriptions are not reliably active until the connection is flushed
        self.bus.flush().await?;

        let statistician = Statistician::new(
            Arc::clone(&self.stats),
            Arc::clone(&self.bus),
            config.nats_subject_monitor.clone(),
            labels,
        );
        tasks.spawn(statistician.run(config.stats_interval, self.cancel.clone()));

        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Signals shutdown, waits for every task to exit and closes the bus. Safe to call
    /// more than once; later calls return once the first has finished.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Writer task failed: {e}");
            }
        }

        if !self.closed.swap(true, Ordering::AcqRel) {
            self.bus.close().await;
            debug!("Writer stopped");
        }
    }
}

/// Connects to NATS and starts a writer with the configured rules.
pub async fn start_writer(config: WriterConfig) -> Result<Writer, WriterError> {
    config.validate()?;
    let rules = RuleSet::from_config(&config.rules)?;
    let bus = NatsBus::connect(&config.nats_address).await?;
    Writer::start(Arc::new(config), Arc::new(bus), Arc::new(rules)).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::constants::{STAT_RECEIVED, STAT_WRITE_REQUESTS};
    use crate::errors::BusError;
    use crate::test_support::RecordingBus;
    use mockito::{Matcher, Server};
    use std::time::Duration;

    fn config_for(server: &Server) -> WriterConfig {
        let addr = server.socket_address();
        WriterConfig {
            nats_subjects: vec!["spout".to_string()],
            nats_subject_monitor: "spout-monitor".to_string(),
            workers: 2,
            batch_max_count: 3,
            batch_max_mb: 1,
            batch_max_secs: 1,
            write_timeout_secs: 5,
            influxdb_address: addr.ip().to_string(),
            influxdb_port: addr.port(),
            influxdb_dbname: "metrics".to_string(),
            worker_tick: Duration::from_millis(50),
            monitor_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    async fn start(config: WriterConfig, bus: &Arc<RecordingBus>) -> Result<Writer, WriterError> {
        Writer::start(
            Arc::new(config),
            Arc::clone(bus) as Arc<dyn Bus>,
            Arc::new(RuleSet::default()),
        )
        .await
    }

    #[tokio::test]
    async fn test_old_batch_is_flushed_without_new_input() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/write")
            .match_query(Matcher::UrlEncoded("db".into(), "metrics".into()))
            .match_body("cpu value=1\n")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let bus = Arc::new(RecordingBus::default());
        let writer = start(config_for(&server), &bus).await.unwrap();
        bus.deliver("spout", "cpu value=1\n").await;

        let stats = writer.stats();
        tokio::time::timeout(Duration::from_secs(5), async {
            while stats.get(STAT_WRITE_REQUESTS) != Some(1) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("age flush should happen");

        writer.stop().await;
        mock.assert_async().await;
        assert_eq!(stats.get(STAT_RECEIVED), Some(1));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let server = Server::new_async().await;
        let bus = Arc::new(RecordingBus::default());
        let writer = start(config_for(&server), &bus).await.unwrap();

        writer.stop().await;
        writer.stop().await;

        assert_eq!(bus.closes.load(Ordering::SeqCst), 1);
        let subscriptions = bus.subscriptions.lock().unwrap();
        assert_eq!(subscriptions.len(), 1);
        assert!(subscriptions[0].unsubscribed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_subscribe_tears_down() {
        let server = Server::new_async().await;
        let bus = Arc::new(RecordingBus::failing_on("second"));
        let config = WriterConfig {
            nats_subjects: vec!["first".to_string(), "second".to_string()],
            ..config_for(&server)
        };

        let err = start(config, &bus).await.err().unwrap();
        assert!(matches!(
            err,
            WriterError::Bus(BusError::Subscribe { ref subject, .. }) if subject == "second"
        ));

        assert_eq!(bus.closes.load(Ordering::SeqCst), 1);
        let subscriptions = bus.subscriptions.lock().unwrap();
        assert_eq!(subscriptions.len(), 1);
        assert!(subscriptions[0].unsubscribed.load(Ordering::SeqCst));
        // The statistician never started
        assert!(bus.payloads().iter().all(|p| !p.contains("received{")));
    }

    #[tokio::test]
    async fn test_invalid_config_closes_bus() {
        let server = Server::new_async().await;
        let bus = Arc::new(RecordingBus::default());
        let config = WriterConfig {
            workers: 0,
            ..config_for(&server)
        };

        let err = start(config, &bus).await.err().unwrap();
        assert!(matches!(err, WriterError::InvalidConfig(_)));
        assert_eq!(bus.closes.load(Ordering::SeqCst), 1);
        assert!(bus.subscriptions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_statistician_publishes_on_start() {
        let server = Server::new_async().await;
        let bus = Arc::new(RecordingBus::default());
        let writer = start(config_for(&server), &bus).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while bus.payloads().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stats should be published on start");
        writer.stop().await;

        let published = bus.published.lock().unwrap();
        assert_eq!(published[0].0, "spout-monitor");
        let text = String::from_utf8_lossy(&published[0].1);
        assert!(text.contains("received{component=\"writer\","));
        assert!(text.contains("influxdb_dbname=\"metrics\""));
        // Subscriptions are flushed once during startup
        assert!(bus.flushes.load(Ordering::SeqCst) >= 1);
    }
}

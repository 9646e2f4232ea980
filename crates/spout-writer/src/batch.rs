// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-worker batch accumulator and the flush policy evaluated over it.
//!
//! A batch is flushed as soon as any one of three bounds trips:
//! 1. **Count**: number of accepted writes since the last reset
//! 2. **Size**: buffered bytes
//! 3. **Age**: time since the first write after the last reset
//!
//! Under bursty load the count and size bounds dominate; when traffic is idle the age
//! bound caps end-to-end latency. A batch is owned by exactly one worker and is never
//! shared, so none of this needs synchronisation.

use std::time::{Duration, Instant};

use crate::errors::BatchError;

/// Bounds that trigger a flush. Fixed after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushThresholds {
    pub max_count: usize,
    pub max_bytes: usize,
    pub max_age: Duration,
}

/// Buffered line protocol awaiting a single bulk write.
///
/// Invariant: `writes() == 0` iff the buffer is empty iff there is no creation time.
#[derive(Debug, Default)]
pub struct Batch {
    buf: Vec<u8>,
    writes: usize,
    created: Option<Instant>,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `data` to the batch. Empty slices are ignored.
    ///
    /// The only failure is the buffer being unable to grow. The batch is left as it
    /// was and remains usable.
    pub fn write(&mut self, data: &[u8]) -> Result<(), BatchError> {
        if data.is_empty() {
            return Ok(());
        }
        self.buf
            .try_reserve(data.len())
            .map_err(|source| BatchError {
                requested: data.len(),
                source,
            })?;
        self.buf.extend_from_slice(data);
        self.writes += 1;
        if self.created.is_none() {
            self.created = Some(Instant::now());
        }
        Ok(())
    }

    /// Discards all buffered data. Allocated capacity is kept for the next batch.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.writes = 0;
        self.created = None;
    }

    /// Moves the buffered data out as a request body and leaves the batch empty.
    pub fn take(&mut self) -> Vec<u8> {
        let body = std::mem::take(&mut self.buf);
        self.reset();
        body
    }

    /// The request body for the current batch. Valid until the next write or reset.
    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes == 0
    }

    /// Time since the first write of this batch, zero when empty.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.age_at(Instant::now())
    }

    fn age_at(&self, now: Instant) -> Duration {
        self.created
            .map(|created| now.saturating_duration_since(created))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn should_flush(&self, thresholds: &FlushThresholds) -> bool {
        self.should_flush_at(thresholds, Instant::now())
    }

    /// Flush policy evaluated against an explicit clock reading.
    #[must_use]
    pub fn should_flush_at(&self, thresholds: &FlushThresholds, now: Instant) -> bool {
        self.writes >= thresholds.max_count
            || self.size() >= thresholds.max_bytes
            || (self.writes > 0 && self.age_at(now) >= thresholds.max_age)
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Publish/subscribe bus the writer consumes from and reports to.
//!
//! The writer core only depends on the [`Bus`] and [`Subscription`] traits. The NATS
//! implementation lives in [`nats`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::BusError;
use crate::pool::JobInjector;

pub mod nats;

/// A live subscription to one subject.
#[async_trait]
pub trait Subscription: Send + Sync {
    fn subject(&self) -> &str;

    /// Total messages the bus discarded for this subscription because its pending
    /// limit was exceeded. Never decreases.
    fn dropped(&self) -> Result<u64, BusError>;

    /// High-water mark of the pending backlog as `(messages, bytes)`.
    fn max_pending(&self) -> Result<(u64, u64), BusError>;

    async fn unsubscribe(&self) -> Result<(), BusError>;
}

#[async_trait]
pub trait Bus: Send + Sync {
    /// Subscribes to `subject`, forwarding every delivery to `injector`. At most
    /// `max_pending_bytes` of undelivered payload are held for the subscription.
    async fn subscribe(
        &self,
        subject: &str,
        max_pending_bytes: u64,
        injector: JobInjector,
    ) -> Result<Arc<dyn Subscription>, BusError>;

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;

    /// Waits until everything published so far has reached the server.
    async fn flush(&self) -> Result<(), BusError>;

    async fn close(&self);
}

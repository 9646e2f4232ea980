// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types

use reqwest::StatusCode;

/// Growing a batch buffer failed.
#[derive(Debug, thiserror::Error)]
#[error("failed to grow batch buffer by {requested} bytes: {source}")]
pub struct BatchError {
    pub requested: usize,
    #[source]
    pub source: std::collections::TryReserveError,
}

/// A rule could not be compiled.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("rule {index}: empty match")]
    EmptyMatch { index: usize },
    #[error("rule {index}: invalid regex {pattern:?}: {source}")]
    InvalidRegex {
        index: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Failures reported by the message bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("can't connect to {address}: {reason}")]
    Connect { address: String, reason: String },
    #[error("subscription for {subject:?} failed: {reason}")]
    Subscribe { subject: String, reason: String },
    #[error("failed to set pending limits for {subject:?}: {reason}")]
    PendingLimits { subject: String, reason: String },
    #[error("subscription for {0:?} is closed")]
    Closed(String),
    #[error("publish to {subject:?} failed: {reason}")]
    Publish { subject: String, reason: String },
    #[error("flush failed: {0}")]
    Flush(String),
    #[error("connection is closed")]
    Disconnected,
}

/// A batch POST did not succeed. Batches are never retried.
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("failed to send HTTP request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("received HTTP {status} from {url}{}", response_body(.body))]
    Status {
        status: StatusCode,
        url: String,
        body: Option<String>,
    },
}

fn response_body(body: &Option<String>) -> String {
    body.as_deref()
        .map(|b| format!("\nresponse body: {b}"))
        .unwrap_or_default()
}

/// Errors surfaced while starting the writer. Everything after startup is logged and
/// counted instead of propagated.
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Rules(#[from] RuleError),
    #[error("NATS Error: {0}")]
    Bus(#[from] BusError),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bulk writes of finished batches to the InfluxDB `/write` endpoint.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;

use crate::constants::{IDLE_CONN_TIMEOUT, MAX_IDLE_CONNS_PER_HOST, WRITE_CONTENT_TYPE};
use crate::errors::FlushError;

/// Builds the write URL for a database.
#[must_use]
pub fn write_url(address: &str, port: u16, dbname: &str) -> String {
    format!("http://{address}:{port}/write?db={dbname}")
}

/// Sends batches over a connection pool owned by a single worker.
#[derive(Debug, Clone)]
pub struct Flusher {
    client: reqwest::Client,
    url: String,
    verbose: bool,
}

impl Flusher {
    /// `timeout` bounds each request end to end. With `verbose` set, error responses
    /// carry the response body.
    pub fn new(url: String, timeout: Duration, verbose: bool) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(MAX_IDLE_CONNS_PER_HOST)
            .pool_idle_timeout(IDLE_CONN_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url,
            verbose,
        })
    }

    /// POSTs one batch. Status codes of 300 and above count as failures.
    pub async fn send(&self, body: Vec<u8>) -> Result<(), FlushError> {
        let resp = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, WRITE_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() < 300 {
            return Ok(());
        }

        // Don't read the body unless someone is going to look at it
        let body = if self.verbose {
            resp.text().await.ok()
        } else {
            None
        };
        Err(FlushError::Status {
            status,
            url: self.url.clone(),
            body,
        })
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Write path of the spout telemetry pipeline.
//!
//! Messages delivered on one or more bus subjects are fanned out to a fixed pool of
//! workers. Each worker filters the payload line by line, accumulates accepted lines
//! into its own batch and POSTs the batch to InfluxDB once it is old, large or full
//! enough. Subscription health and internal counters are published to a monitoring
//! subject.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch;
pub mod bus;
pub mod config;
pub mod constants;
pub mod errors;
pub mod filter;
pub mod flusher;
pub mod monitor;
pub mod pool;
pub mod rules;
pub mod statistician;
pub mod stats;
pub mod worker;
pub mod writer;

mod test_support;

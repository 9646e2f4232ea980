// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line formatter.
//!
//! ```text
//! SPOUT | INFO | writer subscribed to ["influx-spout"] at nats://localhost:4222 with 8 workers
//! SPOUT | WARN | Warning: dropped 5 for subject "influx-spout" (total dropped: 5)
//! SPOUT | INFO | async_nats | event: connected
//! ```

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext,
};
use tracing_subscriber::registry::LookupSpan;

/// Prefixes every line with `SPOUT` and the level. Events from dependencies such as
/// the NATS client also carry their target.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "SPOUT | {} | ", metadata.level())?;

        let target = metadata.target();
        if !target.starts_with("spout") {
            write!(&mut writer, "{target} | ")?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

//! # Logging
//!
//! Two sinks: a colorized, metadata-free stream for humans watching a
//! terminal, and a separate detailed layer (added in `main.rs`) that keeps
//! target/timestamp information for post-hoc debugging.

use std::fmt;

use colored::*;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// Colors an entire log line by its level, with no timestamp or level tag —
/// legible at a glance when running a directory or demo service interactively.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let mut buffer = String::new();
        let buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer, event)?;

        let colored_output = match *event.metadata().level() {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        writeln!(writer, "{}", colored_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatter_can_be_constructed() {
        let _ = ColorizedFormatter;
    }
}

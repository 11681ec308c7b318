//! Console logging
//!
//! Installs a `tracing` subscriber that prints
//! `<timestamp> [<level>] <message>` with level tags `log`, `note` and `warn`.

use std::fmt;

use chrono::Local;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Filter used when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "relay_server=info";

/// Map a tracing level to the console tag
pub fn level_tag(level: &Level) -> &'static str {
    match *level {
        Level::ERROR | Level::WARN => "warn",
        Level::INFO => "log",
        Level::DEBUG | Level::TRACE => "note",
    }
}

/// Event formatter for the console layout
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleFormat;

impl<S, N> FormatEvent<S, N> for ConsoleFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(
            writer,
            "{} [{}] ",
            Local::now().format(TIMESTAMP_FORMAT),
            level_tag(event.metadata().level())
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Initialize console logging
///
/// Use RUST_LOG env var to control log level,
/// e.g. `RUST_LOG=relay_server=debug`.
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(ConsoleFormat)
        .init();
}

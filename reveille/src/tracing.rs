//! Logging setup.
//!
//! Everything in the crate logs through the `tracing` macros re-exported
//! by [`prelude`]. The daemon calls [`init`] once at startup.

use time::{UtcOffset, macros::format_description};
use tracing_subscriber::{
    EnvFilter, Layer, fmt::time::OffsetTime, layer::SubscriberExt, util::SubscriberInitExt,
};

pub mod prelude {
    pub use tracing::{debug, error, info, trace, warn};
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`. When started by
/// systemd (`JOURNAL_STREAM` is set) events go to journald; otherwise
/// they are written to stderr with local timestamps.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if std::env::var_os("JOURNAL_STREAM").is_some() {
        match tracing_journald::layer() {
            Ok(journald) => {
                tracing_subscriber::registry()
                    .with(journald.with_filter(filter))
                    .init();
                return;
            }
            Err(e) => eprintln!("journald unavailable, logging to stderr: {e}"),
        }
    }

    // Must be queried before any threads are spawned, or `time` refuses.
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(
        offset,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"),
    );

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(timer)
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();
}

//! Logging setup for linewire processes.
//!
//! The `linewire` tap writes decoded lines to stdout, so diagnostics are
//! routed to stderr. Piping the tap into another program then yields only
//! line data, with logs still visible on the terminal or captured
//! separately.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Pick the filter directive: `RUST_LOG` when set and non-blank, otherwise
/// `default_filter`.
fn filter_directive(rust_log: Option<String>, default_filter: &str) -> String {
    rust_log
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default_filter.to_owned())
}

/// Install the global subscriber, writing to stderr.
///
/// `default_filter` applies when `RUST_LOG` is unset (e.g.
/// `"linewire=info"`). `log_json` switches to one JSON object per event.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let filter = EnvFilter::new(filter_directive(
        std::env::var("RUST_LOG").ok(),
        default_filter,
    ));
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);
    if log_json {
        registry.with(fmt.json()).init();
    } else {
        registry.with(fmt).init();
    }
}

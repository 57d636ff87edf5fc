//! Diagnostic logging setup.
//!
//! Events go to stderr so they never mix with credential output on
//! stdout.  `MERAKI_CLU_LOG` takes a full `EnvFilter` directive and wins
//! over the configured level.

use tracing_subscriber::EnvFilter;

/// Environment variable holding an optional filter directive.
pub const LOG_ENV: &str = "MERAKI_CLU_LOG";

/// Initialise the global subscriber.  Safe to call more than once.
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(format!("merakiclu={log_level},warn")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

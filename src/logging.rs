//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::Settings;

/// Installs a stderr fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise the crate logs at `info`, or `debug`
/// when `settings.debug` is on. Calling this twice is harmless.
pub fn init(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(settings.debug)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn default_directive(debug: bool) -> &'static str {
    if debug { "chunkdex=debug" } else { "chunkdex=info" }
}

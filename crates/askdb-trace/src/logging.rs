use tracing_subscriber::EnvFilter;

use askdb_core::config::LoggingSettings;

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
/// Logs go to stderr so command output on stdout stays machine readable.
/// Calling this twice is harmless; the first subscriber stays.
pub fn init(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr);
    let result = if settings.json { builder.json().try_init() } else { builder.try_init() };
    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}

//! Tracing setup for the executables.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSection;

/// Install the global subscriber. `RUST_LOG` wins over the configured
/// level; `format = "json"` switches to JSON lines.
///
/// Call once at process startup.
pub fn init_tracing(logging: &LoggingSection) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format.to_lowercase().as_str() {
        "json" => {
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init();
        }
        _ => {
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init();
        }
    }
}

//! Tracing subscriber setup.

use parley_core::config::GeneralConfig;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` overrides `general.log_level`. `general.log_format = "json"`
/// switches to JSON lines. Safe to call more than once; later calls are
/// ignored.
pub fn init(general: &GeneralConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "parley_core={0},parley_llm={0},parley_engine={0}",
                general.log_level
            ))
        });

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = if general.log_format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

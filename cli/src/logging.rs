//! Tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};
use unitsync::{config::LogSettings, LogFormat};

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level; `log` records from the library are bridged in.
pub fn init(settings: &LogSettings, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        settings.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("unitsync={0},unitsync_cli={0}", level)));

    let fmt_layer = match settings.format {
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        LogFormat::Text => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialize tracing: {}", e);
        return;
    }

    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }
}

//! Process-wide tracing setup with a runtime-adjustable level

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Changes the process log level at runtime
#[cfg_attr(test, mockall::automock)]
pub trait LogLevelSetter: Send + Sync {
    fn set_level(&self, level: &str) -> Result<(), String>;
}

/// Swaps the filter installed by [`init`]
pub struct ReloadLogLevel {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogLevelSetter for ReloadLogLevel {
    fn set_level(&self, level: &str) -> Result<(), String> {
        let filter = EnvFilter::try_new(level).map_err(|e| e.to_string())?;
        self.handle.reload(filter).map_err(|e| e.to_string())
    }
}

/// Install the JSON subscriber
///
/// The initial filter comes from `RUST_LOG`, falling back to `info`.
pub fn init() -> ReloadLogLevel {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_current_span(false),
        )
        .init();

    ReloadLogLevel { handle }
}

pub mod config;
pub mod langpt;
pub mod store;

pub use config::Config;
pub use langpt::conversation::{ChatTurn, TutorClient, TutorSession};
pub use langpt::types::{ApiError, TutorSettings};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Changes the active log filter after the subscriber is installed.
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    /// Switches to `level`. Does nothing while `RUST_LOG` is set.
    pub fn set_level(&self, level: &str) -> Result<(), String> {
        if std::env::var_os("RUST_LOG").is_some() {
            return Ok(());
        }
        let filter = EnvFilter::try_new(level)
            .map_err(|e| format!("Invalid log level '{}': {}", level, e))?;
        self.filter.reload(filter).map_err(|e| e.to_string())
    }
}

/// Installs the stderr log subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) -> Result<LogHandle, String> {
    init_logging_with_writer(level, std::io::stderr)
}

pub fn init_logging_with_writer<W>(level: &str, writer: W) -> Result<LogHandle, String>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| format!("Invalid log level '{}': {}", level, e))?;
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(writer))
        .try_init()
        .map_err(|e| e.to_string())?;

    Ok(LogHandle { filter: handle })
}

use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "PRIMBRIDGE_LOG";

/// Installs a global fmt subscriber filtered by `PRIMBRIDGE_LOG` (default `info`).
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_logging() -> bool {
    init_logging_with_default(LevelFilter::INFO)
}

pub fn init_logging_with_default(level: LevelFilter) -> bool {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();
    match tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
    {
        Ok(()) => {
            tracing::debug!("primbridge logging initialized");
            true
        }
        Err(_) => false,
    }
}

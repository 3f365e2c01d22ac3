use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "STUDIO_LOG";
const DEFAULT_DIRECTIVE: &str = "studio_core=info";

/// Returns `false` when a global subscriber was already set, which is not an error.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .try_init()
        .is_ok()
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

use tracing_subscriber::{prelude::*, EnvFilter};

pub const LOG_ENV: &str = "CODEX_ACCOUNTS_LOG";
const DEFAULT_LEVEL: &str = "warn";

/// Log to stderr so stdout stays free for JSON output.
pub fn init() {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(DEFAULT_LEVEL))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter);

    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
}

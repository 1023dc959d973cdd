use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable that overrides the log filter (e.g. `PODCLIP_LOG=podclip=debug`).
pub const LOG_ENV_VAR: &str = "PODCLIP_LOG";

/// Initialize structured JSON logging at the default `error` level.
pub fn init() {
    init_with_default(LevelFilter::ERROR);
}

/// Initialize structured JSON logging with a caller-chosen default level.
///
/// `PODCLIP_LOG` still wins when set, so operators can raise verbosity for one run without
/// touching the binary's flags. Safe to call more than once; only the first call installs
/// the subscriber.
pub fn init_with_default(default_level: LevelFilter) {
    let filter = EnvFilter::builder()
        .with_env_var(LOG_ENV_VAR)
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .try_init();
}

/// Map a `-v` count from a CLI into a default level.
pub fn level_for_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize structured JSON logging on stderr.
///
/// Defaults to `warn` unless overridden by `EMPATH_LOG` (e.g. `EMPATH_LOG=empath=debug`).
/// Console entries are emitted under the `empath::console` target.
pub fn init() {
    let filter = EnvFilter::builder()
        .with_env_var("EMPATH_LOG")
        .with_default_directive(tracing::level_filters::LevelFilter::WARN.into())
        .from_env_lossy();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(false),
        )
        .try_init();
}

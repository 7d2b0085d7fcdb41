//! Logging configuration using tracing.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber for a run.
///
/// `RUST_LOG` takes precedence over the configured `log.level`; an unusable
/// value for either falls back to `info`. Everything goes to stderr so that the
/// build and test tools own stdout.
pub fn init(level: &str) -> anyhow::Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    tracing_subscriber::registry()
        .with(filter(rust_log.as_deref(), level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()?;

    Ok(())
}

fn filter(rust_log: Option<&str>, level: &str) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Keeps the non-blocking writer alive for the process lifetime.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Install the global subscriber: env-filtered stderr output, plus a
/// daily-rotated file when `EMBER_LOG_DIR` is set.
pub fn setup_logging(name: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let name = name.unwrap_or("ember");

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    if let Ok(dir) = std::env::var("EMBER_LOG_DIR") {
        let appender = tracing_appender::rolling::daily(dir, format!("{name}.log"));
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer),
            )
            .try_init()?;
    } else {
        registry.try_init()?;
    }

    Ok(())
}

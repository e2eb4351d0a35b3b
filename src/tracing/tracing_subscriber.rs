use super::Severity;

/// Installs a compact stderr subscriber, `None` reads the filter from `RUST_LOG`.
#[cfg(feature = "build-tracing")]
pub fn install_tracing_subscriber(severity: Option<Severity>) {
    use tracing_subscriber::{
        filter::LevelFilter, prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt, EnvFilter,
    };

    let formatter = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_thread_ids(false)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .compact();

    let registry = tracing_subscriber::registry().with(formatter);
    let result = match severity {
        Some(severity) => registry
            .with(LevelFilter::from_level(severity.into_tracing_level()))
            .try_init(),
        None => registry.with(EnvFilter::from_default_env()).try_init(),
    };

    if result.is_err() {
        eprintln!("Failed to set tracing subscriber.");
    }
}

#[cfg(not(feature = "build-tracing"))]
pub fn install_tracing_subscriber(_severity: Option<Severity>) {}

#[cfg(feature = "console")]
use std::net::SocketAddr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const LOG_FILE: &str = "quota-proxy.log";

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `log_level`. With a `log_dir`, output goes to a
/// daily-rolling file through a non-blocking writer whose guard must be kept
/// alive for the life of the process.
pub fn init_tracing(
    log_dir: Option<&str>,
    log_level: &str,
    console_port: Option<u16>,
) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let (fmt_layer, guard) = match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_ansi(false)
                .boxed();
            (layer, Some(guard))
        }
        None => {
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_ansi(true)
                .boxed();
            (layer, None)
        }
    };

    let registry = tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter));

    #[cfg(feature = "console")]
    {
        let registry = registry.with(console_port.map(|port| {
            console_subscriber::ConsoleLayer::builder()
                .with_default_env()
                .server_addr(SocketAddr::from(([127, 0, 0, 1], port)))
                .spawn()
        }));
        registry.init();
    }

    #[cfg(not(feature = "console"))]
    {
        registry.init();
        if console_port.is_some() {
            tracing::warn!("console_port is set but the console feature is not enabled");
        }
    }

    guard
}

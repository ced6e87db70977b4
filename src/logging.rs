//! Tracing initialisation: stdout for dev visibility plus an optional
//! rolling file layer in logfmt or JSON.

use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize tracing. Returns the appender guard that must be held for the
/// lifetime of the process when a log directory is configured.
///
/// Log records emitted by the core never contain secret share bytes.
pub fn init_logging(log_dir: Option<&str>, json_format: bool) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_level(true);

    match log_dir {
        Some(dir) => {
            let file_appender = rolling::daily(dir, "custody.log");
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

            let file_layer = if json_format {
                fmt::layer()
                    .json()
                    .with_writer(non_blocking_file)
                    .with_current_span(false)
                    .with_span_list(false)
                    .with_level(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(non_blocking_file)
                    .with_target(false)
                    .with_level(true)
                    .boxed()
            };

            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .init();
            None
        }
    }
}

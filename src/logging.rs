// Log subscriber construction. Nothing here installs a global default:
// the caller receives a `Dispatch` and attaches it to the future it runs.

use std::io;
use std::path::Path;
use tracing::Dispatch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

/// Build the subscriber for one run.
///
/// Console output is compact and filtered by `RUST_LOG` (default `info`).
/// When `log_file` is given, the same events are also appended there; the
/// returned guard must be kept alive until the run finishes so buffered
/// lines are flushed.
pub fn build(log_file: Option<&Path>) -> io::Result<(Dispatch, Option<WorkerGuard>)> {
    let env_filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(io::stderr)
        .with_filter(env_filter());

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir,
                _ => Path::new("."),
            };
            std::fs::create_dir_all(dir)?;
            let file_name = path
                .file_name()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "log file has no name"))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(env_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer);
    Ok((Dispatch::new(subscriber), guard))
}

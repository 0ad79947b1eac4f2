use std::{fs, path::Path};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::DiagnosticsConfig;

/// Keeps the JSON log writer flushing until dropped.
pub struct TelemetryGuard {
    pub session_id: Uuid,
    _file_guard: WorkerGuard,
}

/// Installs the global subscriber: a compact stderr layer for humans and a
/// JSON file layer under `log_dir`, one file per session.
///
/// `RUST_LOG` overrides `diagnostics.rust_log_filter` when set. A second
/// call keeps the first subscriber and only logs a warning.
pub fn init_tracing(
    log_dir: impl AsRef<Path>,
    diagnostics: &DiagnosticsConfig,
) -> anyhow::Result<TelemetryGuard> {
    let log_dir = log_dir.as_ref();
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

    let session_id = Uuid::new_v4();
    let file_name = session_log_name(&diagnostics.trace_file_prefix, Utc::now());
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, &file_name));

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&diagnostics.rust_log_filter));

    let console = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(true);
    let session_file = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(file_writer);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(session_file)
        .try_init()
    {
        Ok(()) => info!(
            %session_id,
            log_file = %log_dir.join(&file_name).display(),
            "tracing initialized"
        ),
        Err(error) => warn!(?error, "global tracing subscriber already initialized"),
    }

    Ok(TelemetryGuard {
        session_id,
        _file_guard: file_guard,
    })
}

fn session_log_name(prefix: &str, started: DateTime<Utc>) -> String {
    let prefix = if prefix.trim().is_empty() {
        "tracklane"
    } else {
        prefix.trim()
    };
    format!("{prefix}-{}.log", started.format("%Y%m%d-%H%M%S"))
}

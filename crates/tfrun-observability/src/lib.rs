use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_PREFIX: &str = "tfrun";
const LOG_SUFFIX: &str = "jsonl";

/// What `init_process_logging` set up. `logs_dir` is `None` when only the
/// console layer is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingInitInfo {
    pub logs_dir: Option<PathBuf>,
    pub retention_days: u64,
}

/// One structured lifecycle record. Empty fields are written as `""` so every
/// line in the JSONL file has the same shape.
#[derive(Debug, Clone, Default)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub run_id: Option<&'a str>,
    pub workspace: Option<&'a str>,
    pub organization: Option<&'a str>,
    pub phase: Option<&'a str>,
    pub status: Option<&'a str>,
    pub attempt: Option<u32>,
    pub error_code: Option<&'a str>,
    pub detail: Option<&'a str>,
}

/// Replace a secret with its length and a fingerprint that is stable within
/// one process, so two log lines can be matched without exposing the value.
pub fn redact_text(secret: &str) -> String {
    let secret = secret.trim();
    match secret.len() {
        0 => String::new(),
        len => format!("<redacted {len} chars #{}>", fingerprint(secret)),
    }
}

fn fingerprint(value: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    let digest = format!("{:016x}", hasher.finish());
    digest[..8].to_string()
}

macro_rules! lifecycle_record {
    ($level:expr, $event:expr, $attempt:expr) => {
        tracing::event!(
            target: "tfrun.obs",
            $level,
            component = $event.component,
            event = $event.event,
            run_id = $event.run_id.unwrap_or(""),
            workspace = $event.workspace.unwrap_or(""),
            organization = $event.organization.unwrap_or(""),
            phase = $event.phase.unwrap_or(""),
            status = $event.status.unwrap_or(""),
            attempt = $attempt,
            error_code = $event.error_code.unwrap_or(""),
            detail = $event.detail.unwrap_or(""),
            "lifecycle_event"
        )
    };
}

/// Write `event` under the `tfrun.obs` target. Levels below INFO are
/// recorded as INFO so lifecycle records survive the default filter.
pub fn emit_event(level: Level, event: ObservabilityEvent<'_>) {
    let attempt = event.attempt.map(|a| a.to_string()).unwrap_or_default();
    let attempt = attempt.as_str();
    if level == Level::ERROR {
        lifecycle_record!(Level::ERROR, event, attempt);
    } else if level == Level::WARN {
        lifecycle_record!(Level::WARN, event, attempt);
    } else {
        lifecycle_record!(Level::INFO, event, attempt);
    }
}

/// Install the process subscriber: a compact stderr layer, plus a daily
/// `tfrun.<date>.jsonl` file layer when `logs_dir` is given. Keep the returned
/// guard alive for as long as file output should be flushed.
pub fn init_process_logging(
    logs_dir: Option<&Path>,
    retention_days: u64,
) -> anyhow::Result<(Option<WorkerGuard>, LoggingInitInfo)> {
    let (file_layer, guard) = match logs_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            prune_expired_logs(dir, retention_days)?;
            let appender = tracing_appender::rolling::Builder::new()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix(LOG_PREFIX)
                .filename_suffix(LOG_SUFFIX)
                .build(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_current_span(false)
                .with_span_list(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // stdout carries the run id, so the console goes to stderr
    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    let info = LoggingInitInfo {
        logs_dir: logs_dir.map(Path::to_path_buf),
        retention_days,
    };
    Ok((guard, info))
}

/// Date encoded in a `tfrun.<YYYY-MM-DD>.jsonl` file name.
fn log_file_date(name: &str) -> Option<NaiveDate> {
    let date = name
        .strip_prefix(LOG_PREFIX)?
        .strip_prefix('.')?
        .strip_suffix(LOG_SUFFIX)?
        .strip_suffix('.')?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn prune_expired_logs(logs_dir: &Path, retention_days: u64) -> anyhow::Result<()> {
    let retention = retention_days.min(36_500) as i64;
    let oldest_kept = Utc::now()
        .date_naive()
        .checked_sub_signed(chrono::Duration::days(retention))
        .unwrap_or(NaiveDate::MIN);

    for entry in fs::read_dir(logs_dir)?.flatten() {
        let path = entry.path();
        let expired = path.is_file()
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(log_file_date)
                .is_some_and(|date| date < oldest_kept);
        if expired {
            let _ = fs::remove_file(&path);
        }
    }
    Ok(())
}

pub fn default_logs_dir(root: &Path) -> PathBuf {
    root.join("logs")
}

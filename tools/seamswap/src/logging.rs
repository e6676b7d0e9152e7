use crate::errors::SeamError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), SeamError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| SeamError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| SeamError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SeamError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| SeamError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            let _ = prune_to_budget(parent, &self.path, self.budget_bytes)?;
        }

        Ok(())
    }
}

static RUN_LOGGER: OnceLock<Mutex<Option<JsonlLogger>>> = OnceLock::new();

fn run_logger_slot() -> &'static Mutex<Option<JsonlLogger>> {
    RUN_LOGGER.get_or_init(|| Mutex::new(None))
}

/// Route `append_run_log` to `logger` for the rest of the process (or until cleared).
pub fn init_run_logger(logger: JsonlLogger) {
    *run_logger_slot()
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(logger);
}

pub fn clear_run_logger() {
    *run_logger_slot()
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = None;
}

/// Append one event to the run log. A no-op until `init_run_logger` is called;
/// write failures are swallowed so interception never fails because of logging.
pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let logger = run_logger_slot()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    if let Some(logger) = logger {
        let _ = logger.append(&LogEvent {
            level,
            event_type,
            payload,
        });
    }
}

pub fn structured_fallback_line(scope: &str, state: &str, message: &str) -> String {
    format!(
        "scope={scope} state={state} message={} ",
        message.replace('\n', "\\n")
    )
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

// Deletes the oldest run logs in `dir` until their total size fits the budget.
// Only files sharing the active log's stem and extension count as run logs;
// the active log itself is never removed.
fn prune_to_budget(
    dir: &Path,
    active: &Path,
    budget_bytes: u64,
) -> Result<Vec<PathBuf>, SeamError> {
    let mut files = fs::read_dir(dir)
        .map_err(|e| SeamError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_run_log(path, active))
        .filter_map(|path| {
            let meta = fs::metadata(&path).ok()?;
            Some((path, meta.len(), meta.modified().ok()))
        })
        .collect::<Vec<_>>();
    files.sort_by(|a, b| a.2.cmp(&b.2));

    let mut total = files.iter().map(|(_, len, _)| *len).sum::<u64>();
    let mut deleted = Vec::new();
    for (path, len, _) in files {
        if total <= budget_bytes {
            break;
        }
        if path == active {
            continue;
        }
        fs::remove_file(&path).map_err(|e| SeamError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }
    Ok(deleted)
}

fn is_run_log(path: &Path, active: &Path) -> bool {
    let (Some(stem), Some(active_stem)) = (
        path.file_stem().and_then(|s| s.to_str()),
        active.file_stem().and_then(|s| s.to_str()),
    ) else {
        return false;
    };
    path.extension() == active.extension() && stem.starts_with(active_stem)
}

#[cfg(test)]
mod tests {
    use super::{prune_to_budget, structured_fallback_line, JsonlLogger, LogEvent};
    use serde_json::json;
    use std::fs;

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;
        logger.budget_bytes = 1024;

        logger
            .append(&LogEvent {
                level: "info",
                event_type: "seam.patch.enter",
                payload: json!({"seam": "std_http.HttpConnectionHttpConnectionHttpConnection"}),
            })
            .expect("append");

        let text = fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"event_type\":\"seam.patch.enter\""));
        assert!(text.contains("..."));
    }

    #[test]
    fn pruning_keeps_the_active_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let active = dir.path().join("run.jsonl");
        fs::write(dir.path().join("run.1.jsonl"), vec![0u8; 40]).expect("old");
        std::thread::sleep(std::time::Duration::from_millis(2));
        fs::write(&active, vec![0u8; 40]).expect("active");

        let deleted = prune_to_budget(dir.path(), &active, 50).expect("pruned");
        assert_eq!(deleted.len(), 1);
        assert!(deleted[0].ends_with("run.1.jsonl"));
        assert!(active.exists());
    }

    #[test]
    fn pruning_leaves_unrelated_files_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lockfile = dir.path().join("Cargo.lock");
        let notes = dir.path().join("notes.jsonl");
        fs::write(&lockfile, vec![0u8; 200]).expect("lockfile");
        fs::write(&notes, vec![0u8; 200]).expect("notes");

        let mut logger = JsonlLogger::new(dir.path().join("run.jsonl"));
        logger.budget_bytes = 100;
        logger
            .append(&LogEvent {
                level: "info",
                event_type: "seamswap.run.started",
                payload: json!({}),
            })
            .expect("append");

        assert!(lockfile.exists());
        assert!(notes.exists());
        assert!(dir.path().join("run.jsonl").exists());
    }

    #[test]
    fn fallback_line_is_deterministic() {
        let line = structured_fallback_line("self-check", "ok", "hello\nworld");
        assert_eq!(line, "scope=self-check state=ok message=hello\\nworld ");
    }
}

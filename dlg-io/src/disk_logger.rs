//! Per-log append-only files.
//!
//! Each log name maps to one open handle for `<base_path>/<log_name>.log`.
//! Handles are opened lazily by the first record for that name and stay open
//! until [`DiskLogger::close_all`].
//!
//! Locking is two-level: the name map lock covers lookup and open, so two
//! appenders can never race to open the same file; each handle carries its
//! own lock so that writes to one file never interleave mid-line while
//! writes to different files proceed in parallel.

use dlg_core::{DiskLogError, LOG_FILE_EXTENSION, Result};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info};

struct LogFile {
    path: PathBuf,
    file: File,
}

pub struct DiskLogger {
    base_path: PathBuf,
    logs: Mutex<HashMap<String, Arc<Mutex<LogFile>>>>,
}

impl DiskLogger {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Path of the file backing `log_name`.
    #[must_use]
    pub fn log_path(&self, log_name: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", log_name, LOG_FILE_EXTENSION))
    }

    /// Number of currently open handles.
    pub fn open_count(&self) -> usize {
        self.lock_logs().map(|logs| logs.len()).unwrap_or(0)
    }

    /// Append one record to the file for `log_name`, adding a trailing newline
    /// when the message lacks one.
    ///
    /// On open failure no handle is retained, so the next record for the same
    /// name retries the open. The write itself is never retried.
    pub fn append(&self, log_name: &str, message: &[u8]) -> Result<()> {
        validate_log_name(log_name)?;

        let handle = self.handle_for(log_name)?;
        let mut log = handle
            .lock()
            .map_err(|_| DiskLogError::Internal("Log file lock poisoned".into()))?;

        let result = if message.last() == Some(&b'\n') {
            log.file.write_all(message)
        } else {
            let mut line = Vec::with_capacity(message.len() + 1);
            line.extend_from_slice(message);
            line.push(b'\n');
            log.file.write_all(&line)
        };

        result.map_err(|source| {
            error!(
                target: "dlg_io::disk_logger",
                path = %log.path.display(),
                error = %source,
                "Write failed"
            );
            DiskLogError::LogWrite {
                path: log.path.clone(),
                source,
            }
        })
    }

    /// Commit every open file to stable storage.
    ///
    /// Failures are reported per file and do not stop the remaining files
    /// from being synced. Returns the number of failures; a poisoned log map
    /// counts as one.
    pub fn flush_all(&self) -> usize {
        // A poisoned map still holds valid handles; sync them but count the
        // poisoning itself as a failure.
        let (handles, mut failures): (Vec<_>, usize) = match self.logs.lock() {
            Ok(logs) => (logs.values().cloned().collect(), 0),
            Err(poisoned) => {
                error!(target: "dlg_io::disk_logger", "Log map lock poisoned while flushing");
                (poisoned.into_inner().values().cloned().collect(), 1)
            },
        };

        for handle in handles {
            let Ok(log) = handle.lock() else {
                failures += 1;
                continue;
            };
            if let Err(e) = log.file.sync_all() {
                error!(
                    target: "dlg_io::disk_logger",
                    path = %log.path.display(),
                    error = %e,
                    "Commit error"
                );
                failures += 1;
            }
        }

        debug!(target: "dlg_io::disk_logger", failures, "Flushed open logs");
        failures
    }

    /// Close every open file and return to the initial empty state.
    ///
    /// `std::fs::File` reports nothing on drop, so pending data is synced
    /// first and any failure is reported against that file.
    pub fn close_all(&self) {
        let drained: Vec<_> = match self.lock_logs() {
            Ok(mut logs) => logs.drain().collect(),
            Err(e) => {
                error!(target: "dlg_io::disk_logger", error = %e, "Cannot close logs");
                return;
            },
        };

        let count = drained.len();
        for (name, handle) in drained {
            match handle.lock() {
                Ok(log) => {
                    if let Err(e) = log.file.sync_data() {
                        error!(
                            target: "dlg_io::disk_logger",
                            log_name = %name,
                            path = %log.path.display(),
                            error = %e,
                            "Error closing log"
                        );
                    }
                },
                Err(_) => {
                    error!(
                        target: "dlg_io::disk_logger",
                        log_name = %name,
                        "Error closing log: lock poisoned"
                    );
                },
            }
        }

        info!(target: "dlg_io::disk_logger", closed = count, "Closed all logs");
    }

    fn lock_logs(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<Mutex<LogFile>>>>> {
        self.logs
            .lock()
            .map_err(|_| DiskLogError::Internal("Log map lock poisoned".into()))
    }

    fn handle_for(&self, log_name: &str) -> Result<Arc<Mutex<LogFile>>> {
        let mut logs = self.lock_logs()?;
        if let Some(handle) = logs.get(log_name) {
            return Ok(Arc::clone(handle));
        }

        let path = self.log_path(log_name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| {
                error!(
                    target: "dlg_io::disk_logger",
                    path = %path.display(),
                    error = %source,
                    "Can't open log"
                );
                DiskLogError::LogOpen {
                    path: path.clone(),
                    source,
                }
            })?;

        debug!(target: "dlg_io::disk_logger", path = %path.display(), "Opened log");

        let handle = Arc::new(Mutex::new(LogFile { path, file }));
        logs.insert(log_name.to_owned(), Arc::clone(&handle));
        Ok(handle)
    }
}

/// Reject names that would land outside the base path.
fn validate_log_name(log_name: &str) -> Result<()> {
    let invalid = log_name.is_empty()
        || log_name == "."
        || log_name == ".."
        || log_name.contains(['/', '\\', '\0']);

    if invalid {
        return Err(DiskLogError::InvalidLogName(log_name.to_owned()));
    }
    Ok(())
}

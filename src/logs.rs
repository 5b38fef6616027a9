//! # Tenant log streams.
//!
//! Every run of a tenant gets a fresh [`LogSink`] from a [`LogSinkFactory`]. Lines
//! are formatted as
//!
//! ```text
//! [2026-10-18T09:12:01.250Z] [ERROR] boot hook failed: script error: nope
//! ```
//!
//! Sinks are shared between the lifecycle task and the crash watcher, so the trait
//! takes `&self`; `close` is idempotent and appends after close are dropped.
//!
//! Two implementations ship with the crate:
//! - [`FileLogSinkFactory`] appends to `{dir}/{tenant}.log`
//! - [`MemoryLogSinkFactory`] keeps lines in memory (tests, embedding)

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{SecondsFormat, Utc};

use crate::tenant::TenantId;

/// Severity of a tenant log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Verbose diagnostics.
    Debug,
    /// Normal lifecycle messages.
    Info,
    /// Recoverable problems (hook failures, timeouts).
    Warn,
    /// Faults.
    Error,
}

impl Severity {
    /// Upper-case label used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Formats one line (without trailing newline) stamped with the current time.
pub fn format_line(severity: Severity, message: &str) -> String {
    format!(
        "[{}] [{}] {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        severity,
        message
    )
}

/// Destination of one run's log stream.
pub trait LogSink: Send + Sync + 'static {
    /// Appends a message. Never fails; I/O errors are swallowed after being traced.
    fn append(&self, severity: Severity, message: &str);

    /// Flushes and releases the sink. Idempotent.
    fn close(&self);
}

/// Creates a fresh sink for each run.
pub trait LogSinkFactory: Send + Sync + 'static {
    /// Opens a sink for `tenant`. Failure aborts `start` with a setup error.
    fn create(&self, tenant: &TenantId) -> io::Result<Arc<dyn LogSink>>;
}

// ---- file sinks ----

/// Appends to `{dir}/{tenant}.log`, creating `dir` if needed.
#[derive(Debug, Clone)]
pub struct FileLogSinkFactory {
    dir: PathBuf,
}

impl FileLogSinkFactory {
    /// Creates a factory rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of a tenant's log file.
    pub fn path_for(&self, tenant: &TenantId) -> PathBuf {
        self.dir.join(format!("{tenant}.log"))
    }
}

impl LogSinkFactory for FileLogSinkFactory {
    fn create(&self, tenant: &TenantId) -> io::Result<Arc<dyn LogSink>> {
        fs::create_dir_all(&self.dir)?;
        let sink = FileLogSink::open(&self.path_for(tenant))?;
        Ok(Arc::new(sink))
    }
}

/// A sink writing to one file.
#[derive(Debug)]
pub struct FileLogSink {
    out: Mutex<Option<BufWriter<File>>>,
}

impl FileLogSink {
    /// Opens `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<BufWriter<File>>> {
        self.out.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LogSink for FileLogSink {
    fn append(&self, severity: Severity, message: &str) {
        let mut out = self.lock();
        let Some(w) = out.as_mut() else {
            return;
        };
        let res = writeln!(w, "{}", format_line(severity, message)).and_then(|()| w.flush());
        if let Err(e) = res {
            tracing::warn!(error = %e, "tenant log write failed");
        }
    }

    fn close(&self) {
        if let Some(mut w) = self.lock().take()
            && let Err(e) = w.flush()
        {
            tracing::warn!(error = %e, "tenant log flush failed");
        }
    }
}

// ---- memory sinks ----

/// Keeps every tenant's lines in memory, across runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryLogSinkFactory {
    lines: Arc<Mutex<HashMap<TenantId, Vec<String>>>>,
}

impl MemoryLogSinkFactory {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// All lines written for `tenant` so far (every run, oldest first).
    pub fn lines(&self, tenant: &TenantId) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of lines for `tenant` containing `needle`.
    pub fn count_containing(&self, tenant: &TenantId, needle: &str) -> usize {
        self.lines(tenant)
            .iter()
            .filter(|l| l.contains(needle))
            .count()
    }
}

impl LogSinkFactory for MemoryLogSinkFactory {
    fn create(&self, tenant: &TenantId) -> io::Result<Arc<dyn LogSink>> {
        Ok(Arc::new(MemoryLogSink {
            tenant: tenant.clone(),
            lines: Arc::clone(&self.lines),
            closed: Mutex::new(false),
        }))
    }
}

#[derive(Debug)]
struct MemoryLogSink {
    tenant: TenantId,
    lines: Arc<Mutex<HashMap<TenantId, Vec<String>>>>,
    closed: Mutex<bool>,
}

impl LogSink for MemoryLogSink {
    fn append(&self, severity: Severity, message: &str) {
        if *self.closed.lock().unwrap_or_else(PoisonError::into_inner) {
            return;
        }
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(self.tenant.clone())
            .or_default()
            .push(format_line(severity, message));
    }

    fn close(&self) {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }
}

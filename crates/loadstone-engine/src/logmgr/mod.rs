//! The log manager: outcome accounting, bad-record capture, positional
//! checkpointing, and the error ceiling.

pub mod format;
pub mod positions;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use loadstone_types::error::ErrorThreshold;
use loadstone_types::record::{ErrorRecord, RecordMeta};

use positions::PositionTracker;

/// Which bad-record file a failure lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Codec conversion or mapping-rule violation.
    Mapping,
    /// External resource read/write failure.
    Connector,
    /// Database rejected a write.
    Load,
    /// Database read failed.
    Unload,
}

impl FailureKind {
    fn file_name(self) -> &'static str {
        match self {
            FailureKind::Mapping => "mapping-errors.log",
            FailureKind::Connector => "connector-errors.log",
            FailureKind::Load => "load-errors.log",
            FailureKind::Unload => "unload-errors.log",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// The execution directory; bad-record files are created here.
    pub directory: PathBuf,
    pub max_errors: ErrorThreshold,
    pub max_held_positions: usize,
    pub stack_trace_depth: usize,
    pub frame_filter_prefixes: Vec<String>,
}

#[derive(Default)]
struct Sinks {
    files: HashMap<FailureKind, BufWriter<File>>,
    positions: HashMap<Arc<str>, PositionTracker>,
}

/// Consumes outcomes. Counters are atomic; file sinks are serialized
/// behind one mutex, keeping a single-writer discipline per file.
pub struct LogManager {
    config: LogConfig,
    sinks: Mutex<Sinks>,
    errors: AtomicU64,
    total: AtomicU64,
    aborted: AtomicBool,
    abort_tx: watch::Sender<bool>,
    abort_rx: watch::Receiver<bool>,
}

impl LogManager {
    pub fn new(config: LogConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.directory)?;
        let (abort_tx, abort_rx) = watch::channel(false);
        Ok(Self {
            config,
            sinks: Mutex::new(Sinks::default()),
            errors: AtomicU64::new(0),
            total: AtomicU64::new(0),
            aborted: AtomicBool::new(false),
            abort_tx,
            abort_rx,
        })
    }

    /// A channel that flips to `true` when the error ceiling is crossed.
    /// At most one abort is ever emitted.
    pub fn abort_signal(&self) -> watch::Receiver<bool> {
        self.abort_rx.clone()
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn max_errors(&self) -> ErrorThreshold {
        self.config.max_errors
    }

    /// Records one successful record outcome.
    pub fn record_success(&self, meta: &RecordMeta) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.mark_position(&meta.resource, meta.position, true);
    }

    /// Records a failed record, appending it to the bad-record file for
    /// `kind`.
    pub fn record_failure(&self, kind: FailureKind, record: &ErrorRecord) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.write_entry(
            kind,
            record.resource(),
            record.position(),
            record.source(),
            record.cause(),
        );
        self.mark_position(record.resource(), record.position(), false);
        self.count_error();
    }

    /// Records a failed statement outcome attributed to `meta`.
    pub fn record_failed_statement(
        &self,
        kind: FailureKind,
        meta: &RecordMeta,
        cause: &anyhow::Error,
    ) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.write_entry(kind, &meta.resource, meta.position, &meta.source, cause);
        self.mark_position(&meta.resource, meta.position, false);
        self.count_error();
    }

    /// Sanitizes an error chain for console display.
    pub fn sanitize(&self, error: &anyhow::Error) -> String {
        format::sanitized_chain(
            error,
            &self.config.frame_filter_prefixes,
            self.config.stack_trace_depth,
        )
    }

    fn count_error(&self) {
        let errors = self.errors.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.load(Ordering::SeqCst);
        if self.config.max_errors.exceeded(errors, total)
            && !self.aborted.swap(true, Ordering::SeqCst)
        {
            tracing::error!(
                errors,
                threshold = %self.config.max_errors,
                "error ceiling exceeded, aborting operation"
            );
            let _ = self.abort_tx.send(true);
        }
    }

    fn mark_position(&self, resource: &Arc<str>, position: u64, success: bool) {
        let mut sinks = self.sinks.lock().expect("log manager sinks");
        let tracker = sinks
            .positions
            .entry(Arc::clone(resource))
            .or_default();
        let dropped = tracker.mark(position, success, self.config.max_held_positions);
        if dropped > 0 {
            tracing::warn!(
                resource = %resource,
                dropped,
                "position window overflowed, dropping oldest holes from tracking"
            );
        }
    }

    fn write_entry(
        &self,
        kind: FailureKind,
        resource: &str,
        position: u64,
        source: &str,
        cause: &anyhow::Error,
    ) {
        let mut sinks = self.sinks.lock().expect("log manager sinks");
        let directory = self.config.directory.clone();
        let writer = sinks.files.entry(kind).or_insert_with(|| {
            let path = directory.join(kind.file_name());
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .unwrap_or_else(|e| panic!("cannot open {}: {e}", path.display()));
            BufWriter::new(file)
        });
        // The on-disk entry carries the full cause chain, never the
        // sanitized one.
        let entry = format!(
            "Resource: {resource}\nPosition: {position}\nSource: {source}\n{causes}\n\n",
            causes = format::full_chain(cause),
            source = format::escape_single_line(source),
        );
        if let Err(error) = writer.write_all(entry.as_bytes()) {
            tracing::error!(%error, "cannot append to {}", kind.file_name());
        }
    }

    /// Highest contiguous successful position per resource.
    pub fn checkpoints(&self) -> Vec<(Arc<str>, u64)> {
        let sinks = self.sinks.lock().expect("log manager sinks");
        let mut out: Vec<(Arc<str>, u64)> = sinks
            .positions
            .iter()
            .map(|(resource, tracker)| (Arc::clone(resource), tracker.checkpoint()))
            .collect();
        out.sort();
        out
    }

    /// Flushes all sinks and writes the positions summary. Idempotent.
    pub fn close(&self) -> anyhow::Result<()> {
        let mut sinks = self.sinks.lock().expect("log manager sinks");
        for writer in sinks.files.values_mut() {
            writer.flush()?;
        }
        if !sinks.positions.is_empty() {
            let path = self.config.directory.join("positions.log");
            let mut out = String::new();
            let mut entries: Vec<_> = sinks.positions.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (resource, tracker) in entries {
                out.push_str(&format!("{resource}:{}\n", tracker.checkpoint()));
            }
            std::fs::write(path, out)?;
        }
        Ok(())
    }

    /// The bad-record files written so far, for the end-of-run summary.
    pub fn written_files(&self) -> Vec<PathBuf> {
        let sinks = self.sinks.lock().expect("log manager sinks");
        let mut files: Vec<PathBuf> = sinks
            .files
            .keys()
            .map(|kind| self.config.directory.join(kind.file_name()))
            .collect();
        files.sort();
        files
    }
}

/// Reads a bad-record file back into `(resource, position)` headers, used
/// by tests and the summary.
pub fn read_entry_headers(path: &Path) -> anyhow::Result<Vec<(String, u64)>> {
    let raw = std::fs::read_to_string(path)?;
    let mut out = Vec::new();
    let mut resource = None;
    for line in raw.lines() {
        if let Some(r) = line.strip_prefix("Resource: ") {
            resource = Some(r.to_string());
        } else if let Some(p) = line.strip_prefix("Position: ") {
            if let (Some(r), Ok(p)) = (resource.take(), p.parse()) {
                out.push((r, p));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(resource: &Arc<str>, position: u64) -> RecordMeta {
        RecordMeta {
            resource: Arc::clone(resource),
            position,
            source: format!("row-{position}"),
        }
    }

    fn manager(dir: &Path, max_errors: ErrorThreshold) -> LogManager {
        LogManager::new(LogConfig {
            directory: dir.to_path_buf(),
            max_errors,
            max_held_positions: 1_000,
            stack_trace_depth: 2,
            frame_filter_prefixes: vec!["tokio::".to_string()],
        })
        .unwrap()
    }

    #[test]
    fn failures_land_in_their_category_file() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), ErrorThreshold::Absolute(100));
        let resource: Arc<str> = Arc::from("file:///in.csv");

        let record = ErrorRecord::new(
            Arc::clone(&resource),
            3,
            "bad,row\nwith newline".into(),
            anyhow::anyhow!("boom"),
        );
        mgr.record_failure(FailureKind::Mapping, &record);
        mgr.close().unwrap();

        let path = dir.path().join("mapping-errors.log");
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("Resource: file:///in.csv"));
        assert!(raw.contains("Position: 3"));
        // Sources collapse onto one line.
        assert!(raw.contains("Source: bad,row\\nwith newline"));
        assert!(raw.contains("boom"));
        assert!(raw.ends_with("\n\n"));

        let headers = read_entry_headers(&path).unwrap();
        assert_eq!(headers, vec![("file:///in.csv".to_string(), 3)]);
    }

    #[test]
    fn ceiling_aborts_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), ErrorThreshold::Absolute(2));
        let mut signal = mgr.abort_signal();
        let resource: Arc<str> = Arc::from("file:///in.csv");

        for p in 1..=5 {
            let record = ErrorRecord::new(
                Arc::clone(&resource),
                p,
                String::new(),
                anyhow::anyhow!("failure {p}"),
            );
            mgr.record_failure(FailureKind::Load, &record);
        }
        assert!(*signal.borrow_and_update());
        assert_eq!(mgr.error_count(), 5);
        // All five failures are persisted even after the abort tripped.
        mgr.close().unwrap();
        let headers =
            read_entry_headers(&dir.path().join("load-errors.log")).unwrap();
        assert_eq!(headers.len(), 5);
    }

    #[test]
    fn ratio_ceiling_uses_total_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), ErrorThreshold::Ratio(0.5));
        let resource: Arc<str> = Arc::from("file:///in.csv");

        for p in 1..=10 {
            mgr.record_success(&meta(&resource, p));
        }
        let mut signal = mgr.abort_signal();
        for p in 11..=15 {
            let record = ErrorRecord::new(
                Arc::clone(&resource),
                p,
                String::new(),
                anyhow::anyhow!("failure"),
            );
            mgr.record_failure(FailureKind::Load, &record);
        }
        // 5 failures out of 15 outcomes: below the 50% ceiling.
        assert!(!*signal.borrow_and_update());
    }

    #[test]
    fn checkpoints_follow_contiguous_successes() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), ErrorThreshold::Unlimited);
        let resource: Arc<str> = Arc::from("file:///in.csv");

        mgr.record_success(&meta(&resource, 1));
        mgr.record_success(&meta(&resource, 3));
        assert_eq!(mgr.checkpoints(), vec![(Arc::clone(&resource), 1)]);
        mgr.record_success(&meta(&resource, 2));
        assert_eq!(mgr.checkpoints(), vec![(resource, 3)]);
    }

    #[test]
    fn close_is_idempotent_and_writes_positions() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), ErrorThreshold::Unlimited);
        let resource: Arc<str> = Arc::from("file:///in.csv");
        mgr.record_success(&meta(&resource, 1));
        mgr.close().unwrap();
        mgr.close().unwrap();
        let positions = std::fs::read_to_string(dir.path().join("positions.log")).unwrap();
        assert_eq!(positions, "file:///in.csv:1\n");
    }
}

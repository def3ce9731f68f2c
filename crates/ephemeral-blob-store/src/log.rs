//! Append-only metadata log
//!
//! Every commit is mirrored as one line:
//!
//! ```text
//! <hex-handle> {"Filename":"...","ExpirationTime":"..."}\n
//! ```
//!
//! Appends are queued to a single writer task, so lines land in commit order
//! and committers never wait on disk I/O. The log is only read back at
//! startup, where the newest `replay_window` lines are considered and any
//! line that fails to parse (including a torn final line) is skipped.

use crate::error::{Result, StoreError};
use crate::types::{FileMetadata, Handle};
use std::collections::VecDeque;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// One `(handle, metadata)` line of the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub handle: Handle,
    pub metadata: FileMetadata,
}

impl LogEntry {
    pub fn new(handle: Handle, metadata: FileMetadata) -> Self {
        Self { handle, metadata }
    }

    /// Encode as a newline-terminated log line
    pub fn to_line(&self) -> Result<String> {
        let json = serde_json::to_string(&self.metadata)?;
        Ok(format!("{} {}\n", self.handle, json))
    }

    pub fn parse_line(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (handle, json) = line
            .split_once(' ')
            .ok_or_else(|| StoreError::MalformedLogLine(format!("no separator in {:?}", line)))?;
        let handle = Handle::parse(handle)?;
        let metadata = serde_json::from_str(json)?;
        Ok(Self { handle, metadata })
    }
}

enum LogCommand {
    Append(LogEntry),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct LogCounters {
    appends: AtomicU64,
    failures: AtomicU64,
}

/// Handle to the log file and its writer task
pub struct MetadataLog {
    path: PathBuf,
    tx: mpsc::UnboundedSender<LogCommand>,
    counters: Arc<LogCounters>,
}

impl MetadataLog {
    /// Start the writer task. Must be called from within a Tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(LogCounters::default());

        tokio::spawn(run_writer(path.clone(), rx, counters.clone()));

        Self { path, tx, counters }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue an entry. Never blocks; failures are logged by the writer.
    pub fn append(&self, entry: LogEntry) {
        if self.tx.send(LogCommand::Append(entry)).is_err() {
            error!(path = ?self.path, "Metadata log writer has stopped, dropping entry");
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Wait until every entry queued before this call has been written
    pub async fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(LogCommand::Flush(ack_tx))
            .map_err(|_| StoreError::LogClosed)?;
        ack_rx.await.map_err(|_| StoreError::LogClosed)
    }

    pub fn appended(&self) -> u64 {
        self.counters.appends.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.counters.failures.load(Ordering::Relaxed)
    }
}

async fn run_writer(
    path: PathBuf,
    mut rx: mpsc::UnboundedReceiver<LogCommand>,
    counters: Arc<LogCounters>,
) {
    let mut batch = Vec::new();
    let mut acks = Vec::new();
    let mut tail_checked = false;

    while let Some(command) = rx.recv().await {
        let mut next = Some(command);
        while let Some(command) = next {
            match command {
                LogCommand::Append(entry) => batch.push(entry),
                LogCommand::Flush(ack) => acks.push(ack),
            }
            next = rx.try_recv().ok();
        }

        if !batch.is_empty() {
            write_batch(&path, &batch, &counters, &mut tail_checked).await;
            batch.clear();
        }
        for ack in acks.drain(..) {
            // Waiter may have given up; nothing to report
            let _ = ack.send(());
        }
    }

    debug!(path = ?path, "Metadata log writer stopped");
}

/// Append a batch in one write.
///
/// The first successful write of a process also repairs a torn final line
/// left by a crash, so the new entries start on a line of their own.
async fn write_batch(
    path: &Path,
    batch: &[LogEntry],
    counters: &LogCounters,
    tail_checked: &mut bool,
) {
    let mut buf = String::new();
    let mut encoded = 0u64;
    for entry in batch {
        match entry.to_line() {
            Ok(line) => {
                buf.push_str(&line);
                encoded += 1;
            }
            Err(e) => {
                error!(handle = %entry.handle, error = %e, "Failed to encode metadata");
                counters.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    if encoded == 0 {
        return;
    }

    let check_tail = !*tail_checked;
    let result = async {
        let mut file = fs::OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(path)
            .await?;
        if check_tail && ends_mid_line(&mut file).await? {
            warn!(path = ?path, "Metadata log ends mid-line, terminating torn entry");
            file.write_all(b"\n").await?;
        }
        file.write_all(buf.as_bytes()).await?;
        file.flush().await
    }
    .await;

    match result {
        Ok(()) => {
            *tail_checked = true;
            counters.appends.fetch_add(encoded, Ordering::Relaxed);
            debug!(path = ?path, entries = encoded, "Appended metadata");
        }
        Err(e) => {
            counters.failures.fetch_add(encoded, Ordering::Relaxed);
            error!(path = ?path, entries = encoded, error = %e, "Failed to append metadata");
        }
    }
}

/// True if the file is non-empty and its last byte is not a newline
async fn ends_mid_line(file: &mut fs::File) -> std::io::Result<bool> {
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    Ok(file.read_u8().await? != b'\n')
}

/// Read the newest `window` lines of the log, oldest first.
///
/// Returns `None` if the log does not exist. Invalid UTF-8 is replaced
/// rather than rejected so that the line is reported as malformed later.
pub async fn read_window(path: &Path, window: usize) -> Result<Option<Vec<String>>> {
    let file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut lines = VecDeque::with_capacity(window.min(4096));
    let mut segments = BufReader::new(file).split(b'\n');
    while let Some(segment) = segments.next_segment().await? {
        if window == 0 {
            continue;
        }
        if lines.len() == window {
            lines.pop_front();
        }
        lines.push_back(String::from_utf8_lossy(&segment).into_owned());
    }

    Ok(Some(lines.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    fn entry(handle: &str, filename: &str) -> LogEntry {
        LogEntry::new(
            Handle::parse(handle).unwrap(),
            FileMetadata::new(filename, Utc::now() + Duration::minutes(5)),
        )
    }

    #[test]
    fn test_line_format() {
        let e = entry("ab01", "notes.txt");
        let line = e.to_line().unwrap();
        assert!(line.starts_with("ab01 {\"Filename\":\"notes.txt\",\"ExpirationTime\":"));
        assert!(line.ends_with("}\n"));
        assert_eq!(LogEntry::parse_line(&line).unwrap(), e);
    }

    #[test]
    fn test_filename_with_spaces_parses() {
        let e = entry("ab02", "my holiday photo.jpg");
        let parsed = LogEntry::parse_line(&e.to_line().unwrap()).unwrap();
        assert_eq!(parsed.metadata.filename, "my holiday photo.jpg");
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!(LogEntry::parse_line("").is_err());
        assert!(LogEntry::parse_line("abcdef").is_err());
        assert!(LogEntry::parse_line("not-hex {\"Filename\":\"a\",\"ExpirationTime\":\"2024-01-01T00:00:00Z\"}").is_err());
        assert!(LogEntry::parse_line("abcd {\"Filename\":\"a\",\"Expira").is_err());
        assert!(LogEntry::parse_line("abcd {\"Filename\":\"a\"}").is_err());
    }

    #[tokio::test]
    async fn test_appends_preserve_order_after_flush() {
        let dir = tempdir().unwrap();
        let log = MetadataLog::spawn(dir.path().join("metadata.txt"));

        let handles = ["01", "02", "03", "04", "05"];
        for h in handles {
            log.append(entry(h, "f"));
        }
        log.flush().await.unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let written: Vec<&str> = contents
            .lines()
            .map(|line| line.split(' ').next().unwrap())
            .collect();
        assert_eq!(written, handles);
        assert_eq!(log.appended(), 5);
        assert_eq!(log.failed(), 0);
    }

    #[tokio::test]
    async fn test_flush_with_nothing_queued() {
        let dir = tempdir().unwrap();
        let log = MetadataLog::spawn(dir.path().join("metadata.txt"));

        log.flush().await.unwrap();
        assert!(!log.path().exists());
    }

    #[tokio::test]
    async fn test_append_failure_is_counted_not_fatal() {
        let dir = tempdir().unwrap();
        // Parent directory does not exist, so every open fails
        let log = MetadataLog::spawn(dir.path().join("missing").join("metadata.txt"));

        log.append(entry("aa", "f"));
        log.flush().await.unwrap();

        assert_eq!(log.appended(), 0);
        assert_eq!(log.failed(), 1);

        log.append(entry("bb", "g"));
        log.flush().await.unwrap();
        assert_eq!(log.failed(), 2);
    }

    #[tokio::test]
    async fn test_append_after_torn_tail_starts_new_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.txt");
        std::fs::write(&path, b"cc03 {\"Filename\":\"cut").unwrap();

        let log = MetadataLog::spawn(&path);
        log.append(entry("dd04", "after.txt"));
        log.append(entry("ee05", "later.txt"));
        log.flush().await.unwrap();

        let lines = read_window(&path, 100).await.unwrap().unwrap();
        assert_eq!(lines.len(), 3);
        assert!(LogEntry::parse_line(&lines[0]).is_err());
        assert_eq!(LogEntry::parse_line(&lines[1]).unwrap().metadata.filename, "after.txt");
        assert_eq!(LogEntry::parse_line(&lines[2]).unwrap().metadata.filename, "later.txt");
    }

    #[tokio::test]
    async fn test_append_after_clean_tail_adds_no_blank_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.txt");
        std::fs::write(&path, entry("aa", "before.txt").to_line().unwrap()).unwrap();

        let log = MetadataLog::spawn(&path);
        log.append(entry("bb", "after.txt"));
        log.flush().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(!contents.contains("\n\n"));
    }

    #[tokio::test]
    async fn test_read_window_missing_file() {
        let dir = tempdir().unwrap();
        let lines = read_window(&dir.path().join("metadata.txt"), 10).await.unwrap();
        assert!(lines.is_none());
    }

    #[tokio::test]
    async fn test_read_window_keeps_newest_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.txt");
        let contents: String = (0..25).map(|i| format!("line{}\n", i)).collect();
        std::fs::write(&path, contents).unwrap();

        let lines = read_window(&path, 10).await.unwrap().unwrap();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines.first().unwrap(), "line15");
        assert_eq!(lines.last().unwrap(), "line24");
    }

    #[tokio::test]
    async fn test_read_window_includes_unterminated_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.txt");
        std::fs::write(&path, b"first\nsecond\nthird-without-newline").unwrap();

        let lines = read_window(&path, 100).await.unwrap().unwrap();
        assert_eq!(lines, vec!["first", "second", "third-without-newline"]);
    }

    #[tokio::test]
    async fn test_read_window_tolerates_invalid_utf8() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.txt");
        std::fs::write(&path, b"ok\n\xff\xfe broken\n").unwrap();

        let lines = read_window(&path, 100).await.unwrap().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(LogEntry::parse_line(&lines[1]).is_err());
    }
}

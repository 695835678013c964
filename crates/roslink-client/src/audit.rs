//! Append-only audit log with per-segment digest chaining.
//!
//! Events are buffered in memory and flushed when the buffer fills, on a
//! timer, and immediately for critical-level entries. Segments rotate at
//! `segment_max_events`; each segment starts a fresh digest chain, so a
//! tampered byte invalidates exactly one segment and verification can name
//! it. Credential-bearing detail fields are masked before the event is
//! built; the cleartext never reaches the buffer.

use roslink_common::protocol::error::Result;
use roslink_metrics::{MonitorEvent, MonitorSink};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::AuditConfig;

/// Detail keys whose values are masked in audit records.
const MASKED_KEYS: [&str; 5] = ["password", "secret", "passphrase", "token", "key"];
const MASK: &str = "***";

/// Severity of an audit entry. Critical entries skip the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warning,
    Critical,
}

/// One audit entry as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub level: AuditLevel,
    /// Coarse grouping, e.g. `"command"`, `"security"`, `"lifecycle"`.
    pub category: String,
    pub actor: String,
    /// What happened; for command entries this is the command token.
    pub action: String,
    pub details: Value,
    /// `"success"` or the error kind name.
    pub outcome: String,
    pub duration_ms: u64,
    /// Hex SHA-256 over the previous digest and this event's payload.
    /// Empty when integrity mode is off.
    pub digest: String,
}

/// Input for [`AuditLog::record`].
#[derive(Debug, Clone, Copy)]
pub struct AuditRecord<'a> {
    pub level: AuditLevel,
    pub category: &'a str,
    pub actor: &'a str,
    pub action: &'a str,
    pub details: &'a Value,
    pub outcome: &'a str,
    pub duration: Duration,
}

/// Read-side filter for [`AuditLog::search`] and
/// [`AuditLog::generate_report`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub level: Option<AuditLevel>,
    pub category: Option<String>,
    pub actor: Option<String>,
    /// Substring match against the action field.
    pub action_contains: Option<String>,
    pub since_ms: Option<u64>,
    pub until_ms: Option<u64>,
}

impl SearchCriteria {
    fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(level) = self.level {
            if event.level != level {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &event.category != category {
                return false;
            }
        }
        if let Some(actor) = &self.actor {
            if &event.actor != actor {
                return false;
            }
        }
        if let Some(needle) = &self.action_contains {
            if !event.action.contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.since_ms {
            if event.timestamp_ms < since {
                return false;
            }
        }
        if let Some(until) = self.until_ms {
            if event.timestamp_ms > until {
                return false;
            }
        }
        true
    }
}

/// Aggregate view over the events matching a [`SearchCriteria`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    pub total: usize,
    pub failures: usize,
    pub by_category: HashMap<String, usize>,
    pub by_actor: HashMap<String, usize>,
    pub earliest_ms: Option<u64>,
    pub latest_ms: Option<u64>,
}

/// Event payload covered by the digest. `digest` itself is excluded.
#[derive(Serialize)]
struct ChainPayload<'a> {
    sequence: u64,
    timestamp_ms: u64,
    level: AuditLevel,
    category: &'a str,
    actor: &'a str,
    action: &'a str,
    details: &'a Value,
    outcome: &'a str,
    duration_ms: u64,
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn chain_digest(prev: &str, event: &AuditEvent) -> Result<String> {
    let payload = serde_json::to_string(&ChainPayload {
        sequence: event.sequence,
        timestamp_ms: event.timestamp_ms,
        level: event.level,
        category: &event.category,
        actor: &event.actor,
        action: &event.action,
        details: &event.details,
        outcome: &event.outcome,
        duration_ms: event.duration_ms,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(prev.as_bytes());
    hasher.update(payload.as_bytes());
    Ok(hex_digest(&hasher.finalize()))
}

/// Returns `details` with credential-bearing values replaced by a mask.
pub fn mask_details(details: &Value) -> Value {
    match details {
        Value::Object(map) => {
            let masked = map
                .iter()
                .map(|(key, value)| {
                    let lowered = key.to_lowercase();
                    if MASKED_KEYS.iter().any(|m| lowered.contains(m)) {
                        (key.clone(), Value::String(MASK.to_string()))
                    } else {
                        (key.clone(), mask_details(value))
                    }
                })
                .collect();
            Value::Object(masked)
        }
        Value::Array(items) => Value::Array(items.iter().map(mask_details).collect()),
        other => other.clone(),
    }
}

/// Verification result for one segment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentReport {
    pub file: PathBuf,
    pub events: usize,
    pub valid: bool,
    /// 1-based line number of the first event that breaks the chain.
    pub first_invalid_line: Option<usize>,
}

/// Verification result across all segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub segments: Vec<SegmentReport>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.segments.iter().all(|s| s.valid)
    }
}

struct AuditInner {
    buffer: Vec<AuditEvent>,
    sequence: u64,
    prev_digest: String,
    segment_index: u32,
    /// Events already written to the current segment.
    segment_events: usize,
}

/// Buffered, hash-chained audit log.
pub struct AuditLog {
    config: AuditConfig,
    inner: Mutex<AuditInner>,
    sink: Arc<dyn MonitorSink>,
}

impl AuditLog {
    /// Opens the log, creating the directory if needed. A new segment is
    /// always started; existing segments are kept for search, verification
    /// and retention handling.
    pub async fn open(config: AuditConfig, sink: Arc<dyn MonitorSink>) -> Result<Self> {
        tokio::fs::create_dir_all(&config.directory).await?;
        let next_index = Self::max_segment_index(&config.directory)
            .await?
            .map(|i| i + 1)
            .unwrap_or(0);
        Ok(Self {
            config,
            inner: Mutex::new(AuditInner {
                buffer: Vec::new(),
                sequence: 0,
                prev_digest: String::new(),
                segment_index: next_index,
                segment_events: 0,
            }),
            sink,
        })
    }

    fn segment_path(&self, index: u32) -> PathBuf {
        self.config
            .directory
            .join(format!("segment-{index:05}.jsonl"))
    }

    async fn max_segment_index(directory: &PathBuf) -> Result<Option<u32>> {
        let mut max = None;
        let mut entries = tokio::fs::read_dir(directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(index) = parse_segment_index(&entry.file_name().to_string_lossy()) {
                max = Some(max.map_or(index, |m: u32| m.max(index)));
            }
        }
        Ok(max)
    }

    /// Records one entry.
    ///
    /// Flushes synchronously when the buffer reaches its configured size or
    /// the entry is critical-level.
    pub async fn record(&self, record: AuditRecord<'_>) -> Result<()> {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;

        let mut inner = self.inner.lock().await;
        let event = AuditEvent {
            sequence: inner.sequence,
            timestamp_ms,
            level: record.level,
            category: record.category.to_string(),
            actor: record.actor.to_string(),
            action: record.action.to_string(),
            details: mask_details(record.details),
            outcome: record.outcome.to_string(),
            duration_ms: record.duration.as_millis() as u64,
            // Digests are assigned at write time, where the segment the
            // event lands in is known.
            digest: String::new(),
        };
        inner.sequence += 1;
        inner.buffer.push(event);

        if record.level == AuditLevel::Critical || inner.buffer.len() >= self.config.buffer_size {
            self.flush_locked(&mut inner).await?;
        }
        Ok(())
    }

    /// Writes all buffered events out.
    pub async fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.flush_locked(&mut inner).await
    }

    async fn flush_locked(&self, inner: &mut AuditInner) -> Result<()> {
        if inner.buffer.is_empty() {
            return Ok(());
        }
        let events = std::mem::take(&mut inner.buffer);
        let count = events.len();

        for mut event in events {
            if inner.segment_events >= self.config.segment_max_events {
                inner.segment_index += 1;
                inner.segment_events = 0;
                // Each segment chains from its own genesis so damage stays
                // local to one file.
                inner.prev_digest = String::new();
                debug!(segment = inner.segment_index, "audit segment rotated");
            }
            if self.config.integrity_mode {
                event.digest = chain_digest(&inner.prev_digest, &event)?;
                inner.prev_digest = event.digest.clone();
            }
            let path = self.segment_path(inner.segment_index);
            let mut line = serde_json::to_string(&event)?;
            line.push('\n');
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            inner.segment_events += 1;
        }

        self.sink.notify(&MonitorEvent::AuditFlushed { events: count });
        Ok(())
    }

    async fn segment_paths_sorted(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.config.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            if parse_segment_index(&entry.file_name().to_string_lossy()).is_some() {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Returns stored events matching `criteria`, oldest first.
    pub async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<AuditEvent>> {
        self.flush().await?;

        let mut matches = Vec::new();
        for path in self.segment_paths_sorted().await? {
            let contents = tokio::fs::read_to_string(&path).await?;
            for line in contents.lines() {
                if let Ok(event) = serde_json::from_str::<AuditEvent>(line) {
                    if criteria.matches(&event) {
                        matches.push(event);
                    }
                }
            }
        }
        Ok(matches)
    }

    /// Aggregates the events matching `criteria` into a summary report.
    pub async fn generate_report(&self, criteria: &SearchCriteria) -> Result<AuditReport> {
        let events = self.search(criteria).await?;
        let mut report = AuditReport {
            total: events.len(),
            ..AuditReport::default()
        };
        for event in &events {
            if event.outcome != "success" {
                report.failures += 1;
            }
            *report.by_category.entry(event.category.clone()).or_insert(0) += 1;
            *report.by_actor.entry(event.actor.clone()).or_insert(0) += 1;
            report.earliest_ms = Some(
                report
                    .earliest_ms
                    .map_or(event.timestamp_ms, |t| t.min(event.timestamp_ms)),
            );
            report.latest_ms = Some(
                report
                    .latest_ms
                    .map_or(event.timestamp_ms, |t| t.max(event.timestamp_ms)),
            );
        }
        Ok(report)
    }

    /// Deletes segments older than the retention window. The live segment
    /// is always kept.
    pub async fn purge_expired(&self) -> Result<usize> {
        let cutoff = SystemTime::now()
            - Duration::from_secs(u64::from(self.config.retention_days) * 24 * 3600);
        let current = {
            let inner = self.inner.lock().await;
            self.segment_path(inner.segment_index)
        };

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.config.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if parse_segment_index(&entry.file_name().to_string_lossy()).is_none() {
                continue;
            }
            if path == current {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            if modified < cutoff {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "purged expired audit segments");
        }
        Ok(removed)
    }

    /// Recomputes every segment's digest chain against its stored digests.
    ///
    /// Buffered events are flushed first so the report covers everything
    /// recorded so far. With integrity mode off this only checks that the
    /// files parse.
    pub async fn verify_integrity(&self) -> Result<IntegrityReport> {
        self.flush().await?;

        let mut segments = Vec::new();
        for path in self.segment_paths_sorted().await? {
            segments.push(self.verify_segment(path).await?);
        }
        Ok(IntegrityReport { segments })
    }

    async fn verify_segment(&self, path: PathBuf) -> Result<SegmentReport> {
        let contents = tokio::fs::read_to_string(&path).await?;
        let mut prev = String::new();
        let mut events = 0;
        let mut first_invalid_line = None;

        for (idx, line) in contents.lines().enumerate() {
            events += 1;
            let line_no = idx + 1;
            let event: AuditEvent = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(_) => {
                    first_invalid_line = Some(line_no);
                    break;
                }
            };
            if self.config.integrity_mode {
                let expected = chain_digest(&prev, &event)?;
                if event.digest != expected {
                    first_invalid_line = Some(line_no);
                    break;
                }
                prev = event.digest;
            }
        }

        if first_invalid_line.is_some() {
            warn!(file = %path.display(), line = ?first_invalid_line, "audit segment failed verification");
        }
        Ok(SegmentReport {
            file: path,
            events,
            valid: first_invalid_line.is_none(),
            first_invalid_line,
        })
    }

    /// Spawns the periodic flush task.
    pub fn spawn_flusher(self: &Arc<Self>) -> JoinHandle<()> {
        let log = Arc::clone(self);
        let interval = log.config.flush_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = log.flush().await {
                    warn!(error = %err, "audit flush failed");
                }
            }
        })
    }

    /// Number of events recorded so far, flushed or not.
    pub async fn recorded(&self) -> u64 {
        self.inner.lock().await.sequence
    }
}

fn parse_segment_index(name: &str) -> Option<u32> {
    name.strip_prefix("segment-")?
        .strip_suffix(".jsonl")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use roslink_metrics::{NullSink, RecordingSink};
    use serde_json::json;

    fn config(dir: &std::path::Path) -> AuditConfig {
        AuditConfig {
            directory: dir.to_path_buf(),
            buffer_size: 4,
            flush_interval: Duration::from_secs(3600),
            segment_max_events: 10_000,
            retention_days: 90,
            integrity_mode: true,
        }
    }

    fn command_record<'a>(action: &'a str, details: &'a Value) -> AuditRecord<'a> {
        AuditRecord {
            level: AuditLevel::Info,
            category: "command",
            actor: "billing",
            action,
            details,
            outcome: "success",
            duration: Duration::from_millis(5),
        }
    }

    async fn record_n(log: &AuditLog, n: usize) {
        for i in 0..n {
            let details = json!({"name": format!("u{i}")});
            log.record(command_record("/user/add", &details))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_record_flush_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(config(dir.path()), Arc::new(NullSink))
            .await
            .unwrap();

        record_n(&log, 3).await;
        log.flush().await.unwrap();

        let report = log.verify_integrity().await.unwrap();
        assert!(report.is_valid());
        assert_eq!(report.segments.len(), 1);
        assert_eq!(report.segments[0].events, 3);
    }

    #[tokio::test]
    async fn test_buffer_full_forces_flush() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let log = AuditLog::open(config(dir.path()), sink.clone())
            .await
            .unwrap();

        record_n(&log, 4).await; // buffer_size is 4
        assert_eq!(
            sink.count_matching(|e| matches!(e, MonitorEvent::AuditFlushed { events: 4 })),
            1
        );
    }

    #[tokio::test]
    async fn test_critical_entry_flushes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let log = AuditLog::open(config(dir.path()), sink.clone())
            .await
            .unwrap();

        let details = json!({});
        log.record(AuditRecord {
            level: AuditLevel::Critical,
            category: "security",
            actor: "billing",
            action: "/user/remove",
            details: &details,
            outcome: "blocked_input",
            duration: Duration::ZERO,
        })
        .await
        .unwrap();

        assert_eq!(
            sink.count_matching(|e| matches!(e, MonitorEvent::AuditFlushed { events: 1 })),
            1
        );
    }

    #[tokio::test]
    async fn test_credentials_are_masked() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(config(dir.path()), Arc::new(NullSink))
            .await
            .unwrap();
        let details = json!({"name": "u1", "password": "hunter2"});
        log.record(command_record("/user/add", &details))
            .await
            .unwrap();
        log.flush().await.unwrap();

        let path = log.segment_path(0);
        let contents = tokio::fs::read_to_string(path).await.unwrap();
        assert!(!contents.contains("hunter2"));
        assert!(contents.contains("***"));
    }

    #[tokio::test]
    async fn test_tamper_is_detected_and_localized() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.segment_max_events = 2; // force rotation into several segments
        let log = AuditLog::open(cfg, Arc::new(NullSink)).await.unwrap();

        record_n(&log, 6).await;
        log.flush().await.unwrap();

        // Flip one byte in the middle segment.
        let victim = log.segment_path(1);
        let contents = tokio::fs::read_to_string(&victim).await.unwrap();
        let tampered = contents.replacen("u2", "u9", 1);
        assert_ne!(contents, tampered);
        tokio::fs::write(&victim, tampered).await.unwrap();

        let report = log.verify_integrity().await.unwrap();
        assert!(!report.is_valid());
        for segment in &report.segments {
            if segment.file == victim {
                assert!(!segment.valid);
                assert_eq!(segment.first_invalid_line, Some(1));
            } else {
                assert!(segment.valid, "undamaged segment flagged: {segment:?}");
            }
        }
    }

    #[tokio::test]
    async fn test_segment_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.segment_max_events = 2;
        let log = AuditLog::open(cfg, Arc::new(NullSink)).await.unwrap();

        record_n(&log, 5).await;
        log.flush().await.unwrap();

        let report = log.verify_integrity().await.unwrap();
        assert!(report.is_valid());
        assert_eq!(report.segments.len(), 3);
        assert_eq!(
            report.segments.iter().map(|s| s.events).sum::<usize>(),
            5
        );
    }

    #[tokio::test]
    async fn test_reopen_starts_new_segment() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = AuditLog::open(config(dir.path()), Arc::new(NullSink))
                .await
                .unwrap();
            record_n(&log, 2).await;
            log.flush().await.unwrap();
        }
        let log = AuditLog::open(config(dir.path()), Arc::new(NullSink))
            .await
            .unwrap();
        record_n(&log, 2).await;
        log.flush().await.unwrap();

        let report = log.verify_integrity().await.unwrap();
        assert!(report.is_valid());
        assert_eq!(report.segments.len(), 2);
    }

    #[tokio::test]
    async fn test_search_filters_by_actor_and_action() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(config(dir.path()), Arc::new(NullSink))
            .await
            .unwrap();

        record_n(&log, 2).await;
        let details = json!({});
        log.record(AuditRecord {
            level: AuditLevel::Warning,
            category: "command",
            actor: "support",
            action: "/queue/print",
            details: &details,
            outcome: "timeout",
            duration: Duration::from_millis(100),
        })
        .await
        .unwrap();

        let by_actor = log
            .search(&SearchCriteria {
                actor: Some("support".to_string()),
                ..SearchCriteria::default()
            })
            .await
            .unwrap();
        assert_eq!(by_actor.len(), 1);
        assert_eq!(by_actor[0].action, "/queue/print");

        let by_action = log
            .search(&SearchCriteria {
                action_contains: Some("/user".to_string()),
                ..SearchCriteria::default()
            })
            .await
            .unwrap();
        assert_eq!(by_action.len(), 2);
    }

    #[tokio::test]
    async fn test_generate_report_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(config(dir.path()), Arc::new(NullSink))
            .await
            .unwrap();

        record_n(&log, 3).await;
        let details = json!({});
        log.record(AuditRecord {
            level: AuditLevel::Warning,
            category: "command",
            actor: "billing",
            action: "/user/print",
            details: &details,
            outcome: "connection",
            duration: Duration::from_millis(50),
        })
        .await
        .unwrap();

        let report = log.generate_report(&SearchCriteria::default()).await.unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.failures, 1);
        assert_eq!(report.by_category["command"], 4);
        assert_eq!(report.by_actor["billing"], 4);
        assert!(report.earliest_ms.unwrap() <= report.latest_ms.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_current_segment() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.segment_max_events = 2;
        cfg.retention_days = 0; // everything but the live segment expires
        let log = AuditLog::open(cfg, Arc::new(NullSink)).await.unwrap();

        record_n(&log, 5).await;
        log.flush().await.unwrap();

        let removed = log.purge_expired().await.unwrap();
        assert_eq!(removed, 2);
        let report = log.verify_integrity().await.unwrap();
        assert_eq!(report.segments.len(), 1);
    }

    #[test]
    fn test_mask_details_is_recursive() {
        let masked = mask_details(&json!({
            "name": "u1",
            "password": "pw",
            "nested": {"api-secret": "s", "keep": 1},
            "list": [{"passphrase": "p"}]
        }));
        assert_eq!(masked["password"], "***");
        assert_eq!(masked["nested"]["api-secret"], "***");
        assert_eq!(masked["nested"]["keep"], 1);
        assert_eq!(masked["list"][0]["passphrase"], "***");
        assert_eq!(masked["name"], "u1");
    }
}

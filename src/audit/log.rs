//! Append-only audit log storage.
//!
//! Events are persisted to a JSON-lines file, flushed before `append`
//! returns, and indexed in memory for queries. The storage type exposes no
//! update or delete operation: append-only is enforced by construction, not
//! by application discipline. Reopening a log replays the file.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write as _};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::GateError;

use super::event::{AuditEvent, AuditQuery, AuditStats, EventType};

struct LogInner {
    file: File,
    events: Vec<AuditEvent>,
}

/// Append-only audit event store.
///
/// Thread-safe: a single lock serializes writers; queries clone out of the
/// in-memory index.
pub struct AuditLog {
    path: PathBuf,
    inner: Mutex<LogInner>,
}

impl AuditLog {
    /// Open (or create) an audit log at `path`, replaying existing events.
    ///
    /// # Errors
    ///
    /// Returns an internal error when the file cannot be opened or an
    /// existing line fails to parse; a corrupt log is a fatal condition, not
    /// something to silently skip.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GateError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                GateError::internal(format!("cannot create audit directory: {e}"))
            })?;
        }

        let mut events = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path).map_err(|e| {
                GateError::internal(format!("cannot open audit log: {e}"))
            })?);
            for (line_no, line) in reader.lines().enumerate() {
                let line =
                    line.map_err(|e| GateError::internal(format!("audit log read failed: {e}")))?;
                if line.trim().is_empty() {
                    continue;
                }
                let event: AuditEvent = serde_json::from_str(&line).map_err(|e| {
                    GateError::internal(format!(
                        "corrupt audit log line {}: {e}",
                        line_no + 1
                    ))
                })?;
                events.push(event);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| GateError::internal(format!("cannot open audit log for append: {e}")))?;

        Ok(Self {
            path,
            inner: Mutex::new(LogInner { file, events }),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event. Durable (flushed) before returning.
    ///
    /// # Errors
    ///
    /// Returns an internal error when the write fails; the caller must not
    /// proceed with a side effect whose audit write failed.
    pub fn append(&self, event: AuditEvent) -> Result<AuditEvent, GateError> {
        let line = serde_json::to_string(&event)
            .map_err(|e| GateError::internal(format!("audit event serialization failed: {e}")))?;

        let mut inner = self.inner.lock();
        inner
            .file
            .write_all(line.as_bytes())
            .and_then(|()| inner.file.write_all(b"\n"))
            .and_then(|()| inner.file.flush())
            .map_err(|e| GateError::internal(format!("audit append failed: {e}")))?;
        inner.events.push(event.clone());
        drop(inner);

        tracing::debug!(
            event_type = ?event.event_type,
            correlation_id = %event.correlation_id,
            "audit event appended"
        );
        Ok(event)
    }

    /// Build and append an event in one call.
    ///
    /// # Errors
    ///
    /// Propagates append failures.
    pub fn record(
        &self,
        event_type: EventType,
        correlation_id: &str,
        data: serde_json::Value,
    ) -> Result<AuditEvent, GateError> {
        self.append(AuditEvent::new(event_type, correlation_id, data))
    }

    /// Look up a single event by id.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<AuditEvent> {
        self.inner
            .lock()
            .events
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// Query events with filters, in append order.
    #[must_use]
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEvent> {
        let inner = self.inner.lock();
        inner
            .events
            .iter()
            .filter(|e| {
                (query.event_types.is_empty() || query.event_types.contains(&e.event_type))
                    && query
                        .correlation_id
                        .as_ref()
                        .is_none_or(|c| &e.correlation_id == c)
                    && query.start_time.is_none_or(|t| e.timestamp >= t)
                    && query.end_time.is_none_or(|t| e.timestamp <= t)
            })
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect()
    }

    /// Count of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Statistics over all stored events.
    #[must_use]
    pub fn stats(&self) -> AuditStats {
        let inner = self.inner.lock();
        let mut event_type_counts = std::collections::HashMap::new();
        let mut correlations = std::collections::HashSet::new();
        for event in &inner.events {
            let key = serde_json::to_value(event.event_type)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            *event_type_counts.entry(key).or_insert(0) += 1;
            correlations.insert(event.correlation_id.clone());
        }
        AuditStats {
            total_events: inner.events.len(),
            event_type_counts,
            earliest_event: inner.events.first().map(|e| e.timestamp),
            latest_event: inner.events.last().map(|e| e.timestamp),
            correlation_id_count: correlations.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp_log() -> (tempfile::TempDir, AuditLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.jsonl")).unwrap();
        (dir, log)
    }

    #[test]
    fn append_and_get() {
        let (_dir, log) = open_temp_log();
        let event = log
            .record(EventType::OrderProposed, "corr-1", serde_json::json!({"symbol": "AAPL"}))
            .unwrap();

        let fetched = log.get(event.id).unwrap();
        assert_eq!(fetched.correlation_id, "corr-1");
        assert_eq!(fetched.event_type, EventType::OrderProposed);
    }

    #[test]
    fn query_by_correlation_preserves_append_order() {
        let (_dir, log) = open_temp_log();
        log.record(EventType::OrderProposed, "corr-1", serde_json::json!({}))
            .unwrap();
        log.record(EventType::OrderSimulated, "corr-1", serde_json::json!({}))
            .unwrap();
        log.record(EventType::OrderProposed, "corr-2", serde_json::json!({}))
            .unwrap();
        log.record(EventType::RiskGateEvaluated, "corr-1", serde_json::json!({}))
            .unwrap();

        let events = log.query(&AuditQuery::for_correlation("corr-1"));
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, EventType::OrderProposed);
        assert_eq!(events[1].event_type, EventType::OrderSimulated);
        assert_eq!(events[2].event_type, EventType::RiskGateEvaluated);
        // Timestamps are monotone within a correlation.
        assert!(events[1].timestamp >= events[0].timestamp);
        assert!(events[2].timestamp >= events[1].timestamp);
    }

    #[test]
    fn query_by_type_and_pagination() {
        let (_dir, log) = open_temp_log();
        for i in 0..5 {
            log.record(
                EventType::ToolCalled,
                &format!("corr-{i}"),
                serde_json::json!({"i": i}),
            )
            .unwrap();
        }
        log.record(EventType::ToolRejected, "corr-x", serde_json::json!({}))
            .unwrap();

        let query = AuditQuery {
            event_types: vec![EventType::ToolCalled],
            limit: 2,
            offset: 2,
            ..AuditQuery::default()
        };
        let events = log.query(&query);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data["i"], 2);
        assert_eq!(events[1].data["i"], 3);
    }

    #[test]
    fn reopen_replays_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let log = AuditLog::open(&path).unwrap();
            log.record(EventType::KillSwitchActivated, "corr-1", serde_json::json!({}))
                .unwrap();
            log.record(EventType::KillSwitchReleased, "corr-1", serde_json::json!({}))
                .unwrap();
        }

        let reopened = AuditLog::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        let events = reopened.query(&AuditQuery::for_correlation("corr-1"));
        assert_eq!(events[0].event_type, EventType::KillSwitchActivated);
    }

    #[test]
    fn stats_counts_types_and_correlations() {
        let (_dir, log) = open_temp_log();
        log.record(EventType::OrderProposed, "a", serde_json::json!({}))
            .unwrap();
        log.record(EventType::OrderProposed, "b", serde_json::json!({}))
            .unwrap();
        log.record(EventType::OrderFilled, "a", serde_json::json!({}))
            .unwrap();

        let stats = log.stats();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.event_type_counts["ORDER_PROPOSED"], 2);
        assert_eq!(stats.event_type_counts["ORDER_FILLED"], 1);
        assert_eq!(stats.correlation_id_count, 2);
        assert!(stats.earliest_event.is_some());
    }

    #[test]
    fn corrupt_log_is_fatal_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        std::fs::write(&path, "not json\n").unwrap();
        assert!(AuditLog::open(&path).is_err());
    }
}

use crate::telemetry::events::{ErrorEntry, Event, EventSink, Severity};
use log::{error, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

const MAX_ERRORS: usize = 50;

/// Bounded history of user-visible failures.
pub struct ErrorLog {
    inner: Mutex<ErrorHistory>,
}

struct ErrorHistory {
    entries: VecDeque<ErrorEntry>,
    next_id: u64,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ErrorHistory {
                entries: VecDeque::with_capacity(MAX_ERRORS),
                next_id: 0,
            }),
        }
    }

    pub fn record(&self, level: Severity, message: &str) -> ErrorEntry {
        let mut history = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = ErrorEntry {
            id: history.next_id,
            message: message.to_string(),
            level,
            timestamp: unix_seconds(),
        };
        history.next_id += 1;
        history.entries.push_back(entry.clone());
        if history.entries.len() > MAX_ERRORS {
            history.entries.pop_front();
        }
        entry
    }

    /// Most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ErrorEntry> {
        if let Ok(history) = self.inner.lock() {
            let skip = history.entries.len().saturating_sub(limit);
            history.entries.iter().skip(skip).cloned().collect()
        } else {
            Vec::new()
        }
    }

    pub fn clear(&self) {
        if let Ok(mut history) = self.inner.lock() {
            history.entries.clear();
        }
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs a failure, keeps it in the history and pushes an `error_toast`.
#[derive(Clone)]
pub struct Reporter {
    log: Arc<ErrorLog>,
    sink: Arc<dyn EventSink>,
}

impl Reporter {
    pub fn new(log: Arc<ErrorLog>, sink: Arc<dyn EventSink>) -> Self {
        Self { log, sink }
    }

    pub fn report(&self, level: Severity, message: &str) {
        match level {
            Severity::Info => info!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }
        let entry = self.log.record(level, message);
        self.sink.emit(Event::ErrorToast(entry));
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub fn history(&self) -> &Arc<ErrorLog> {
        &self.log
    }
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemorySink;

    #[test]
    fn history_is_bounded_and_ids_keep_increasing() {
        let log = ErrorLog::new();
        for index in 0..(MAX_ERRORS + 5) {
            log.record(Severity::Error, &format!("failure {index}"));
        }
        let recent = log.recent(usize::MAX);
        assert_eq!(recent.len(), MAX_ERRORS);
        assert_eq!(recent[0].id, 5);
        assert_eq!(recent.last().map(|e| e.id), Some((MAX_ERRORS + 4) as u64));
        assert_eq!(log.recent(2).len(), 2);
    }

    #[test]
    fn reporter_emits_toast() {
        let sink = Arc::new(MemorySink::new());
        let reporter = Reporter::new(Arc::new(ErrorLog::new()), sink.clone());
        reporter.report(Severity::Warning, "ALARM:1");
        assert_eq!(sink.names(), vec!["error_toast"]);
        assert_eq!(reporter.history().recent(1)[0].message, "ALARM:1");
    }
}

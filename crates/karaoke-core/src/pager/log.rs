use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{PagerMessage, Token};
use crate::api::{BlueOceanApi, LogChunk};
use crate::error::CoreResult;
use crate::model::LogRecord;
use crate::url::FETCH_ALL_SUFFIX;

/// What applying a log response did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    /// The record is gone, or the response was for a cursor it has moved past.
    Discarded,
    Appended { lines: usize, scheduled: bool },
    Failed { error: String, repeated: bool },
}

struct LogEntry {
    record: LogRecord,
    token: Token,
    in_flight: bool,
    timer: Option<JoinHandle<()>>,
}

impl LogEntry {
    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Incremental log tailing, one record per log URL.
///
/// Requests for a URL are chained: the next `start` always comes from the
/// previous response, and a new fetch is refused while one is in flight.
/// A poll timer is armed only when the caller is following and the server
/// returned a positive cursor.
pub struct LogPager {
    api: Arc<dyn BlueOceanApi>,
    tx: mpsc::UnboundedSender<PagerMessage>,
    entries: HashMap<String, LogEntry>,
    karaoke_speed: Duration,
    next_token: Token,
    sequence: u64,
}

impl LogPager {
    pub fn new(
        api: Arc<dyn BlueOceanApi>,
        tx: mpsc::UnboundedSender<PagerMessage>,
        karaoke_speed: Duration,
    ) -> Self {
        Self {
            api,
            tx,
            entries: HashMap::new(),
            karaoke_speed,
            next_token: 0,
            sequence: 0,
        }
    }

    /// Fetch `url` from `start`, or from scratch with `None`.
    ///
    /// Returns `false` when a fetch for the URL is already in flight.
    pub fn fetch(&mut self, url: &str, start: Option<u64>) -> bool {
        if !self.entries.contains_key(url) {
            self.next_token += 1;
            // a new record expects its first page at the requested start
            let entry = LogEntry {
                record: LogRecord {
                    url: url.to_string(),
                    new_start: start.filter(|n| *n > 0),
                    ..Default::default()
                },
                token: self.next_token,
                in_flight: false,
                timer: None,
            };
            self.entries.insert(url.to_string(), entry);
        }
        let Some(entry) = self.entries.get_mut(url) else {
            return false;
        };
        if entry.in_flight {
            tracing::debug!(url, "Log fetch already in flight");
            return false;
        }

        entry.stop_timer();
        entry.in_flight = true;
        entry.record.pending = true;
        self.sequence += 1;
        let token = entry.token;
        let version = self.sequence;

        tracing::debug!(url, start, version, "Fetching log");
        let api = Arc::clone(&self.api);
        let tx = self.tx.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            let result = api.fetch_log(&url, start).await;
            let _ = tx.send(PagerMessage::LogFetched {
                url,
                token,
                start,
                version,
                result,
            });
        });
        true
    }

    /// Apply a log response. With `follow` set, a positive cursor arms the
    /// poll timer.
    pub fn apply(
        &mut self,
        url: &str,
        token: Token,
        start: Option<u64>,
        version: u64,
        result: CoreResult<LogChunk>,
        follow: bool,
    ) -> LogOutcome {
        let Some(entry) = self.entries.get_mut(url) else {
            return LogOutcome::Discarded;
        };
        if entry.token != token {
            return LogOutcome::Discarded;
        }
        entry.in_flight = false;
        entry.record.pending = false;

        let chunk = match result {
            Ok(chunk) => chunk,
            Err(err) => {
                let error = err.to_string();
                let repeated = entry.record.error.as_deref() == Some(error.as_str());
                if !repeated {
                    tracing::warn!(url, error = %error, "Log fetch failed");
                }
                entry.record.error = Some(error.clone());
                return LogOutcome::Failed { error, repeated };
            }
        };

        let fetch_all = start == Some(0) || (start.is_none() && url.contains(FETCH_ALL_SUFFIX));
        let from_scratch = start.is_none() || start == Some(0);
        if !from_scratch && start != entry.record.new_start {
            tracing::debug!(url, start, cursor = entry.record.new_start, "Dropping log page for stale cursor");
            return LogOutcome::Discarded;
        }

        let lines = chunk.lines();
        let appended = lines.len();
        let record = &mut entry.record;
        if from_scratch {
            record.data = lines;
        } else {
            record.data.extend(lines);
        }
        record.has_more = if fetch_all { false } else { chunk.has_more };
        record.new_start = chunk.new_start;
        record.version = version;
        record.error = None;

        let scheduled = follow && record.new_start.is_some_and(|n| n > 0);
        if scheduled {
            let timer = self.spawn_timer(url, token);
            if let Some(entry) = self.entries.get_mut(url) {
                entry.stop_timer();
                entry.timer = Some(timer);
            }
        }
        tracing::debug!(url, appended, scheduled, "Log page applied");
        LogOutcome::Appended {
            lines: appended,
            scheduled,
        }
    }

    fn spawn_timer(&self, url: &str, token: Token) -> JoinHandle<()> {
        let tx = self.tx.clone();
        let delay = self.karaoke_speed;
        let url = url.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(PagerMessage::LogTick { url, token });
        })
    }

    /// A poll timer fired: continue from the stored cursor.
    pub fn on_tick(&mut self, url: &str, token: Token) -> bool {
        let cursor = match self.entries.get_mut(url) {
            Some(entry) if entry.token == token => {
                entry.timer = None;
                entry.record.new_start
            }
            _ => return false,
        };
        self.fetch(url, cursor)
    }

    /// Stop polling `url`. The record is kept.
    pub fn cancel(&mut self, url: &str) {
        if let Some(entry) = self.entries.get_mut(url) {
            entry.stop_timer();
        }
    }

    pub fn cancel_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.stop_timer();
        }
    }

    /// Tear down the record for `url`; late responses for it are dropped.
    pub fn retire(&mut self, url: &str) {
        if let Some(mut entry) = self.entries.remove(url) {
            entry.stop_timer();
        }
    }

    pub fn clear(&mut self) {
        self.cancel_all();
        self.entries.clear();
    }

    pub fn get(&self, url: &str) -> Option<&LogRecord> {
        self.entries.get(url).map(|e| &e.record)
    }

    pub fn cursor(&self, url: &str) -> Option<u64> {
        self.entries.get(url).and_then(|e| e.record.new_start)
    }

    /// Whether a fetch or poll timer is outstanding for `url`.
    pub fn is_active(&self, url: &str) -> bool {
        self.entries
            .get(url)
            .is_some_and(|e| e.in_flight || e.timer.is_some())
    }

    pub fn has_timer(&self, url: &str) -> bool {
        self.entries.get(url).is_some_and(|e| e.timer.is_some())
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl Drop for LogPager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use stratus_common::{now_ms, LaunchPhase, NodeLogEntry, NodeLogLevel};

/// Default retention for a node's launch log.
const DEFAULT_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Poll cadence for `stream`. This is a polling simulation of a push
/// stream, not a subscription; the real contract is exactly-once
/// delivery in append order, independent of this interval.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct LogBucket {
    entries: Vec<NodeLogEntry>,
    expires_at_ms: u64,
}

#[derive(Debug)]
struct Inner {
    buckets: DashMap<String, LogBucket>,
    ttl_ms: u64,
    poll_interval: Duration,
}

/// Append-only, TTL-bound launch log per node.
///
/// Entries live in memory; the TTL is refreshed on every append so an
/// actively-launching node never loses history mid-flight. Readers see
/// entries in append order. `since_ms` filters are strictly greater.
#[derive(Debug, Clone)]
pub struct NodeLogStore {
    inner: Arc<Inner>,
}

impl NodeLogStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL_MS, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_ttl(ttl_ms: u64, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                buckets: DashMap::new(),
                ttl_ms,
                poll_interval,
            }),
        }
    }

    /// Append one entry, refreshing the bucket TTL. A zero timestamp is
    /// filled with the current time.
    pub fn append(&self, node_id: &str, mut entry: NodeLogEntry) {
        if entry.at_ms == 0 {
            entry.at_ms = now_ms();
        }

        let now = now_ms();
        let mut bucket = self.inner.buckets.entry(node_id.to_string()).or_default();
        if bucket.expires_at_ms != 0 && bucket.expires_at_ms < now {
            // Bucket outlived its retention; start fresh.
            bucket.entries.clear();
        }
        debug!(
            node_id,
            phase = ?entry.phase,
            message = %entry.message,
            "appended node log entry"
        );
        bucket.entries.push(entry);
        bucket.expires_at_ms = now + self.inner.ttl_ms;
    }

    /// Entries for a node, `since_ms`-filtered (strictly greater) and
    /// capped to the last `tail` (0 = uncapped), in append order.
    pub fn get_logs(&self, node_id: &str, tail: usize, since_ms: Option<u64>) -> Vec<NodeLogEntry> {
        let Some(bucket) = self.inner.buckets.get(node_id) else {
            return Vec::new();
        };
        if bucket.expires_at_ms != 0 && bucket.expires_at_ms < now_ms() {
            return Vec::new();
        }

        let mut entries: Vec<NodeLogEntry> = bucket
            .entries
            .iter()
            .filter(|e| since_ms.map(|s| e.at_ms > s).unwrap_or(true))
            .cloned()
            .collect();

        if tail > 0 && entries.len() > tail {
            entries.drain(..entries.len() - tail);
        }
        entries
    }

    /// Drain existing history, then poll for new entries until the
    /// receiver is dropped.
    ///
    /// Delivery is cursor-based over the append-ordered bucket, so each
    /// entry is delivered at most once even when timestamps arrive out
    /// of order; `since_ms` only decides which entries qualify at all.
    pub fn stream(
        &self,
        node_id: &str,
        tail: usize,
        since_ms: Option<u64>,
    ) -> mpsc::Receiver<NodeLogEntry> {
        let (tx, rx) = mpsc::channel(64);
        let store = self.clone();
        let node_id = node_id.to_string();
        let poll_interval = self.inner.poll_interval;

        tokio::spawn(async move {
            // History first. The cursor then sits at the end of the
            // bucket regardless of tail/since filtering.
            let history = store.get_logs(&node_id, tail, since_ms);
            let mut cursor = store
                .inner
                .buckets
                .get(&node_id)
                .map(|b| b.entries.len())
                .unwrap_or(0);
            for entry in history {
                if tx.send(entry).await.is_err() {
                    return;
                }
            }

            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    return;
                }

                let fresh: Vec<NodeLogEntry> = match store.inner.buckets.get(&node_id) {
                    Some(bucket) => {
                        // A cleared or expired-and-reset bucket restarts
                        // the cursor.
                        if cursor > bucket.entries.len() {
                            cursor = bucket.entries.len();
                        }
                        let new = bucket.entries[cursor..]
                            .iter()
                            .filter(|e| since_ms.map(|s| e.at_ms > s).unwrap_or(true))
                            .cloned()
                            .collect();
                        cursor = bucket.entries.len();
                        new
                    }
                    None => {
                        cursor = 0;
                        Vec::new()
                    }
                };

                for entry in fresh {
                    if tx.send(entry).await.is_err() {
                        return;
                    }
                }
            }
        });

        rx
    }

    pub fn clear(&self, node_id: &str) {
        self.inner.buckets.remove(node_id);
    }

    pub fn log_info(&self, node_id: &str, phase: LaunchPhase, message: &str, progress: u8) {
        self.append(
            node_id,
            NodeLogEntry {
                at_ms: 0,
                level: NodeLogLevel::Info,
                message: message.to_string(),
                phase,
                progress: Some(progress),
                details: None,
            },
        );
    }

    pub fn log_warn(&self, node_id: &str, phase: LaunchPhase, message: &str) {
        self.append(
            node_id,
            NodeLogEntry {
                at_ms: 0,
                level: NodeLogLevel::Warn,
                message: message.to_string(),
                phase,
                progress: None,
                details: None,
            },
        );
    }

    pub fn log_error(&self, node_id: &str, phase: LaunchPhase, message: &str, details: &str) {
        self.append(
            node_id,
            NodeLogEntry {
                at_ms: 0,
                level: NodeLogLevel::Error,
                message: message.to_string(),
                phase,
                progress: None,
                details: Some(details.to_string()),
            },
        );
    }
}

impl Default for NodeLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(at_ms: u64, message: &str) -> NodeLogEntry {
        NodeLogEntry {
            at_ms,
            level: NodeLogLevel::Info,
            message: message.to_string(),
            phase: LaunchPhase::Provisioning,
            progress: None,
            details: None,
        }
    }

    #[test]
    fn test_tail_and_since_filters() {
        let store = NodeLogStore::new();
        for (ts, msg) in [(100, "a"), (200, "b"), (300, "c"), (400, "d")] {
            store.append("n1", entry(ts, msg));
        }

        let tail = store.get_logs("n1", 2, None);
        let msgs: Vec<_> = tail.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(msgs, vec!["c", "d"]);

        // since is strictly greater: the entry at 200 is excluded.
        let since = store.get_logs("n1", 0, Some(200));
        let msgs: Vec<_> = since.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(msgs, vec!["c", "d"]);
    }

    #[test]
    fn test_expired_bucket_reads_empty() {
        let store = NodeLogStore::with_ttl(0, DEFAULT_POLL_INTERVAL);
        store.append("n1", entry(100, "a"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.get_logs("n1", 0, None).is_empty());
    }

    #[test]
    fn test_zero_timestamp_is_filled() {
        let store = NodeLogStore::new();
        store.log_info("n1", LaunchPhase::Queued, "queued", 5);
        let logs = store.get_logs("n1", 0, None);
        assert_eq!(logs.len(), 1);
        assert!(logs[0].at_ms > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_delivers_out_of_order_appends_exactly_once() {
        let store = NodeLogStore::new();
        store.append("n1", entry(100, "a"));
        store.append("n1", entry(50, "b")); // older timestamp, later append

        let mut rx = store.stream("n1", 0, Some(10));

        // History in append order, both delivered despite b's older
        // timestamp.
        assert_eq!(rx.recv().await.unwrap().message, "a");
        assert_eq!(rx.recv().await.unwrap().message, "b");

        // New appends arrive via the poll, once each, no re-delivery of
        // history.
        store.append("n1", entry(70, "c"));
        store.append("n1", entry(60, "d"));
        assert_eq!(rx.recv().await.unwrap().message, "c");
        assert_eq!(rx.recv().await.unwrap().message, "d");

        // Entries at or below the since floor never qualify.
        store.append("n1", entry(10, "e"));
        store.append("n1", entry(500, "f"));
        assert_eq!(rx.recv().await.unwrap().message, "f");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_ends_when_receiver_dropped() {
        let store = NodeLogStore::new();
        store.append("n1", entry(100, "a"));
        let rx = store.stream("n1", 0, None);
        drop(rx);
        // Give the poll task a tick to observe the closed channel.
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

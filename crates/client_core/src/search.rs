use std::{
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    time::Duration,
};

use shared::protocol::PeerSummary;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::warn;

use crate::rest::DirectoryApi;

/// Search lifecycle events for the transient results list.
#[derive(Debug, Clone)]
pub enum SearchEvent {
    /// The latest accepted result set; replaces the previous list wholesale.
    ResultsUpdated {
        query: String,
        peers: Vec<PeerSummary>,
    },
    /// The lookup failed; the current results are left untouched.
    LookupFailed { query: String, reason: String },
}

/// Debounced, cancelable, latest-wins directory search.
///
/// Each `query` call cancels any pending timer and starts a new one; only
/// the timer that fires uncancelled performs the lookup. Responses carry
/// the query sequence number they were issued under, so a stale, slower
/// response can never overwrite a newer result set even when the task
/// abort loses the race against an in-flight request.
pub struct SearchController {
    directory: Arc<dyn DirectoryApi>,
    debounce: Duration,
    seq: AtomicU64,
    pending: Mutex<Option<JoinHandle<()>>>,
    results: Mutex<Vec<PeerSummary>>,
    events: broadcast::Sender<SearchEvent>,
}

impl SearchController {
    pub fn new(directory: Arc<dyn DirectoryApi>, debounce: Duration) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            directory,
            debounce,
            seq: AtomicU64::new(0),
            pending: Mutex::new(None),
            results: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SearchEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the current (latest accepted) result list.
    pub async fn results(&self) -> Vec<PeerSummary> {
        self.results.lock().await.clone()
    }

    /// Registers the latest query text. Empty text is a valid query and
    /// yields the directory's default result set.
    pub async fn query(self: &Arc<Self>, text: impl Into<String>) {
        let text = text.into();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;

        let controller = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(controller.debounce).await;
            if controller.seq.load(Ordering::SeqCst) != seq {
                return;
            }
            match controller.directory.search_users(&text).await {
                Ok(peers) => {
                    // A newer query may have been issued while this lookup
                    // was in flight; its result owns the list now.
                    if controller.seq.load(Ordering::SeqCst) != seq {
                        return;
                    }
                    *controller.results.lock().await = peers.clone();
                    let _ = controller
                        .events
                        .send(SearchEvent::ResultsUpdated { query: text, peers });
                }
                Err(err) => {
                    warn!(query = %text, error = %err, "directory lookup failed");
                    let _ = controller.events.send(SearchEvent::LookupFailed {
                        query: text,
                        reason: err.to_string(),
                    });
                }
            }
        });

        let mut pending = self.pending.lock().await;
        if let Some(previous) = pending.replace(task) {
            previous.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/search_tests.rs"]
mod tests;

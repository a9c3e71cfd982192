//! TTL-bounded session-to-credential store.
//!
//! Uses `DashMap`'s entry API for per-key atomic compare-and-update, so
//! concurrent requests for one session are linearized while unrelated
//! sessions never contend on a global lock. Expiry is enforced twice: lazily
//! on every read, and by a background sweep that bounds memory even when an
//! expired session is never touched again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tollgate_core::{Credential, SessionId};
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use crate::service::worker::{BackgroundRunnable, BackgroundWorker};

#[derive(Debug)]
struct SessionEntry {
    credential: Credential,
    last_access: Instant,
}

impl SessionEntry {
    fn new(credential: Credential, now: Instant) -> Self {
        Self {
            credential,
            last_access: now,
        }
    }

    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_access) > ttl
    }
}

#[derive(Debug)]
struct SessionTable {
    entries: DashMap<SessionId, SessionEntry>,
    ttl: Duration,
}

impl SessionTable {
    /// Removes every expired entry. Each removal re-checks expiry under the
    /// shard lock, so an entry refreshed after it was listed survives.
    fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<SessionId> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now, self.ttl))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .iter()
            .filter(|id| {
                self.entries
                    .remove_if(*id, |_, entry| entry.is_expired(now, self.ttl))
                    .is_some()
            })
            .count()
    }
}

/// On-demand work accepted by the sweeper.
#[derive(Debug)]
pub enum SweepTask {
    /// Run a sweep now instead of waiting for the next tick.
    RunNow,
}

struct SessionSweeper {
    table: Arc<SessionTable>,
}

impl SessionSweeper {
    #[allow(clippy::cast_precision_loss)]
    fn sweep(&self) {
        let removed = self.table.sweep_expired();
        let active = self.table.entries.len();
        metrics::gauge!("tollgate_sessions_active").set(active as f64);
        if removed > 0 {
            metrics::counter!("tollgate_sessions_expired_total").increment(removed as u64);
            debug!(removed, active, "Expired sessions swept");
        }
    }
}

#[async_trait]
impl BackgroundRunnable for SessionSweeper {
    type Task = SweepTask;

    async fn run(&mut self, task: SweepTask) {
        match task {
            SweepTask::RunNow => self.sweep(),
        }
    }

    async fn on_tick(&mut self) {
        self.sweep();
    }

    async fn shutdown(&mut self) {
        debug!("Session sweeper stopped");
    }
}

/// Thread-safe store mapping a session identifier to the credential it was
/// first bound with.
///
/// Constructed once per process and shared via `Arc`. All access goes through
/// the methods below; the map itself is never exposed.
pub struct SessionStore {
    table: Arc<SessionTable>,
    sweeper: Mutex<Option<BackgroundWorker<SessionSweeper>>>,
    shutdown_grace: Duration,
}

impl SessionStore {
    /// Creates a store without a background sweeper (lazy expiry only).
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            table: Arc::new(SessionTable {
                entries: DashMap::new(),
                ttl: config.ttl,
            }),
            sweeper: Mutex::new(None),
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Creates a store and starts its periodic sweep.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn start(config: &SessionConfig) -> Self {
        let store = Self::new(config);
        let worker = BackgroundWorker::start(
            SessionSweeper {
                table: Arc::clone(&store.table),
            },
            config.sweep_interval,
        );
        *store.sweeper.lock() = Some(worker);
        info!(
            ttl_secs = config.ttl.as_secs(),
            sweep_interval_secs = config.sweep_interval.as_secs(),
            "Session store started"
        );
        store
    }

    /// Binds `credential` to an unknown session, or validates it against the
    /// credential a live session is already bound to.
    ///
    /// Returns `false` only when the session is live and bound to a different
    /// credential; the existing binding is left untouched. An expired entry
    /// is treated as unknown and replaced.
    pub fn bind_or_validate(&self, session_id: &SessionId, credential: &Credential) -> bool {
        let now = Instant::now();
        match self.table.entries.entry(session_id.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(SessionEntry::new(credential.clone(), now));
                true
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now, self.table.ttl) {
                    *entry = SessionEntry::new(credential.clone(), now);
                    true
                } else if entry.credential.matches(credential) {
                    entry.last_access = now;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Returns the credential bound to a live session and refreshes it.
    /// An expired session is removed and reported as absent.
    pub fn read(&self, session_id: &SessionId) -> Option<Credential> {
        let now = Instant::now();
        match self.table.entries.entry(session_id.clone()) {
            Entry::Vacant(_) => None,
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now, self.table.ttl) {
                    occupied.remove();
                    None
                } else {
                    let entry = occupied.get_mut();
                    entry.last_access = now;
                    Some(entry.credential.clone())
                }
            }
        }
    }

    /// Number of tracked entries, live or not yet swept.
    #[must_use]
    pub fn size(&self) -> usize {
        self.table.entries.len()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.table.entries.clear();
    }

    /// Runs one sweep pass on the calling task; returns how many entries it removed.
    pub fn sweep_expired(&self) -> usize {
        self.table.sweep_expired()
    }

    /// Asks the background sweeper to run a pass now.
    ///
    /// # Errors
    ///
    /// Returns an error if the store has no running sweeper.
    pub async fn request_sweep(&self) -> anyhow::Result<()> {
        let tx = self.sweeper.lock().as_ref().and_then(BackgroundWorker::sender);
        match tx {
            Some(tx) => tx
                .send(SweepTask::RunNow)
                .await
                .map_err(|_| anyhow::anyhow!("session sweeper stopped")),
            None => Err(anyhow::anyhow!("session sweeper not running")),
        }
    }

    /// Stops the sweeper (bounded wait, then abort) and clears all state.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        let worker = self.sweeper.lock().take();
        if let Some(mut worker) = worker {
            if worker.stop_within(self.shutdown_grace).await {
                info!("Session store shut down");
            } else {
                warn!(
                    grace_secs = self.shutdown_grace.as_secs(),
                    "Session sweeper did not stop in time and was aborted"
                );
            }
        }
        self.clear();
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("size", &self.size())
            .field("ttl", &self.table.ttl)
            .finish_non_exhaustive()
    }
}

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use haven_core::config::MemoryConfig;
use haven_core::types::SessionId;
use haven_monitor::MetricsRegistry;
use haven_storage::{BlobStore, KvStore};

use crate::actor::{ActorHandle, MemoryActor};
use crate::summarize::SummaryEngine;

/// Owns all live session actors.
///
/// Actors are spawned lazily on first touch and stopped when their session
/// archives. All session operations go through the handle this returns so the
/// single-writer property holds everywhere.
pub struct SessionRegistry {
    actors: DashMap<String, ActorHandle>,
    kv: Arc<dyn KvStore>,
    blob: Arc<dyn BlobStore>,
    summarizer: Arc<dyn SummaryEngine>,
    cfg: MemoryConfig,
    metrics: Arc<MetricsRegistry>,
}

impl SessionRegistry {
    pub fn new(
        kv: Arc<dyn KvStore>,
        blob: Arc<dyn BlobStore>,
        summarizer: Arc<dyn SummaryEngine>,
        cfg: MemoryConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            actors: DashMap::new(),
            kv,
            blob,
            summarizer,
            cfg,
            metrics,
        }
    }

    /// The actor handle for `session_id`, spawning it if needed.
    pub fn actor(&self, session_id: &SessionId) -> ActorHandle {
        if let Some(handle) = self.actors.get(session_id.as_str()) {
            return handle.clone();
        }
        let handle = MemoryActor::spawn(
            session_id.clone(),
            self.kv.clone(),
            self.blob.clone(),
            self.summarizer.clone(),
            self.cfg.clone(),
            self.metrics.clone(),
        );
        // Two tasks may race to spawn; the one already in the map wins and
        // the loser's actor stops with its handle.
        match self.actors.entry(session_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                handle.stop();
                existing.get().clone()
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(session = %session_id, "memory actor spawned");
                slot.insert(handle.clone());
                handle
            }
        }
    }

    pub fn live_actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Run one TTL pass over every live actor, retiring archived sessions.
    pub async fn sweep(&self) {
        let handles: Vec<ActorHandle> =
            self.actors.iter().map(|e| e.value().clone()).collect();
        for handle in handles {
            match handle.cleanup().await {
                Ok(true) => {
                    info!(session = %handle.session_id(), "session expired and archived");
                    self.retire(handle.session_id());
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(session = %handle.session_id(), error = %e, "cleanup failed");
                }
            }
        }
        self.metrics
            .set_gauge("memory_actors_live", &[], self.actors.len() as f64);
    }

    /// Stop and drop a session's actor (after archive or end).
    pub fn retire(&self, session_id: &SessionId) {
        if let Some((_, handle)) = self.actors.remove(session_id.as_str()) {
            handle.stop();
        }
    }

    /// TTL sweeper loop; ticks every `interval_secs` until shutdown.
    pub async fn run_sweeper(
        self: Arc<Self>,
        interval_secs: u64,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("session TTL sweeper started");
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("session TTL sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }
}

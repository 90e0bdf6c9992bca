use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, warn};

use haven_core::config::MemoryConfig;
use haven_core::types::{SessionId, SessionStatus};
use haven_monitor::MetricsRegistry;
use haven_storage::{BlobStore, KvStore};

use crate::summarize::SummaryEngine;
use crate::topics;
use crate::types::{
    ArchivePointer, ArchivedSession, ContextSnapshot, ConversationMemory, SessionRecord,
    StoredMessage, CONTEXT_WINDOW,
};
use crate::{MemoryError, Result};

/// What `end` returns: the closing summary and the session's lifetime.
#[derive(Debug, Clone)]
pub struct SessionClose {
    pub summary: String,
    pub duration_ms: i64,
}

pub(crate) enum Command {
    Init {
        user_id: Option<String>,
        metadata: HashMap<String, String>,
        resp: oneshot::Sender<Result<SessionRecord>>,
    },
    Append {
        message: StoredMessage,
        resp: oneshot::Sender<Result<()>>,
    },
    Context {
        resp: oneshot::Sender<Result<ContextSnapshot>>,
    },
    Messages {
        limit: usize,
        offset: usize,
        resp: oneshot::Sender<Result<Vec<StoredMessage>>>,
    },
    Summarize {
        resp: oneshot::Sender<Result<String>>,
    },
    /// Internal: a background summarization landed (or failed with `None`).
    SummaryDone { epoch: u64, summary: Option<String> },
    Archive {
        resp: oneshot::Sender<Result<()>>,
    },
    Restore {
        resp: oneshot::Sender<Result<SessionRecord>>,
    },
    Cleanup {
        resp: oneshot::Sender<Result<bool>>,
    },
    End {
        resp: oneshot::Sender<Result<SessionClose>>,
    },
    ResolveIssue {
        issue: String,
        resp: oneshot::Sender<Result<()>>,
    },
    Status {
        resp: oneshot::Sender<Result<SessionRecord>>,
    },
    Stop,
}

/// Bounded drop-oldest mailbox.
///
/// The actor never blocks producers: when the queue is full the oldest
/// queued command is dropped (its caller resolves with `MailboxClosed`) and
/// the new one is admitted.
pub(crate) struct Mailbox {
    queue: Mutex<VecDeque<Command>>,
    notify: Notify,
    capacity: usize,
}

impl Mailbox {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn push(&self, cmd: Command) -> bool {
        let mut dropped = false;
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.len() >= self.capacity {
                queue.pop_front();
                dropped = true;
            }
            queue.push_back(cmd);
        }
        self.notify.notify_one();
        dropped
    }

    async fn recv(&self) -> Command {
        loop {
            if let Some(cmd) = self.queue.lock().unwrap().pop_front() {
                return cmd;
            }
            self.notify.notified().await;
        }
    }
}

/// Cheap cloneable handle to one session's actor.
#[derive(Clone)]
pub struct ActorHandle {
    session_id: SessionId,
    mailbox: Arc<Mailbox>,
    metrics: Arc<MetricsRegistry>,
}

impl ActorHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        if self.mailbox.push(make(tx)) {
            warn!(session = %self.session_id, "session mailbox overflow, oldest command dropped");
            self.metrics
                .inc_counter("memory_mailbox_dropped_total", &[], 1);
        }
        rx.await.map_err(|_| MemoryError::MailboxClosed)?
    }

    pub async fn init(
        &self,
        user_id: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<SessionRecord> {
        self.call(|resp| Command::Init {
            user_id,
            metadata,
            resp,
        })
        .await
    }

    pub async fn append(&self, message: StoredMessage) -> Result<()> {
        self.call(|resp| Command::Append { message, resp }).await
    }

    pub async fn context(&self) -> Result<ContextSnapshot> {
        self.call(|resp| Command::Context { resp }).await
    }

    /// A page of stored messages, newest-last. `offset` counts back from the
    /// end of the conversation.
    pub async fn messages(&self, limit: usize, offset: usize) -> Result<Vec<StoredMessage>> {
        self.call(|resp| Command::Messages { limit, offset, resp })
            .await
    }

    /// Force a summary regeneration; returns the new summary.
    pub async fn generate_summary(&self) -> Result<String> {
        self.call(|resp| Command::Summarize { resp }).await
    }

    pub async fn archive(&self) -> Result<()> {
        self.call(|resp| Command::Archive { resp }).await
    }

    pub async fn restore(&self) -> Result<SessionRecord> {
        self.call(|resp| Command::Restore { resp }).await
    }

    /// Archive-and-clear when the TTL has expired. Returns whether it did.
    pub async fn cleanup(&self) -> Result<bool> {
        self.call(|resp| Command::Cleanup { resp }).await
    }

    pub async fn end(&self) -> Result<SessionClose> {
        self.call(|resp| Command::End { resp }).await
    }

    pub async fn resolve_issue(&self, issue: impl Into<String>) -> Result<()> {
        let issue = issue.into();
        self.call(|resp| Command::ResolveIssue { issue, resp }).await
    }

    pub async fn status(&self) -> Result<SessionRecord> {
        self.call(|resp| Command::Status { resp }).await
    }

    pub(crate) fn stop(&self) {
        self.mailbox.push(Command::Stop);
    }
}

/// Single-writer actor owning one session's memory.
pub struct MemoryActor {
    session_id: SessionId,
    kv: Arc<dyn KvStore>,
    blob: Arc<dyn BlobStore>,
    summarizer: Arc<dyn SummaryEngine>,
    cfg: MemoryConfig,
    metrics: Arc<MetricsRegistry>,
    mailbox: Arc<Mailbox>,
    state: Option<(SessionRecord, ConversationMemory)>,
    summary_inflight: bool,
    summary_pending: bool,
    summary_epoch: u64,
}

impl MemoryActor {
    /// Spawn the actor task and return its handle.
    pub fn spawn(
        session_id: SessionId,
        kv: Arc<dyn KvStore>,
        blob: Arc<dyn BlobStore>,
        summarizer: Arc<dyn SummaryEngine>,
        cfg: MemoryConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> ActorHandle {
        let mailbox = Arc::new(Mailbox::new(cfg.mailbox_capacity));
        let handle = ActorHandle {
            session_id: session_id.clone(),
            mailbox: mailbox.clone(),
            metrics: metrics.clone(),
        };
        let actor = MemoryActor {
            session_id,
            kv,
            blob,
            summarizer,
            cfg,
            metrics,
            mailbox,
            state: None,
            summary_inflight: false,
            summary_pending: false,
            summary_epoch: 0,
        };
        tokio::spawn(actor.run());
        handle
    }

    async fn run(mut self) {
        if let Err(e) = self.load().await {
            warn!(session = %self.session_id, error = %e, "hot state load failed");
        }
        debug!(session = %self.session_id, "memory actor started");

        loop {
            let cmd = self.mailbox.recv().await;
            match cmd {
                Command::Init { user_id, metadata, resp } => {
                    let _ = resp.send(self.init(user_id, metadata).await);
                }
                Command::Append { message, resp } => {
                    let _ = resp.send(self.append(message).await);
                }
                Command::Context { resp } => {
                    let _ = resp.send(self.context());
                }
                Command::Messages { limit, offset, resp } => {
                    let _ = resp.send(self.messages(limit, offset));
                }
                Command::Summarize { resp } => {
                    let _ = resp.send(self.summarize_inline().await);
                }
                Command::SummaryDone { epoch, summary } => {
                    self.on_summary_done(epoch, summary).await;
                }
                Command::Archive { resp } => {
                    let _ = resp.send(self.archive().await);
                }
                Command::Restore { resp } => {
                    let _ = resp.send(self.restore().await);
                }
                Command::Cleanup { resp } => {
                    let _ = resp.send(self.cleanup().await);
                }
                Command::End { resp } => {
                    let _ = resp.send(self.end().await);
                }
                Command::ResolveIssue { issue, resp } => {
                    let _ = resp.send(self.resolve_issue(issue).await);
                }
                Command::Status { resp } => {
                    let _ = resp.send(self.record().map(Clone::clone));
                }
                Command::Stop => break,
            }
        }
        debug!(session = %self.session_id, "memory actor stopped");
    }

    // --- state helpers -----------------------------------------------------

    fn record(&self) -> Result<&SessionRecord> {
        self.state
            .as_ref()
            .map(|(record, _)| record)
            .ok_or_else(|| MemoryError::NotFound {
                id: self.session_id.to_string(),
            })
    }

    async fn load(&mut self) -> Result<()> {
        let session_key = format!("session:{}", self.session_id);
        let Some(raw) = self.kv.get(&session_key).await.map_err(MemoryError::read)? else {
            return Ok(());
        };
        let record: SessionRecord = serde_json::from_str(&raw)
            .map_err(|e| MemoryError::Corrupted(format!("session record: {e}")))?;

        let memory_key = format!("memory:{}", self.session_id);
        let memory = match self.kv.get(&memory_key).await.map_err(MemoryError::read)? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| MemoryError::Corrupted(format!("memory record: {e}")))?,
            None => ConversationMemory::new(self.session_id.clone()),
        };

        self.state = Some((record, memory));
        Ok(())
    }

    async fn persist_session(&self, record: &SessionRecord) -> Result<()> {
        let raw = serde_json::to_string(record).map_err(|e| MemoryError::Internal(e.to_string()))?;
        self.kv
            .put(&format!("session:{}", record.id), &raw)
            .await
            .map_err(MemoryError::write)
    }

    async fn persist_memory(&self, memory: &ConversationMemory) -> Result<()> {
        let raw = serde_json::to_string(memory).map_err(|e| MemoryError::Internal(e.to_string()))?;
        self.kv
            .put(&format!("memory:{}", memory.session_id), &raw)
            .await
            .map_err(MemoryError::write)
    }

    // --- operations --------------------------------------------------------

    async fn init(
        &mut self,
        user_id: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<SessionRecord> {
        if let Some((record, _)) = &self.state {
            return Ok(record.clone());
        }
        let record = SessionRecord::new(self.session_id.clone(), user_id, metadata);
        let memory = ConversationMemory::new(self.session_id.clone());
        self.persist_session(&record).await?;
        self.persist_memory(&memory).await?;
        self.state = Some((record.clone(), memory));
        self.metrics.inc_counter("sessions_created_total", &[], 1);
        Ok(record)
    }

    async fn append(&mut self, message: StoredMessage) -> Result<()> {
        let (record, memory) = self
            .state
            .as_ref()
            .ok_or_else(|| MemoryError::NotFound {
                id: self.session_id.to_string(),
            })?;

        if record.status != SessionStatus::Active {
            return Err(MemoryError::SessionEnded {
                id: self.session_id.to_string(),
            });
        }

        // Re-sent message ids are a successful no-op.
        if memory.has_seen(message.id.as_str()) {
            debug!(session = %self.session_id, id = %message.id, "duplicate append ignored");
            return Ok(());
        }

        // Mutate clones; nothing is observable until both records persist.
        let mut new_record = record.clone();
        let mut new_memory = memory.clone();
        let now = haven_core::types::now_ms();

        new_memory.remember_id(message.id.to_string());
        for topic in topics::extract(&message.content) {
            new_memory.topics.insert(topic);
        }
        new_memory.messages.push(message);
        new_memory.messages_since_summary += 1;
        new_record.last_activity = now;

        let mut trimmed = false;
        if new_memory.messages.len() > self.cfg.max_messages {
            self.trim(&mut new_memory, now);
            trimmed = true;
        }

        self.persist_memory(&new_memory).await?;
        if let Err(e) = self.persist_session(&new_record).await {
            // Roll the memory key back so the stores stay consistent.
            let _ = self.persist_memory(memory).await;
            return Err(e);
        }

        let summary_due =
            trimmed || new_memory.messages_since_summary >= self.cfg.summary_trigger;
        self.state = Some((new_record, new_memory));
        self.metrics.inc_counter("messages_stored_total", &[], 1);

        if summary_due {
            self.schedule_summary();
        }
        Ok(())
    }

    /// Drain the oldest messages down to `max_messages - keep_recent`
    /// retained, absorbing the drained transcript into the pending summary
    /// source. The recent tail is never dropped, even when summarization
    /// later fails.
    fn trim(&self, memory: &mut ConversationMemory, now: i64) {
        let target = self
            .cfg
            .max_messages
            .saturating_sub(self.cfg.keep_recent)
            .max(1);
        let drain_count = memory.messages.len().saturating_sub(target);
        if drain_count == 0 {
            return;
        }

        let drained: Vec<StoredMessage> = memory.messages.drain(..drain_count).collect();
        let transcript: String = drained
            .iter()
            .map(|m| format!("{}: {}", m.role.to_string().to_uppercase(), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        if !memory.pending_summary_source.is_empty() {
            memory.pending_summary_source.push('\n');
        }
        memory.pending_summary_source.push_str(&transcript);
        memory.last_summary_at = Some(now);
        memory.messages_since_summary = 0;

        info!(
            session = %self.session_id,
            dropped = drain_count,
            retained = memory.messages.len(),
            "conversation trimmed"
        );
        self.metrics.inc_counter("memory_trims_total", &[], 1);
    }

    /// Kick a background summarization, coalescing while one is in flight.
    fn schedule_summary(&mut self) {
        if self.summary_inflight {
            self.summary_pending = true;
            return;
        }
        let Some((_, memory)) = &self.state else {
            return;
        };

        self.summary_inflight = true;
        self.summary_epoch += 1;
        let epoch = self.summary_epoch;

        let existing = memory.summary.clone();
        let transcript = self.summary_transcript(memory);
        let summarizer = self.summarizer.clone();
        let mailbox = self.mailbox.clone();
        let session = self.session_id.clone();

        tokio::spawn(async move {
            let summary = match summarizer.summarize(&existing, &transcript).await {
                Ok(s) if !s.is_empty() => Some(s),
                Ok(_) => None,
                Err(e) => {
                    warn!(session = %session, error = %e, "background summarization failed");
                    None
                }
            };
            mailbox.push(Command::SummaryDone { epoch, summary });
        });
    }

    fn summary_transcript(&self, memory: &ConversationMemory) -> String {
        let mut transcript = memory.pending_summary_source.clone();
        let live: String = memory
            .messages
            .iter()
            .map(|m| format!("{}: {}", m.role.to_string().to_uppercase(), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        if !transcript.is_empty() && !live.is_empty() {
            transcript.push('\n');
        }
        transcript.push_str(&live);
        transcript
    }

    async fn on_summary_done(&mut self, epoch: u64, summary: Option<String>) {
        self.summary_inflight = false;

        // A newer inline summary supersedes this result.
        if epoch == self.summary_epoch {
            if let Some(summary) = summary {
                if let Err(e) = self.apply_summary(summary).await {
                    warn!(session = %self.session_id, error = %e, "summary persist failed");
                }
            }
        }

        if self.summary_pending {
            self.summary_pending = false;
            self.schedule_summary();
        }
    }

    async fn apply_summary(&mut self, summary: String) -> Result<()> {
        let Some((_, memory)) = &self.state else {
            return Ok(());
        };
        let mut new_memory = memory.clone();
        new_memory.summary = summary;
        new_memory.last_summary_at = Some(haven_core::types::now_ms());
        new_memory.pending_summary_source.clear();
        new_memory.messages_since_summary = 0;

        self.persist_memory(&new_memory).await?;
        if let Some((record, _)) = self.state.take() {
            self.state = Some((record, new_memory));
        }
        self.metrics.inc_counter("summaries_generated_total", &[], 1);
        Ok(())
    }

    /// Synchronous regeneration — the caller waits for the new summary.
    async fn summarize_inline(&mut self) -> Result<String> {
        let (_, memory) = self
            .state
            .as_ref()
            .ok_or_else(|| MemoryError::NotFound {
                id: self.session_id.to_string(),
            })?;

        let transcript = self.summary_transcript(memory);
        let existing = memory.summary.clone();
        let summary = self
            .summarizer
            .summarize(&existing, &transcript)
            .await
            .map_err(MemoryError::Internal)?;

        // Invalidate any in-flight background result.
        self.summary_epoch += 1;
        self.apply_summary(summary.clone()).await?;
        Ok(summary)
    }

    async fn archive(&mut self) -> Result<()> {
        let (record, memory) = self
            .state
            .as_ref()
            .ok_or_else(|| MemoryError::NotFound {
                id: self.session_id.to_string(),
            })?;

        if record.status == SessionStatus::Archived {
            return Ok(());
        }

        // Fold whatever is pending into the summary first; archive proceeds
        // even when the model is down.
        if !memory.messages.is_empty() || !memory.pending_summary_source.is_empty() {
            if let Err(e) = self.summarize_inline().await {
                warn!(session = %self.session_id, error = %e, "pre-archive summary failed");
            }
        }
        let (record, memory) = self
            .state
            .as_ref()
            .ok_or_else(|| MemoryError::NotFound {
                id: self.session_id.to_string(),
            })?;

        let doc = ArchivedSession {
            session: record.clone(),
            memory: memory.clone(),
        };
        let raw =
            serde_json::to_vec(&doc).map_err(|e| MemoryError::Internal(e.to_string()))?;
        let blob_path = format!(
            "archive/{}/{}.json",
            self.session_id,
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ")
        );

        self.blob
            .put(&blob_path, &raw)
            .await
            .map_err(MemoryError::write)?;

        let pointer = ArchivePointer {
            session_id: self.session_id.clone(),
            blob_path: blob_path.clone(),
            archived_at: haven_core::types::now_ms(),
        };
        let pointer_raw =
            serde_json::to_string(&pointer).map_err(|e| MemoryError::Internal(e.to_string()))?;
        if let Err(e) = self
            .kv
            .put(&format!("archive_pointer:{}", self.session_id), &pointer_raw)
            .await
        {
            // Compensate: remove the orphaned blob, best-effort.
            warn!(session = %self.session_id, error = %e, "pointer write failed, deleting blob");
            if let Err(del) = self.blob.delete(&blob_path).await {
                warn!(session = %self.session_id, error = %del, "blob compensation failed");
            }
            return Err(MemoryError::write(e));
        }

        let mut new_record = record.clone();
        new_record.status = SessionStatus::Archived;
        self.persist_session(&new_record).await?;
        self.kv
            .delete(&format!("memory:{}", self.session_id))
            .await
            .map_err(MemoryError::write)?;

        self.state = Some((new_record, ConversationMemory::new(self.session_id.clone())));
        info!(session = %self.session_id, path = %blob_path, "session archived");
        self.metrics.inc_counter("sessions_archived_total", &[], 1);
        Ok(())
    }

    async fn restore(&mut self) -> Result<SessionRecord> {
        let pointer_key = format!("archive_pointer:{}", self.session_id);
        let raw = self
            .kv
            .get(&pointer_key)
            .await
            .map_err(MemoryError::read)?
            .ok_or_else(|| MemoryError::NotFound {
                id: self.session_id.to_string(),
            })?;
        let pointer: ArchivePointer = serde_json::from_str(&raw)
            .map_err(|e| MemoryError::Corrupted(format!("archive pointer: {e}")))?;

        // A pointer without its blob is corruption, never an empty session.
        let blob = self
            .blob
            .get(&pointer.blob_path)
            .await
            .map_err(MemoryError::read)?
            .ok_or_else(|| {
                MemoryError::Corrupted(format!("archive blob missing: {}", pointer.blob_path))
            })?;
        let doc: ArchivedSession = serde_json::from_slice(&blob)
            .map_err(|e| MemoryError::Corrupted(format!("archive blob: {e}")))?;

        let mut record = doc.session;
        record.status = SessionStatus::Active;
        record.last_activity = haven_core::types::now_ms();

        self.persist_session(&record).await?;
        self.persist_memory(&doc.memory).await?;
        self.state = Some((record.clone(), doc.memory));

        info!(session = %self.session_id, "session restored from archive");
        self.metrics.inc_counter("sessions_restored_total", &[], 1);
        Ok(record)
    }

    async fn cleanup(&mut self) -> Result<bool> {
        let Some((record, _)) = &self.state else {
            return Ok(false);
        };
        if record.status == SessionStatus::Archived {
            return Ok(false);
        }
        let ttl_ms = (self.cfg.session_ttl_hours as i64) * 3_600_000;
        let idle_ms = haven_core::types::now_ms() - record.last_activity;
        if idle_ms < ttl_ms {
            return Ok(false);
        }
        info!(session = %self.session_id, idle_ms, "TTL expired, archiving");
        self.archive().await?;
        Ok(true)
    }

    async fn end(&mut self) -> Result<SessionClose> {
        let (record, memory) = self
            .state
            .as_ref()
            .ok_or_else(|| MemoryError::NotFound {
                id: self.session_id.to_string(),
            })?;

        let close = SessionClose {
            summary: memory.summary.clone(),
            duration_ms: haven_core::types::now_ms() - record.created_at,
        };

        // Ending twice is fine and returns the same shape.
        if record.status == SessionStatus::Ended {
            return Ok(close);
        }

        let mut new_record = record.clone();
        new_record.status = SessionStatus::Ended;
        new_record.last_activity = haven_core::types::now_ms();
        self.persist_session(&new_record).await?;
        if let Some((_, memory)) = self.state.take() {
            self.state = Some((new_record, memory));
        }
        Ok(close)
    }

    async fn resolve_issue(&mut self, issue: String) -> Result<()> {
        let (_, memory) = self
            .state
            .as_ref()
            .ok_or_else(|| MemoryError::NotFound {
                id: self.session_id.to_string(),
            })?;
        let mut new_memory = memory.clone();
        new_memory.resolved_issues.insert(issue);
        self.persist_memory(&new_memory).await?;
        if let Some((record, _)) = self.state.take() {
            self.state = Some((record, new_memory));
        }
        Ok(())
    }

    fn messages(&self, limit: usize, offset: usize) -> Result<Vec<StoredMessage>> {
        let (_, memory) = self
            .state
            .as_ref()
            .ok_or_else(|| MemoryError::NotFound {
                id: self.session_id.to_string(),
            })?;
        let total = memory.messages.len();
        let end = total.saturating_sub(offset);
        let start = end.saturating_sub(limit);
        Ok(memory.messages[start..end].to_vec())
    }

    fn context(&self) -> Result<ContextSnapshot> {
        let (_, memory) = self
            .state
            .as_ref()
            .ok_or_else(|| MemoryError::NotFound {
                id: self.session_id.to_string(),
            })?;

        let start = memory.messages.len().saturating_sub(CONTEXT_WINDOW);
        Ok(ContextSnapshot {
            session_id: self.session_id.clone(),
            summary: memory.summary.clone(),
            recent_messages: memory.messages[start..].to_vec(),
            topics: memory.topics.clone(),
            resolved_issues: memory.resolved_issues.clone(),
        })
    }
}

//! Best-effort audit trail recorder.
//!
//! Entries are queued on a bounded channel and written by a background task
//! after the primary mutation has committed. Nothing here ever fails the
//! caller: a full queue drops the entry, and a write that keeps failing is
//! logged and dropped once its retries are used up.

use std::sync::Arc;
use std::time::Duration;

use gatehouse_audit::{AuditEntry, AuditLog};
use tokio::sync::{mpsc, oneshot};

const RETRY_BACKOFF: Duration = Duration::from_millis(25);

enum Command {
    Record(AuditEntry),
    Flush(oneshot::Sender<()>),
}

/// Handle to the background audit writer. Cheap to clone.
#[derive(Clone)]
pub struct AuditRecorder {
    tx: mpsc::Sender<Command>,
}

impl AuditRecorder {
    /// Spawn the writer task on the current tokio runtime.
    pub fn spawn(log: Arc<dyn AuditLog>, capacity: usize, max_retries: u32) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(drain(rx, log, max_retries));
        Self { tx }
    }

    /// Queue an entry. Never blocks and never fails.
    pub fn record(&self, entry: AuditEntry) {
        match self.tx.try_send(Command::Record(entry)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(Command::Record(entry))) => {
                tracing::warn!(
                    action = %entry.action,
                    entity_type = %entry.entity_type,
                    entity_id = %entry.entity_id,
                    "audit queue full, dropping entry"
                );
            }
            Err(_) => {
                tracing::warn!("audit writer stopped, dropping entry");
            }
        }
    }

    /// Wait until every entry queued before this call has been written or dropped.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

async fn drain(mut rx: mpsc::Receiver<Command>, log: Arc<dyn AuditLog>, max_retries: u32) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Record(entry) => write_with_retry(log.as_ref(), entry, max_retries).await,
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("audit writer shut down");
}

async fn write_with_retry(log: &dyn AuditLog, entry: AuditEntry, max_retries: u32) {
    let mut attempt = 0u32;
    loop {
        match log.record(entry.clone()).await {
            Ok(()) => return,
            Err(e) if attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    error = %e,
                    attempt,
                    entry_id = %entry.id,
                    "failed to record audit entry, retrying"
                );
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    entry_id = %entry.id,
                    action = %entry.action,
                    entity_type = %entry.entity_type,
                    entity_id = %entry.entity_id,
                    "dropping audit entry after exhausting retries"
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_audit::{AuditAction, AuditLogError, AuditLogFilter, AuditLogId};
    use gatehouse_storage::{UserId, WorkspaceId};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` writes, then stores entries in memory.
    struct FlakyLog {
        failures: u32,
        calls: AtomicU32,
        entries: Mutex<Vec<AuditEntry>>,
    }

    impl FlakyLog {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
                entries: Mutex::new(Vec::new()),
            })
        }

        fn stored(&self) -> usize {
            self.entries.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl AuditLog for FlakyLog {
        async fn record(&self, entry: AuditEntry) -> Result<(), AuditLogError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(AuditLogError::Database("disk full".into()));
            }
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }

        async fn query(&self, _filter: AuditLogFilter) -> Result<Vec<AuditEntry>, AuditLogError> {
            Ok(self.entries.lock().unwrap().clone())
        }

        async fn get(&self, id: AuditLogId) -> Result<AuditEntry, AuditLogError> {
            Err(AuditLogError::NotFound(id))
        }

        async fn count(&self, _filter: AuditLogFilter) -> Result<u64, AuditLogError> {
            Ok(self.stored() as u64)
        }
    }

    fn entry() -> AuditEntry {
        AuditEntry::builder(&WorkspaceId::new(), &UserId::new(), AuditAction::Update)
            .entity("workspace_membership", "m1")
            .build()
    }

    #[tokio::test]
    async fn test_flush_waits_for_queued_entries() {
        let log = FlakyLog::new(0);
        let recorder = AuditRecorder::spawn(log.clone(), 16, 0);
        for _ in 0..5 {
            recorder.record(entry());
        }
        recorder.flush().await;
        assert_eq!(log.stored(), 5);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let log = FlakyLog::new(2);
        let recorder = AuditRecorder::spawn(log.clone(), 16, 3);
        recorder.record(entry());
        recorder.flush().await;
        assert_eq!(log.stored(), 1);
        assert_eq!(log.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_entry_dropped_after_retries_exhausted() {
        let log = FlakyLog::new(u32::MAX);
        let recorder = AuditRecorder::spawn(log.clone(), 16, 1);
        recorder.record(entry());
        recorder.record(entry());
        recorder.flush().await;
        assert_eq!(log.stored(), 0);
        // one initial attempt plus one retry per entry
        assert_eq!(log.calls.load(Ordering::SeqCst), 4);
    }
}

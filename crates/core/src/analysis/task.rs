use crate::document::{Document, Language};
use crate::findings::RaisedFinding;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of a document at the moment a task is created. The scheduler
/// always snapshots from the open-document registry, so the text and version
/// are the latest the editor has sent.
#[derive(Debug, Clone)]
pub struct TargetDocument {
    pub uri: Url,
    pub version: i32,
    pub language: Language,
    pub text: Arc<str>,
}

impl TargetDocument {
    pub fn snapshot(document: &Document) -> Self {
        Self {
            uri: document.uri.clone(),
            version: document.version,
            language: document.language,
            text: Arc::from(document.text.as_str()),
        }
    }
}

/// One scheduled unit of "analyze this document set" work.
///
/// Immutable after creation except for the cancellation flag (one-way,
/// cooperative) and the completion resolution, which happens exactly once on
/// the Finished transition, whether the task ran, failed, or was cancelled
/// before it started.
pub struct AnalysisTask {
    id: TaskId,
    documents: Vec<TargetDocument>,
    fetch_server_findings: bool,
    cancel: CancellationToken,
    finished_tx: watch::Sender<bool>,
    finished_rx: watch::Receiver<bool>,
    listener: Arc<dyn Fn(RaisedFinding) + Send + Sync>,
}

impl AnalysisTask {
    pub fn new(
        documents: Vec<TargetDocument>,
        fetch_server_findings: bool,
        listener: Arc<dyn Fn(RaisedFinding) + Send + Sync>,
    ) -> Arc<Self> {
        // Unique by URI, keeping the highest version when the caller passed
        // duplicates.
        let mut by_uri: HashMap<Url, TargetDocument> = HashMap::new();
        for doc in documents {
            match by_uri.get(&doc.uri) {
                Some(existing) if existing.version >= doc.version => {}
                _ => {
                    by_uri.insert(doc.uri.clone(), doc);
                }
            }
        }

        let (finished_tx, finished_rx) = watch::channel(false);
        Arc::new(Self {
            id: TaskId::next(),
            documents: by_uri.into_values().collect(),
            fetch_server_findings,
            cancel: CancellationToken::new(),
            finished_tx,
            finished_rx,
            listener,
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn documents(&self) -> &[TargetDocument] {
        &self.documents
    }

    pub fn fetch_server_findings(&self) -> bool {
        self.fetch_server_findings
    }

    /// Flags the task for cancellation. Idempotent; a no-op once the task is
    /// finished. Does not stop an in-flight backend call by itself; the
    /// executor and backend observe the flag at their checkpoints.
    pub fn cancel(&self) {
        if self.is_finished() {
            return;
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the task is cancelled; a cooperative checkpoint.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_finished(&self) -> bool {
        *self.finished_rx.borrow()
    }

    /// Resolves the completion handle. Internal to the executor/scheduler;
    /// later calls have no effect.
    pub(crate) fn mark_finished(&self) {
        self.finished_tx.send_replace(true);
    }

    pub async fn wait_finished(&self) {
        let mut rx = self.finished_rx.clone();
        // The sender lives inside self, so wait_for cannot fail.
        let _ = rx.wait_for(|finished| *finished).await;
    }

    /// Routes one backend finding to this task's listener.
    pub fn raise_finding(&self, finding: RaisedFinding) {
        (self.listener)(finding);
    }
}

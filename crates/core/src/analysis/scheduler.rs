use super::backend::FileExclusionFilter;
use super::executor::AnalysisExecutor;
use super::task::{AnalysisTask, TargetDocument, TaskId};
use crate::config::SchedulerConfig;
use crate::document::{Document, OpenDocuments};
use crate::findings::{FindingCaches, FindingRecorder};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

type OpenDocumentPredicate = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

enum SchedulerEvent {
    Opened {
        uri: Url,
    },
    Changed {
        uri: Url,
        version: i32,
        fetch_server_findings: bool,
    },
    AnalyzeMatching {
        reason: String,
        predicate: OpenDocumentPredicate,
    },
}

/// Turns editor triggers into analysis tasks.
///
/// Decision making is logically single-threaded: one coordination loop owns
/// the debounce window, the batching state and the cancel-previous policy,
/// and hands finished batches to the executor on worker tasks. Scheduling
/// itself never fails; it only decides whether and when to run.
pub struct AnalysisScheduler {
    events: mpsc::UnboundedSender<SchedulerEvent>,
    shutdown: CancellationToken,
}

impl AnalysisScheduler {
    pub fn new(
        executor: Arc<AnalysisExecutor>,
        documents: Arc<OpenDocuments>,
        caches: Arc<FindingCaches>,
        exclusions: Arc<dyn FileExclusionFilter>,
        config: SchedulerConfig,
    ) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let coordinator = Coordinator {
            executor,
            documents,
            caches,
            exclusions,
            config,
        };
        tokio::spawn(coordinator.run(rx, shutdown.clone()));

        Self { events, shutdown }
    }

    /// Opening a file analyzes it immediately, reconciling server-tracked
    /// findings along the way.
    pub fn did_open(&self, uri: Url) {
        let _ = self.events.send(SchedulerEvent::Opened { uri });
    }

    pub fn did_change(&self, uri: Url, version: i32) {
        let _ = self.events.send(SchedulerEvent::Changed {
            uri,
            version,
            fetch_server_findings: false,
        });
    }

    /// Saves share the change path; the server-fetch policy comes from
    /// configuration rather than the core loop.
    pub fn did_save(&self, uri: Url, version: i32, fetch_server_findings: bool) {
        let _ = self.events.send(SchedulerEvent::Changed {
            uri,
            version,
            fetch_server_findings,
        });
    }

    /// Force-schedules analysis of all open documents matching `predicate`,
    /// bypassing the debounce window. Used for workspace-level triggers such
    /// as a classpath change.
    pub fn analyze_open_files_matching<P>(&self, reason: impl Into<String>, predicate: P)
    where
        P: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        let _ = self.events.send(SchedulerEvent::AnalyzeMatching {
            reason: reason.into(),
            predicate: Arc::new(predicate),
        });
    }

    /// Stops intake and flags in-flight tasks. The coordination loop cancels
    /// whatever is still running, drains its workers and exits; no debounce
    /// timer survives.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for AnalysisScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Changes collected while the debounce window is open.
struct PendingBatch {
    versions: HashMap<Url, i32>,
    fetch_server_findings: bool,
}

impl PendingBatch {
    fn new() -> Self {
        Self {
            versions: HashMap::new(),
            fetch_server_findings: false,
        }
    }

    fn merge(&mut self, uri: Url, version: i32, fetch_server_findings: bool) {
        let entry = self.versions.entry(uri).or_insert(version);
        if version > *entry {
            *entry = version;
        }
        self.fetch_server_findings |= fetch_server_findings;
    }
}

struct Coordinator {
    executor: Arc<AnalysisExecutor>,
    documents: Arc<OpenDocuments>,
    caches: Arc<FindingCaches>,
    exclusions: Arc<dyn FileExclusionFilter>,
    config: SchedulerConfig,
}

struct CoordinatorState {
    /// Tasks handed to a worker and not yet joined, by task id.
    inflight: HashMap<TaskId, Arc<AnalysisTask>>,
    /// The change-slot task currently running, if any.
    slot: Option<TaskId>,
    /// Batch being collected while the window is open, or parked while the
    /// slot task is still running. A newer batch always absorbs the parked
    /// one; the superseded batch never becomes a task.
    pending: Option<PendingBatch>,
    deadline: Option<Instant>,
}

impl Coordinator {
    async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<SchedulerEvent>,
        shutdown: CancellationToken,
    ) {
        let mut workers: JoinSet<TaskId> = JoinSet::new();
        let mut state = CoordinatorState {
            inflight: HashMap::new(),
            slot: None,
            pending: None,
            deadline: None,
        };

        loop {
            let deadline = state.deadline;
            tokio::select! {
                _ = shutdown.cancelled() => break,

                event = events.recv() => match event {
                    None => break,
                    Some(event) => self.handle_event(event, &mut state, &mut workers).await,
                },

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    state.deadline = None;
                    // When the slot is busy the batch stays parked; the
                    // join arm below picks it up.
                    if state.slot.is_none()
                        && let Some(batch) = state.pending.take()
                    {
                        state.slot = self.submit_batch(batch, &mut state.inflight, &mut workers).await;
                    }
                }

                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    let Ok(task_id) = joined else { continue };
                    state.inflight.remove(&task_id);
                    if state.slot == Some(task_id) {
                        state.slot = None;
                        if state.deadline.is_none()
                            && let Some(batch) = state.pending.take()
                        {
                            state.slot = self.submit_batch(batch, &mut state.inflight, &mut workers).await;
                        }
                    }
                }
            }
        }

        for task in state.inflight.values() {
            task.cancel();
        }
        while workers.join_next().await.is_some() {}
        tracing::debug!("Analysis scheduler stopped");
    }

    async fn handle_event(
        &self,
        event: SchedulerEvent,
        state: &mut CoordinatorState,
        workers: &mut JoinSet<TaskId>,
    ) {
        match event {
            SchedulerEvent::Opened { uri } => self.handle_open(uri, state, workers).await,
            SchedulerEvent::Changed {
                uri,
                version,
                fetch_server_findings,
            } => self.handle_change(uri, version, fetch_server_findings, state),
            SchedulerEvent::AnalyzeMatching { reason, predicate } => {
                self.handle_analyze_matching(&reason, predicate, state, workers)
                    .await
            }
        }
    }

    async fn handle_open(
        &self,
        uri: Url,
        state: &mut CoordinatorState,
        workers: &mut JoinSet<TaskId>,
    ) {
        if uri.scheme() != "file" {
            tracing::warn!(
                "Not scheduling analysis of \"{}\": not a local filesystem document",
                uri
            );
            return;
        }
        let Some(document) = self.documents.get(&uri) else {
            return;
        };
        tracing::info!(
            "Queuing analysis of file \"{}\" (version {})",
            uri,
            document.version
        );

        let targets = self.filter_and_snapshot(vec![uri]).await;
        if targets.is_empty() {
            return;
        }
        self.spawn_task(targets, true, &mut state.inflight, workers);
    }

    fn handle_change(
        &self,
        uri: Url,
        version: i32,
        fetch_server_findings: bool,
        state: &mut CoordinatorState,
    ) {
        if !self.documents.contains(&uri) {
            tracing::debug!("Ignoring change for closed document \"{}\"", uri);
            return;
        }
        tracing::info!("Queuing analysis of file \"{}\" (version {})", uri, version);

        // The slot task is now computing results for an outdated snapshot.
        if let Some(task_id) = state.slot
            && let Some(task) = state.inflight.get(&task_id)
            && !task.is_finished()
            && !task.is_cancelled()
        {
            tracing::info!("Attempt to cancel previous analysis {}", task_id);
            task.cancel();
        }

        state
            .pending
            .get_or_insert_with(PendingBatch::new)
            .merge(uri, version, fetch_server_findings);
        state.deadline = Some(Instant::now() + self.config.debounce());
    }

    async fn handle_analyze_matching(
        &self,
        reason: &str,
        predicate: OpenDocumentPredicate,
        state: &mut CoordinatorState,
        workers: &mut JoinSet<TaskId>,
    ) {
        let matching = self.documents.matching(|doc| predicate(doc));
        if matching.is_empty() {
            return;
        }
        tracing::info!("Analyzing {} open file(s): {}", matching.len(), reason);

        let uris = matching.iter().map(|doc| doc.uri.clone()).collect();
        let targets = self.filter_and_snapshot(uris).await;
        if targets.is_empty() {
            return;
        }
        self.spawn_task(targets, false, &mut state.inflight, workers);
    }

    async fn submit_batch(
        &self,
        batch: PendingBatch,
        inflight: &mut HashMap<TaskId, Arc<AnalysisTask>>,
        workers: &mut JoinSet<TaskId>,
    ) -> Option<TaskId> {
        let uris: Vec<Url> = batch.versions.into_keys().collect();
        let targets = self.filter_and_snapshot(uris).await;
        if targets.is_empty() {
            return None;
        }
        Some(self.spawn_task(targets, batch.fetch_server_findings, inflight, workers))
    }

    /// Applies the exclusion filter, then snapshots the survivors from the
    /// open-document registry. Snapshotting at submission time is what keeps
    /// a superseded version from ever reaching the backend.
    async fn filter_and_snapshot(&self, uris: Vec<Url>) -> Vec<TargetDocument> {
        let allowed = match self.exclusions.filter(uris.clone()).await {
            Ok(allowed) => allowed,
            Err(e) => {
                // A failing filter excludes nothing.
                tracing::warn!("File exclusion filter failed, analyzing all candidates: {}", e);
                uris
            }
        };

        allowed
            .into_iter()
            .filter_map(|uri| self.documents.get(&uri))
            .map(|doc| TargetDocument::snapshot(&doc))
            .collect()
    }

    fn spawn_task(
        &self,
        targets: Vec<TargetDocument>,
        fetch_server_findings: bool,
        inflight: &mut HashMap<TaskId, Arc<AnalysisTask>>,
        workers: &mut JoinSet<TaskId>,
    ) -> TaskId {
        let recorder = FindingRecorder::new(self.caches.clone());
        let task = AnalysisTask::new(targets, fetch_server_findings, recorder.listener());
        let task_id = task.id();
        inflight.insert(task_id, task.clone());

        let executor = self.executor.clone();
        workers.spawn(async move {
            executor.run(task).await;
            task_id
        });
        task_id
    }
}

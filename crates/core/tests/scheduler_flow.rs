//! End-to-end scheduling scenarios, driven with a scripted backend under a
//! paused clock.

use scanlight_core::analysis::{
    AnalysisBackend, AnalysisExecutor, AnalysisRequest, AnalysisScheduler, AnalysisTaskRegistry,
    CorrelationId, FileExclusionFilter, NoExclusions,
};
use scanlight_core::config::SchedulerConfig;
use scanlight_core::document::{Document, Language, OpenDocuments};
use scanlight_core::error::ScanlightError;
use scanlight_core::findings::{FindingCaches, FindingDetail, Issue, RaisedFinding, Severity};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

const DEBOUNCE_MS: u64 = 500;

struct RecordingBackend {
    requests: Mutex<Vec<AnalysisRequest>>,
    next_id: AtomicU64,
    hang_await: bool,
    /// Findings raised through the registry while an analysis is in flight.
    raise: Mutex<Vec<RaisedFinding>>,
    registry: Mutex<Option<Arc<AnalysisTaskRegistry>>>,
}

impl RecordingBackend {
    fn completing() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            hang_await: false,
            raise: Mutex::new(Vec::new()),
            registry: Mutex::new(None),
        })
    }

    fn hanging() -> Arc<Self> {
        Arc::new(Self {
            hang_await: true,
            ..Self::blank()
        })
    }

    fn blank() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            hang_await: false,
            raise: Mutex::new(Vec::new()),
            registry: Mutex::new(None),
        }
    }

    fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn will_raise(&self, finding: RaisedFinding) {
        self.raise.lock().unwrap().push(finding);
    }
}

#[async_trait::async_trait]
impl AnalysisBackend for RecordingBackend {
    async fn begin_analysis(&self, request: AnalysisRequest) -> scanlight_core::Result<CorrelationId> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        Ok(CorrelationId::new(format!("corr-{n}")))
    }

    async fn await_analysis(&self, id: &CorrelationId) -> scanlight_core::Result<()> {
        let registry = self.registry.lock().unwrap().clone();
        if let Some(registry) = registry {
            for finding in self.raise.lock().unwrap().drain(..) {
                registry.did_raise_finding(id, finding);
            }
        }
        if self.hang_await {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

struct FailingFilter;

#[async_trait::async_trait]
impl FileExclusionFilter for FailingFilter {
    async fn filter(&self, _candidates: Vec<Url>) -> scanlight_core::Result<Vec<Url>> {
        Err(ScanlightError::Filter("settings service unavailable".into()))
    }
}

struct ExcludeEverything;

#[async_trait::async_trait]
impl FileExclusionFilter for ExcludeEverything {
    async fn filter(&self, _candidates: Vec<Url>) -> scanlight_core::Result<Vec<Url>> {
        Ok(Vec::new())
    }
}

struct Harness {
    scheduler: AnalysisScheduler,
    documents: Arc<OpenDocuments>,
    caches: Arc<FindingCaches>,
    registry: Arc<AnalysisTaskRegistry>,
}

fn setup(backend: Arc<RecordingBackend>, exclusions: Arc<dyn FileExclusionFilter>) -> Harness {
    let registry = AnalysisTaskRegistry::new();
    *backend.registry.lock().unwrap() = Some(registry.clone());

    let executor = AnalysisExecutor::new(backend, registry.clone());
    let documents = Arc::new(OpenDocuments::new());
    let caches = FindingCaches::new();
    let scheduler = AnalysisScheduler::new(
        executor,
        documents.clone(),
        caches.clone(),
        exclusions,
        SchedulerConfig {
            debounce_ms: DEBOUNCE_MS,
            fetch_server_findings_on_save: false,
        },
    );

    Harness {
        scheduler,
        documents,
        caches,
        registry,
    }
}

fn uri(s: &str) -> Url {
    Url::parse(s).unwrap()
}

/// Let the coordination loop and any spawned workers catch up.
async fn settle() {
    for _ in 0..25 {
        tokio::task::yield_now().await;
    }
}

async fn close_debounce_window() {
    // Drain any queued events so the coordinator has set its debounce deadline
    // before we advance the paused clock past it.
    settle().await;
    tokio::time::advance(Duration::from_millis(DEBOUNCE_MS + 10)).await;
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn opening_a_file_analyzes_it_immediately() {
    let backend = RecordingBackend::completing();
    let h = setup(backend.clone(), Arc::new(NoExclusions));
    let foo = uri("file:///work/foo.js");

    h.documents.open(Document::new(foo.clone(), "let x;".into(), 1));
    h.scheduler.did_open(foo.clone());
    settle().await;

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].fetch_server_findings);
    assert_eq!(requests[0].documents.len(), 1);
    assert_eq!(requests[0].documents[0].uri, foo);
    assert_eq!(requests[0].documents[0].version, 1);
}

#[tokio::test(start_paused = true)]
async fn non_filesystem_documents_are_rejected() {
    let backend = RecordingBackend::completing();
    let h = setup(backend.clone(), Arc::new(NoExclusions));
    let untitled = uri("untitled:Untitled-1");

    h.documents
        .open(Document::new(untitled.clone(), String::new(), 1));
    h.scheduler.did_open(untitled);
    settle().await;

    assert!(backend.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rapid_edits_coalesce_into_one_task_at_latest_version() {
    let backend = RecordingBackend::completing();
    let h = setup(backend.clone(), Arc::new(NoExclusions));
    let foo = uri("file:///work/foo.js");
    h.documents.open(Document::new(foo.clone(), "v1".into(), 1));

    h.documents.update(&foo, "v2".into(), 2);
    h.scheduler.did_change(foo.clone(), 2);
    settle().await;
    h.documents.update(&foo, "v3".into(), 3);
    h.scheduler.did_change(foo.clone(), 3);

    // Nothing runs while the window is open.
    settle().await;
    assert!(backend.requests().is_empty());

    close_debounce_window().await;

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].fetch_server_findings);
    assert_eq!(requests[0].documents.len(), 1);
    assert_eq!(requests[0].documents[0].version, 3);
    assert_eq!(&*requests[0].documents[0].text, "v3");
}

#[tokio::test(start_paused = true)]
async fn changes_to_different_files_batch_into_one_task() {
    let backend = RecordingBackend::completing();
    let h = setup(backend.clone(), Arc::new(NoExclusions));
    let a = uri("file:///work/a.py");
    let b = uri("file:///work/b.py");
    h.documents.open(Document::new(a.clone(), "a0".into(), 1));
    h.documents.open(Document::new(b.clone(), "b0".into(), 1));

    h.documents.update(&a, "a1".into(), 2);
    h.scheduler.did_change(a.clone(), 2);
    h.documents.update(&b, "b1".into(), 2);
    h.scheduler.did_change(b.clone(), 2);

    close_debounce_window().await;

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    let uris: HashSet<_> = requests[0]
        .documents
        .iter()
        .map(|d| d.uri.clone())
        .collect();
    assert_eq!(uris, HashSet::from([a, b]));
}

#[tokio::test(start_paused = true)]
async fn change_during_running_analysis_cancels_it_and_resubmits() {
    let backend = RecordingBackend::hanging();
    let h = setup(backend.clone(), Arc::new(NoExclusions));
    let foo = uri("file:///work/foo.js");
    h.documents.open(Document::new(foo.clone(), "v1".into(), 1));

    h.documents.update(&foo, "v2".into(), 2);
    h.scheduler.did_change(foo.clone(), 2);
    close_debounce_window().await;
    assert_eq!(backend.requests().len(), 1);

    // The first task is blocked in the backend; grab it before the edit.
    let first = h
        .registry
        .get_analysis_task(&CorrelationId::new("corr-1"))
        .expect("first task should be registered");
    assert!(!first.is_cancelled());

    h.documents.update(&foo, "v3".into(), 3);
    h.scheduler.did_change(foo.clone(), 3);
    settle().await;
    assert!(first.is_cancelled());

    close_debounce_window().await;
    first.wait_finished().await;
    settle().await;

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].documents[0].version, 3);
}

#[tokio::test(start_paused = true)]
async fn forced_batch_analyzes_only_matching_open_files() {
    let backend = RecordingBackend::completing();
    let h = setup(backend.clone(), Arc::new(NoExclusions));
    let x = uri("file:///work/X.java");
    let y = uri("file:///work/Y.java");
    let z = uri("file:///work/Z.js");
    for u in [&x, &y, &z] {
        h.documents.open(Document::new(u.clone(), String::new(), 1));
    }

    h.scheduler
        .analyze_open_files_matching("classpath changed", |doc| doc.language == Language::Java);
    settle().await;

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].fetch_server_findings);
    let uris: HashSet<_> = requests[0]
        .documents
        .iter()
        .map(|d| d.uri.clone())
        .collect();
    assert_eq!(uris, HashSet::from([x, y]));
}

#[tokio::test(start_paused = true)]
async fn fully_excluded_batch_submits_no_task() {
    let backend = RecordingBackend::completing();
    let h = setup(backend.clone(), Arc::new(ExcludeEverything));
    let foo = uri("file:///work/foo.js");
    h.documents.open(Document::new(foo.clone(), "v1".into(), 1));

    h.scheduler.did_open(foo.clone());
    h.documents.update(&foo, "v2".into(), 2);
    h.scheduler.did_change(foo, 2);
    close_debounce_window().await;

    assert!(backend.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failing_exclusion_filter_excludes_nothing() {
    let backend = RecordingBackend::completing();
    let h = setup(backend.clone(), Arc::new(FailingFilter));
    let foo = uri("file:///work/foo.js");
    h.documents.open(Document::new(foo.clone(), "v1".into(), 1));

    h.documents.update(&foo, "v2".into(), 2);
    h.scheduler.did_change(foo, 2);
    close_debounce_window().await;

    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn save_can_force_a_server_finding_fetch() {
    let backend = RecordingBackend::completing();
    let h = setup(backend.clone(), Arc::new(NoExclusions));
    let foo = uri("file:///work/foo.js");
    h.documents.open(Document::new(foo.clone(), "v1".into(), 1));

    h.scheduler.did_save(foo.clone(), 1, true);
    close_debounce_window().await;

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].fetch_server_findings);
}

#[tokio::test(start_paused = true)]
async fn streamed_findings_land_in_the_caches() {
    let backend = RecordingBackend::completing();
    let foo = uri("file:///work/foo.js");
    backend.will_raise(RaisedFinding {
        uri: foo.clone(),
        detail: FindingDetail::Issue(Issue::new(
            None,
            "javascript:S1854",
            "Remove this dead store",
            Severity::Major,
            None,
        )),
    });

    let h = setup(backend.clone(), Arc::new(NoExclusions));
    h.documents.open(Document::new(foo.clone(), "let x;".into(), 1));
    h.scheduler.did_open(foo.clone());
    settle().await;

    let issues = h.caches.issues.issues_for(&foo);
    assert_eq!(issues.len(), 1);
    assert!(issues.values().any(|i| i.rule_key == "javascript:S1854"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_inflight_work_and_stops_intake() {
    let backend = RecordingBackend::hanging();
    let h = setup(backend.clone(), Arc::new(NoExclusions));
    let foo = uri("file:///work/foo.js");
    h.documents.open(Document::new(foo.clone(), "v1".into(), 1));

    h.documents.update(&foo, "v2".into(), 2);
    h.scheduler.did_change(foo.clone(), 2);
    close_debounce_window().await;

    let task = h
        .registry
        .get_analysis_task(&CorrelationId::new("corr-1"))
        .expect("task should be running");

    h.scheduler.shutdown();
    tokio::time::timeout(Duration::from_secs(5), task.wait_finished())
        .await
        .expect("in-flight task should finish on shutdown");

    // Triggers after shutdown are dropped on the floor.
    h.documents.update(&foo, "v3".into(), 3);
    h.scheduler.did_change(foo, 3);
    close_debounce_window().await;
    assert_eq!(backend.requests().len(), 1);
}

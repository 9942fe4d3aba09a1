use super::backend::{AnalysisBackend, AnalysisRequest};
use super::registry::AnalysisTaskRegistry;
use super::task::AnalysisTask;
use std::sync::Arc;

/// Runs one analysis task to its terminal state.
///
/// Whether the task was cancelled before it started, the backend failed, or
/// everything completed, the task is Finished when `run` returns. Failures
/// never escape to the caller.
pub struct AnalysisExecutor {
    backend: Arc<dyn AnalysisBackend>,
    registry: Arc<AnalysisTaskRegistry>,
}

impl AnalysisExecutor {
    pub fn new(backend: Arc<dyn AnalysisBackend>, registry: Arc<AnalysisTaskRegistry>) -> Arc<Self> {
        Arc::new(Self { backend, registry })
    }

    pub fn registry(&self) -> &Arc<AnalysisTaskRegistry> {
        &self.registry
    }

    pub async fn run(&self, task: Arc<AnalysisTask>) {
        if task.is_cancelled() {
            tracing::info!("Analysis canceled");
            task.mark_finished();
            return;
        }

        let request = AnalysisRequest {
            documents: task.documents().to_vec(),
            fetch_server_findings: task.fetch_server_findings(),
        };

        let correlation_id = tokio::select! {
            _ = task.cancelled() => {
                tracing::info!("Analysis canceled");
                task.mark_finished();
                return;
            }
            accepted = self.backend.begin_analysis(request) => match accepted {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!("Analysis failed: {}", e);
                    task.mark_finished();
                    return;
                }
            }
        };

        // Findings for this id may arrive as soon as the engine starts
        // working; the registration must already be in place.
        self.registry.analyze(correlation_id.clone(), task.clone());
        tracing::debug!("Analysis task {} running as {}", task.id(), correlation_id);

        tokio::select! {
            _ = task.cancelled() => {
                tracing::info!("Analysis canceled");
            }
            finished = self.backend.await_analysis(&correlation_id) => {
                if let Err(e) = finished {
                    tracing::error!("Analysis failed: {}", e);
                }
            }
        }

        self.registry.did_finish_analysis(&correlation_id);
        task.mark_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::backend::CorrelationId;
    use crate::analysis::task::TargetDocument;
    use crate::document::Document;
    use crate::error::ScanlightError;
    use crate::findings::RaisedFinding;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    struct ScriptedBackend {
        begin_calls: AtomicUsize,
        fail_begin: bool,
        fail_await: bool,
        hang_await: bool,
        requests: Mutex<Vec<AnalysisRequest>>,
    }

    impl ScriptedBackend {
        fn completing() -> Arc<Self> {
            Arc::new(Self {
                begin_calls: AtomicUsize::new(0),
                fail_begin: false,
                fail_await: false,
                hang_await: false,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn failing_begin() -> Arc<Self> {
            Arc::new(Self {
                fail_begin: true,
                ..Self::blank()
            })
        }

        fn failing_await() -> Arc<Self> {
            Arc::new(Self {
                fail_await: true,
                ..Self::blank()
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
                begin_calls: AtomicUsize::new(0),
                fail_begin: false,
                fail_await: false,
                hang_await: false,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl AnalysisBackend for ScriptedBackend {
        async fn begin_analysis(&self, request: AnalysisRequest) -> crate::Result<CorrelationId> {
            self.begin_calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            if self.fail_begin {
                return Err(ScanlightError::Backend("connection reset".into()));
            }
            Ok(CorrelationId::new("corr-1"))
        }

        async fn await_analysis(&self, _id: &CorrelationId) -> crate::Result<()> {
            if self.hang_await {
                std::future::pending::<()>().await;
            }
            if self.fail_await {
                return Err(ScanlightError::Backend("malformed response".into()));
            }
            Ok(())
        }
    }

    fn noop_listener() -> Arc<dyn Fn(RaisedFinding) + Send + Sync> {
        Arc::new(|_| {})
    }

    fn task() -> Arc<AnalysisTask> {
        let doc = Document::new(Url::parse("file:///a.py").unwrap(), "x = 1".into(), 1);
        AnalysisTask::new(vec![TargetDocument::snapshot(&doc)], false, noop_listener())
    }

    #[tokio::test]
    async fn finishes_on_normal_completion() {
        let backend = ScriptedBackend::completing();
        let executor = AnalysisExecutor::new(backend.clone(), AnalysisTaskRegistry::new());
        let t = task();

        executor.run(t.clone()).await;

        assert!(t.is_finished());
        assert_eq!(backend.begin_calls.load(Ordering::SeqCst), 1);
        // The correlation entry is gone once the analysis finished.
        assert!(
            executor
                .registry()
                .get_analysis_task(&CorrelationId::new("corr-1"))
                .is_none()
        );
    }

    #[tokio::test]
    async fn cancelled_before_run_never_contacts_the_backend() {
        let backend = ScriptedBackend::completing();
        let executor = AnalysisExecutor::new(backend.clone(), AnalysisTaskRegistry::new());
        let t = task();
        t.cancel();

        executor.run(t.clone()).await;

        assert!(t.is_finished());
        assert_eq!(backend.begin_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn finishes_when_begin_fails() {
        let executor = AnalysisExecutor::new(ScriptedBackend::failing_begin(), AnalysisTaskRegistry::new());
        let t = task();
        executor.run(t.clone()).await;
        assert!(t.is_finished());
    }

    #[tokio::test]
    async fn finishes_when_await_fails() {
        let executor = AnalysisExecutor::new(ScriptedBackend::failing_await(), AnalysisTaskRegistry::new());
        let t = task();
        executor.run(t.clone()).await;
        assert!(t.is_finished());
    }

    #[tokio::test]
    async fn cancellation_mid_flight_unblocks_and_deregisters() {
        let backend = ScriptedBackend::hanging();
        let executor = AnalysisExecutor::new(backend, AnalysisTaskRegistry::new());
        let t = task();

        let running = {
            let executor = executor.clone();
            let t = t.clone();
            tokio::spawn(async move { executor.run(t).await })
        };

        // Let the run reach the backend await, then flag it.
        tokio::task::yield_now().await;
        t.cancel();
        running.await.unwrap();

        assert!(t.is_finished());
        assert!(
            executor
                .registry()
                .get_analysis_task(&CorrelationId::new("corr-1"))
                .is_none()
        );
    }
}

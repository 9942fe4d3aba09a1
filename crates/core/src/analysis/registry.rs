use super::backend::CorrelationId;
use super::task::AnalysisTask;
use crate::findings::RaisedFinding;
use dashmap::DashMap;
use std::sync::Arc;

/// Correlates backend-assigned analysis ids with the running tasks, so the
/// "finding raised" notifications, which only carry the id, reach the
/// right task's listener.
///
/// Safe under concurrent calls from the backend notification channel and the
/// executor.
pub struct AnalysisTaskRegistry {
    running: DashMap<CorrelationId, Arc<AnalysisTask>>,
}

impl AnalysisTaskRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            running: DashMap::new(),
        })
    }

    /// Registers `task` as the recipient of findings raised under `id`.
    pub fn analyze(&self, id: CorrelationId, task: Arc<AnalysisTask>) {
        self.running.insert(id, task);
    }

    /// Routes one finding to its task. Findings for an unknown or already
    /// finished id are dropped without error; the analysis may have been
    /// cancelled or completed in the meantime.
    pub fn did_raise_finding(&self, id: &CorrelationId, finding: RaisedFinding) {
        let task = self.running.get(id).map(|entry| entry.value().clone());
        if let Some(task) = task {
            task.raise_finding(finding);
        }
    }

    pub fn did_finish_analysis(&self, id: &CorrelationId) {
        self.running.remove(id);
    }

    pub fn get_analysis_task(&self, id: &CorrelationId) -> Option<Arc<AnalysisTask>> {
        self.running.get(id).map(|entry| entry.value().clone())
    }
}

//! Collaborator boundary: the out-of-process analysis engine and the
//! workspace file-exclusion filter. The core only ever talks to these
//! traits; wire transport and rule evaluation live elsewhere.

use super::task::TargetDocument;
use crate::Result;
use async_trait::async_trait;
use url::Url;

/// Opaque handle the backend assigns to an in-flight analysis, used to route
/// asynchronous results back to the originating task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub documents: Vec<TargetDocument>,
    pub fetch_server_findings: bool,
}

#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Submits an analysis request. Resolves once the engine has accepted
    /// the request and assigned it a correlation id, strictly before it
    /// raises any finding for that id. The caller relies on this to
    /// register the id with the tasks registry ahead of the first
    /// notification.
    async fn begin_analysis(&self, request: AnalysisRequest) -> Result<CorrelationId>;

    /// Resolves when the engine signals that the analysis identified by `id`
    /// reached its terminal state. The engine observes cooperative
    /// cancellation by polling the task it can look up through the registry.
    async fn await_analysis(&self, id: &CorrelationId) -> Result<()>;
}

#[async_trait]
pub trait FileExclusionFilter: Send + Sync {
    /// Returns the subset of `candidates` allowed to be analyzed. Callers
    /// assume nothing about the result beyond "subset", neither order nor
    /// completeness.
    async fn filter(&self, candidates: Vec<Url>) -> Result<Vec<Url>>;
}

/// Filter that allows everything, for setups without exclusion settings.
pub struct NoExclusions;

#[async_trait]
impl FileExclusionFilter for NoExclusions {
    async fn filter(&self, candidates: Vec<Url>) -> Result<Vec<Url>> {
        Ok(candidates)
    }
}

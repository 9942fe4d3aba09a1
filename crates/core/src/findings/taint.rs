use super::store::{FindingStore, Keyed};
use super::{FindingId, Severity, TextRange};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// One step on the path from a taint source to the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowLocation {
    pub uri: Url,
    pub range: TextRange,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaintFlow {
    pub locations: Vec<FlowLocation>,
}

/// A taint vulnerability tracked by the server. Unlike issues and hotspots
/// these only exist server-side, so the identity is always the server key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaintVulnerability {
    pub id: FindingId,
    pub rule_key: String,
    pub message: String,
    pub severity: Severity,
    pub range: TextRange,
    pub flows: Vec<TaintFlow>,
}

impl TaintVulnerability {
    pub fn new(
        server_key: impl Into<String>,
        rule_key: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        range: TextRange,
        flows: Vec<TaintFlow>,
    ) -> Self {
        Self {
            id: FindingId::new(server_key),
            rule_key: rule_key.into(),
            message: message.into(),
            severity,
            range,
            flows,
        }
    }
}

impl Keyed for TaintVulnerability {
    fn finding_id(&self) -> &FindingId {
        &self.id
    }
}

pub struct TaintVulnerabilityCache {
    store: FindingStore<TaintVulnerability>,
}

impl TaintVulnerabilityCache {
    pub fn new() -> Self {
        Self {
            store: FindingStore::new(),
        }
    }

    pub fn report_taint_vulnerabilities(&self, per_uri: HashMap<Url, Vec<TaintVulnerability>>) {
        self.store.report_findings(per_uri);
    }

    pub fn replace(&self, uri: &Url, vulnerabilities: Vec<TaintVulnerability>) {
        self.store.replace(uri, vulnerabilities);
    }

    pub fn get(&self, uri: &Url, id: &FindingId) -> Option<TaintVulnerability> {
        self.store.get(uri, id)
    }

    /// Drops a vulnerability the server closed between analyses.
    pub fn remove(&self, uri: &Url, id: &FindingId) -> Option<TaintVulnerability> {
        self.store.remove(uri, id)
    }

    pub fn vulnerabilities_for(&self, uri: &Url) -> Arc<HashMap<FindingId, TaintVulnerability>> {
        self.store.findings_for(uri)
    }

    pub fn evict(&self, uri: &Url) {
        self.store.evict(uri);
    }
}

impl Default for TaintVulnerabilityCache {
    fn default() -> Self {
        Self::new()
    }
}

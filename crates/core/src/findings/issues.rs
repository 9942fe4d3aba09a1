use super::store::{FindingStore, Keyed};
use super::{FindingId, Severity, TextRange};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// A rule violation reported for a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: FindingId,
    /// Key the server tracks this issue under, when it is known there.
    pub server_key: Option<String>,
    pub rule_key: String,
    pub message: String,
    pub severity: Severity,
    /// `None` for file-level issues.
    pub range: Option<TextRange>,
}

impl Issue {
    pub fn new(
        server_key: Option<String>,
        rule_key: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        range: Option<TextRange>,
    ) -> Self {
        let rule_key = rule_key.into();
        let message = message.into();
        let id = server_key
            .clone()
            .map(FindingId::new)
            .unwrap_or_else(|| FindingId::synthesize(&rule_key, range.as_ref(), &message));
        Self {
            id,
            server_key,
            rule_key,
            message,
            severity,
            range,
        }
    }
}

impl Keyed for Issue {
    fn finding_id(&self) -> &FindingId {
        &self.id
    }
}

/// Per-file issue cache, read by the diagnostic publisher and by code-action
/// lookups.
pub struct IssueCache {
    store: FindingStore<Issue>,
}

impl IssueCache {
    pub fn new() -> Self {
        Self {
            store: FindingStore::new(),
        }
    }

    pub fn report_issues(&self, per_uri: HashMap<Url, Vec<Issue>>) {
        self.store.report_findings(per_uri);
    }

    pub fn replace(&self, uri: &Url, issues: Vec<Issue>) {
        self.store.replace(uri, issues);
    }

    pub fn get(&self, uri: &Url, id: &FindingId) -> Option<Issue> {
        self.store.get(uri, id)
    }

    /// Lookup by the key the server assigned, used when reconciling
    /// server-side state with local findings.
    pub fn get_by_server_key(&self, uri: &Url, server_key: &str) -> Option<Issue> {
        self.store
            .find(uri, |issue| issue.server_key.as_deref() == Some(server_key))
    }

    pub fn issues_for(&self, uri: &Url) -> Arc<HashMap<FindingId, Issue>> {
        self.store.findings_for(uri)
    }

    pub fn evict(&self, uri: &Url) {
        self.store.evict(uri);
    }
}

impl Default for IssueCache {
    fn default() -> Self {
        Self::new()
    }
}

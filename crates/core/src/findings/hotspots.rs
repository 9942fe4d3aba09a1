use super::store::{FindingStore, Keyed};
use super::{FindingId, TextRange};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VulnerabilityProbability {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HotspotStatus {
    ToReview,
    Reviewed,
}

/// Security-sensitive code the backend flags for human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityHotspot {
    pub id: FindingId,
    pub server_key: Option<String>,
    pub rule_key: String,
    pub message: String,
    pub probability: VulnerabilityProbability,
    pub status: HotspotStatus,
    pub range: TextRange,
}

impl SecurityHotspot {
    pub fn new(
        server_key: Option<String>,
        rule_key: impl Into<String>,
        message: impl Into<String>,
        probability: VulnerabilityProbability,
        range: TextRange,
    ) -> Self {
        let rule_key = rule_key.into();
        let message = message.into();
        let id = server_key
            .clone()
            .map(FindingId::new)
            .unwrap_or_else(|| FindingId::synthesize(&rule_key, Some(&range), &message));
        Self {
            id,
            server_key,
            rule_key,
            message,
            probability,
            status: HotspotStatus::ToReview,
            range,
        }
    }
}

impl Keyed for SecurityHotspot {
    fn finding_id(&self) -> &FindingId {
        &self.id
    }
}

pub struct SecurityHotspotCache {
    store: FindingStore<SecurityHotspot>,
}

impl SecurityHotspotCache {
    pub fn new() -> Self {
        Self {
            store: FindingStore::new(),
        }
    }

    pub fn report_hotspots(&self, per_uri: HashMap<Url, Vec<SecurityHotspot>>) {
        self.store.report_findings(per_uri);
    }

    pub fn replace(&self, uri: &Url, hotspots: Vec<SecurityHotspot>) {
        self.store.replace(uri, hotspots);
    }

    pub fn get(&self, uri: &Url, id: &FindingId) -> Option<SecurityHotspot> {
        self.store.get(uri, id)
    }

    pub fn get_by_server_key(&self, uri: &Url, server_key: &str) -> Option<SecurityHotspot> {
        self.store
            .find(uri, |h| h.server_key.as_deref() == Some(server_key))
    }

    pub fn hotspots_for(&self, uri: &Url) -> Arc<HashMap<FindingId, SecurityHotspot>> {
        self.store.findings_for(uri)
    }

    pub fn evict(&self, uri: &Url) {
        self.store.evict(uri);
    }
}

impl Default for SecurityHotspotCache {
    fn default() -> Self {
        Self::new()
    }
}

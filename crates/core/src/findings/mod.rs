//! Finding model and per-file caches.
//!
//! Findings are reported by the analysis backend per file and cached here so
//! they can be converted to editor diagnostics and looked up later (quick
//! fixes, hotspot review). Each cache replaces the stored set for a URI as a
//! whole; readers never see a partially updated file.

pub mod hotspots;
pub mod issues;
pub mod store;
pub mod taint;

pub use hotspots::{HotspotStatus, SecurityHotspot, SecurityHotspotCache, VulnerabilityProbability};
pub use issues::{Issue, IssueCache};
pub use store::{FindingStore, Keyed};
pub use taint::{FlowLocation, TaintFlow, TaintVulnerability, TaintVulnerabilityCache};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use url::Url;
use xxhash_rust::xxh3::xxh3_64;

/// Stable identity of a finding, usable for later lookup.
///
/// Server-tracked findings carry the key the backend assigned; purely local
/// findings get a synthesized key derived from their content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FindingId(String);

impl FindingId {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Synthesize a key for a finding the backend did not identify.
    pub fn synthesize(rule_key: &str, range: Option<&TextRange>, message: &str) -> Self {
        let range_part = range
            .map(|r| {
                format!(
                    "{}:{}:{}:{}",
                    r.start_line, r.start_character, r.end_line, r.end_character
                )
            })
            .unwrap_or_default();
        let hash = xxh3_64(format!("{rule_key}|{range_part}|{message}").as_bytes());
        Self(format!("{hash:016x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FindingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Zero-based text range, in editor coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextRange {
    pub start_line: u32,
    pub start_character: u32,
    pub end_line: u32,
    pub end_character: u32,
}

impl TextRange {
    pub fn new(start_line: u32, start_character: u32, end_line: u32, end_character: u32) -> Self {
        Self {
            start_line,
            start_character,
            end_line,
            end_character,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Blocker,
    Critical,
    Major,
    Minor,
    Info,
}

/// One finding streamed back by the backend during an analysis, tagged with
/// the file it belongs to.
#[derive(Debug, Clone)]
pub struct RaisedFinding {
    pub uri: Url,
    pub detail: FindingDetail,
}

#[derive(Debug, Clone)]
pub enum FindingDetail {
    Issue(Issue),
    SecurityHotspot(SecurityHotspot),
    TaintVulnerability(TaintVulnerability),
}

/// The three per-file caches plus the update feed the diagnostic publisher
/// listens on.
pub struct FindingCaches {
    pub issues: IssueCache,
    pub hotspots: SecurityHotspotCache,
    pub taint: TaintVulnerabilityCache,
    updates: broadcast::Sender<Url>,
}

impl FindingCaches {
    pub fn new() -> Arc<Self> {
        let (updates, _) = broadcast::channel(256);
        Arc::new(Self {
            issues: IssueCache::new(),
            hotspots: SecurityHotspotCache::new(),
            taint: TaintVulnerabilityCache::new(),
            updates,
        })
    }

    /// Findings for `uri` changed; lagging subscribers miss intermediate
    /// updates, never the final state, because they re-read the caches.
    pub fn notify(&self, uri: &Url) {
        let _ = self.updates.send(uri.clone());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Url> {
        self.updates.subscribe()
    }

    /// Drop everything cached for a file, e.g. when it is closed.
    pub fn evict(&self, uri: &Url) {
        self.issues.evict(uri);
        self.hotspots.evict(uri);
        self.taint.evict(uri);
        self.notify(uri);
    }
}

/// Accumulates the findings one analysis task raises and keeps the caches in
/// sync as they stream in.
///
/// The first finding recorded for a URI replaces whatever a previous task
/// stored for it; every later finding re-publishes the full accumulated set,
/// so readers always observe a complete snapshot.
pub struct FindingRecorder {
    caches: Arc<FindingCaches>,
    issues: Mutex<HashMap<Url, Vec<Issue>>>,
    hotspots: Mutex<HashMap<Url, Vec<SecurityHotspot>>>,
    taint: Mutex<HashMap<Url, Vec<TaintVulnerability>>>,
}

impl FindingRecorder {
    pub fn new(caches: Arc<FindingCaches>) -> Arc<Self> {
        Arc::new(Self {
            caches,
            issues: Mutex::new(HashMap::new()),
            hotspots: Mutex::new(HashMap::new()),
            taint: Mutex::new(HashMap::new()),
        })
    }

    pub fn record(&self, finding: RaisedFinding) {
        let uri = finding.uri;
        match finding.detail {
            FindingDetail::Issue(issue) => {
                let mut acc = self.issues.lock().unwrap();
                let set = acc.entry(uri.clone()).or_default();
                set.push(issue);
                self.caches.issues.replace(&uri, set.clone());
            }
            FindingDetail::SecurityHotspot(hotspot) => {
                let mut acc = self.hotspots.lock().unwrap();
                let set = acc.entry(uri.clone()).or_default();
                set.push(hotspot);
                self.caches.hotspots.replace(&uri, set.clone());
            }
            FindingDetail::TaintVulnerability(taint) => {
                let mut acc = self.taint.lock().unwrap();
                let set = acc.entry(uri.clone()).or_default();
                set.push(taint);
                self.caches.taint.replace(&uri, set.clone());
            }
        }
        self.caches.notify(&uri);
    }

    /// The listener handed to an [`crate::analysis::AnalysisTask`].
    pub fn listener(self: &Arc<Self>) -> Arc<dyn Fn(RaisedFinding) + Send + Sync> {
        let recorder = self.clone();
        Arc::new(move |finding| recorder.record(finding))
    }
}

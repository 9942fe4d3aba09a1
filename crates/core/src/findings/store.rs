use super::FindingId;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// A finding with a stable identity.
pub trait Keyed {
    fn finding_id(&self) -> &FindingId;
}

/// Per-file finding cache shared by the issue, hotspot and taint caches.
///
/// The set stored for a URI is an immutable map swapped as a whole, so a
/// reader holding a snapshot keeps a consistent view while a writer replaces
/// the entry. Point lookups return `None` rather than failing when absent.
pub struct FindingStore<F> {
    by_uri: DashMap<Url, Arc<HashMap<FindingId, F>>>,
}

impl<F: Keyed + Clone> FindingStore<F> {
    pub fn new() -> Self {
        Self {
            by_uri: DashMap::new(),
        }
    }

    /// Atomically replaces the stored set for `uri`.
    pub fn replace(&self, uri: &Url, findings: Vec<F>) {
        let set: HashMap<FindingId, F> = findings
            .into_iter()
            .map(|f| (f.finding_id().clone(), f))
            .collect();
        self.by_uri.insert(uri.clone(), Arc::new(set));
    }

    /// Replaces the stored set for every URI in the batch.
    pub fn report_findings(&self, per_uri: HashMap<Url, Vec<F>>) {
        for (uri, findings) in per_uri {
            self.replace(&uri, findings);
        }
    }

    pub fn get(&self, uri: &Url, id: &FindingId) -> Option<F> {
        self.by_uri
            .get(uri)
            .and_then(|entry| entry.value().get(id).cloned())
    }

    pub fn find<P>(&self, uri: &Url, predicate: P) -> Option<F>
    where
        P: Fn(&F) -> bool,
    {
        self.by_uri
            .get(uri)
            .and_then(|entry| entry.value().values().find(|f| predicate(f)).cloned())
    }

    /// Snapshot of the current set for `uri`; cheap Arc clone.
    pub fn findings_for(&self, uri: &Url) -> Arc<HashMap<FindingId, F>> {
        self.by_uri
            .get(uri)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn evict(&self, uri: &Url) {
        self.by_uri.remove(uri);
    }

    /// Removes a single finding from the set stored for `uri`.
    pub fn remove(&self, uri: &Url, id: &FindingId) -> Option<F> {
        let mut entry = self.by_uri.get_mut(uri)?;
        if !entry.value().contains_key(id) {
            return None;
        }
        let mut set = (**entry.value()).clone();
        let removed = set.remove(id);
        *entry.value_mut() = Arc::new(set);
        removed
    }
}

impl<F: Keyed + Clone> Default for FindingStore<F> {
    fn default() -> Self {
        Self::new()
    }
}

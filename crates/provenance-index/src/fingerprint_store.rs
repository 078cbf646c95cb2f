//! Fingerprint → occurrence index

use dashmap::DashMap;
use provenance_domain::{BuildId, Fingerprint, Occurrence, Role};
use std::collections::BTreeMap;

/// Maps each fingerprint to every build where it was produced or consumed
///
/// Occurrences of one fingerprint are kept sorted by build timestamp
/// (ascending); occurrences with equal timestamps keep their recording order.
#[derive(Debug, Default)]
pub struct FingerprintStore {
    occurrences: DashMap<Fingerprint, Vec<Occurrence>>,
}

impl FingerprintStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence
    ///
    /// Recording an occurrence identical to one already held is a no-op, so
    /// replaying the same records twice leaves the store unchanged.
    pub fn record(&self, occurrence: Occurrence) {
        // The entry guard serializes writers of this fingerprint only
        let mut entry = self
            .occurrences
            .entry(occurrence.fingerprint.clone())
            .or_default();
        Self::insert_sorted(&mut entry, occurrence);
    }

    /// Record several occurrences of one fingerprint under a single entry lock
    ///
    /// Readers see either none or all of them.
    pub fn record_all(&self, fingerprint: &Fingerprint, occurrences: Vec<Occurrence>) {
        if occurrences.is_empty() {
            return;
        }
        let mut entry = self.occurrences.entry(fingerprint.clone()).or_default();
        for occurrence in occurrences {
            debug_assert_eq!(&occurrence.fingerprint, fingerprint);
            Self::insert_sorted(&mut entry, occurrence);
        }
    }

    fn insert_sorted(list: &mut Vec<Occurrence>, occurrence: Occurrence) {
        if list.contains(&occurrence) {
            return;
        }
        let at = list.partition_point(|o| o.timestamp <= occurrence.timestamp);
        list.insert(at, occurrence);
    }

    /// Every occurrence of a fingerprint, oldest build first
    ///
    /// An unknown fingerprint yields an empty list.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Vec<Occurrence> {
        self.occurrences
            .get(fingerprint)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Builds that produced the fingerprint, oldest first
    pub fn producers(&self, fingerprint: &Fingerprint) -> Vec<BuildId> {
        self.occurrences
            .get(fingerprint)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|o| o.role == Role::Produced)
                    .map(|o| o.build.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop every occurrence contributed by a build
    pub fn remove_build(&self, build: &BuildId) {
        self.occurrences.retain(|_, list| {
            list.retain(|o| &o.build != build);
            !list.is_empty()
        });
    }

    /// Number of distinct fingerprints held
    pub fn len(&self) -> usize {
        self.occurrences.len()
    }

    /// Whether the store holds no fingerprints
    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }

    /// Remove everything
    pub fn clear(&self) {
        self.occurrences.clear();
    }

    /// Ordered copy of the whole store, for comparison and reporting
    pub fn snapshot(&self) -> BTreeMap<Fingerprint, Vec<Occurrence>> {
        self.occurrences
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

//! Combined read-side index

use crate::{DependencyGraphIndex, FingerprintStore, GraphSnapshot};
use provenance_domain::{
    BuildId, CommitReceipt, DependencyRecord, Fingerprint, GenerationRecord, Occurrence,
    ProvenanceSnapshot, Scope,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Fingerprint store and dependency graph kept in step with committed records
#[derive(Debug, Default)]
pub struct ProvenanceIndex {
    fingerprints: FingerprintStore,
    graph: DependencyGraphIndex,
}

impl ProvenanceIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// The fingerprint store
    pub fn fingerprints(&self) -> &FingerprintStore {
        &self.fingerprints
    }

    /// The dependency graph
    pub fn graph(&self) -> &DependencyGraphIndex {
        &self.graph
    }

    /// Apply the records of one committed build
    ///
    /// Records are grouped by key so that each fingerprint entry and the
    /// build's dependency entry are updated in one step.
    pub fn apply_commit(&self, receipt: &CommitReceipt) {
        self.apply_records(
            &receipt.build.id,
            receipt.build.started_at,
            &receipt.generations,
            &receipt.dependencies,
        );
        debug!(
            build = %receipt.build.id,
            generations = receipt.generations.len(),
            dependencies = receipt.dependencies.len(),
            "Index updated"
        );
    }

    fn apply_records(
        &self,
        build: &BuildId,
        started_at: u64,
        generations: &[GenerationRecord],
        dependencies: &[DependencyRecord],
    ) {
        let mut by_fingerprint: BTreeMap<Fingerprint, Vec<Occurrence>> = BTreeMap::new();
        for generation in generations {
            by_fingerprint
                .entry(generation.fingerprint().clone())
                .or_default()
                .push(Occurrence::produced(generation));
        }
        for dependency in dependencies {
            by_fingerprint
                .entry(dependency.fingerprint.clone())
                .or_default()
                .push(Occurrence::consumed(dependency, started_at));
        }

        for generation in generations {
            self.graph.add_producer(generation.fingerprint(), build);
        }
        if !dependencies.is_empty() {
            let edges: Vec<(Fingerprint, Scope)> = dependencies
                .iter()
                .map(|d| (d.fingerprint.clone(), d.scope))
                .collect();
            self.graph.add_edges(build, edges);
        }
        for (fingerprint, occurrences) in by_fingerprint {
            self.fingerprints.record_all(&fingerprint, occurrences);
        }
    }

    /// Drop every entry contributed by a build
    pub fn remove_build(&self, build: &BuildId) {
        self.fingerprints.remove_build(build);
        self.graph.remove_build(build);
    }

    /// Discard the current contents and replay a snapshot of persisted records
    pub fn rebuild(&self, snapshot: &ProvenanceSnapshot) {
        self.clear();

        let mut generations: BTreeMap<&BuildId, Vec<GenerationRecord>> = BTreeMap::new();
        for generation in &snapshot.generations {
            generations
                .entry(&generation.build)
                .or_default()
                .push(generation.clone());
        }
        let mut dependencies: BTreeMap<&BuildId, Vec<DependencyRecord>> = BTreeMap::new();
        for dependency in &snapshot.dependencies {
            dependencies
                .entry(&dependency.build)
                .or_default()
                .push(dependency.clone());
        }

        for build in &snapshot.builds {
            self.apply_records(
                &build.id,
                build.started_at,
                generations.get(&build.id).map(Vec::as_slice).unwrap_or(&[]),
                dependencies.get(&build.id).map(Vec::as_slice).unwrap_or(&[]),
            );
        }

        info!(
            builds = snapshot.builds.len(),
            fingerprints = self.fingerprints.len(),
            "Indexes rebuilt from persisted records"
        );
    }

    /// Remove everything
    pub fn clear(&self) {
        self.fingerprints.clear();
        self.graph.clear();
    }

    /// Ordered image of both indexes
    pub fn snapshot(&self) -> (BTreeMap<Fingerprint, Vec<Occurrence>>, GraphSnapshot) {
        (self.fingerprints.snapshot(), self.graph.snapshot())
    }
}

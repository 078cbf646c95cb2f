//! Dependency graph index
//!
//! Edges run between builds and fingerprints in two kinds:
//!
//! - *dependency*: build `B` declared a dependency on fingerprint `F` with a scope
//! - *generation*: build `P` produced fingerprint `F`
//!
//! Build-to-build lineage is derived by joining the two: `B` is downstream of
//! `P` when `B` depends on something `P` produced. A dependency whose
//! fingerprint has no producer is *external*.

use crate::GraphError;
use dashmap::DashMap;
use provenance_domain::{BuildId, Fingerprint, Scope};
use std::collections::{btree_set, BTreeMap, BTreeSet, HashSet};
use tracing::warn;

/// Fingerprints a build depends on, with every scope it declared them under
type Declared = BTreeMap<Fingerprint, BTreeSet<Scope>>;

/// Index of dependency and generation edges
#[derive(Debug, Default)]
pub struct DependencyGraphIndex {
    /// build → fingerprints it depends on
    upstream: DashMap<BuildId, Declared>,

    /// fingerprint → builds depending on it
    dependents: DashMap<Fingerprint, BTreeSet<BuildId>>,

    /// fingerprint → builds that produced it
    producers: DashMap<Fingerprint, BTreeSet<BuildId>>,

    /// build → fingerprints it produced
    outputs: DashMap<BuildId, BTreeSet<Fingerprint>>,
}

/// Ordered copy of the graph's primary edges, comparable across rebuilds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphSnapshot {
    /// build → declared dependencies and their scopes
    pub dependencies: BTreeMap<BuildId, BTreeMap<Fingerprint, BTreeSet<Scope>>>,

    /// fingerprint → producing builds
    pub producers: BTreeMap<Fingerprint, BTreeSet<BuildId>>,
}

impl DependencyGraphIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `consumer` depends on `fingerprint` under `scope`
    pub fn add_edge(&self, consumer: &BuildId, fingerprint: &Fingerprint, scope: Scope) {
        self.add_edges(consumer, [(fingerprint.clone(), scope)]);
    }

    /// Record several dependencies of one build under a single entry lock
    ///
    /// A reader of [`DependencyGraphIndex::upstream_of`] sees either none or
    /// all of them.
    pub fn add_edges(
        &self,
        consumer: &BuildId,
        edges: impl IntoIterator<Item = (Fingerprint, Scope)>,
    ) {
        let mut added = Vec::new();
        {
            let mut declared = self.upstream.entry(consumer.clone()).or_default();
            for (fingerprint, scope) in edges {
                declared.entry(fingerprint.clone()).or_default().insert(scope);
                added.push(fingerprint);
            }
        }
        // Build entry released before fingerprint entries are taken
        for fingerprint in added {
            self.dependents
                .entry(fingerprint)
                .or_default()
                .insert(consumer.clone());
        }
    }

    /// Record that `producer` generated `fingerprint`
    pub fn add_producer(&self, fingerprint: &Fingerprint, producer: &BuildId) {
        self.producers
            .entry(fingerprint.clone())
            .or_default()
            .insert(producer.clone());
        self.outputs
            .entry(producer.clone())
            .or_default()
            .insert(fingerprint.clone());
    }

    /// Fingerprints a build depends on (any scope)
    pub fn upstream_of(&self, build: &BuildId) -> BTreeSet<Fingerprint> {
        self.upstream
            .get(build)
            .map(|declared| declared.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Scopes under which a build declared a fingerprint
    pub fn scopes_of(&self, build: &BuildId, fingerprint: &Fingerprint) -> BTreeSet<Scope> {
        self.upstream
            .get(build)
            .and_then(|declared| declared.get(fingerprint).cloned())
            .unwrap_or_default()
    }

    /// Builds that declared a dependency on a fingerprint
    ///
    /// Includes dependents of external fingerprints that no tracked build produced.
    pub fn downstream_of(&self, fingerprint: &Fingerprint) -> BTreeSet<BuildId> {
        self.dependents
            .get(fingerprint)
            .map(|builds| builds.value().clone())
            .unwrap_or_default()
    }

    /// Builds that produced a fingerprint
    pub fn producers_of(&self, fingerprint: &Fingerprint) -> BTreeSet<BuildId> {
        self.producers
            .get(fingerprint)
            .map(|builds| builds.value().clone())
            .unwrap_or_default()
    }

    /// Fingerprints a build produced
    pub fn outputs_of(&self, build: &BuildId) -> BTreeSet<Fingerprint> {
        self.outputs
            .get(build)
            .map(|fingerprints| fingerprints.value().clone())
            .unwrap_or_default()
    }

    /// Whether a fingerprint has no tracked producer
    pub fn is_external(&self, fingerprint: &Fingerprint) -> bool {
        !self.producers.contains_key(fingerprint)
    }

    /// Builds that produced something `build` depends on
    pub fn upstream_builds(&self, build: &BuildId) -> BTreeSet<BuildId> {
        self.upstream_of(build)
            .iter()
            .flat_map(|fingerprint| self.producers_of(fingerprint))
            .collect()
    }

    /// Builds that depend on something `build` produced
    pub fn downstream_builds(&self, build: &BuildId) -> BTreeSet<BuildId> {
        self.outputs_of(build)
            .iter()
            .flat_map(|fingerprint| self.downstream_of(fingerprint))
            .collect()
    }

    /// Every build reachable upstream of `build`
    ///
    /// # Errors
    ///
    /// [`GraphError::CyclicDependencyDetected`] if the lineage loops back on itself.
    pub fn transitive_upstream(&self, build: &BuildId) -> Result<BTreeSet<BuildId>, GraphError> {
        self.walk(build, |b| self.upstream_builds(b))
    }

    /// Every build reachable downstream of `build`
    ///
    /// # Errors
    ///
    /// [`GraphError::CyclicDependencyDetected`] if the lineage loops back on itself.
    pub fn transitive_downstream(
        &self,
        build: &BuildId,
    ) -> Result<BTreeSet<BuildId>, GraphError> {
        self.walk(build, |b| self.downstream_builds(b))
    }

    /// Iterative depth-first walk keeping the current path, so a back edge is
    /// reported instead of followed
    fn walk(
        &self,
        start: &BuildId,
        next: impl Fn(&BuildId) -> BTreeSet<BuildId>,
    ) -> Result<BTreeSet<BuildId>, GraphError> {
        let mut reached = BTreeSet::new();
        let mut finished: HashSet<BuildId> = HashSet::new();
        let mut path: Vec<BuildId> = vec![start.clone()];
        let mut on_path: HashSet<BuildId> = HashSet::from([start.clone()]);
        let mut stack: Vec<btree_set::IntoIter<BuildId>> = vec![next(start).into_iter()];

        while let Some(frame) = stack.last_mut() {
            match frame.next() {
                Some(child) => {
                    if on_path.contains(&child) {
                        let from = path.iter().position(|b| b == &child).unwrap_or(0);
                        let mut cycle = path[from..].to_vec();
                        cycle.push(child);
                        warn!(start = %start, "Cycle found while walking build lineage");
                        return Err(GraphError::CyclicDependencyDetected { path: cycle });
                    }
                    reached.insert(child.clone());
                    if finished.contains(&child) {
                        continue;
                    }
                    let children = next(&child).into_iter();
                    on_path.insert(child.clone());
                    path.push(child);
                    stack.push(children);
                }
                None => {
                    stack.pop();
                    if let Some(done) = path.pop() {
                        on_path.remove(&done);
                        finished.insert(done);
                    }
                }
            }
        }

        Ok(reached)
    }

    /// Drop every edge contributed by a build
    pub fn remove_build(&self, build: &BuildId) {
        if let Some((_, declared)) = self.upstream.remove(build) {
            for fingerprint in declared.keys() {
                self.dependents.remove_if_mut(fingerprint, |_, builds| {
                    builds.remove(build);
                    builds.is_empty()
                });
            }
        }
        if let Some((_, produced)) = self.outputs.remove(build) {
            for fingerprint in &produced {
                self.producers.remove_if_mut(fingerprint, |_, builds| {
                    builds.remove(build);
                    builds.is_empty()
                });
            }
        }
    }

    /// Number of builds with at least one declared dependency
    pub fn consumer_count(&self) -> usize {
        self.upstream.len()
    }

    /// Remove everything
    pub fn clear(&self) {
        self.upstream.clear();
        self.dependents.clear();
        self.producers.clear();
        self.outputs.clear();
    }

    /// Ordered copy of the primary edges
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            dependencies: self
                .upstream
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            producers: self
                .producers
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> BuildId {
        BuildId::parse(s).unwrap()
    }

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::new(s).unwrap()
    }

    #[test]
    fn test_upstream_and_downstream() {
        let graph = DependencyGraphIndex::new();
        graph.add_producer(&fp("abc123"), &id("job/web#12"));
        graph.add_edge(&id("job/service#5"), &fp("abc123"), Scope::Compile);

        assert_eq!(graph.upstream_of(&id("job/service#5")), BTreeSet::from([fp("abc123")]));
        assert_eq!(graph.downstream_of(&fp("abc123")), BTreeSet::from([id("job/service#5")]));
        assert_eq!(graph.upstream_builds(&id("job/service#5")), BTreeSet::from([id("job/web#12")]));
        assert_eq!(graph.downstream_builds(&id("job/web#12")), BTreeSet::from([id("job/service#5")]));
    }

    #[test]
    fn test_unknown_keys_are_empty() {
        let graph = DependencyGraphIndex::new();
        assert!(graph.upstream_of(&id("job/a#1")).is_empty());
        assert!(graph.downstream_of(&fp("ff")).is_empty());
        assert!(graph.transitive_upstream(&id("job/a#1")).unwrap().is_empty());
    }

    #[test]
    fn test_external_dependency_still_has_dependents() {
        let graph = DependencyGraphIndex::new();
        graph.add_edge(&id("job/a#1"), &fp("ee"), Scope::Runtime);

        assert!(graph.is_external(&fp("ee")));
        assert_eq!(graph.downstream_of(&fp("ee")), BTreeSet::from([id("job/a#1")]));
        assert!(graph.upstream_builds(&id("job/a#1")).is_empty());
    }

    #[test]
    fn test_downstream_deduplicates_by_build() {
        let graph = DependencyGraphIndex::new();
        graph.add_edge(&id("job/a#1"), &fp("aa"), Scope::Compile);
        graph.add_edge(&id("job/a#1"), &fp("aa"), Scope::Test);

        assert_eq!(graph.downstream_of(&fp("aa")).len(), 1);
        assert_eq!(
            graph.scopes_of(&id("job/a#1"), &fp("aa")),
            BTreeSet::from([Scope::Compile, Scope::Test])
        );
    }

    #[test]
    fn test_transitive_chain() {
        // lib#1 -> core#1 -> app#1
        let graph = DependencyGraphIndex::new();
        graph.add_producer(&fp("11"), &id("job/lib#1"));
        graph.add_edge(&id("job/core#1"), &fp("11"), Scope::Compile);
        graph.add_producer(&fp("22"), &id("job/core#1"));
        graph.add_edge(&id("job/app#1"), &fp("22"), Scope::Compile);

        assert_eq!(
            graph.transitive_upstream(&id("job/app#1")).unwrap(),
            BTreeSet::from([id("job/core#1"), id("job/lib#1")])
        );
        assert_eq!(
            graph.transitive_downstream(&id("job/lib#1")).unwrap(),
            BTreeSet::from([id("job/core#1"), id("job/app#1")])
        );
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let graph = DependencyGraphIndex::new();
        graph.add_producer(&fp("11"), &id("job/base#1"));
        graph.add_edge(&id("job/left#1"), &fp("11"), Scope::Compile);
        graph.add_edge(&id("job/right#1"), &fp("11"), Scope::Compile);
        graph.add_producer(&fp("22"), &id("job/left#1"));
        graph.add_producer(&fp("33"), &id("job/right#1"));
        graph.add_edge(&id("job/top#1"), &fp("22"), Scope::Compile);
        graph.add_edge(&id("job/top#1"), &fp("33"), Scope::Compile);

        let up = graph.transitive_upstream(&id("job/top#1")).unwrap();
        assert_eq!(up.len(), 3);
        assert!(up.contains(&id("job/base#1")));
    }

    #[test]
    fn test_self_dependency_is_reported() {
        let graph = DependencyGraphIndex::new();
        graph.add_producer(&fp("aa"), &id("job/a#1"));
        graph.add_edge(&id("job/a#1"), &fp("aa"), Scope::Compile);

        let err = graph.transitive_upstream(&id("job/a#1")).unwrap_err();
        assert_eq!(
            err,
            GraphError::CyclicDependencyDetected {
                path: vec![id("job/a#1"), id("job/a#1")]
            }
        );
    }

    #[test]
    fn test_two_build_cycle_is_reported() {
        let graph = DependencyGraphIndex::new();
        graph.add_producer(&fp("aa"), &id("job/a#1"));
        graph.add_producer(&fp("bb"), &id("job/b#1"));
        graph.add_edge(&id("job/a#1"), &fp("bb"), Scope::Compile);
        graph.add_edge(&id("job/b#1"), &fp("aa"), Scope::Compile);

        let GraphError::CyclicDependencyDetected { path } =
            graph.transitive_downstream(&id("job/a#1")).unwrap_err();
        assert_eq!(path, vec![id("job/a#1"), id("job/b#1"), id("job/a#1")]);

        // Direct queries are unaffected by the cycle
        assert_eq!(graph.upstream_builds(&id("job/a#1")), BTreeSet::from([id("job/b#1")]));
    }

    #[test]
    fn test_cycle_not_through_start_is_reported() {
        // start -> a -> b -> a
        let graph = DependencyGraphIndex::new();
        graph.add_producer(&fp("aa"), &id("job/a#1"));
        graph.add_producer(&fp("bb"), &id("job/b#1"));
        graph.add_edge(&id("job/start#1"), &fp("aa"), Scope::Compile);
        graph.add_edge(&id("job/a#1"), &fp("bb"), Scope::Compile);
        graph.add_edge(&id("job/b#1"), &fp("aa"), Scope::Compile);

        let GraphError::CyclicDependencyDetected { path } =
            graph.transitive_upstream(&id("job/start#1")).unwrap_err();
        assert_eq!(path, vec![id("job/a#1"), id("job/b#1"), id("job/a#1")]);
    }

    #[test]
    fn test_remove_build_cleans_reverse_edges() {
        let graph = DependencyGraphIndex::new();
        graph.add_producer(&fp("aa"), &id("job/a#1"));
        graph.add_edge(&id("job/b#1"), &fp("aa"), Scope::Compile);

        graph.remove_build(&id("job/a#1"));
        assert!(graph.is_external(&fp("aa")));
        assert_eq!(graph.downstream_of(&fp("aa")).len(), 1);

        graph.remove_build(&id("job/b#1"));
        assert!(graph.downstream_of(&fp("aa")).is_empty());
        assert_eq!(graph.snapshot(), GraphSnapshot::default());
    }
}

//! Provenance Indexes
//!
//! Read-side structures derived from the records held by a
//! [`provenance_domain::ProvenanceDao`]:
//!
//! - [`FingerprintStore`]: fingerprint → ordered occurrences (produced / consumed)
//! - [`DependencyGraphIndex`]: build ↔ fingerprint edges for upstream/downstream traversal
//!
//! Neither index is a source of truth. [`ProvenanceIndex::rebuild`] reconstructs
//! both from a [`provenance_domain::ProvenanceSnapshot`], and a rebuilt index is
//! indistinguishable from one populated incrementally (see the `snapshot` methods).
//!
//! # Concurrency
//!
//! Both indexes are built on `DashMap`. Writes lock only the shard holding the
//! touched key, so builds recording disjoint fingerprints proceed in parallel,
//! while two writers of the same fingerprint serialize on its entry.

#![warn(missing_docs)]

mod error;
mod fingerprint_store;
mod graph;
mod index;

pub use error::GraphError;
pub use fingerprint_store::FingerprintStore;
pub use graph::{DependencyGraphIndex, GraphSnapshot};
pub use index::ProvenanceIndex;

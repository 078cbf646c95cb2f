//! Error types for index traversal

use provenance_domain::BuildId;
use thiserror::Error;

/// Errors raised while traversing the dependency graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Traversal met a build already on the current path; the query is aborted
    #[error("Cyclic dependency detected: {}", render_path(.path))]
    CyclicDependencyDetected {
        /// Builds forming the cycle, first and last entries equal
        path: Vec<BuildId>,
    },
}

fn render_path(path: &[BuildId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message() {
        let a = BuildId::parse("job/a#1").unwrap();
        let b = BuildId::parse("job/b#1").unwrap();
        let err = GraphError::CyclicDependencyDetected {
            path: vec![a.clone(), b, a],
        };
        assert_eq!(
            err.to_string(),
            "Cyclic dependency detected: job/a#1 -> job/b#1 -> job/a#1"
        );
    }
}

//! Execution environments: a python version plus a dependency set, shared by
//! many operators and de-duplicated by content hash.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEnvironment {
    pub id: Uuid,
    pub python_version: String,
    pub dependencies: Vec<String>,
    /// Deterministic hash over python version + sorted dependencies.
    pub hash: Uuid,
}

impl ExecutionEnvironment {
    /// Content hash used for de-duplication across operators.
    pub fn content_hash(python_version: &str, dependencies: &[String]) -> Uuid {
        let mut sorted: Vec<&str> = dependencies.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        let mut buf = python_version.as_bytes().to_vec();
        for dep in sorted {
            buf.push(0);
            buf.extend_from_slice(dep.as_bytes());
        }
        Uuid::new_v5(&Uuid::NAMESPACE_OID, &buf)
    }

    pub fn new(python_version: impl Into<String>, dependencies: Vec<String>) -> Self {
        let python_version = python_version.into();
        let hash = Self::content_hash(&python_version, &dependencies);
        Self {
            id: Uuid::new_v4(),
            python_version,
            dependencies,
            hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_ignores_dependency_order() {
        let a = ExecutionEnvironment::new("3.10", vec!["pandas".into(), "numpy".into()]);
        let b = ExecutionEnvironment::new("3.10", vec!["numpy".into(), "pandas".into()]);
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn hash_varies_with_python_version() {
        let a = ExecutionEnvironment::new("3.10", vec!["numpy".into()]);
        let b = ExecutionEnvironment::new("3.11", vec!["numpy".into()]);
        assert_ne!(a.hash, b.hash);
    }
}

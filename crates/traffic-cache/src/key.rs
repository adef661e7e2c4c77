//! Colon-joined cache key builder
//!
//! A key is a list of atoms joined by `:`. Pushing a segment that itself
//! contains colons splits it into atoms first, so atoms are always
//! colon-free and the rendered key has no empty segments.

use std::fmt;

/// Value-type builder for colon-joined cache keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheKey {
    atoms: Vec<String>,
}

impl CacheKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment, splitting it on `:` into colon-free atoms.
    /// Empty atoms produced by doubled or trailing colons are dropped.
    pub fn push(mut self, segment: &str) -> Self {
        for atom in segment.split(':').filter(|a| !a.is_empty()) {
            self.atoms.push(atom.to_string());
        }
        self
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.atoms.join(":"))
    }
}

impl From<&str> for CacheKey {
    fn from(segment: &str) -> Self {
        CacheKey::new().push(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_atoms_with_colons() {
        let key = CacheKey::new().push("traffic").push("T1").push("conf");
        assert_eq!(key.to_string(), "traffic:T1:conf");
    }

    #[test]
    fn splits_segments_containing_colons() {
        let key = CacheKey::new().push("port").push("user.s.node1:10042");
        assert_eq!(key.to_string(), "port:user.s.node1:10042");
    }

    #[test]
    fn drops_empty_atoms() {
        let key = CacheKey::new().push("a::b").push(":c:");
        assert_eq!(key.to_string(), "a:b:c");
    }
}

//! Check identity, definitions and the immutable set swapped on reload.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Host plus optional service name. A check without a service reports a
/// passive host check result.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CheckId {
    pub host: String,
    pub service: Option<String>,
}

impl CheckId {
    #[must_use]
    pub fn service(host: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            service: Some(service.into()),
        }
    }

    #[must_use]
    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            service: None,
        }
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.service {
            Some(service) => write!(f, "{}/{service}", self.host),
            None => f.write_str(&self.host),
        }
    }
}

/// A fully resolved check. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckDefinition {
    pub id: CheckId,
    /// Command line handed to `/bin/sh -c`.
    pub command: String,
    pub interval: Duration,
    pub timeout: Duration,
}

/// Immutable, id-ordered collection of definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckSet {
    checks: BTreeMap<CheckId, Arc<CheckDefinition>>,
}

/// Outcome of comparing two check sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckSetDiff {
    pub added: Vec<Arc<CheckDefinition>>,
    pub removed: Vec<CheckId>,
    pub changed: Vec<Arc<CheckDefinition>>,
    pub unchanged: Vec<CheckId>,
}

impl CheckSetDiff {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

impl CheckSet {
    /// Build a set; later duplicates of an id are ignored.
    #[must_use]
    pub fn new(definitions: impl IntoIterator<Item = CheckDefinition>) -> Self {
        let mut checks = BTreeMap::new();
        for definition in definitions {
            checks
                .entry(definition.id.clone())
                .or_insert_with(|| Arc::new(definition));
        }
        Self { checks }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &CheckId) -> bool {
        self.checks.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &CheckId) -> Option<&Arc<CheckDefinition>> {
        self.checks.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CheckDefinition>> {
        self.checks.values()
    }

    /// Compare `self` (the running set) against `next`.
    #[must_use]
    pub fn diff(&self, next: &Self) -> CheckSetDiff {
        let mut diff = CheckSetDiff::default();
        for (id, definition) in &next.checks {
            match self.checks.get(id) {
                None => diff.added.push(Arc::clone(definition)),
                Some(current) if current.as_ref() == definition.as_ref() => {
                    diff.unchanged.push(id.clone());
                }
                Some(_) => diff.changed.push(Arc::clone(definition)),
            }
        }
        diff.removed = self
            .checks
            .keys()
            .filter(|id| !next.checks.contains_key(*id))
            .cloned()
            .collect();
        diff
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::definition;
    use super::{CheckId, CheckSet};

    #[test]
    fn display_distinguishes_host_and_service_checks() {
        assert_eq!(CheckId::service("db1", "load").to_string(), "db1/load");
        assert_eq!(CheckId::host("db1").to_string(), "db1");
    }

    #[test]
    fn first_definition_wins_on_duplicate_ids() {
        let mut second = definition("disk", 60);
        second.command = "false".to_string();
        let set = CheckSet::new([definition("disk", 60), second]);
        assert_eq!(set.len(), 1);
        let kept = set.get(&CheckId::service("web01", "disk")).expect("present");
        assert_eq!(kept.command, "echo disk");
    }

    #[test]
    fn diff_classifies_every_id() {
        let old = CheckSet::new([definition("disk", 60), definition("load", 60), definition("swap", 60)]);
        let new = CheckSet::new([definition("disk", 60), definition("load", 30), definition("ntp", 60)]);
        let diff = old.diff(&new);
        assert_eq!(diff.unchanged, vec![CheckId::service("web01", "disk")]);
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.changed[0].id, CheckId::service("web01", "load"));
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].id, CheckId::service("web01", "ntp"));
        assert_eq!(diff.removed, vec![CheckId::service("web01", "swap")]);
        assert!(!diff.is_noop());
        assert!(new.diff(&new).is_noop());
    }
}

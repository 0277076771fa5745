//! Drift between a local tree and a committed manifest

use crate::sync::Manifest;
use serde::Serialize;
use std::cmp::Ordering;

/// Partition of all paths in local ∪ remote
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    /// Present locally, absent from the remote manifest
    pub added: Vec<String>,
    /// In the remote manifest, absent locally
    pub removed: Vec<String>,
    /// Present in both with a different digest
    pub modified: Vec<String>,
    /// Present in both with the same digest
    pub unchanged: Vec<String>,
}

impl DriftReport {
    /// Compare a freshly built local manifest against the remote one.
    ///
    /// Both entry lists are sorted, so this is a single merge pass.
    pub fn compute(local: &Manifest, remote: &Manifest) -> Self {
        let mut report = Self::default();
        let mut l = local.entries.iter().peekable();
        let mut r = remote.entries.iter().peekable();

        loop {
            match (l.peek(), r.peek()) {
                (Some(le), Some(re)) => match le.path.cmp(&re.path) {
                    Ordering::Less => {
                        report.added.push(le.path.clone());
                        l.next();
                    }
                    Ordering::Greater => {
                        report.removed.push(re.path.clone());
                        r.next();
                    }
                    Ordering::Equal => {
                        if le.digest == re.digest {
                            report.unchanged.push(le.path.clone());
                        } else {
                            report.modified.push(le.path.clone());
                        }
                        l.next();
                        r.next();
                    }
                },
                (Some(le), None) => {
                    report.added.push(le.path.clone());
                    l.next();
                }
                (None, Some(re)) => {
                    report.removed.push(re.path.clone());
                    r.next();
                }
                (None, None) => break,
            }
        }

        report
    }

    /// Check if there are any changes
    pub fn has_drift(&self) -> bool {
        !self.added.is_empty() || !self.modified.is_empty() || !self.removed.is_empty()
    }

    /// Print summary and changed paths
    pub fn print(&self) {
        println!("=== Drift Report ===");
        println!("Added:     {}", self.added.len());
        println!("Removed:   {}", self.removed.len());
        println!("Modified:  {}", self.modified.len());
        println!("Unchanged: {}", self.unchanged.len());

        for (label, paths) in [("+", &self.added), ("-", &self.removed), ("~", &self.modified)] {
            for path in paths {
                println!("  {} {}", label, path);
            }
        }
    }
}

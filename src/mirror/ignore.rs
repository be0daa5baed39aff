//! Ignore-list filtering of resolved descriptors.
//!
//! Matches each descriptor against the creator's ignore set by the filename
//! it would produce, including any extension correction known from a
//! previous run's ledger. Pure over its inputs; no side effects.

use std::collections::HashSet;

use crate::mirror::ledger::CorrectionLedger;
use crate::mirror::models::AssetDescriptor;

/// Filter built from a creator's ignore set.
pub struct IgnoreFilter {
    names: HashSet<String>,
    case_insensitive: bool,
}

impl IgnoreFilter {
    /// Exact-match filter (the default).
    pub fn new(names: HashSet<String>) -> Self {
        Self::with_case_insensitive(names, false)
    }

    pub fn with_case_insensitive(names: HashSet<String>, case_insensitive: bool) -> Self {
        let names = if case_insensitive {
            names.into_iter().map(|n| n.to_lowercase()).collect()
        } else {
            names
        };
        Self {
            names,
            case_insensitive,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn contains(&self, filename: &str) -> bool {
        if self.case_insensitive {
            self.names.contains(&filename.to_lowercase())
        } else {
            self.names.contains(filename)
        }
    }

    /// Whether a descriptor's produced filename is ignored, consulting the
    /// ledger for the name it would carry after a prior correction.
    pub fn matches(&self, descriptor: &AssetDescriptor, ledger: &CorrectionLedger) -> bool {
        if self.names.is_empty() {
            return false;
        }
        if self.contains(&descriptor.declared_filename) {
            return true;
        }
        ledger
            .corrected_name(&descriptor.declared_filename)
            .is_some_and(|corrected| self.contains(&corrected))
    }

    /// Split descriptors into (kept, ignored).
    pub fn partition(
        &self,
        descriptors: Vec<AssetDescriptor>,
        ledger: &CorrectionLedger,
    ) -> (Vec<AssetDescriptor>, Vec<AssetDescriptor>) {
        descriptors
            .into_iter()
            .partition(|d| !self.matches(d, ledger))
    }
}

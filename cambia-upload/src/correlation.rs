//! Fingerprint to row correlation
//!
//! Byte-identical uploads share a fingerprint, so one server reply may
//! resolve several rows. The index keeps, per fingerprint, the row
//! positions in the order they were recorded.

use crate::fingerprint::Fingerprint;
use std::collections::{HashMap, HashSet};

/// Mapping from fingerprint to the rows that produced it
///
/// Invariant: every recorded row appears in exactly one list, and `rows`
/// holds exactly the rows present in `entries`.
#[derive(Debug, Default, Clone)]
pub struct CorrelationIndex {
    entries: HashMap<Fingerprint, Vec<usize>>,
    rows: HashSet<usize>,
}

impl CorrelationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry (called once per batch, before hashing starts)
    pub fn reset(&mut self) {
        self.entries.clear();
        self.rows.clear();
    }

    /// Append `row` to the list for `fingerprint`
    ///
    /// Returns `false` without modifying the index if the row was already
    /// recorded.
    pub fn record(&mut self, fingerprint: Fingerprint, row: usize) -> bool {
        if !self.rows.insert(row) {
            tracing::warn!(row, fingerprint = %fingerprint, "Row already recorded, ignoring");
            return false;
        }
        self.entries.entry(fingerprint).or_default().push(row);
        true
    }

    /// Rows recorded for `fingerprint`, `None` if unknown
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<&[usize]> {
        self.entries
            .get(fingerprint)
            .map(Vec::as_slice)
            .filter(|rows| !rows.is_empty())
    }

    pub fn contains_row(&self, row: usize) -> bool {
        self.rows.contains(&row)
    }

    /// Number of distinct fingerprints
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of recorded rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

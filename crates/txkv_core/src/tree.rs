//! In-memory record layout of one database.
//!
//! Records are grouped by key in key order. A group occupies
//! `ceil(len / page_capacity)` leaf pages; inserting into a group whose last
//! page is full splits it, and creating a group adds a page. Both are
//! structural changes that the caller must cover with the exclusive tree lock.

use crate::config::DuplicatePolicy;
use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Bookkeeping bytes charged to the cache for every record.
pub const RECORD_OVERHEAD: u64 = 16;

/// Cache charge for one record.
#[must_use]
pub fn record_size(key: &[u8], value: &[u8]) -> u64 {
    (key.len() + value.len()) as u64 + RECORD_OVERHEAD
}

#[derive(Debug, Clone)]
pub(crate) struct StoredRecord {
    pub value: Vec<u8>,
    /// Transaction that wrote the record and has not resolved yet.
    pub writer: Option<TransactionId>,
}

#[derive(Debug)]
pub(crate) struct RecordTree {
    groups: BTreeMap<Vec<u8>, Vec<StoredRecord>>,
    duplicates: DuplicatePolicy,
    page_capacity: usize,
}

impl RecordTree {
    pub fn new(duplicates: DuplicatePolicy, page_capacity: usize) -> Self {
        Self {
            groups: BTreeMap::new(),
            duplicates,
            page_capacity: page_capacity.max(1),
        }
    }

    /// Returns true if inserting under `key` creates a group or splits a page.
    pub fn is_structural(&self, key: &[u8]) -> bool {
        match self.groups.get(key) {
            None => true,
            Some(records) => {
                self.duplicates.allows_duplicates() && records.len() % self.page_capacity == 0
            }
        }
    }

    /// Rejects an insert the duplicate policy forbids.
    pub fn check_insert(&self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        if self.duplicates == DuplicatePolicy::Sorted {
            if let Some(records) = self.groups.get(key) {
                if records
                    .binary_search_by(|r| r.value.as_slice().cmp(value))
                    .is_ok()
                {
                    return Err(CoreError::KeyExists);
                }
            }
        }
        Ok(())
    }

    /// Returns the value an insert under `key` would replace.
    pub fn replaced_value(&self, key: &[u8]) -> Option<Vec<u8>> {
        if self.duplicates.allows_duplicates() {
            return None;
        }
        self.groups
            .get(key)
            .and_then(|records| records.first())
            .map(|r| r.value.clone())
    }

    /// Inserts a record written by `writer`.
    pub fn insert(&mut self, key: &[u8], value: &[u8], writer: TransactionId) {
        let record = StoredRecord {
            value: value.to_vec(),
            writer: Some(writer),
        };
        let records = self.groups.entry(key.to_vec()).or_default();

        match self.duplicates {
            DuplicatePolicy::None => {
                records.clear();
                records.push(record);
            }
            DuplicatePolicy::Unsorted => records.push(record),
            DuplicatePolicy::Sorted => {
                let pos = records
                    .binary_search_by(|r| r.value.as_slice().cmp(value))
                    .unwrap_or_else(|pos| pos);
                records.insert(pos, record);
            }
        }
    }

    /// Reverts one insert by `writer`.
    ///
    /// With a before image the replaced value is restored; the undo chain
    /// runs newest to oldest, so the image left at the end is the one that
    /// existed before the transaction.
    pub fn undo(&mut self, key: &[u8], after: &[u8], before: Option<&[u8]>, writer: TransactionId) {
        let Some(records) = self.groups.get_mut(key) else {
            return;
        };

        match (self.duplicates, before) {
            (DuplicatePolicy::None, Some(before)) => {
                records.clear();
                records.push(StoredRecord {
                    value: before.to_vec(),
                    writer: None,
                });
            }
            (DuplicatePolicy::None, None) => records.clear(),
            _ => {
                if let Some(pos) = records
                    .iter()
                    .rposition(|r| r.writer == Some(writer) && r.value == after)
                {
                    records.remove(pos);
                }
            }
        }

        if records.is_empty() {
            self.groups.remove(key);
        }
    }

    /// Makes every record `writer` holds under `key` committed.
    pub fn commit(&mut self, key: &[u8], writer: TransactionId) {
        if let Some(records) = self.groups.get_mut(key) {
            for record in records.iter_mut().filter(|r| r.writer == Some(writer)) {
                record.writer = None;
            }
        }
    }

    /// Returns the value at `index` within the group of `key`.
    pub fn value_at(&self, key: &[u8], index: usize) -> Option<Vec<u8>> {
        self.groups
            .get(key)
            .and_then(|records| records.get(index))
            .map(|r| r.value.clone())
    }

    /// Returns the first key strictly after `key`, or the first key.
    pub fn key_after(&self, key: Option<&[u8]>) -> Option<Vec<u8>> {
        let lower = match key {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        self.groups
            .range::<[u8], _>((lower, Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }

    /// Returns every value stored under `key`.
    pub fn values(&self, key: &[u8]) -> Vec<Vec<u8>> {
        self.groups
            .get(key)
            .map(|records| records.iter().map(|r| r.value.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns the number of records, committed or not.
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Returns the number of committed records.
    pub fn committed_len(&self) -> usize {
        self.groups
            .values()
            .flat_map(|records| records.iter())
            .filter(|r| r.writer.is_none())
            .count()
    }

    /// Returns the number of leaf pages.
    pub fn pages(&self) -> usize {
        self.groups
            .values()
            .map(|records| records.len().div_ceil(self.page_capacity))
            .sum()
    }
}

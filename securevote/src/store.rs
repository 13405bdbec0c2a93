use crate::*;
use std::ops::Range;

/// Storage behind an `AuditChain`.
///
/// Implementations only persist entries. Sequencing and hashing are done by
/// the chain while it holds its lock.
pub trait AuditStore {
    /// Number of stored entries
    fn len(&self) -> u64;

    /// Get the entry at a storage position
    fn get(&self, sequence: u64) -> Option<AuditEntry>;

    /// Persist a new entry after the current tail
    fn push(&mut self, entry: AuditEntry) -> Result<(), Error>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The most recently stored entry
    fn tail(&self) -> Option<AuditEntry> {
        match self.len() {
            0 => None,
            len => self.get(len - 1),
        }
    }

    /// Entries in `range`, stopping at the first missing position
    fn range(&self, range: Range<u64>) -> Vec<AuditEntry> {
        let mut results = Vec::new();
        for sequence in range {
            match self.get(sequence) {
                Some(entry) => results.push(entry),
                None => break,
            }
        }
        results
    }
}

/// A simple store that keeps entries in memory
#[derive(Default, Clone, Debug)]
pub struct MemAuditStore {
    inner: Vec<AuditEntry>,
}

impl MemAuditStore {
    /// Raw mutable access to a stored entry. The chain never calls this; any
    /// change made through it shows up on the next verification.
    pub fn get_mut(&mut self, sequence: u64) -> Option<&mut AuditEntry> {
        self.inner.get_mut(sequence as usize)
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.inner
    }

    pub fn into_entries(self) -> Vec<AuditEntry> {
        self.inner
    }
}

impl AuditStore for MemAuditStore {
    fn len(&self) -> u64 {
        self.inner.len() as u64
    }

    fn get(&self, sequence: u64) -> Option<AuditEntry> {
        self.inner.get(sequence as usize).cloned()
    }

    fn push(&mut self, entry: AuditEntry) -> Result<(), Error> {
        self.inner.push(entry);
        Ok(())
    }

    fn range(&self, range: Range<u64>) -> Vec<AuditEntry> {
        let end = (range.end as usize).min(self.inner.len());
        let start = (range.start as usize).min(end);
        self.inner[start..end].to_vec()
    }
}

impl From<Vec<AuditEntry>> for MemAuditStore {
    fn from(item: Vec<AuditEntry>) -> Self {
        MemAuditStore { inner: item }
    }
}

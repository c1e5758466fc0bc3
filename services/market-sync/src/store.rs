//! Dataset store
//!
//! Owns the authoritative collection of entries (one per symbol) and the
//! current sort spec, and keeps a sorted read-only projection of them.
//!
//! Every accepted datum obeys the freshness rule: a stored entry is only
//! ever replaced by a datum whose `observed_at` is not older. This holds for
//! push merges and for full snapshot replacement alike, so no accepted
//! update can be reverted by an older one arriving later on either channel.
//!
//! The projection is rebuilt eagerly after every mutation and handed out as
//! a shared slice, so readers never observe a partially-updated state and
//! repeated reads with no mutation in between return the same sequence.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use types::entry::Entry;
use types::errors::SyncError;
use types::ids::Symbol;
use types::sort::{SortColumn, SortSpec};

/// Result of one mutating call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySummary {
    /// Symbols seen for the first time.
    pub inserted: usize,
    /// Stored entries replaced by an incoming datum.
    pub replaced: usize,
    /// Incoming data dropped by the freshness rule.
    pub stale: usize,
    /// Symbols removed because a snapshot omitted them.
    pub removed: usize,
    /// Whether the projection differs afterwards.
    pub changed: bool,
}

impl ApplySummary {
    /// Number of incoming data that landed in the store.
    pub fn accepted(&self) -> usize {
        self.inserted + self.replaced
    }
}

/// A versioned, checksummed copy of the projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionSnapshot {
    /// Store revision the snapshot was taken at.
    pub revision: u64,
    /// Sort spec the entries are ordered by.
    pub sort: SortSpec,
    /// Projection in display order.
    pub entries: Vec<Entry>,
    /// SHA-256 of the ordered entries and the revision.
    pub checksum: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    entry: Entry,
    /// Insertion order, used as the sort tiebreak.
    position: u64,
}

/// Authoritative entry collection plus its sorted projection.
#[derive(Debug)]
pub struct DatasetStore {
    entries: BTreeMap<Symbol, StoredEntry>,
    next_position: u64,
    sort: SortSpec,
    projection: Arc<[Entry]>,
    revision: u64,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::with_sort(SortSpec::default())
    }

    pub fn with_sort(sort: SortSpec) -> Self {
        Self {
            entries: BTreeMap::new(),
            next_position: 0,
            sort,
            projection: Arc::from(Vec::new()),
            revision: 0,
        }
    }

    /// Replace the whole collection with a snapshot.
    ///
    /// Each listed symbol keeps its stored entry only when that entry is
    /// strictly fresher than the incoming one; symbols absent from the
    /// snapshot are removed. Duplicate symbols collapse to the freshest
    /// occurrence (the later one on ties). Positions follow list order.
    pub fn replace_all(&mut self, entries: Vec<Entry>) -> ApplySummary {
        let mut summary = ApplySummary::default();

        // Collapse duplicates, keeping first-seen order.
        let mut order: Vec<Symbol> = Vec::with_capacity(entries.len());
        let mut incoming: BTreeMap<Symbol, Entry> = BTreeMap::new();
        for entry in entries {
            match incoming.get_mut(&entry.symbol) {
                Some(existing) => {
                    if entry.is_fresher_or_equal(existing) {
                        *existing = entry;
                    } else {
                        summary.stale += 1;
                    }
                }
                None => {
                    order.push(entry.symbol.clone());
                    incoming.insert(entry.symbol.clone(), entry);
                }
            }
        }

        let listed: BTreeSet<&Symbol> = order.iter().collect();
        let removed: Vec<Symbol> = self
            .entries
            .keys()
            .filter(|symbol| !listed.contains(symbol))
            .cloned()
            .collect();
        summary.removed = removed.len();

        let mut next = BTreeMap::new();
        for symbol in &order {
            let Some(entry) = incoming.remove(symbol) else {
                continue;
            };
            let position = self.next_position;
            self.next_position += 1;

            let kept = match self.entries.remove(symbol) {
                Some(stored) if !entry.is_fresher_or_equal(&stored.entry) => {
                    summary.stale += 1;
                    log_stale(&entry, &stored.entry);
                    stored.entry
                }
                Some(_) => {
                    summary.replaced += 1;
                    entry
                }
                None => {
                    summary.inserted += 1;
                    entry
                }
            };
            next.insert(symbol.clone(), StoredEntry { entry: kept, position });
        }
        self.entries = next;

        summary.changed = self.rebuild();
        debug!(
            inserted = summary.inserted,
            replaced = summary.replaced,
            stale = summary.stale,
            removed = summary.removed,
            revision = self.revision,
            "Snapshot applied"
        );
        summary
    }

    /// Upsert one pushed entry under the freshness rule.
    pub fn merge_one(&mut self, entry: Entry) -> ApplySummary {
        self.merge_many(vec![entry])
    }

    /// Upsert several pushed entries; the projection is rebuilt once.
    pub fn merge_many(&mut self, entries: Vec<Entry>) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for entry in entries {
            self.upsert(entry, &mut summary);
        }
        if summary.accepted() > 0 {
            summary.changed = self.rebuild();
        }
        summary
    }

    fn upsert(&mut self, entry: Entry, summary: &mut ApplySummary) {
        match self.entries.get_mut(&entry.symbol) {
            Some(stored) => {
                if entry.is_fresher_or_equal(&stored.entry) {
                    stored.entry = entry;
                    summary.replaced += 1;
                } else {
                    log_stale(&entry, &stored.entry);
                    summary.stale += 1;
                }
            }
            None => {
                let position = self.next_position;
                self.next_position += 1;
                self.entries
                    .insert(entry.symbol.clone(), StoredEntry { entry, position });
                summary.inserted += 1;
            }
        }
    }

    /// Select a sort column; see [`SortSpec::select`] for the toggle rule.
    ///
    /// Returns the resulting spec.
    pub fn set_sort(&mut self, column: SortColumn, toggle: bool) -> SortSpec {
        let mut spec = self.sort;
        spec.select(column, toggle);
        self.set_sort_spec(spec);
        self.sort
    }

    /// Replace the sort spec outright. Returns whether it changed.
    pub fn set_sort_spec(&mut self, spec: SortSpec) -> bool {
        if spec == self.sort {
            return false;
        }
        self.sort = spec;
        // A new spec is a change even when the order happens to be identical.
        if !self.rebuild() {
            self.revision += 1;
        }
        true
    }

    /// Current sorted projection. Cheap to call; shares the cached slice.
    pub fn projection(&self) -> Arc<[Entry]> {
        Arc::clone(&self.projection)
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&Entry> {
        self.entries.get(symbol).map(|stored| &stored.entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sort_spec(&self) -> SortSpec {
        self.sort
    }

    /// Incremented on every change of the projection or the sort spec.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Checksummed copy of the projection.
    pub fn snapshot(&self, now: DateTime<Utc>) -> ProjectionSnapshot {
        let entries = self.projection.to_vec();
        let checksum = compute_checksum(&entries, self.revision);
        ProjectionSnapshot {
            revision: self.revision,
            sort: self.sort,
            entries,
            checksum,
            generated_at: now,
        }
    }

    /// Re-sort into a fresh projection. Returns whether it differs from the
    /// previous one; bumps the revision if so.
    fn rebuild(&mut self) -> bool {
        let mut rows: Vec<&StoredEntry> = self.entries.values().collect();
        let sort = self.sort;
        rows.sort_by(|a, b| {
            sort.compare(&a.entry, &b.entry)
                .then_with(|| a.position.cmp(&b.position))
        });
        let projection: Vec<Entry> = rows.into_iter().map(|stored| stored.entry.clone()).collect();

        if *self.projection == projection[..] {
            return false;
        }
        self.projection = Arc::from(projection);
        self.revision += 1;
        true
    }
}

impl Default for DatasetStore {
    fn default() -> Self {
        Self::new()
    }
}

fn log_stale(incoming: &Entry, stored: &Entry) {
    let err = SyncError::Stale {
        symbol: incoming.symbol.to_string(),
        incoming: incoming.observed_at.to_rfc3339(),
        stored: stored.observed_at.to_rfc3339(),
    };
    debug!(symbol = %incoming.symbol, "{}", err);
}

fn compute_checksum(entries: &[Entry], revision: u64) -> String {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.symbol.as_str().as_bytes());
        hasher.update(b"@");
        hasher.update(entry.observed_at.timestamp_millis().to_le_bytes());
        hasher.update(b":");
        // Entry serialization cannot fail: every field is a plain value.
        if let Ok(bytes) = serde_json::to_vec(entry) {
            hasher.update(&bytes);
        }
        hasher.update(b"|");
    }
    hasher.update(b"---");
    hasher.update(revision.to_le_bytes());

    format!("{:x}", hasher.finalize())
}

/// Verify that a projection snapshot's checksum matches its content.
pub fn verify_projection_integrity(snapshot: &ProjectionSnapshot) -> bool {
    snapshot.checksum == compute_checksum(&snapshot.entries, snapshot.revision)
}

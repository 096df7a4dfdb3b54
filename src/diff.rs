//! Classification of stored vs live snapshots.
//!
//! Pure set/compare logic over two tables keyed by card id. Nothing in
//! this module touches Notion, the calendar, or the filesystem; the
//! orchestrator decides what to do with the resulting id sets.

use crate::card::Card;
use crate::snapshot::Snapshot;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// The classification a single run acts on.
#[derive(Debug, Default)]
pub struct SyncDiff {
    pub new: Vec<String>,
    pub deleted: Vec<String>,
    pub modified: Vec<String>,
}

impl SyncDiff {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }
}

/// Classify every id in either table. Output vectors are sorted by id so
/// logs are reproducible across runs.
pub fn compute(stored: &Snapshot, live: &BTreeMap<String, Card>) -> SyncDiff {
    SyncDiff {
        new: compute_new(stored, live),
        deleted: compute_deleted(stored, live),
        modified: compute_modified(stored, live),
    }
}

/// Ids present live but not yet stored.
pub fn compute_new(stored: &Snapshot, live: &BTreeMap<String, Card>) -> Vec<String> {
    live.keys()
        .filter(|id| !stored.contains(id))
        .cloned()
        .collect()
}

/// Ids stored but no longer present live.
pub fn compute_deleted(stored: &Snapshot, live: &BTreeMap<String, Card>) -> Vec<String> {
    stored
        .rows()
        .filter(|row| !live.contains_key(&row.id))
        .map(|row| row.id.clone())
        .collect()
}

/// Ids present on both sides whose card changed in a way the calendar
/// can see.
///
/// A changed `last_edit` alone is not enough: Notion touches it for
/// metadata-only edits too, and recreating the event for those would be
/// pointless churn. An id is modified iff the edit timestamp changed,
/// one of {title, start, end} actually differs, and both timestamps are
/// known.
pub fn compute_modified(stored: &Snapshot, live: &BTreeMap<String, Card>) -> Vec<String> {
    live.iter()
        .filter_map(|(id, card)| {
            let row = stored.get(id)?;
            let (Some(stored_edit), Some(live_edit)) = (row.last_edit, card.last_edit) else {
                return None;
            };
            if stored_edit == live_edit {
                return None;
            }
            let field_changed = row.title != card.title
                || row.start_date != card.start_date
                || row.end_date != card.end_date;
            field_changed.then(|| id.clone())
        })
        .collect()
}

/// Stored ids whose event ended before `as_of`.
///
/// Computed but not wired into the default run order: past events stay
/// on the calendar unless eviction is explicitly re-enabled.
pub fn compute_outdated(stored: &Snapshot, as_of: NaiveDate) -> Vec<String> {
    stored
        .rows()
        .filter(|row| row.end_date.date() < as_of)
        .map(|row| row.id.clone())
        .collect()
}

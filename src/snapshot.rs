//! Snapshot store: the durable table of cards already mirrored into the
//! calendar, one CSV file per Notion database.
//!
//! A row exists in the table iff a corresponding event is believed to
//! exist in the calendar. Callers save after every mutating step so a
//! crash loses at most the in-flight operation.

use crate::card::Card;
use crate::error::{SyncError, SyncResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One persisted row: a card plus the calendar event handle it maps to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub id: String,
    pub last_edit: Option<NaiveDateTime>,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
    /// Handle returned by Calendar on creation. `None` only when the
    /// create call succeeded without reporting an id.
    pub event_id: Option<String>,
}

impl SnapshotRow {
    pub fn from_card(card: &Card, event_id: Option<String>) -> Self {
        Self {
            id: card.id.clone(),
            last_edit: card.last_edit,
            start_date: card.start_date,
            end_date: card.end_date,
            title: card.title.clone(),
            url: card.url.clone(),
            description: card.description.clone(),
            event_id,
        }
    }
}

/// The persisted table, keyed by card id.
///
/// Rows live in a `BTreeMap` so iteration order is stable within a run.
pub struct Snapshot {
    path: PathBuf,
    rows: BTreeMap<String, SnapshotRow>,
}

impl Snapshot {
    /// Load the snapshot for a database. A missing file yields an empty
    /// table; a present-but-corrupt file is a persistence error.
    pub fn load(path: impl Into<PathBuf>) -> SyncResult<Self> {
        let path = path.into();
        let mut rows = BTreeMap::new();

        if path.exists() {
            let mut reader = csv::Reader::from_path(&path)
                .map_err(|e| SyncError::Persist(format!("{}: {e}", path.display())))?;
            for record in reader.deserialize() {
                let row: SnapshotRow = record.map_err(|e| {
                    SyncError::Persist(format!("corrupt row in {}: {e}", path.display()))
                })?;
                rows.insert(row.id.clone(), row);
            }
        }

        Ok(Self { path, rows })
    }

    /// Overwrite the whole file with the current table.
    pub fn save(&self) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::Persist(format!("{}: {e}", parent.display())))?;
        }

        let mut writer = csv::Writer::from_path(&self.path)
            .map_err(|e| SyncError::Persist(format!("{}: {e}", self.path.display())))?;
        for row in self.rows.values() {
            writer
                .serialize(row)
                .map_err(|e| SyncError::Persist(format!("{}: {e}", self.path.display())))?;
        }
        writer
            .flush()
            .map_err(|e| SyncError::Persist(format!("{}: {e}", self.path.display())))?;

        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&SnapshotRow> {
        self.rows.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows.contains_key(id)
    }

    pub fn insert(&mut self, row: SnapshotRow) {
        self.rows.insert(row.id.clone(), row);
    }

    pub fn remove(&mut self, id: &str) -> Option<SnapshotRow> {
        self.rows.remove(id)
    }

    pub fn rows(&self) -> impl Iterator<Item = &SnapshotRow> {
        self.rows.values()
    }
}

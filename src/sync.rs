//! Run orchestrator: fetch, classify, apply.
//!
//! One `Syncer` drives one Notion database against one snapshot file.
//! A run is a single pass: fetch the live snapshot once, then apply
//! additions, removals, and updates in that order, saving the snapshot
//! after every individual mutation. Additions run first so an id that is
//! new this run is classified against the same live snapshot as
//! everything else and can never be mistaken for deleted.

use crate::calendar::{Calendar, DeleteOutcome};
use crate::card::Card;
use crate::diff;
use crate::error::SyncResult;
use crate::notion::NotionClient;
use crate::snapshot::{Snapshot, SnapshotRow};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// Per-run counters for one database.
#[derive(Debug, Default)]
pub struct SyncStats {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl SyncStats {
    pub fn merge(&mut self, other: &SyncStats) {
        self.added += other.added;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

pub struct Syncer<'a, C: Calendar> {
    notion: &'a NotionClient,
    calendar: &'a C,
    database_id: String,
    snapshot: Snapshot,
}

impl<'a, C: Calendar> Syncer<'a, C> {
    pub fn new(
        notion: &'a NotionClient,
        calendar: &'a C,
        database_id: &str,
        snapshot: Snapshot,
    ) -> Self {
        Self {
            notion,
            calendar,
            database_id: database_id.to_string(),
            snapshot,
        }
    }

    /// Run one reconciliation pass.
    ///
    /// A fetch failure aborts before any mutation. Per-card calendar
    /// failures are logged and counted without stopping the phase; a
    /// snapshot save failure is fatal since progress can no longer be
    /// recorded durably.
    ///
    /// `prune_past` additionally evicts events whose end date has
    /// passed. Off by default: past events stay on the calendar.
    pub async fn run(&mut self, prune_past: bool) -> SyncResult<SyncStats> {
        let live = self.notion.fetch_live_cards(&self.database_id).await?;
        let mut stats = SyncStats::default();

        if prune_past {
            let outdated =
                prune_candidates(&self.snapshot, &live, chrono::Local::now().date_naive());
            info!(count = outdated.len(), "outdated cards to evict");
            self.apply_deleted(&outdated, &mut stats).await?;
        }

        let new_ids = diff::compute_new(&self.snapshot, &live);
        info!(count = new_ids.len(), "cards added on Notion");
        self.apply_new(&new_ids, &live, &mut stats).await?;

        let deleted_ids = diff::compute_deleted(&self.snapshot, &live);
        info!(count = deleted_ids.len(), "cards deleted on Notion");
        self.apply_deleted(&deleted_ids, &mut stats).await?;

        let modified_ids = diff::compute_modified(&self.snapshot, &live);
        info!(count = modified_ids.len(), "cards modified on Notion");
        self.apply_modified(&modified_ids, &live, &mut stats).await?;

        Ok(stats)
    }

    async fn apply_new(
        &mut self,
        ids: &[String],
        live: &BTreeMap<String, Card>,
        stats: &mut SyncStats,
    ) -> SyncResult<()> {
        for id in ids {
            let Some(card) = live.get(id) else { continue };

            if self.snapshot.contains(id) {
                info!(id = %id, "skipping: already tracked");
                stats.skipped += 1;
                continue;
            }
            if is_duplicate(&self.snapshot, card) {
                info!(id = %id, title = %card.title, "skipping duplicate with identical title and dates");
                stats.skipped += 1;
                continue;
            }

            match self.calendar.create_event(card).await {
                Ok(event_id) => {
                    self.snapshot.insert(SnapshotRow::from_card(card, event_id));
                    self.snapshot.save()?;
                    stats.added += 1;
                    info!(id = %id, title = %card.title, "card added to calendar");
                }
                Err(err) => {
                    // Not recorded: the card stays "new" and is retried
                    // on the next run.
                    error!(id = %id, title = %card.title, error = %err, "failed to add card");
                    stats.failed += 1;
                }
            }
        }
        Ok(())
    }

    async fn apply_deleted(&mut self, ids: &[String], stats: &mut SyncStats) -> SyncResult<()> {
        for id in ids {
            let event_id = match self.snapshot.get(id) {
                Some(row) => row.event_id.clone(),
                None => continue,
            };

            if let Some(handle) = event_id {
                if let DeleteOutcome::Failed(reason) = self.calendar.delete_event(&handle).await {
                    warn!(id = %id, reason = %reason, "calendar delete failed; dropping row anyway");
                }
            } else {
                warn!(id = %id, "row has no event handle; dropping without a calendar delete");
            }

            self.snapshot.remove(id);
            self.snapshot.save()?;
            stats.deleted += 1;
            info!(id = %id, "card removed from snapshot");
        }
        Ok(())
    }

    async fn apply_modified(
        &mut self,
        ids: &[String],
        live: &BTreeMap<String, Card>,
        stats: &mut SyncStats,
    ) -> SyncResult<()> {
        for id in ids {
            let Some(card) = live.get(id) else { continue };

            if let Some(handle) = self.snapshot.get(id).and_then(|row| row.event_id.clone()) {
                if let DeleteOutcome::Failed(reason) = self.calendar.delete_event(&handle).await {
                    warn!(id = %id, reason = %reason, "could not delete old event; replacing row anyway");
                }
            }

            match self.calendar.create_event(card).await {
                Ok(event_id) => {
                    self.snapshot.insert(SnapshotRow::from_card(card, event_id));
                    self.snapshot.save()?;
                    stats.updated += 1;
                    info!(id = %id, title = %card.title, "card updated");
                }
                Err(err) => {
                    // The stale row stays; the card remains classified
                    // modified and the recreate is retried next run.
                    error!(id = %id, title = %card.title, error = %err, "failed to recreate modified event");
                    stats.failed += 1;
                }
            }
        }
        Ok(())
    }
}

/// A live card is a duplicate when some already-tracked row has the same
/// title and dates under a different id.
fn is_duplicate(snapshot: &Snapshot, card: &Card) -> bool {
    snapshot.rows().any(|row| {
        row.title == card.title
            && row.start_date == card.start_date
            && row.end_date == card.end_date
    })
}

/// Outdated rows eligible for eviction. A card that is still live is
/// left alone: evicting it would only have the add phase recreate it in
/// the same run.
fn prune_candidates(
    snapshot: &Snapshot,
    live: &BTreeMap<String, Card>,
    as_of: NaiveDate,
) -> Vec<String> {
    let mut ids = diff::compute_outdated(snapshot, as_of);
    ids.retain(|id| !live.contains_key(id));
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::parse_notion_datetime;
    use crate::error::SyncError;
    use std::cell::RefCell;
    use std::path::Path;

    /// Records calendar calls instead of driving osascript.
    struct RecordingCalendar {
        created: RefCell<Vec<Card>>,
        deleted: RefCell<Vec<String>>,
        failing_titles: Vec<String>,
        fail_deletes: bool,
    }

    impl RecordingCalendar {
        fn new() -> Self {
            Self {
                created: RefCell::new(Vec::new()),
                deleted: RefCell::new(Vec::new()),
                failing_titles: Vec::new(),
                fail_deletes: false,
            }
        }
    }

    impl Calendar for RecordingCalendar {
        async fn create_event(&self, card: &Card) -> SyncResult<Option<String>> {
            if self.failing_titles.contains(&card.title) {
                return Err(SyncError::CreateEvent("calendar refused".to_string()));
            }
            let mut created = self.created.borrow_mut();
            created.push(card.clone());
            Ok(Some(format!("evt-{}", created.len())))
        }

        async fn delete_event(&self, event_id: &str) -> DeleteOutcome {
            self.deleted.borrow_mut().push(event_id.to_string());
            if self.fail_deletes {
                DeleteOutcome::Failed("event already gone".to_string())
            } else {
                DeleteOutcome::Deleted
            }
        }
    }

    fn card(id: &str, edit: &str, title: &str, start: &str, end: &str) -> Card {
        Card {
            id: id.to_string(),
            last_edit: Some(parse_notion_datetime(edit).unwrap()),
            start_date: parse_notion_datetime(start).unwrap(),
            end_date: parse_notion_datetime(end).unwrap(),
            title: title.to_string(),
            url: String::new(),
            description: String::new(),
        }
    }

    fn live_with(cards: &[Card]) -> BTreeMap<String, Card> {
        cards.iter().map(|c| (c.id.clone(), c.clone())).collect()
    }

    fn snapshot_at(path: &Path, rows: &[(Card, Option<&str>)]) -> Snapshot {
        let mut snapshot = Snapshot::load(path).unwrap();
        for (c, handle) in rows {
            snapshot.insert(SnapshotRow::from_card(c, handle.map(|h| h.to_string())));
        }
        snapshot
    }

    #[tokio::test]
    async fn test_modified_card_replaces_row_and_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.csv");

        let old = card("a", "2024-01-01T08:00:00", "Trip", "2024-01-01", "2024-01-02");
        let snapshot = snapshot_at(&path, &[(old, Some("evt-old"))]);
        let updated = card("a", "2024-01-05T09:30:00", "Trip v2", "2024-01-01", "2024-01-03");
        let live = live_with(&[updated.clone()]);

        let modified = diff::compute_modified(&snapshot, &live);
        assert_eq!(modified, vec!["a"]);

        let notion = NotionClient::new("test-token");
        let calendar = RecordingCalendar::new();
        let mut syncer = Syncer::new(&notion, &calendar, "db-1", snapshot);

        let mut stats = SyncStats::default();
        syncer.apply_modified(&modified, &live, &mut stats).await.unwrap();

        // Old handle deleted, one event created in its place.
        assert_eq!(*calendar.deleted.borrow(), vec!["evt-old"]);
        assert_eq!(calendar.created.borrow().len(), 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.failed, 0);

        // The row was replaced wholesale and saved to disk.
        let reloaded = Snapshot::load(&path).unwrap();
        let row = reloaded.get("a").unwrap();
        assert_eq!(row.title, "Trip v2");
        assert_eq!(row.event_id.as_deref(), Some("evt-1"));
        assert_eq!(row.last_edit, updated.last_edit);
        assert_eq!(row.end_date.to_string(), "2024-01-03 00:00:00");
    }

    #[tokio::test]
    async fn test_failed_create_leaves_card_new_for_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.csv");
        let snapshot = snapshot_at(&path, &[]);

        let doomed = card("a", "2024-01-01T08:00:00", "Doomed", "2024-02-01", "2024-02-01");
        let live = live_with(&[doomed]);

        let notion = NotionClient::new("test-token");
        let calendar = RecordingCalendar {
            failing_titles: vec!["Doomed".to_string()],
            ..RecordingCalendar::new()
        };
        let mut syncer = Syncer::new(&notion, &calendar, "db-1", snapshot);

        let new_ids = diff::compute_new(&syncer.snapshot, &live);
        let mut stats = SyncStats::default();
        syncer.apply_new(&new_ids, &live, &mut stats).await.unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.added, 0);
        assert!(!syncer.snapshot.contains("a"));
        // Still classified new, so the next run retries it.
        assert_eq!(diff::compute_new(&syncer.snapshot, &live), vec!["a"]);
    }

    #[tokio::test]
    async fn test_one_bad_card_does_not_stop_the_phase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.csv");
        let snapshot = snapshot_at(&path, &[]);

        let doomed = card("a", "2024-01-01T08:00:00", "Doomed", "2024-02-01", "2024-02-01");
        let fine = card("b", "2024-01-01T08:00:00", "Fine", "2024-02-02", "2024-02-02");
        let live = live_with(&[doomed, fine]);

        let notion = NotionClient::new("test-token");
        let calendar = RecordingCalendar {
            failing_titles: vec!["Doomed".to_string()],
            ..RecordingCalendar::new()
        };
        let mut syncer = Syncer::new(&notion, &calendar, "db-1", snapshot);

        let new_ids = diff::compute_new(&syncer.snapshot, &live);
        let mut stats = SyncStats::default();
        syncer.apply_new(&new_ids, &live, &mut stats).await.unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.added, 1);
        assert!(!syncer.snapshot.contains("a"));
        assert!(syncer.snapshot.contains("b"));
    }

    #[tokio::test]
    async fn test_failed_delete_still_drops_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.csv");

        let gone = card("a", "2024-01-01T08:00:00", "Gone", "2024-02-01", "2024-02-01");
        let snapshot = snapshot_at(&path, &[(gone, Some("evt-stale"))]);

        let notion = NotionClient::new("test-token");
        let calendar = RecordingCalendar {
            fail_deletes: true,
            ..RecordingCalendar::new()
        };
        let mut syncer = Syncer::new(&notion, &calendar, "db-1", snapshot);

        let mut stats = SyncStats::default();
        syncer
            .apply_deleted(&["a".to_string()], &mut stats)
            .await
            .unwrap();

        // The delete was attempted, failed, and the row dropped anyway.
        assert_eq!(*calendar.deleted.borrow(), vec!["evt-stale"]);
        assert_eq!(stats.deleted, 1);
        assert!(!syncer.snapshot.contains("a"));
        assert!(!Snapshot::load(&path).unwrap().contains("a"));
    }

    #[tokio::test]
    async fn test_row_without_handle_drops_without_calendar_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.csv");

        let orphan = card("a", "2024-01-01T08:00:00", "Orphan", "2024-02-01", "2024-02-01");
        let snapshot = snapshot_at(&path, &[(orphan, None)]);

        let notion = NotionClient::new("test-token");
        let calendar = RecordingCalendar::new();
        let mut syncer = Syncer::new(&notion, &calendar, "db-1", snapshot);

        let mut stats = SyncStats::default();
        syncer
            .apply_deleted(&["a".to_string()], &mut stats)
            .await
            .unwrap();

        assert!(calendar.deleted.borrow().is_empty());
        assert_eq!(stats.deleted, 1);
        assert!(!syncer.snapshot.contains("a"));
    }

    #[test]
    fn test_prune_skips_cards_still_live() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.csv");

        let past_gone = card("gone", "2024-01-01T08:00:00", "Gone", "2024-01-01", "2024-01-02");
        let past_live = card("live", "2024-01-01T08:00:00", "Live", "2024-01-01", "2024-01-02");
        let future = card("future", "2024-01-01T08:00:00", "Future", "2099-01-01", "2099-01-02");
        let snapshot = snapshot_at(
            &path,
            &[
                (past_gone, Some("evt-1")),
                (past_live.clone(), Some("evt-2")),
                (future, Some("evt-3")),
            ],
        );
        let live = live_with(&[past_live]);

        let as_of = parse_notion_datetime("2024-02-01").unwrap().date();
        assert_eq!(prune_candidates(&snapshot, &live, as_of), vec!["gone"]);
    }

    #[test]
    fn test_duplicate_requires_all_three_fields() {
        let dir = tempfile::tempdir().unwrap();
        let standup = card("a", "2024-01-05T09:30:00", "Standup", "2024-02-01T10:00:00", "2024-02-01T11:00:00");
        let snapshot = snapshot_at(&dir.path().join("db.csv"), &[(standup.clone(), Some("evt-1"))]);

        let mut same_fields = standup.clone();
        same_fields.id = "b".to_string();
        assert!(is_duplicate(&snapshot, &same_fields));

        let mut different_title = same_fields.clone();
        different_title.title = "Retro".to_string();
        assert!(!is_duplicate(&snapshot, &different_title));

        let mut different_start = same_fields.clone();
        different_start.start_date = parse_notion_datetime("2024-02-02T10:00:00").unwrap();
        assert!(!is_duplicate(&snapshot, &different_start));
    }

    #[test]
    fn test_stats_merge() {
        let mut totals = SyncStats::default();
        totals.merge(&SyncStats {
            added: 2,
            updated: 1,
            deleted: 3,
            failed: 1,
            skipped: 0,
        });
        totals.merge(&SyncStats {
            added: 1,
            ..Default::default()
        });
        assert_eq!(totals.added, 3);
        assert_eq!(totals.deleted, 3);
        assert_eq!(totals.failed, 1);
    }
}

//! Canonical card shape and normalization from raw Notion pages.
//!
//! A `Card` is the one entry shape the rest of the crate works with:
//! the reconciler diffs cards, the snapshot store persists them, and
//! the calendar adapter renders them.

use crate::error::{SyncError, SyncResult};
use crate::notion::Page;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Title used when a page has no usable title text.
pub const FALLBACK_TITLE: &str = "Untitled Event";

/// One calendar-worthy entry, normalized from a Notion page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    /// Notion page id. Stable, unique, compared as an exact string.
    pub id: String,
    /// Last-edited timestamp on the Notion side.
    pub last_edit: Option<NaiveDateTime>,
    pub start_date: NaiveDateTime,
    /// Equal to `start_date` when the source provides no end.
    pub end_date: NaiveDateTime,
    pub title: String,
    pub url: String,
    pub description: String,
}

impl Card {
    /// Normalize a raw Notion page into a card.
    ///
    /// Returns `Ok(None)` for pages whose date property is unset (not
    /// calendar-worthy). Pages missing the `Name` or `Date` property
    /// object entirely are structurally malformed and yield an error.
    /// An empty title falls back to [`FALLBACK_TITLE`].
    pub fn from_page(page: &Page) -> SyncResult<Option<Card>> {
        let title_prop = page.properties.name.as_ref().ok_or_else(|| {
            SyncError::Normalize(format!("page {} has no Name property", page.id))
        })?;
        let date_prop = page.properties.date.as_ref().ok_or_else(|| {
            SyncError::Normalize(format!("page {} has no Date property", page.id))
        })?;

        let Some(range) = &date_prop.date else {
            return Ok(None);
        };

        let start_date = parse_notion_datetime(&range.start)?;
        let end_date = match &range.end {
            Some(end) => parse_notion_datetime(end)?,
            None => start_date,
        };

        let title = title_prop
            .title
            .first()
            .map(|t| t.plain_text.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| FALLBACK_TITLE.to_string());

        let last_edit = match &page.last_edited_time {
            Some(raw) => Some(parse_notion_datetime(raw)?),
            None => None,
        };

        let url = page
            .properties
            .url
            .as_ref()
            .and_then(|p| p.url.clone())
            .unwrap_or_default();

        let description = page
            .properties
            .description
            .as_ref()
            .and_then(|p| p.rich_text.first())
            .map(|t| t.plain_text.clone())
            .unwrap_or_default();

        Ok(Some(Card {
            id: page.id.clone(),
            last_edit,
            start_date,
            end_date,
            title,
            url,
            description,
        }))
    }
}

/// Parse Notion's date-or-datetime representation.
///
/// Plain dates (`2024-01-01`) get a midnight time component. Datetimes
/// (`2024-01-01T15:30:00.000+02:00`) keep their wall-clock time; the
/// fractional seconds and offset are dropped, since Calendar events are
/// created in local time.
pub fn parse_notion_datetime(raw: &str) -> SyncResult<NaiveDateTime> {
    match raw.split_once('T') {
        None => {
            let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|e| SyncError::Normalize(format!("bad date '{raw}': {e}")))?;
            Ok(date.and_time(NaiveTime::MIN))
        }
        Some((date_part, time_part)) => {
            let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
                .map_err(|e| SyncError::Normalize(format!("bad date '{raw}': {e}")))?;
            let clock: String = time_part.chars().take(8).collect();
            let time = NaiveTime::parse_from_str(&clock, "%H:%M:%S")
                .map_err(|e| SyncError::Normalize(format!("bad time '{raw}': {e}")))?;
            Ok(date.and_time(time))
        }
    }
}

//! Apple Calendar adapter.
//!
//! Events are created and deleted by generating AppleScript and piping
//! it through `osascript`. Script generation is kept separate from
//! execution so the quoting and date handling can be tested without a
//! calendar.

use crate::card::Card;
use crate::error::{SyncError, SyncResult};
use chrono::{Duration, NaiveDateTime, NaiveTime};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Free text longer than this is truncated before being spliced into a
/// script; osascript rejects very long single-line string literals.
const MAX_TEXT_LEN: usize = 900;

/// Result of a best-effort delete. A failed delete never aborts the
/// caller's batch; a stale event left on the calendar is less harmful
/// than a run that stops half-way.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    Deleted,
    Failed(String),
}

/// The calendar surface the orchestrator drives.
///
/// [`CalendarClient`] is the real implementation; tests substitute a
/// recording double so the apply paths can run without a calendar.
pub trait Calendar {
    /// Create an event for a card and return the handle the calendar
    /// assigned to it.
    ///
    /// Returns `Ok(None)` when the create succeeded but no id came back;
    /// the caller records the row without a handle.
    async fn create_event(&self, card: &Card) -> SyncResult<Option<String>>;

    /// Delete the event with the given handle, best-effort.
    async fn delete_event(&self, event_id: &str) -> DeleteOutcome;
}

pub struct CalendarClient {
    name: String,
    osascript: PathBuf,
}

impl CalendarClient {
    /// Create a client for the named calendar. Fails if `osascript` is
    /// not on PATH.
    pub fn new(calendar_name: &str) -> SyncResult<Self> {
        let osascript = which::which("osascript").map_err(|_| {
            SyncError::Config(
                "osascript not found in PATH; notioncal drives the macOS Calendar app".to_string(),
            )
        })?;
        Ok(Self {
            name: calendar_name.to_string(),
            osascript,
        })
    }

    async fn run_script(&self, script: &str) -> Result<String, String> {
        let mut child = Command::new(&self.osascript)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn osascript: {e}"))?;

        {
            let mut stdin = child.stdin.take().unwrap();
            stdin
                .write_all(script.as_bytes())
                .await
                .map_err(|e| format!("failed to write script to osascript: {e}"))?;
            // Drop stdin to signal EOF
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("failed to wait for osascript: {e}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "osascript exited with {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Calendar for CalendarClient {
    async fn create_event(&self, card: &Card) -> SyncResult<Option<String>> {
        let script = build_create_script(&self.name, card);
        debug!(title = %card.title, "create-event script:\n{script}");

        let stdout = self
            .run_script(&script)
            .await
            .map_err(SyncError::CreateEvent)?;

        let event_id = stdout
            .split_whitespace()
            .last()
            .map(|id| id.to_string());
        match &event_id {
            Some(id) => {
                info!(title = %card.title, event_id = %id, "created calendar event")
            }
            None => {
                warn!(title = %card.title, "event created but Calendar returned no event id")
            }
        }
        Ok(event_id)
    }

    async fn delete_event(&self, event_id: &str) -> DeleteOutcome {
        let script = build_delete_script(&self.name, event_id);
        match self.run_script(&script).await {
            Ok(_) => {
                info!(event_id = %event_id, "removed calendar event");
                DeleteOutcome::Deleted
            }
            Err(reason) => {
                error!(event_id = %event_id, reason = %reason, "failed to delete calendar event");
                DeleteOutcome::Failed(reason)
            }
        }
    }
}

/// An event is all-day when both ends sit exactly at midnight.
fn is_all_day(card: &Card) -> bool {
    card.start_date.time() == NaiveTime::MIN && card.end_date.time() == NaiveTime::MIN
}

/// End datetime actually submitted to Calendar.
///
/// All-day events get their end advanced one day: the card's end date is
/// inclusive, Calendar's all-day end is exclusive. A timed event ending
/// at exactly midnight means "no end time given" and is stretched to the
/// end of that day instead of producing a zero-length event.
fn effective_end(card: &Card) -> NaiveDateTime {
    if is_all_day(card) {
        card.end_date + Duration::days(1)
    } else if card.end_date.time() == NaiveTime::MIN {
        card.end_date
            .date()
            .and_hms_opt(23, 59, 59)
            .unwrap()
    } else {
        card.end_date
    }
}

/// Render a datetime as an AppleScript date literal,
/// e.g. `Friday, March 01, 2024 at 02:30:00 PM`.
fn format_applescript_date(dt: NaiveDateTime) -> String {
    dt.format("%A, %B %d, %Y at %I:%M:%S %p").to_string()
}

/// Escape free text for a double-quoted AppleScript string.
///
/// Literal `\n` sequences and real line breaks are collapsed to spaces
/// (either would terminate the single-line literal), carriage returns
/// dropped, then backslashes and quotes escaped. Text beyond
/// [`MAX_TEXT_LEN`] characters is truncated with a marker.
fn escape(text: &str) -> String {
    let mut s: String = if text.chars().count() > MAX_TEXT_LEN {
        let truncated: String = text.chars().take(MAX_TEXT_LEN).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    };
    s = s.replace("\\n", " ").replace('\n', " ").replace('\r', "");
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn build_create_script(calendar_name: &str, card: &Card) -> String {
    let all_day = is_all_day(card);
    let start = format_applescript_date(card.start_date);
    let end = format_applescript_date(effective_end(card));

    let mut script = format!(
        "set theStartDate to date \"{start}\"\nset theEndDate to date \"{end}\"\n"
    );
    script.push_str("tell application \"Calendar\"\n");
    script.push_str(&format!("    tell calendar \"{}\"\n", escape(calendar_name)));

    let properties = if all_day {
        format!(
            "{{summary:\"{}\", start date:theStartDate, end date:theEndDate, allday event:true}}",
            escape(&card.title)
        )
    } else {
        format!(
            "{{summary:\"{}\", start date:theStartDate, end date:theEndDate}}",
            escape(&card.title)
        )
    };
    script.push_str(&format!(
        "        set newEvent to make new event with properties {properties}\n"
    ));

    if !card.url.is_empty() {
        script.push_str(&format!(
            "        set url of newEvent to \"{}\"\n",
            escape(&card.url)
        ));
    }
    if !card.description.is_empty() {
        script.push_str(&format!(
            "        set description of newEvent to \"{}\"\n",
            escape(&card.description)
        ));
    }

    script.push_str("        set eventId to id of newEvent\n");
    script.push_str("        return eventId\n");
    script.push_str("    end tell\n");
    script.push_str("    save\n");
    script.push_str("end tell\n");
    script
}

fn build_delete_script(calendar_name: &str, event_id: &str) -> String {
    format!(
        "tell application \"Calendar\"\n    tell calendar \"{}\"\n        delete event id \"{}\"\n        save\n    end tell\nend tell\n",
        escape(calendar_name),
        escape(event_id)
    )
}

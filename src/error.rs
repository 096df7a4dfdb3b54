//! Error types for the reconciliation core.

use thiserror::Error;

/// Errors that can occur while syncing a database.
///
/// Fetch and persistence errors are structural and abort the run;
/// create failures are isolated per card by the orchestrator. Delete
/// failures are deliberately not represented here — they are a
/// best-effort outcome, not an error (see the calendar module).
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to fetch live cards: {0}")]
    Fetch(String),

    #[error("Malformed card record: {0}")]
    Normalize(String),

    #[error("Failed to create calendar event: {0}")]
    CreateEvent(String),

    #[error("Failed to persist snapshot: {0}")]
    Persist(String),
}

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

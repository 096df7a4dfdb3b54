//! Notion API client.
//!
//! Fetches the live set of cards for a database via the paginated
//! `POST /v1/databases/{id}/query` endpoint. The raw page payload is
//! parsed into typed structs here; normalization into [`Card`] lives in
//! the card module.

use crate::card::Card;
use crate::error::{SyncError, SyncResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

const NOTION_BASE_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2021-08-16";

pub struct NotionClient {
    http: reqwest::Client,
    token: String,
}

/// One page of query results.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    results: Vec<Page>,
    has_more: bool,
    next_cursor: Option<String>,
}

/// A raw Notion page, reduced to the properties this crate reads.
#[derive(Debug, Deserialize)]
pub struct Page {
    pub id: String,
    pub last_edited_time: Option<String>,
    pub properties: Properties,
}

#[derive(Debug, Deserialize)]
pub struct Properties {
    #[serde(rename = "Name")]
    pub name: Option<TitleProperty>,
    #[serde(rename = "Date")]
    pub date: Option<DateProperty>,
    #[serde(rename = "URL")]
    pub url: Option<UrlProperty>,
    #[serde(rename = "Description")]
    pub description: Option<RichTextProperty>,
}

#[derive(Debug, Deserialize)]
pub struct TitleProperty {
    #[serde(default)]
    pub title: Vec<RichText>,
}

#[derive(Debug, Deserialize)]
pub struct RichText {
    pub plain_text: String,
}

#[derive(Debug, Deserialize)]
pub struct DateProperty {
    pub date: Option<DateRange>,
}

#[derive(Debug, Deserialize)]
pub struct DateRange {
    pub start: String,
    pub end: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UrlProperty {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RichTextProperty {
    #[serde(default)]
    pub rich_text: Vec<RichText>,
}

impl NotionClient {
    pub fn new(token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.to_string(),
        }
    }

    /// Fetch and normalize every card in a database.
    ///
    /// Pages through the query endpoint until `has_more` is false. A
    /// database with zero dated cards yields an empty map. Any failed
    /// page request or malformed payload fails the whole fetch; partial
    /// pages are discarded so callers never see a half snapshot.
    pub async fn fetch_live_cards(&self, database_id: &str) -> SyncResult<BTreeMap<String, Card>> {
        let url = format!("{NOTION_BASE_URL}/databases/{database_id}/query");
        let mut cards = BTreeMap::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut payload = serde_json::Map::new();
            if let Some(c) = &cursor {
                payload.insert("start_cursor".to_string(), serde_json::json!(c));
            }

            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.token)
                .header("Notion-Version", NOTION_VERSION)
                .json(&serde_json::Value::Object(payload))
                .send()
                .await
                .map_err(|e| SyncError::Fetch(format!("query request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SyncError::Fetch(format!("query returned {status}: {body}")));
            }

            let page: QueryResponse = response
                .json()
                .await
                .map_err(|e| SyncError::Fetch(format!("malformed query response: {e}")))?;

            for result in &page.results {
                match Card::from_page(result)? {
                    Some(card) => {
                        cards.insert(card.id.clone(), card);
                    }
                    None => debug!(page = %result.id, "skipping page without a date"),
                }
            }

            if !page.has_more {
                break;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                // has_more without a cursor would loop forever
                None => {
                    return Err(SyncError::Fetch(
                        "query response sets has_more but carries no next_cursor".to_string(),
                    ))
                }
            }
        }

        Ok(cards)
    }
}

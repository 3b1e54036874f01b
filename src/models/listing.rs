//! Shapes used while enumerating the bucket.

use super::media::ObjectRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One bounded page returned by `ObjectStore::list`.
///
/// Not persisted; rebuilt on every listing request.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    /// Records in key order.
    pub records: Vec<ObjectRecord>,

    /// Whether the store claims more data follows this page.
    pub truncated: bool,

    /// Opaque cursor for the next page.
    pub next_page_token: Option<String>,
}

/// An enumerated object as returned to API clients.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaListing {
    pub key: String,
    pub url: String,
    pub size: u64,
    pub uploaded: DateTime<Utc>,
    pub content_type: String,
}

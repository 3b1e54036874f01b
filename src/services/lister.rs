//! Lister: flat enumeration of the bucket across store pages.
//!
//! The store lists with eventual consistency, so the result is a snapshot
//! that may lag writes made while the enumeration runs. Callers get no
//! stronger guarantee than that.

use super::object_store::{ObjectStore, StoreError};
use crate::{
    errors::CacheError,
    models::{
        listing::MediaListing,
        media::{DEFAULT_CONTENT_TYPE, ObjectRecord},
    },
};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Lister {
    store: Arc<dyn ObjectStore>,
    public_base_url: String,
}

impl Lister {
    pub fn new(store: Arc<dyn ObjectStore>, public_base_url: impl Into<String>) -> Self {
        Self {
            store,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Walk every page and return all records with their public URLs.
    ///
    /// Stops on the first page without a usable continuation token, even if
    /// that page still claims to be truncated, and on a token that repeats.
    pub async fn list_all(&self) -> Result<Vec<MediaListing>, CacheError> {
        let mut listings = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .store
                .list(token.as_deref())
                .await
                .map_err(list_error)?;
            pages += 1;
            listings.extend(page.records.into_iter().map(|r| self.to_listing(r)));

            if !page.truncated {
                break;
            }
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    warn!("store repeated continuation token after {} pages", pages);
                    break;
                }
                Some(next) => token = Some(next),
                None => {
                    warn!("store reported more data without a continuation token");
                    break;
                }
            }
        }

        debug!("listed {} objects across {} pages", listings.len(), pages);
        Ok(listings)
    }

    fn to_listing(&self, record: ObjectRecord) -> MediaListing {
        MediaListing {
            url: format!("{}/{}", self.public_base_url, record.key),
            key: record.key,
            size: record.size,
            uploaded: record.uploaded_at,
            content_type: record
                .content_type
                .filter(|ct| !ct.is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        }
    }
}

fn list_error(err: StoreError) -> CacheError {
    CacheError::StoreReadFailed(err.to_string())
}

//! Shared state handed to every handler.

use crate::services::{
    cache_service::MediaCacheService,
    lister::Lister,
    origins::{ClientSuppliedOrigin, GenerativeModelOrigin, RemoteFetchOrigin},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub cache: MediaCacheService,
    pub lister: Lister,
    pub remote: RemoteFetchOrigin,
    pub generative: GenerativeModelOrigin,
    pub uploads: ClientSuppliedOrigin,
    /// Pre-shared identity token guarding the image routes. With `None` they answer 401.
    pub auth_guid: Option<Arc<str>>,
}

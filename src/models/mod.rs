//! Core data models for the media cache.
//!
//! `media` holds the stored unit (a keyed body plus its HTTP metadata) and
//! `listing` the transient shapes used while enumerating the bucket.

pub mod listing;
pub mod media;

pub mod cache_key;
pub mod cache_service;
pub mod disk_store;
pub mod lister;
pub mod object_store;
pub mod origins;

pub mod auth;
pub mod generation_handlers;
pub mod health_handlers;
pub mod media_handlers;
pub mod proxy_handlers;

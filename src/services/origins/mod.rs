//! Origin adapters: the upstream sources of media bytes.
//!
//! Every variant exposes the same `OriginAdapter` contract. The cache service
//! is generic over it and never branches on the concrete origin.

pub mod client_supplied;
pub mod generative;
pub mod model_runner;
pub mod remote_fetch;

use crate::models::media::MediaBody;
use async_trait::async_trait;
use base64::{
    Engine as _, alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use serde_json::Value;
use thiserror::Error;

pub use client_supplied::{ClientPayload, ClientSuppliedOrigin};
pub use generative::{GenerationRequest, GenerativeModelOrigin};
pub use model_runner::{ModelRunner, WorkersAiRunner};
pub use remote_fetch::{RemoteFetchOrigin, RemoteSource};

/// The single failure kind of every adapter.
#[derive(Debug, Error)]
pub enum OriginError {
    /// Upstream returned a non-success status, or the request itself failed
    /// (`status` is `None` for network-level failures).
    #[error("{message}")]
    Upstream { status: Option<u16>, message: String },
    /// Upstream answered, but not in the shape expected for this origin.
    #[error("{0}")]
    Format(String),
    /// Parameters rejected before any upstream call.
    #[error("{0}")]
    Invalid(String),
}

impl OriginError {
    pub fn network(err: impl std::fmt::Display) -> Self {
        OriginError::Upstream {
            status: None,
            message: err.to_string(),
        }
    }
}

/// Standard alphabet, padding optional, stray trailing bits ignored.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode base64 the way browsers' `atob` does: ASCII whitespace anywhere
/// is skipped and `=` padding may be left off.
pub fn decode_base64(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    LENIENT_BASE64.decode(compact)
}

/// What an adapter produced: bytes plus a content type, which is always set.
#[derive(Debug)]
pub struct OriginPayload {
    pub body: MediaBody,
    pub content_type: String,
}

/// Observability data about an origin call; never used for cache addressing.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginDescriptor {
    pub origin_id: String,
    pub inputs: Value,
}

#[async_trait]
pub trait OriginAdapter: Send + Sync {
    type Params: Send + 'static;

    /// Reject empty or malformed parameters before any store or origin call.
    fn validate(&self, params: &Self::Params) -> Result<(), OriginError>;

    /// Origin identifier and echoed inputs for the caller.
    fn describe(&self, params: &Self::Params) -> OriginDescriptor;

    /// Whether `produce` hands back a live stream that may be tee'd into the
    /// store and the response at once. When false, the payload is buffered
    /// before the write.
    fn supports_streaming_passthrough(&self) -> bool {
        false
    }

    async fn produce(&self, params: Self::Params) -> Result<OriginPayload, OriginError>;
}

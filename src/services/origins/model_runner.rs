//! Model execution capability consumed by `GenerativeModelOrigin`.

use super::OriginError;
use crate::models::media::ByteStream;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::{fmt, io};
use tracing::debug;

/// Shape of a model response; which one arrives depends on the model.
pub enum ModelResponse {
    /// A JSON document, usually carrying a base64 field.
    Json(Value),
    /// Raw output bytes.
    Stream(ByteStream),
}

impl fmt::Debug for ModelResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelResponse::Json(value) => f.debug_tuple("Json").field(value).finish(),
            ModelResponse::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[async_trait]
pub trait ModelRunner: Send + Sync {
    async fn run(&self, model_id: &str, inputs: &Value) -> Result<ModelResponse, OriginError>;
}

/// Optional AI gateway routing in front of Workers AI.
#[derive(Debug, Clone)]
pub struct AiGateway {
    pub base_url: String,
    pub id: String,
    pub cache_ttl_secs: u64,
}

/// Runs models through the Workers AI REST API.
#[derive(Clone)]
pub struct WorkersAiRunner {
    client: reqwest::Client,
    base_url: String,
    account_id: String,
    api_token: String,
    gateway: Option<AiGateway>,
}

impl WorkersAiRunner {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        account_id: impl Into<String>,
        api_token: impl Into<String>,
        gateway: Option<AiGateway>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            account_id: account_id.into(),
            api_token: api_token.into(),
            gateway,
        }
    }

    pub fn endpoint(&self, model_id: &str) -> String {
        match &self.gateway {
            Some(gateway) => format!(
                "{}/{}/{}/workers-ai/{}",
                gateway.base_url.trim_end_matches('/'),
                self.account_id,
                gateway.id,
                model_id
            ),
            None => format!(
                "{}/accounts/{}/ai/run/{}",
                self.base_url, self.account_id, model_id
            ),
        }
    }
}

#[async_trait]
impl ModelRunner for WorkersAiRunner {
    async fn run(&self, model_id: &str, inputs: &Value) -> Result<ModelResponse, OriginError> {
        if self.account_id.is_empty() || self.api_token.is_empty() {
            return Err(OriginError::Upstream {
                status: None,
                message: "model runner is not configured (missing account id or api token)"
                    .into(),
            });
        }

        let mut request = self
            .client
            .post(self.endpoint(model_id))
            .bearer_auth(&self.api_token)
            .json(inputs);
        if let Some(gateway) = &self.gateway {
            request = request
                .header("cf-aig-cache-ttl", gateway.cache_ttl_secs.to_string())
                .header("cf-aig-skip-cache", "false");
        }

        debug!("running model {}", model_id);
        let response = request.send().await.map_err(OriginError::network)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(OriginError::Upstream {
                status: Some(status.as_u16()),
                message: format!("model {} failed with {}: {}", model_id, status, detail),
            });
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if !is_json {
            let stream = response.bytes_stream().map_err(io::Error::other).boxed();
            return Ok(ModelResponse::Stream(stream));
        }

        let mut body: Value = response
            .json()
            .await
            .map_err(|err| OriginError::Format(format!("invalid JSON from {}: {}", model_id, err)))?;

        // REST responses wrap the model output as {"result": ..., "success": ...}.
        if let Some(result) = body.get_mut("result") {
            return Ok(ModelResponse::Json(result.take()));
        }
        Ok(ModelResponse::Json(body))
    }
}

//! Generative-model origin.
//!
//! Each supported model is registered in `MODELS` with the response shape it
//! returns. The decode path is picked from that catalog by alias, never by
//! inspecting the response.

use super::{
    OriginAdapter, OriginDescriptor, OriginError, OriginPayload, decode_base64,
    model_runner::{ModelResponse, ModelRunner},
};
use crate::models::media::MediaBody;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// How a model delivers its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputShape {
    /// A JSON object whose `field` holds base64 content.
    EncodedField { field: &'static str },
    /// The raw bytes, streamed.
    ByteStream,
}

#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub alias: &'static str,
    pub model_id: &'static str,
    pub output: OutputShape,
    pub content_type: &'static str,
}

pub const MODELS: &[ModelSpec] = &[
    ModelSpec {
        alias: "stable-diffusion",
        model_id: "@cf/stabilityai/stable-diffusion-xl-base-1.0",
        output: OutputShape::ByteStream,
        content_type: "image/png",
    },
    ModelSpec {
        alias: "flux-schnell",
        model_id: "@cf/black-forest-labs/flux-1-schnell",
        output: OutputShape::EncodedField { field: "image" },
        content_type: "image/jpeg",
    },
    ModelSpec {
        alias: "melotts",
        model_id: "@cf/myshell-ai/melotts",
        output: OutputShape::EncodedField { field: "audio" },
        content_type: "audio/mpeg",
    },
];

/// Aliases accepted by the text-to-image route.
pub const IMAGE_MODELS: &[&str] = &["stable-diffusion", "flux-schnell"];

/// Alias used by the text-to-speech route.
pub const SPEECH_MODEL: &str = "melotts";

pub fn find_model(alias: &str) -> Option<&'static ModelSpec> {
    MODELS.iter().find(|spec| spec.alias == alias)
}

/// A model alias plus the inputs forwarded to it verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub inputs: Map<String, Value>,
}

#[derive(Clone)]
pub struct GenerativeModelOrigin {
    runner: Arc<dyn ModelRunner>,
}

impl GenerativeModelOrigin {
    pub fn new(runner: Arc<dyn ModelRunner>) -> Self {
        Self { runner }
    }

    fn spec(&self, request: &GenerationRequest) -> Result<&'static ModelSpec, OriginError> {
        find_model(&request.model).ok_or_else(|| {
            let supported: Vec<&str> = MODELS.iter().map(|spec| spec.alias).collect();
            OriginError::Invalid(format!(
                "Invalid model. Supported models are: {}",
                supported.join(", ")
            ))
        })
    }
}

#[async_trait]
impl OriginAdapter for GenerativeModelOrigin {
    type Params = GenerationRequest;

    fn validate(&self, request: &GenerationRequest) -> Result<(), OriginError> {
        self.spec(request)?;
        let has_prompt = request
            .inputs
            .get("prompt")
            .and_then(Value::as_str)
            .is_some_and(|prompt| !prompt.trim().is_empty());
        if !has_prompt {
            return Err(OriginError::Invalid("prompt is required".into()));
        }
        Ok(())
    }

    fn describe(&self, request: &GenerationRequest) -> OriginDescriptor {
        OriginDescriptor {
            origin_id: find_model(&request.model)
                .map(|spec| spec.model_id.to_string())
                .unwrap_or_else(|| request.model.clone()),
            inputs: Value::Object(request.inputs.clone()),
        }
    }

    async fn produce(&self, request: GenerationRequest) -> Result<OriginPayload, OriginError> {
        let spec = self.spec(&request)?;
        let inputs = Value::Object(request.inputs);
        let response = self.runner.run(spec.model_id, &inputs).await?;
        let body = decode_response(spec, response)?;
        debug!("model {} produced {:?}", spec.model_id, body);

        Ok(OriginPayload {
            body,
            content_type: spec.content_type.to_string(),
        })
    }
}

/// Turn a model response into a body, rejecting shapes the catalog does not
/// expect for this model.
fn decode_response(spec: &ModelSpec, response: ModelResponse) -> Result<MediaBody, OriginError> {
    match (spec.output, response) {
        (OutputShape::EncodedField { field }, ModelResponse::Json(value)) => {
            let encoded = value.get(field).and_then(Value::as_str).ok_or_else(|| {
                OriginError::Format(format!(
                    "Unexpected response format from {}. Expected {{ {}: string }} with base64 content.",
                    spec.alias, field
                ))
            })?;
            let bytes = decode_base64(encoded).map_err(|err| {
                OriginError::Format(format!("{} returned invalid base64: {}", spec.alias, err))
            })?;
            Ok(MediaBody::Buffered(Bytes::from(bytes)))
        }
        (OutputShape::ByteStream, ModelResponse::Stream(stream)) => Ok(MediaBody::Streaming(stream)),
        (OutputShape::EncodedField { .. }, ModelResponse::Stream(_)) => Err(OriginError::Format(
            format!("Unexpected response format from {}: expected JSON, got a byte stream", spec.alias),
        )),
        (OutputShape::ByteStream, ModelResponse::Json(_)) => Err(OriginError::Format(format!(
            "Unexpected response format from {}: expected a byte stream, got JSON",
            spec.alias
        ))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Mutex;

    /// Runner double that replays a canned response and records calls.
    pub(crate) struct StubRunner {
        respond: Box<dyn Fn() -> ModelResponse + Send + Sync>,
        pub calls: Mutex<Vec<(String, Value)>>,
    }

    impl StubRunner {
        pub(crate) fn json(value: Value) -> Self {
            Self {
                respond: Box::new(move || ModelResponse::Json(value.clone())),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn bytes(chunks: &'static [&'static [u8]]) -> Self {
            Self {
                respond: Box::new(move || {
                    let items: Vec<std::io::Result<Bytes>> =
                        chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
                    ModelResponse::Stream(futures::stream::iter(items).boxed())
                }),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelRunner for StubRunner {
        async fn run(&self, model_id: &str, inputs: &Value) -> Result<ModelResponse, OriginError> {
            self.calls
                .lock()
                .unwrap()
                .push((model_id.to_string(), inputs.clone()));
            Ok((self.respond)())
        }
    }

    pub(crate) fn request(model: &str, prompt: &str) -> GenerationRequest {
        let mut inputs = Map::new();
        inputs.insert("prompt".into(), json!(prompt));
        GenerationRequest {
            model: model.into(),
            inputs,
        }
    }

    #[tokio::test]
    async fn encoded_field_is_decoded() {
        let runner = Arc::new(StubRunner::json(json!({ "image": "YWI=" })));
        let origin = GenerativeModelOrigin::new(runner.clone());
        let payload = origin.produce(request("flux-schnell", "hi")).await.unwrap();
        assert_eq!(payload.content_type, "image/jpeg");
        let body = payload.body.into_bytes().await.unwrap();
        assert_eq!(&body[..], &[0x61, 0x62]);

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].0, "@cf/black-forest-labs/flux-1-schnell");
        assert_eq!(calls[0].1["prompt"], "hi");
    }

    #[tokio::test]
    async fn byte_stream_model_passes_bytes_through() {
        let runner = Arc::new(StubRunner::bytes(&[b"\x89PN", b"G"]));
        let origin = GenerativeModelOrigin::new(runner);
        let payload = origin.produce(request("stable-diffusion", "cat")).await.unwrap();
        assert_eq!(payload.content_type, "image/png");
        let body = payload.body.into_bytes().await.unwrap();
        assert_eq!(&body[..], b"\x89PNG");
    }

    #[tokio::test]
    async fn wrong_shape_is_a_format_error() {
        let origin = GenerativeModelOrigin::new(Arc::new(StubRunner::json(json!({ "image": 1 }))));
        let err = origin.produce(request("flux-schnell", "hi")).await.unwrap_err();
        assert!(matches!(err, OriginError::Format(_)));

        let origin = GenerativeModelOrigin::new(Arc::new(StubRunner::json(json!({}))));
        let err = origin.produce(request("stable-diffusion", "hi")).await.unwrap_err();
        assert!(matches!(err, OriginError::Format(_)));

        let origin = GenerativeModelOrigin::new(Arc::new(StubRunner::bytes(&[b"x"])));
        let err = origin.produce(request("melotts", "hi")).await.unwrap_err();
        assert!(matches!(err, OriginError::Format(_)));
    }

    #[tokio::test]
    async fn invalid_base64_is_a_format_error() {
        let origin =
            GenerativeModelOrigin::new(Arc::new(StubRunner::json(json!({ "audio": "@@not-b64" }))));
        let err = origin.produce(request("melotts", "hi")).await.unwrap_err();
        assert!(matches!(err, OriginError::Format(_)));
    }

    #[tokio::test]
    async fn encoded_field_tolerates_wrapping_and_missing_padding() {
        let origin = GenerativeModelOrigin::new(Arc::new(StubRunner::json(
            json!({ "image": "AAECAwQF\nBgcICQ" }),
        )));
        let out = origin.produce(request("flux-schnell", "a cat")).await.unwrap();
        let bytes = out.body.into_bytes().await.unwrap();
        assert_eq!(&bytes[..], &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn validation_rejects_unknown_model_and_blank_prompt() {
        let origin = GenerativeModelOrigin::new(Arc::new(StubRunner::json(json!({}))));
        assert!(matches!(
            origin.validate(&request("dall-e", "hi")),
            Err(OriginError::Invalid(_))
        ));
        assert!(matches!(
            origin.validate(&request("flux-schnell", "  ")),
            Err(OriginError::Invalid(_))
        ));
        assert!(origin.validate(&request("flux-schnell", "a cat")).is_ok());
    }

    #[test]
    fn describe_reports_model_id_and_inputs() {
        let origin = GenerativeModelOrigin::new(Arc::new(StubRunner::json(json!({}))));
        let descriptor = origin.describe(&request("melotts", "hello"));
        assert_eq!(descriptor.origin_id, "@cf/myshell-ai/melotts");
        assert_eq!(descriptor.inputs, json!({ "prompt": "hello" }));
    }

    #[test]
    fn route_model_lists_are_registered() {
        assert!(IMAGE_MODELS.iter().all(|alias| find_model(alias).is_some()));
        assert!(find_model(SPEECH_MODEL).is_some());
    }
}

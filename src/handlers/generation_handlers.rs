//! Generate-and-cache handlers: text-to-image, text-to-speech and uploads.
//!
//! Each mints a fresh key, stores what the origin produced and answers with
//! the key plus the origin id and echoed inputs. The bytes themselves are
//! fetched later through the matching `GET .../{id}` route.

use crate::{
    errors::AppError,
    services::origins::{
        ClientPayload, GenerationRequest,
        generative::{IMAGE_MODELS, SPEECH_MODEL},
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextToImageResponse {
    pub image_id: String,
    pub model: String,
    pub inputs: Value,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TextToSpeechInputs {
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextToSpeechResponse {
    pub audio_id: String,
    pub model_id: String,
    pub inputs: TextToSpeechInputs,
    pub content_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub id: String,
    pub mime_type: String,
}

/// `POST /api/cf/text-to-image`: `{model, prompt, ...model options}`.
pub async fn text_to_image(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<TextToImageResponse>, AppError> {
    let Ok(Json(Value::Object(mut fields))) = body else {
        return Err(AppError::bad_request("Invalid JSON in request body"));
    };

    let model = match fields.remove("model") {
        Some(Value::String(model)) if IMAGE_MODELS.contains(&model.as_str()) => model,
        _ => {
            return Err(AppError::bad_request(format!(
                "Invalid model. Supported models are: {}",
                IMAGE_MODELS.join(", ")
            )));
        }
    };

    let request = GenerationRequest {
        model,
        inputs: fields,
    };
    let generated = state.cache.generate(&state.generative, request).await?;

    Ok(Json(TextToImageResponse {
        image_id: generated.key.into_string(),
        model: generated.origin_id,
        inputs: generated.inputs,
    }))
}

/// `POST /api/cf/text-to-speech`: `{prompt, lang?}`.
pub async fn text_to_speech(
    State(state): State<AppState>,
    body: Result<Json<TextToSpeechInputs>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Ok(Json(inputs)) = body else {
        return Err(AppError::bad_request("Invalid JSON in request body"));
    };
    let Some(prompt) = inputs.prompt.clone().filter(|p| !p.trim().is_empty()) else {
        return Err(AppError::bad_request("Prompt is required"));
    };

    let mut model_inputs = Map::new();
    model_inputs.insert("prompt".into(), json!(prompt));
    model_inputs.insert("lang".into(), json!(inputs.lang.as_deref().unwrap_or("en")));
    let request = GenerationRequest {
        model: SPEECH_MODEL.to_string(),
        inputs: model_inputs,
    };
    let generated = state.cache.generate(&state.generative, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(TextToSpeechResponse {
            audio_id: generated.key.into_string(),
            model_id: generated.origin_id,
            inputs,
            content_type: generated.content_type,
        }),
    ))
}

/// `POST /api/upload`: `{data, mimeType}` with base64 data, optionally a data URI.
pub async fn upload(
    State(state): State<AppState>,
    body: Result<Json<ClientPayload>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Ok(Json(payload)) = body else {
        return Err(AppError::bad_request("Invalid JSON in request body"));
    };

    let generated = state.cache.generate(&state.uploads, payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            id: generated.key.into_string(),
            mime_type: generated.content_type,
        }),
    ))
}

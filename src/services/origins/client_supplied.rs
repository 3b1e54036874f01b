//! Client-supplied payloads: the client is the origin.

use super::{OriginAdapter, OriginDescriptor, OriginError, OriginPayload, decode_base64};
use crate::models::media::MediaBody;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

/// Base64 data plus its declared MIME type, as posted by the client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPayload {
    pub data: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientSuppliedOrigin;

impl ClientSuppliedOrigin {
    pub fn new() -> Self {
        Self
    }
}

/// Strip an optional `data:<mime>;base64,` header and decode the rest.
pub fn decode_base64_payload(data: &str) -> Result<Bytes, OriginError> {
    let encoded = match data.split_once(',') {
        Some((_, rest)) => rest,
        None => data,
    };
    decode_base64(encoded)
        .map(Bytes::from)
        .map_err(|err| OriginError::Invalid(format!("data is not valid base64: {}", err)))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[async_trait]
impl OriginAdapter for ClientSuppliedOrigin {
    type Params = ClientPayload;

    fn validate(&self, payload: &ClientPayload) -> Result<(), OriginError> {
        if non_blank(&payload.data).is_none() || non_blank(&payload.mime_type).is_none() {
            return Err(OriginError::Invalid(
                "Fields 'data' (base64 string) and 'mimeType' are required".into(),
            ));
        }
        Ok(())
    }

    fn describe(&self, payload: &ClientPayload) -> OriginDescriptor {
        OriginDescriptor {
            origin_id: "client-upload".into(),
            inputs: json!({ "mimeType": non_blank(&payload.mime_type) }),
        }
    }

    async fn produce(&self, payload: ClientPayload) -> Result<OriginPayload, OriginError> {
        self.validate(&payload)?;
        let (Some(data), Some(mime_type)) = (non_blank(&payload.data), non_blank(&payload.mime_type))
        else {
            return Err(OriginError::Invalid("data and mimeType are required".into()));
        };

        Ok(OriginPayload {
            body: MediaBody::Buffered(decode_base64_payload(data)?),
            content_type: mime_type.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(data: Option<&str>, mime: Option<&str>) -> ClientPayload {
        ClientPayload {
            data: data.map(str::to_string),
            mime_type: mime.map(str::to_string),
        }
    }

    #[test]
    fn decodes_known_base64() {
        let bytes = decode_base64_payload("aGVsbG8gd29ybGQ=").unwrap();
        assert_eq!(&bytes[..], b"hello world");
        assert_eq!(bytes.len(), 11);
    }

    #[test]
    fn strips_data_uri_prefix() {
        let bytes = decode_base64_payload("data:image/png;base64,AAECAwQFBgcICQ==").unwrap();
        assert_eq!(&bytes[..], &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn accepts_missing_padding() {
        assert_eq!(&decode_base64_payload("YWI").unwrap()[..], b"ab");
        assert_eq!(&decode_base64_payload("AAECAwQFBgcICQ").unwrap()[..], &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn skips_whitespace_inside_wrapped_lines() {
        let bytes = decode_base64_payload("AAECAwQF\nBgcICQ==").unwrap();
        assert_eq!(&bytes[..], &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);

        let wrapped = "data:text/plain;base64, aGVs\r\nbG8g\td29y bGQ=\n";
        assert_eq!(&decode_base64_payload(wrapped).unwrap()[..], b"hello world");
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            decode_base64_payload("not base64!"),
            Err(OriginError::Invalid(_))
        ));
    }

    #[test]
    fn missing_fields_fail_validation() {
        let origin = ClientSuppliedOrigin::new();
        assert!(origin.validate(&payload(None, Some("image/png"))).is_err());
        assert!(origin.validate(&payload(Some("AA=="), None)).is_err());
        assert!(origin.validate(&payload(Some(""), Some("image/png"))).is_err());
        assert!(origin.validate(&payload(Some("AA=="), Some("image/png"))).is_ok());
    }

    #[tokio::test]
    async fn produce_uses_declared_mime_type() {
        let origin = ClientSuppliedOrigin::new();
        let out = origin
            .produce(payload(Some("YWI="), Some("text/plain")))
            .await
            .unwrap();
        assert_eq!(out.content_type, "text/plain");
        assert_eq!(&out.body.into_bytes().await.unwrap()[..], b"ab");
    }

    #[test]
    fn deserializes_camel_case() {
        let parsed: ClientPayload =
            serde_json::from_str(r#"{"data":"AA==","mimeType":"image/png"}"#).unwrap();
        assert_eq!(parsed.mime_type.as_deref(), Some("image/png"));
    }
}

//! Bounded JSON body reader for webhook endpoints.

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use futures_util::StreamExt;

use crate::has_json_content_type;

#[derive(Debug, Clone, Copy)]
pub struct BodyLimits {
    pub max_bytes: usize,
    pub timeout_ms: u64,
    pub require_json_content_type: bool,
    /// Map an empty body to `{}` instead of rejecting it. Some providers
    /// send bodyless verification pings.
    pub empty_object_on_empty: bool,
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024,
            timeout_ms: 30_000,
            require_json_content_type: true,
            empty_object_on_empty: false,
        }
    }
}

/// Why a body read was rejected. Maps one-to-one onto the HTTP status the
/// endpoint must answer with.
#[derive(Debug)]
pub enum BodyError {
    TooLarge { max_bytes: usize },
    UnsupportedMediaType,
    Timeout { timeout_ms: u64 },
    Malformed(String),
}

impl BodyError {
    pub fn status(&self) -> StatusCode {
        match self {
            BodyError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            BodyError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            BodyError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            BodyError::Malformed(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn message(&self) -> String {
        match self {
            BodyError::TooLarge { max_bytes } => {
                format!("request body exceeds {max_bytes} bytes")
            }
            BodyError::UnsupportedMediaType => "content-type must be application/json".into(),
            BodyError::Timeout { timeout_ms } => {
                format!("request body not received within {timeout_ms}ms")
            }
            BodyError::Malformed(e) => format!("invalid JSON body: {e}"),
        }
    }
}

/// Stream the request body under byte and wall-clock caps, then parse JSON.
///
/// The byte cap is enforced on the stream, not a declared content-length, so
/// a lying client cannot buffer more than `max_bytes` before rejection.
pub async fn read_json_body(
    headers: &HeaderMap,
    body: Body,
    limits: &BodyLimits,
) -> Result<serde_json::Value, BodyError> {
    if limits.require_json_content_type && !has_json_content_type(headers) {
        return Err(BodyError::UnsupportedMediaType);
    }

    let collect = async {
        let mut stream = body.into_data_stream();
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BodyError::Malformed(e.to_string()))?;
            if buf.len() + chunk.len() > limits.max_bytes {
                return Err(BodyError::TooLarge {
                    max_bytes: limits.max_bytes,
                });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf)
    };

    let buf = match tokio::time::timeout(
        std::time::Duration::from_millis(limits.timeout_ms),
        collect,
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            return Err(BodyError::Timeout {
                timeout_ms: limits.timeout_ms,
            })
        }
    };

    if buf.is_empty() {
        if limits.empty_object_on_empty {
            return Ok(serde_json::json!({}));
        }
        return Err(BodyError::Malformed("empty body".into()));
    }

    serde_json::from_slice(&buf).map_err(|e| BodyError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::CONTENT_TYPE;

    fn json_headers() -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        h
    }

    #[tokio::test]
    async fn reads_valid_json() {
        let body = Body::from(r#"{"event": "ping"}"#);
        let v = read_json_body(&json_headers(), body, &BodyLimits::default())
            .await
            .unwrap();
        assert_eq!(v["event"], "ping");
    }

    #[tokio::test]
    async fn rejects_oversized_body_with_413() {
        let limits = BodyLimits {
            max_bytes: 8,
            ..Default::default()
        };
        let body = Body::from(r#"{"event": "way too large"}"#);
        let err = read_json_body(&json_headers(), body, &limits).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn rejects_wrong_content_type_with_415() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "text/plain".parse().unwrap());
        let err = read_json_body(&headers, Body::from("{}"), &BodyLimits::default())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn rejects_malformed_json_with_400() {
        let err = read_json_body(&json_headers(), Body::from("{nope"), &BodyLimits::default())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_body_maps_to_object_when_configured() {
        let limits = BodyLimits {
            empty_object_on_empty: true,
            ..Default::default()
        };
        let v = read_json_body(&json_headers(), Body::empty(), &limits)
            .await
            .unwrap();
        assert_eq!(v, serde_json::json!({}));
    }

    #[tokio::test]
    async fn empty_body_rejected_by_default() {
        let err = read_json_body(&json_headers(), Body::empty(), &BodyLimits::default())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}

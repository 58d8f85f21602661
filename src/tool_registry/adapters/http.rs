//! HTTP helpers shared by the SSE and streamable HTTP transports.

use crate::tool_registry::{
    domain::TransportKind,
    ports::{TransportError, TransportFailure, TransportResult},
};
use reqwest::Response;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;

const ERROR_BODY_LIMIT: usize = 512;

/// Converts configured headers into a request header map.
pub(crate) fn header_map(
    kind: TransportKind,
    headers: &BTreeMap<String, String>,
) -> TransportResult<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| TransportError::protocol(kind, format!("header '{name}': {err}")))?;
        let header_value = HeaderValue::from_bytes(value.as_bytes())
            .map_err(|err| TransportError::protocol(kind, format!("header '{name}': {err}")))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Returns the response when its status is a success, otherwise a
/// [`TransportFailure::Status`] carrying the start of the body.
pub(crate) async fn ensure_success(
    kind: TransportKind,
    response: Response,
) -> TransportResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = body_prefix(response).await;
    Err(TransportError::new(
        kind,
        TransportFailure::Status {
            status: status.as_u16(),
            body: body.chars().take(ERROR_BODY_LIMIT).collect(),
        },
    ))
}

/// Reads at most enough bytes to fill [`ERROR_BODY_LIMIT`] characters.
async fn body_prefix(mut response: Response) -> String {
    let byte_limit = ERROR_BODY_LIMIT * 4;
    let mut prefix = Vec::with_capacity(byte_limit);
    while prefix.len() < byte_limit {
        let Ok(Some(chunk)) = response.chunk().await else {
            break;
        };
        let wanted = chunk.len().min(byte_limit - prefix.len());
        prefix.extend_from_slice(chunk.get(..wanted).unwrap_or_default());
    }
    String::from_utf8_lossy(&prefix).into_owned()
}

/// Returns whether the response body is an event stream.
pub(crate) fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().starts_with("text/event-stream"))
}

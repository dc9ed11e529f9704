//! Request forwarding with optional body filtering
//!
//! The inbound body is buffered so chat requests can be rewritten. The
//! upstream response is streamed back chunk by chunk without buffering.

use axum::{
    body::Body,
    extract::Request,
    http::HeaderMap,
    response::Response,
};
use bytes::Bytes;
use futures::StreamExt;
use url::Url;

use super::error::RelayError;
use super::server::AppState;
use crate::audit::AuditRecord;
use crate::config::Config;
use crate::filter::{Pipeline, PipelineReport, RequestEnvelope};

/// Hop-by-hop headers that are never forwarded in either direction
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "proxy-connection",
    "te",
    "upgrade",
];

/// Request headers recomputed for the forwarded body. `accept-encoding` is
/// dropped so the upstream answers uncompressed, matching the stripped
/// `content-encoding` on the way back.
const REQUEST_SKIP_HEADERS: &[&str] = &["content-length", "accept-encoding"];

/// Response headers describing an encoding the relay does not reproduce
const RESPONSE_SKIP_HEADERS: &[&str] = &["content-encoding"];

/// A chat request body after the filter pipeline
#[derive(Debug)]
pub struct FilteredBody {
    pub body: Bytes,
    pub before: RequestEnvelope,
    pub after: RequestEnvelope,
    pub report: PipelineReport,
}

/// Decode a chat request body and run it through the pipeline.
///
/// Returns `None` when the body is not a JSON request object or the result
/// cannot be re-encoded; the caller then forwards the original bytes.
pub fn filter_body(config: &Config, body: &[u8]) -> Option<FilteredBody> {
    let before = match RequestEnvelope::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!("Body is not a chat request, forwarding unchanged: {e}");
            return None;
        }
    };

    let (after, report) = Pipeline::new(config).apply(&before);

    match after.to_vec() {
        Ok(encoded) => Some(FilteredBody {
            body: Bytes::from(encoded),
            before,
            after,
            report,
        }),
        Err(e) => {
            tracing::warn!("Failed to encode filtered body, forwarding original: {e}");
            None
        }
    }
}

fn log_report(model: &str, report: &PipelineReport) {
    let prompt = &report.prompt;
    if prompt.is_small_model && prompt.original_size > 0 {
        tracing::info!(
            model,
            original_size = prompt.original_size,
            filtered_size = prompt.filtered_size,
            elapsed_ms = prompt.elapsed.as_secs_f64() * 1000.0,
            "Filtered system prompt ({:.1}% smaller)",
            prompt.reduction_percent()
        );
    }

    if let Some(tools) = &report.tools {
        tracing::debug!(
            model,
            original_count = tools.original_count,
            final_count = tools.final_count,
            truncated = tools.truncated,
            "Pruned tools ({:.1}% smaller)",
            tools.reduction_percent
        );
    }

    if report.context_size_injected {
        tracing::debug!(model, "Injected default context size");
    }
}

/// Hand the before/after payloads to the audit sink, if one is running
fn audit(state: &AppState, path: &str, filtered: &FilteredBody) {
    let Some(sink) = &state.audit else {
        return;
    };
    if !filtered.report.changed() {
        return;
    }

    match (
        serde_json::to_value(&filtered.before),
        serde_json::to_value(&filtered.after),
    ) {
        (Ok(before), Ok(after)) => sink.record(AuditRecord::new(
            path,
            filtered.before.model().to_string(),
            filtered.report.clone(),
            before,
            after,
        )),
        _ => tracing::warn!("Failed to snapshot request for audit"),
    }
}

/// Copy `headers`, leaving out hop-by-hop headers and `skip`
fn forwardable_headers(headers: &HeaderMap, skip: &[&str]) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        let name_str = name.as_str();
        if !HOP_BY_HOP_HEADERS.contains(&name_str) && !skip.contains(&name_str) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

/// Append the request path and query to the upstream base URL.
///
/// The request path is never resolved as a URL reference, so scheme, host
/// and base path always come from `base`.
pub fn upstream_url(base: &Url, path_and_query: &str) -> Result<Url, RelayError> {
    if base.cannot_be_a_base() {
        return Err(RelayError::Request(format!("Upstream URL {base} cannot take a path")));
    }

    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };

    let mut url = base.clone();
    url.set_path(&format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    ));
    url.set_query(query);
    url.set_fragment(None);
    Ok(url)
}

/// Forward `request` to the configured upstream and stream the answer back
pub async fn forward_request(
    state: &AppState,
    request: Request<Body>,
) -> Result<Response<Body>, RelayError> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target_url = upstream_url(&state.upstream, path_and_query)?;

    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| RelayError::Request(format!("Failed to read request body: {e}")))?;

    let final_body = if state.config.proxy.is_chat_route(&path) {
        match filter_body(&state.config, &body_bytes) {
            Some(filtered) => {
                log_report(filtered.before.model(), &filtered.report);
                audit(state, &path, &filtered);
                filtered.body
            }
            None => body_bytes,
        }
    } else {
        body_bytes
    };

    tracing::debug!(
        "Proxying {} {} ({} bytes)",
        parts.method,
        target_url,
        final_body.len()
    );

    let response = state
        .client
        .request(parts.method.clone(), target_url)
        .headers(forwardable_headers(&parts.headers, REQUEST_SKIP_HEADERS))
        .body(final_body)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                RelayError::Network(format!("Request timed out: {e}"))
            } else if e.is_connect() {
                RelayError::Network(format!("Failed to connect to upstream: {e}"))
            } else {
                RelayError::Network(format!("Request failed: {e}"))
            }
        })?;

    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        tracing::warn!(status = %status, "Upstream returned error, passing through to client");
    }

    let response_headers = forwardable_headers(response.headers(), RESPONSE_SKIP_HEADERS);

    let stream = response.bytes_stream().map(|chunk| {
        chunk.inspect_err(|e| tracing::warn!("Upstream stream interrupted: {e}"))
    });

    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        headers.extend(response_headers);
    }

    builder
        .body(Body::from_stream(stream))
        .map_err(|e| RelayError::Network(format!("Failed to build response: {e}")))
}

//! Fetch interception
//!
//! Every request that does not hit a worker endpoint lands here and is
//! handed to the worker. Origin-form requests (`GET /style.css`) belong to
//! the site origin; absolute-form proxy requests
//! (`GET https://fonts.googleapis.com/...`) are cross-origin.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, header},
    response::Response,
};
use bytes::Bytes;
use offline_core::Served;
use offline_proxy::{FetchRequest, HOP_HEADER, request::is_hop_by_hop};
use tracing::{debug, warn};
use url::Url;

use crate::error::ApiError;
use crate::state::AppState;

/// Header naming where a response came from
pub const SOURCE_HEADER: HeaderName = HeaderName::from_static("x-offline-cache");

/// Resolve the request target to an absolute URL
fn target_url(origin: &Url, uri: &Uri) -> Result<Url, ApiError> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Url::parse(&uri.to_string())
            .map_err(|e| ApiError::BadRequest(format!("Invalid request target {}: {}", uri, e)));
    }

    // Built piecewise so a path like `//host/x` cannot change the origin
    let mut url = origin.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    Ok(url)
}

fn to_fetch_request(method: Method, url: Url, headers: &HeaderMap, body: Bytes) -> FetchRequest {
    let mut request = FetchRequest::new(method, url);
    for (name, value) in headers {
        if *name == header::HOST || is_hop_by_hop(name.as_str()) {
            continue;
        }
        request.headers.append(name.clone(), value.clone());
    }
    request.body = body;
    request
}

fn to_response(served: Served) -> Response {
    let Served { response, source } = served;

    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = response.status;

    let headers = out.headers_mut();
    for (name, value) in &response.headers {
        if *name == header::CONTENT_LENGTH || is_hop_by_hop(name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers.insert(SOURCE_HEADER, HeaderValue::from_static(source.as_str()));

    out
}

/// Fallback handler: intercept the request
pub(super) async fn intercept(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let url = target_url(&state.worker.config().origin, &uri)?;

    // Our own forwarded request came back to us
    if headers.contains_key(HOP_HEADER) {
        warn!("Refusing to forward {} {} again", method, url);
        return Err(ApiError::LoopDetected(url.to_string()));
    }

    debug!("Intercepted {} {}", method, url);

    let request = to_fetch_request(method, url, &headers, body);
    let served = state.worker.handle_fetch(request).await?;

    Ok(to_response(served))
}

//! HTTP middleware boundary.
//!
//! Adapts the host framework's request type into a [`RequestContext`],
//! runs the inspector, and either forwards the request or answers 429.
//! The 429 body is status text only: no detail about which signature
//! or limit tripped ever reaches the client.

use crate::context::RequestContext;
use crate::inspector::{Decision, SecurityInspector};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::Arc;

/// Tower middleware entry point; mount with
/// `axum::middleware::from_fn_with_state`.
pub async fn inspect_request(
    State(inspector): State<Arc<SecurityInspector>>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = context_from_request(&request);
    match inspector.inspect(&ctx).decision {
        Decision::TooManyRequests => {
            (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response()
        }
        Decision::Allow => next.run(request).await,
    }
}

/// Project the framework request onto the fields the pipeline reads.
fn context_from_request(request: &Request) -> RequestContext {
    let mut headers: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }
    }

    RequestContext::from_parts(
        request.method().as_str(),
        request.uri().path(),
        request.uri().query(),
        headers,
    )
}

//! Shared ingress middleware

use crate::types::{IngressError, RequestId, RequestMetadata};
use axum::{
    extract::Request,
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Extension key for request metadata
#[derive(Clone)]
pub struct RequestMetadataExt(pub RequestMetadata);

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Middleware to attach request ID and client details to every request
pub async fn request_context_middleware(mut req: Request, next: Next) -> Response {
    let headers = req.headers();
    let mut metadata = RequestMetadata::new();

    if let Some(id) = headers.get(REQUEST_ID_HEADER)
        && let Ok(id) = id.to_str()
        && !id.is_empty()
        && id.len() <= 128
    {
        metadata = metadata.with_request_id(RequestId::from_string(id.to_string()));
    }

    // Extract client IP from X-Forwarded-For or X-Real-IP
    if let Some(forwarded_for) = headers.get("x-forwarded-for") {
        if let Ok(ip) = forwarded_for.to_str() {
            // Take the first IP in the list
            let client_ip = ip.split(',').next().unwrap_or(ip).trim().to_string();
            metadata = metadata.with_client_ip(client_ip);
        }
    } else if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(ip) = real_ip.to_str()
    {
        metadata = metadata.with_client_ip(ip.to_string());
    }

    if let Some(user_agent) = headers.get(header::USER_AGENT)
        && let Ok(ua) = user_agent.to_str()
    {
        metadata = metadata.with_user_agent(ua.to_string());
    }

    let request_id = metadata.request_id.clone();
    req.extensions_mut().insert(RequestMetadataExt(metadata));

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

/// Reject requests whose declared length exceeds `max_size` before reading the body
pub async fn body_size_limit_middleware(req: Request, next: Next, max_size: usize) -> Response {
    if let Some(content_length) = req.headers().get(header::CONTENT_LENGTH)
        && let Ok(length_str) = content_length.to_str()
        && let Ok(length) = length_str.parse::<usize>()
        && length > max_size
    {
        return IngressError::PayloadTooLarge(max_size).into_response();
    }

    next.run(req).await
}

/// Middleware to add security headers
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;

    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "strict-transport-security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    // Responses carry financial data and one-shot download links
    headers
        .entry(header::CACHE_CONTROL)
        .or_insert(HeaderValue::from_static("no-store"));

    response
}

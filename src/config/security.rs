use std::env;

use axum::extract::Request;
use axum::http::header::{
    HeaderValue, CACHE_CONTROL, CONTENT_SECURITY_POLICY, REFERRER_POLICY,
    STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
};
use axum::middleware::Next;
use axum::response::Response;

const NOSNIFF: HeaderValue = HeaderValue::from_static("nosniff");
const DENY: HeaderValue = HeaderValue::from_static("DENY");
const HSTS_VALUE: HeaderValue = HeaderValue::from_static("max-age=31536000; includeSubDomains");
const CSP_API_VALUE: HeaderValue =
    HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'");
const REFERRER_POLICY_VALUE: HeaderValue =
    HeaderValue::from_static("strict-origin-when-cross-origin");
// Every endpoint returns financial data; none of it is cacheable.
const NO_STORE: HeaderValue = HeaderValue::from_static("no-store");

fn hsts_enabled() -> bool {
    env::var("RUST_ENV")
        .map(|v| v.to_lowercase() == "production")
        .unwrap_or(false)
}

/// Security headers for every response. HSTS is only set in production,
/// where the service sits behind TLS.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let include_hsts = hsts_enabled();
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(X_CONTENT_TYPE_OPTIONS, NOSNIFF);
    headers.insert(X_FRAME_OPTIONS, DENY);
    headers.insert(CONTENT_SECURITY_POLICY, CSP_API_VALUE);
    headers.insert(REFERRER_POLICY, REFERRER_POLICY_VALUE);
    headers.insert(CACHE_CONTROL, NO_STORE);
    if include_hsts {
        headers.insert(STRICT_TRANSPORT_SECURITY, HSTS_VALUE);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hsts_is_off_outside_production() {
        std::env::remove_var("RUST_ENV");
        assert!(!hsts_enabled());

        std::env::set_var("RUST_ENV", "production");
        assert!(hsts_enabled());
        std::env::remove_var("RUST_ENV");
    }
}

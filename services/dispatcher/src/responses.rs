//! Fixed response frames produced by the dispatcher itself

use codec::{Response, META_CACHE_MISS, META_SEC_RATELIMIT, META_SEC_WAF};

const TEXT_PLAIN: &str = "Content-Type: text/plain\r\n";
const TEXT_PLAIN_RETRY: &str = "Content-Type: text/plain\r\nRetry-After: 1\r\n";

/// WAF short-circuit; the engine is never called
pub fn waf_blocked() -> Response {
    Response::new(403)
        .with_headers(TEXT_PLAIN)
        .with_body("Forbidden (WAF)")
        .with_meta(META_SEC_WAF | META_CACHE_MISS)
}

/// Edge rate-limit short-circuit; the engine is never called
pub fn rate_limited() -> Response {
    Response::new(429)
        .with_headers(TEXT_PLAIN_RETRY)
        .with_body("Too Many Requests (Rate Limit)")
        .with_meta(META_SEC_RATELIMIT | META_CACHE_MISS)
}

/// Written when the request frame could not be decoded
pub fn invalid_frame() -> Response {
    Response::new(400)
        .with_headers(TEXT_PLAIN)
        .with_body("invalid_frame")
}

/// Written when the shield rejects the client before admission
pub fn shield_limited() -> Response {
    Response::new(429)
        .with_headers(TEXT_PLAIN_RETRY)
        .with_body("rate_limited")
        .with_meta(META_SEC_RATELIMIT)
}

/// Written for any dispatch failure; carries only the coarse reason tag
pub fn dispatch_failed(reason: &'static str) -> Response {
    Response::new(502).with_headers(TEXT_PLAIN).with_body(reason)
}

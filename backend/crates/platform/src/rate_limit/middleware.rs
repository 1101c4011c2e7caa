//! Rate limiting middleware
//!
//! Applies one limit category to every request passing through the layer,
//! stamps the telemetry headers on the response and turns a denial into a
//! structured 429 with retry guidance. Mount one layer per category scope.

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Request, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use kernel::error::app_error::AppError;
use std::net::SocketAddr;

use super::limiter::RateLimiter;
use super::{Decision, LimitCategory};
use crate::client::extract_client_ip;

/// State for one rate-limit layer.
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: RateLimiter,
    pub category: LimitCategory,
}

/// Middleware enforcing the configured limit for the layer's category.
///
/// Callers are identified by client IP (X-Forwarded-For aware).
pub async fn enforce_rate_limit(
    State(state): State<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let direct_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let identifier = extract_client_ip(req.headers(), direct_ip)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let decision = state.limiter.check(state.category, &identifier).await;

    if !decision.allowed {
        let retry_after_secs = decision.retry_after_secs();
        let denial = AppError::too_many_requests("Rate limit exceeded")
            .with_action(format!("Retry after {retry_after_secs} seconds"));
        let mut response = denial.into_response();
        apply_limit_headers(&mut response, &decision);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, int_header(retry_after_secs));
        return response;
    }

    let mut response = next.run(req).await;
    apply_limit_headers(&mut response, &decision);
    response
}

/// Telemetry headers set on every response that went through the limiter.
fn apply_limit_headers(response: &mut Response, decision: &Decision) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", int_header(i64::from(decision.limit)));
    headers.insert(
        "x-ratelimit-remaining",
        int_header(i64::from(decision.remaining)),
    );
    headers.insert("x-ratelimit-reset", int_header(decision.reset_at_secs()));
}

fn int_header(value: i64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{Limit, RateLimitSettings};
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use tower::ServiceExt;

    async fn test_app(max_requests: u32) -> Router {
        let settings = RateLimitSettings {
            general: Limit::new(max_requests, 60),
            ..Default::default()
        };
        let limiter = RateLimiter::connect(settings).await.unwrap();
        let state = RateLimitState {
            limiter,
            category: LimitCategory::General,
        };
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                state,
                enforce_rate_limit,
            ))
    }

    fn request() -> Request<Body> {
        Request::builder().uri("/").body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_allowed_request_gets_telemetry_headers() {
        let app = test_app(2).await;

        let response = app.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
        assert!(response.headers().contains_key("x-ratelimit-reset"));
        assert!(!response.headers().contains_key(header::RETRY_AFTER));
    }

    #[tokio::test]
    async fn test_denial_returns_429_with_retry_guidance() {
        let app = test_app(1).await;

        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert!(response.headers().contains_key(header::RETRY_AFTER));
    }
}

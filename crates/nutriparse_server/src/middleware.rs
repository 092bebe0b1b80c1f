//! Request middleware: per-IP rate limiting, security headers, metrics.

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::State;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota};
use nutriparse_protocol::config::RateLimitConfig;
use nutriparse_protocol::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

use crate::envelope::{request_id, ApiError};
use crate::state::AppState;

/// Two keyed buckets per principal: a minute cap for bursts and an hour
/// cap for sustained load.
pub struct RateLimiters {
    enabled: bool,
    per_minute: Option<DefaultKeyedRateLimiter<IpAddr>>,
    per_hour: Option<DefaultKeyedRateLimiter<IpAddr>>,
}

impl RateLimiters {
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self {
                enabled: false,
                per_minute: None,
                per_hour: None,
            };
        }
        let minute = NonZeroU32::new(config.per_minute.max(1)).map(|n| {
            DefaultKeyedRateLimiter::keyed(Quota::per_minute(n))
        });
        let hour = NonZeroU32::new(config.per_hour.max(1)).map(|n| {
            DefaultKeyedRateLimiter::keyed(Quota::per_hour(n))
        });
        Self {
            enabled: true,
            per_minute: minute,
            per_hour: hour,
        }
    }

    /// Returns the suggested wait on rejection.
    fn check(&self, ip: IpAddr) -> Result<(), std::time::Duration> {
        if !self.enabled {
            return Ok(());
        }
        let now = DefaultClock::default().now();
        for limiter in [&self.per_minute, &self.per_hour].into_iter().flatten() {
            if let Err(negative) = limiter.check_key(&ip) {
                return Err(negative.wait_time_from(now));
            }
        }
        Ok(())
    }
}

pub async fn rate_limit_middleware(
    State((state, limiters)): State<(Arc<AppState>, Arc<RateLimiters>)>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // Health probes are never throttled.
    if req.uri().path().starts_with("/health") {
        return next.run(req).await;
    }

    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::from([0, 0, 0, 0]));

    match limiters.check(ip) {
        Ok(()) => next.run(req).await,
        Err(wait) => {
            state.metrics.record_rate_limited();
            let rid = request_id(req.headers());
            let mut response = ApiError::new(
                StatusCode::TOO_MANY_REQUESTS,
                ErrorKind::RateLimited,
                "rate limit exceeded",
            )
            .with_request_id(rid)
            .into_response();
            let secs = wait.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
            response
        }
    }
}

pub async fn metrics_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(req).await;
    state.metrics.record_response(
        response.status().as_u16(),
        start.elapsed().as_millis() as u64,
    );
    response
}

pub async fn security_headers(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "x-xss-protection",
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

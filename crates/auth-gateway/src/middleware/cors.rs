//! CORS handling for the gateway.
//!
//! Preflight requests are answered by the gateway itself. Every other
//! response, whether a rejection or whatever the downstream handler produced,
//! leaves with CORS headers derived from the request's `Origin`.
//!
//! The allowed origin is echoed verbatim (or `*` when absent) together with
//! `Access-Control-Allow-Credentials: true`. Browsers refuse credentialed
//! responses with a wildcard origin, so only requests with an `Origin` can
//! use credentials.

use axum::{
    body::Body,
    http::{
        header::{self, InvalidHeaderValue},
        HeaderMap, HeaderValue, Response, StatusCode,
    },
};

/// Headers every response allows, before custom headers.
pub const BASE_ALLOW_HEADERS: &[&str] = &["Content-Type", "Content-Disposition"];

/// Methods advertised on preflight.
pub const ALLOW_METHODS: &str = "GET, HEAD, POST, PUT, OPTIONS";

/// Preflight cache lifetime (one day).
pub const PREFLIGHT_MAX_AGE_SECONDS: u32 = 86_400;

/// CORS-relevant view of one request.
#[derive(Debug, Clone, Default)]
pub struct CorsContext {
    origin: Option<HeaderValue>,
}

impl CorsContext {
    /// Capture the request's `Origin` header.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            origin: headers.get(header::ORIGIN).cloned(),
        }
    }

    pub fn origin(&self) -> Option<&HeaderValue> {
        self.origin.as_ref()
    }

    /// Value for `Access-Control-Allow-Origin`: the origin, or `*`.
    pub fn allow_origin(&self) -> HeaderValue {
        self.origin
            .clone()
            .unwrap_or_else(|| HeaderValue::from_static("*"))
    }
}

/// CORS header values, rendered once at startup.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allow_headers: HeaderValue,
    preflight_allow_headers: HeaderValue,
    max_age: HeaderValue,
}

impl CorsPolicy {
    /// Build a policy advertising `custom_headers` after the base headers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHeaderValue` if a custom header name cannot appear in
    /// a header value.
    pub fn new<S: AsRef<str>>(custom_headers: &[S]) -> Result<Self, InvalidHeaderValue> {
        let custom: Vec<&str> = custom_headers.iter().map(AsRef::as_ref).collect();

        let mut response_headers: Vec<&str> = BASE_ALLOW_HEADERS.to_vec();
        response_headers.extend(&custom);

        let mut preflight_headers: Vec<&str> = BASE_ALLOW_HEADERS.to_vec();
        preflight_headers.push("Authorization");
        preflight_headers.extend(&custom);

        Ok(Self {
            allow_headers: HeaderValue::from_str(&response_headers.join(", "))?,
            preflight_allow_headers: HeaderValue::from_str(&preflight_headers.join(", "))?,
            max_age: HeaderValue::from(PREFLIGHT_MAX_AGE_SECONDS),
        })
    }

    /// `Access-Control-Allow-Headers` on delegated responses.
    pub fn allow_headers(&self) -> &HeaderValue {
        &self.allow_headers
    }

    /// `Access-Control-Allow-Headers` on preflight responses.
    pub fn preflight_allow_headers(&self) -> &HeaderValue {
        &self.preflight_allow_headers
    }

    /// Answer an `OPTIONS` request.
    pub fn preflight_response(&self, cors: &CorsContext) -> Response<Body> {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::OK;

        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, cors.allow_origin());
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            self.preflight_allow_headers.clone(),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0u32));

        response
    }

    /// Adapter that stamps CORS headers onto the downstream response.
    pub fn adapter(&self, cors: &CorsContext) -> CorsResponseAdapter {
        CorsResponseAdapter {
            allow_origin: cors.allow_origin(),
            allow_headers: self.allow_headers.clone(),
        }
    }
}

impl Default for CorsPolicy {
    /// The relay's headers: `Content-Type, Content-Disposition, X-Piping`.
    fn default() -> Self {
        Self {
            allow_headers: HeaderValue::from_static("Content-Type, Content-Disposition, X-Piping"),
            preflight_allow_headers: HeaderValue::from_static(
                "Content-Type, Content-Disposition, Authorization, X-Piping",
            ),
            max_age: HeaderValue::from(PREFLIGHT_MAX_AGE_SECONDS),
        }
    }
}

/// Merges CORS headers into one downstream response.
///
/// CORS keys overwrite whatever the downstream set. All other headers, the
/// status and the body (streaming or not) pass through unchanged.
#[derive(Debug, Clone)]
pub struct CorsResponseAdapter {
    allow_origin: HeaderValue,
    allow_headers: HeaderValue,
}

impl CorsResponseAdapter {
    pub fn wrap<B>(self, mut response: Response<B>) -> Response<B> {
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers);
        response
    }
}

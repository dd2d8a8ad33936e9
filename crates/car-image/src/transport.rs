//! HTTP plumbing shared by the registry client.
//!
//! The transport is pluggable: [`RoundTrip`] is the seam where host-specific
//! auth decorators and test doubles slot in. The default implementation is a
//! plain `reqwest` client with no default `User-Agent` (registry CDNs do not
//! require one, and Docker Hub's blob storage rejects some).

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ImageError, Result};

/// One HTTP request/response exchange. Implementations may decorate the
/// request (auth headers) before delegating to an inner transport.
#[async_trait]
pub trait RoundTrip: Send + Sync {
    /// Sends the request and returns the raw response.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent.
    async fn round_trip(&self, request: Request) -> Result<Response>;
}

/// The process-default transport: a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct DirectTransport {
    client: reqwest::Client,
}

impl DirectTransport {
    /// Creates a transport backed by a fresh client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoundTrip for DirectTransport {
    async fn round_trip(&self, request: Request) -> Result<Response> {
        let url = request.url().to_string();
        self.client
            .execute(request)
            .await
            .map_err(|source| ImageError::Request { url, source })
    }
}

/// Convenience wrapper consolidating GET logic over a [`RoundTrip`].
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn RoundTrip>,
}

impl HttpClient {
    /// Creates a client over the given transport.
    #[must_use]
    pub fn new(transport: Arc<dyn RoundTrip>) -> Self {
        Self { transport }
    }

    /// Issues a GET with the given `Accept` value and returns the response
    /// together with its primary media type.
    ///
    /// This is optimized for content negotiation: the media type is the
    /// `Content-Type` with parameters such as `; charset=utf-8` stripped.
    ///
    /// # Errors
    ///
    /// Returns an error on an unparseable URL, a transport failure, or a
    /// non-200 status.
    pub async fn get(&self, url: &str, accept: &str) -> Result<(Response, String)> {
        let parsed = reqwest::Url::parse(url).map_err(|e| ImageError::Url {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let mut request = Request::new(Method::GET, parsed);
        let accept_value =
            HeaderValue::from_str(accept).map_err(|_| ImageError::Header(accept.to_string()))?;
        request.headers_mut().insert(ACCEPT, accept_value);

        debug!(url, accept, "GET");
        let response = self.transport.round_trip(request).await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ImageError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let media_type = primary_media_type(&response);
        Ok((response, media_type))
    }

    /// GETs `url` and decodes the whole body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is not valid JSON
    /// for `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, accept: &str) -> Result<T> {
        let (response, _) = self.get(url, accept).await?;
        let body = response.bytes().await.map_err(|source| ImageError::Request {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_slice(&body).map_err(|source| ImageError::Json {
            url: url.to_string(),
            source,
        })
    }
}

/// The `Content-Type` with parameters stripped, e.g.
/// `application/json; charset=utf-8` becomes `application/json`.
fn primary_media_type(response: &Response) -> String {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .unwrap_or("")
        .trim()
        .to_string()
}

//! Host-specific request decoration for registry authentication.
//!
//! Two registries get special handling: Docker Hub exchanges an anonymous
//! pull token once per process, and GitHub Container Registry accepts a
//! fixed placeholder bearer for public images. Everything else goes through
//! the base transport untouched.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Request, Response};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ImageError, Result};
use crate::transport::{HttpClient, RoundTrip};

/// Docker Hub's anonymous token endpoint.
const DOCKER_TOKEN_URL: &str = "https://auth.docker.io/token?service=registry.docker.io";

/// Docker Hub blob-storage redirect target. The signed redirect URL already
/// carries credentials; sending `Authorization` too causes a 400.
const DOCKER_BLOB_STORAGE_SUFFIX: &str = "r2.cloudflarestorage.com";

/// ghcr.io accepts this placeholder bearer for public images.
const GITHUB_BEARER: &str = "Bearer QQ==";

/// Picks the transport decorator for a registry host.
pub fn transport_for_host(host: &str, base: Arc<dyn RoundTrip>) -> Arc<dyn RoundTrip> {
    match host {
        "index.docker.io" => Arc::new(DockerAuth::new(base)),
        "ghcr.io" => Arc::new(GithubAuth::new(base)),
        _ => base,
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
}

/// Anonymous Docker Hub bearer auth. The token is fetched on first use and
/// kept for the process lifetime; CLI runs are short enough that refresh
/// logic isn't warranted.
pub struct DockerAuth {
    inner: Arc<dyn RoundTrip>,
    token: Mutex<Option<String>>,
}

impl DockerAuth {
    /// Wraps `inner` with Docker Hub token handling.
    #[must_use]
    pub fn new(inner: Arc<dyn RoundTrip>) -> Self {
        Self {
            inner,
            token: Mutex::new(None),
        }
    }

    async fn bearer_token(&self, repository: &str) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let url = format!("{DOCKER_TOKEN_URL}&scope=repository:{repository}:pull");
        debug!(url, "requesting anonymous token");
        let client = HttpClient::new(self.inner.clone());
        let response: TokenResponse = client.get_json(&url, "application/json").await?;
        if response.token.is_empty() {
            return Err(ImageError::InvalidToken { url });
        }

        *cached = Some(response.token.clone());
        Ok(response.token)
    }
}

/// The repository path between `/v2/` and `/manifests` or `/blobs`, which is
/// what the token scope needs. e.g. `/v2/envoyproxy/envoy/manifests/latest`
/// yields `envoyproxy/envoy`.
fn repository_from_path(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/v2/")?;
    let end = rest.find("/manifests").or_else(|| rest.find("/blobs"))?;
    Some(&rest[..end])
}

#[async_trait]
impl RoundTrip for DockerAuth {
    async fn round_trip(&self, mut request: Request) -> Result<Response> {
        let host = request.url().host_str().unwrap_or("").to_string();
        if host.ends_with(DOCKER_BLOB_STORAGE_SUFFIX) {
            request.headers_mut().remove(AUTHORIZATION);
            return self.inner.round_trip(request).await;
        }

        let repository = repository_from_path(request.url().path()).map(str::to_string);
        if let Some(repository) = repository {
            let token = self.bearer_token(&repository).await?;
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ImageError::Header("Authorization".to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        self.inner.round_trip(request).await
    }
}

/// Fixed placeholder bearer for ghcr.io; no token exchange needed for
/// public images.
pub struct GithubAuth {
    inner: Arc<dyn RoundTrip>,
}

impl GithubAuth {
    /// Wraps `inner` with the fixed ghcr.io bearer.
    #[must_use]
    pub fn new(inner: Arc<dyn RoundTrip>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl RoundTrip for GithubAuth {
    async fn round_trip(&self, mut request: Request) -> Result<Response> {
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static(GITHUB_BEARER));
        self.inner.round_trip(request).await
    }
}

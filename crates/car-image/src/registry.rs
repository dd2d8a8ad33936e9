//! Docker Registry v2 / OCI Distribution client.
//!
//! Resolves a tagged reference to a single-platform [`Image`] (traversing a
//! multi-platform index when needed) and streams individual layers through a
//! per-file callback.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use futures::StreamExt;
use tar::Archive;
use tracing::{debug, trace};

use crate::auth::transport_for_host;
use crate::error::{ImageError, Result};
use crate::image::{assemble, platform_string, FilesystemLayer, Image, LayerKind};
use crate::manifest::{
    accept, ImageConfig, ImageIndex, ImageManifest, IMAGE_CONFIG_TYPES, IMAGE_INDEX_TYPES,
    IMAGE_MANIFEST_TYPES,
};
use crate::reference::Reference;
use crate::transport::{DirectTransport, HttpClient, RoundTrip};

/// Mode used when a tar entry carries no permission bits (typical of
/// Windows-authored archives) and for raw Wasm layers.
const DEFAULT_FILE_MODE: u32 = 0o644;

/// Callback invoked for each regular file in a layer. Arguments are the
/// archive-side name, size in bytes, Unix mode bits, modification time, and
/// a reader over the file contents. The reader is only valid for the
/// duration of the call and may be read anywhere from 0 to `size` bytes.
pub type ReadFile<'a> =
    &'a mut (dyn FnMut(&str, u64, u32, DateTime<Utc>, &mut dyn Read) -> Result<()> + Send);

/// An abstraction over a potentially remote OCI registry.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Returns a summary of an image tag for a given platform, including
    /// its filesystem layers.
    ///
    /// An empty `platform` means auto-select, which succeeds only when the
    /// image offers exactly one choice.
    ///
    /// # Errors
    ///
    /// Returns an error when there is no image manifest, when `platform` is
    /// empty but the image offers several, or when `platform` names one the
    /// image doesn't have.
    async fn get_image(&self, reference: &Reference, platform: &str) -> Result<Image>;

    /// Iterates over the files in a layer, calling `read_file` for each
    /// regular file.
    ///
    /// # Errors
    ///
    /// Returns an error when the blob can't be fetched or decoded, or when
    /// `read_file` fails.
    async fn read_filesystem_layer(
        &self,
        layer: &FilesystemLayer,
        read_file: ReadFile<'_>,
    ) -> Result<()>;
}

/// HTTP implementation of [`Registry`].
pub struct RegistryClient {
    base_url: String,
    http: HttpClient,
}

impl RegistryClient {
    /// Creates a client for `host` with the process-default transport,
    /// wrapped in host-appropriate auth.
    #[must_use]
    pub fn for_host(host: &str) -> Self {
        Self::with_transport(host, Arc::new(DirectTransport::new()))
    }

    /// Creates a client for `host` over the given base transport. Docker Hub
    /// and ghcr.io hosts get their auth decorators layered on top; tests
    /// pass a recording transport here.
    #[must_use]
    pub fn with_transport(host: &str, base: Arc<dyn RoundTrip>) -> Self {
        let transport = transport_for_host(host, base);
        // Well-known plain-text registry port, e.g. `docker run registry:2`.
        let scheme = if host.ends_with(":5000") { "http" } else { "https" };
        Self {
            base_url: format!("{scheme}://{host}/v2"),
            http: HttpClient::new(transport),
        }
    }

    /// A tag can resolve to a multi-platform index or directly to a
    /// manifest; dispatch on the negotiated media type.
    async fn image_manifest(
        &self,
        reference: &Reference,
        platform: &str,
    ) -> Result<(ImageManifest, String)> {
        let url = format!(
            "{}/{}/manifests/{}",
            self.base_url,
            reference.path(),
            reference.tag()
        );
        let accept_types = format!(
            "{}, {}",
            accept(IMAGE_INDEX_TYPES),
            accept(IMAGE_MANIFEST_TYPES)
        );
        let (response, media_type) = self.http.get(&url, &accept_types).await?;
        let body = response
            .bytes()
            .await
            .map_err(|source| ImageError::Request {
                url: url.clone(),
                source,
            })?;

        if IMAGE_INDEX_TYPES.contains(&media_type.as_str()) {
            let index: ImageIndex =
                serde_json::from_slice(&body).map_err(|source| ImageError::Json {
                    url: url.clone(),
                    source,
                })?;
            self.platform_manifest(&index, reference.path(), platform)
                .await
        } else if IMAGE_MANIFEST_TYPES.contains(&media_type.as_str()) {
            let manifest: ImageManifest =
                serde_json::from_slice(&body).map_err(|source| ImageError::Json {
                    url: url.clone(),
                    source,
                })?;
            Ok((manifest, url))
        } else {
            Err(ImageError::UnknownMediaType { media_type, url })
        }
    }

    /// Picks one manifest from the index for `platform` and fetches it.
    /// Within one platform, the greatest `os.version` wins (how multi-macOS
    /// Homebrew images select the newest build).
    async fn platform_manifest(
        &self,
        index: &ImageIndex,
        path: &str,
        platform: &str,
    ) -> Result<(ImageManifest, String)> {
        struct Candidate {
            url: String,
            media_type: String,
            os_version: String,
        }

        let mut candidates: BTreeMap<String, Candidate> = BTreeMap::new();
        for manifest_ref in &index.manifests {
            let key = platform_string(&manifest_ref.platform.os, &manifest_ref.platform.architecture);
            if key.is_empty() {
                continue; // no platform metadata; not selectable
            }
            let candidate = Candidate {
                url: format!("{}/{}/manifests/{}", self.base_url, path, manifest_ref.digest),
                media_type: manifest_ref.media_type.clone(),
                os_version: manifest_ref.platform.os_version.clone(),
            };
            let newest = match candidates.get(&key) {
                Some(existing) => candidate.os_version >= existing.os_version,
                None => true,
            };
            if newest {
                candidates.insert(key, candidate);
            }
        }

        let chosen = require_valid_platform(platform, &candidates)?;
        debug!(platform = %chosen, "selected platform manifest");

        let candidate = &candidates[&chosen];
        let manifest: ImageManifest = self
            .http
            .get_json(&candidate.url, &candidate.media_type)
            .await?;
        Ok((manifest, candidate.url.clone()))
    }

    /// Fetches the config blob named by the manifest, rejecting config media
    /// types we don't recognize.
    async fn image_config(
        &self,
        path: &str,
        manifest: &ImageManifest,
        manifest_url: &str,
    ) -> Result<ImageConfig> {
        if !IMAGE_CONFIG_TYPES.contains(&manifest.config.media_type.as_str()) {
            return Err(ImageError::InvalidConfigMediaType {
                url: manifest_url.to_string(),
            });
        }
        let url = format!("{}/{}/blobs/{}", self.base_url, path, manifest.config.digest);
        self.http.get_json(&url, &manifest.config.media_type).await
    }

    /// Streams the blob body into memory, chunk by chunk.
    async fn fetch_blob(&self, url: &str, accept: &str, expected: u64) -> Result<Vec<u8>> {
        let (response, _) = self.http.get(url, accept).await?;
        let capacity = usize::try_from(expected).unwrap_or(0).min(256 * 1024 * 1024);
        let mut body = Vec::with_capacity(capacity);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| ImageError::Request {
                url: url.to_string(),
                source,
            })?;
            body.extend_from_slice(&chunk);
            trace!(url, downloaded = body.len(), expected, "blob chunk");
        }
        Ok(body)
    }
}

#[async_trait]
impl Registry for RegistryClient {
    async fn get_image(&self, reference: &Reference, platform: &str) -> Result<Image> {
        let (manifest, manifest_url) = self.image_manifest(reference, platform).await?;

        // History (created_by per layer) is not in the manifest, only in the
        // config JSON.
        let config = self
            .image_config(reference.path(), &manifest, &manifest_url)
            .await?;

        // A single-platform image reveals its platform only in the config.
        // Double-check the caller's request against it.
        let mut platforms = BTreeMap::new();
        let derived = platform_string(&config.os, &config.architecture);
        if !derived.is_empty() {
            platforms.insert(derived, ());
        }
        if !platform.is_empty() {
            require_valid_platform(platform, &platforms)?;
        }

        let base_url = format!("{}/{}", self.base_url, reference.path());
        Ok(assemble(&base_url, &manifest_url, &manifest, &config))
    }

    async fn read_filesystem_layer(
        &self,
        layer: &FilesystemLayer,
        read_file: ReadFile<'_>,
    ) -> Result<()> {
        debug!(url = %layer.url, media_type = %layer.media_type, "reading layer");
        let body = self
            .fetch_blob(&layer.url, &layer.media_type, layer.size)
            .await?;

        match layer.kind {
            LayerKind::TarGzip => read_tar_gzip(&body, read_file),
            LayerKind::Wasm => {
                if layer.file_name.is_empty() {
                    return Err(ImageError::MissingFileName);
                }
                let mut reader: &[u8] = &body;
                read_file(
                    &layer.file_name,
                    layer.size,
                    DEFAULT_FILE_MODE,
                    Utc::now(),
                    &mut reader,
                )
            }
        }
    }
}

/// Walks a gzipped tar, invoking the callback for each regular file.
fn read_tar_gzip(body: &[u8], read_file: ReadFile<'_>) -> Result<()> {
    let mut archive = Archive::new(GzDecoder::new(body));
    for entry in archive.entries()? {
        let mut entry = entry?;

        // Skip directories, symbolic links, block devices, etc.
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = entry.path()?.to_string_lossy().into_owned();

        // Whiteouts mark deletions in the overlay; deletion isn't modeled
        // here, so neither the marker nor the deleted name is surfaced.
        if name.contains(".wh.") {
            continue;
        }

        let mode = entry.header().mode()?;
        let mode = if mode & 0o777 == 0 {
            // Windows-authored entries have no permission bits; substitute
            // something usable on POSIX hosts.
            DEFAULT_FILE_MODE
        } else {
            mode & 0o777
        };

        let size = entry.size();
        let mod_time = DateTime::<Utc>::from_timestamp(
            i64::try_from(entry.header().mtime()?).unwrap_or(0),
            0,
        )
        .unwrap_or_default();

        read_file(&name, size, mode, mod_time, &mut entry).map_err(|source| {
            ImageError::Callback {
                name: name.clone(),
                source: Box::new(source),
            }
        })?;
    }
    Ok(())
}

/// Resolves the caller's requested platform against the available set.
///
/// Empty `platform` auto-selects a sole choice and otherwise reports the
/// sorted alternatives; a named platform must be present.
pub(crate) fn require_valid_platform<T>(
    platform: &str,
    platforms: &BTreeMap<String, T>,
) -> Result<String> {
    // A manifest without platform metadata could be a sign of broken JSON;
    // error rather than guess.
    if platforms.is_empty() {
        return Err(ImageError::NoPlatform);
    }

    if platform.is_empty() {
        if platforms.len() == 1 {
            return Ok(platforms.keys().next().cloned().unwrap_or_default());
        }
        return Err(ImageError::AmbiguousPlatform(sorted_keys(platforms)));
    }

    if platforms.contains_key(platform) {
        return Ok(platform.to_string());
    }
    Err(ImageError::UnsupportedPlatform {
        platform: platform.to_string(),
        supported: sorted_keys(platforms),
    })
}

/// Keys joined with `", "`; `BTreeMap` iteration is already sorted.
fn sorted_keys<T>(platforms: &BTreeMap<String, T>) -> String {
    platforms
        .keys()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

//! Image and layer views assembled from a manifest and its config.
//!
//! The manifest knows the layer blobs; the config knows the build history
//! (`created_by` per step). The two are correlated by index, with
//! `empty_layer` history entries skipped, because `rootfs.diff_ids` don't
//! match layer digests.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::manifest::{
    ImageConfig, ImageManifest, ANNOTATION_IMAGE_TITLE, MEDIA_TYPE_DOCKER_IMAGE_LAYER,
    MEDIA_TYPE_OCI_IMAGE_LAYER, MEDIA_TYPE_WASM_IMAGE_LAYER,
};

/// Dockerfile directives that never produce a filesystem layer. Some
/// builders (notably for Windows images) omit `empty_layer: true` yet still
/// record these steps, so matching `created_by` is the fallback. `RUN`,
/// `ADD` and `COPY` are absent on purpose: canonical images built by
/// bashbrew don't always include them in `created_by`, so an allow list
/// would drop real layers.
///
/// The `.* +` prefix permits multiple spaces; Moby joins fields on space and
/// historical images carry doubled separators.
static IGNORED_DIRECTIVES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        ".* +(?:ARG|CMD|ENTRYPOINT|ENV|EXPOSE|HEALTHCHECK|LABEL|MAINTAINER|ONBUILD|SHELL|STOPSIGNAL|USER|VOLUME|WORKDIR) .*",
    )
    .expect("directive pattern compiles")
});

/// How a layer's bytes are shaped on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// A gzipped POSIX tar archive (rootfs layer).
    TarGzip,
    /// A single raw Wasm binary.
    Wasm,
}

impl LayerKind {
    /// Maps a descriptor media type to a kind, or `None` for unsupported
    /// layers (Windows foreign layers, in-toto attestations, and anything
    /// unknown), which are dropped during assembly.
    #[must_use]
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type {
            MEDIA_TYPE_OCI_IMAGE_LAYER | MEDIA_TYPE_DOCKER_IMAGE_LAYER => Some(Self::TarGzip),
            MEDIA_TYPE_WASM_IMAGE_LAYER => Some(Self::Wasm),
            _ => None,
        }
    }
}

/// An image bound to one platform: its manifest URL and the ordered
/// filesystem layers (later layers override earlier ones).
#[derive(Debug, Clone)]
pub struct Image {
    /// The manifest URL this image was resolved from.
    pub url: String,
    /// `"<os>/<arch>"`, or empty when the config has no platform metadata
    /// (e.g. Wasm artifacts).
    pub platform: String,
    /// Layers in overlay order.
    pub layers: Vec<FilesystemLayer>,
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total: u64 = self.layers.iter().map(|layer| layer.size).sum();
        write!(
            f,
            "{} platform={} totalLayerSize: {}",
            self.url, self.platform, total
        )
    }
}

/// A downloadable, non-empty filesystem layer.
#[derive(Debug, Clone)]
pub struct FilesystemLayer {
    /// Blob URL in the registry.
    pub url: String,
    /// Streaming shape of the blob.
    pub kind: LayerKind,
    /// Exact media type, used as the `Accept` header when fetching.
    pub media_type: String,
    /// Compressed size in bytes; 0 when unknown.
    pub size: u64,
    /// The (usually Dockerfile) command that created the layer, possibly
    /// empty.
    pub created_by: String,
    /// Filename from the title annotation; only meaningful for Wasm layers.
    pub file_name: String,
}

impl fmt::Display for FilesystemLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} size={} CreatedBy: {}",
            self.url, self.size, self.created_by
        )
    }
}

/// `"<os>/<arch>"`, omitting empty components the way `path.Join` would.
pub(crate) fn platform_string(os: &str, architecture: &str) -> String {
    match (os.is_empty(), architecture.is_empty()) {
        (true, true) => String::new(),
        (false, true) => os.to_string(),
        (true, false) => architecture.to_string(),
        (false, false) => format!("{os}/{architecture}"),
    }
}

/// Builds the [`Image`] view from a fetched manifest and config.
///
/// `base_url` is `<scheme>://<host>/v2/<path>`; `manifest_url` is where the
/// concrete manifest was fetched from (after any platform selection).
pub(crate) fn assemble(
    base_url: &str,
    manifest_url: &str,
    manifest: &ImageManifest,
    config: &ImageConfig,
) -> Image {
    Image {
        url: manifest_url.to_string(),
        platform: platform_string(&config.os, &config.architecture),
        layers: filter_layers(base_url, manifest, config),
    }
}

/// Correlates manifest layers with config history and keeps only layers
/// that can contain files.
///
/// Two cursors walk in parallel: `descriptor` over the manifest's layers
/// and `k` over history, skipping entries recent builders mark
/// `empty_layer`. The bound history is consumed even when the layer itself
/// is dropped, so later layers stay aligned.
fn filter_layers(
    base_url: &str,
    manifest: &ImageManifest,
    config: &ImageConfig,
) -> Vec<FilesystemLayer> {
    // History is optional; back-fill so every layer binds an entry.
    let backfill;
    let history = if config.history.is_empty() {
        backfill = vec![crate::manifest::History::default(); manifest.layers.len()];
        &backfill
    } else {
        &config.history
    };

    let mut layers = Vec::new();
    let mut k = 0;
    for descriptor in &manifest.layers {
        while history.get(k).is_some_and(|h| h.empty_layer) {
            k += 1;
        }
        let created_by = history.get(k).map(|h| h.created_by.clone()).unwrap_or_default();
        k += 1;

        let Some(kind) = LayerKind::from_media_type(&descriptor.media_type) else {
            continue;
        };
        if IGNORED_DIRECTIVES.is_match(&created_by) {
            continue;
        }

        layers.push(FilesystemLayer {
            url: format!("{base_url}/blobs/{}", descriptor.digest),
            kind,
            media_type: descriptor.media_type.clone(),
            size: descriptor.size,
            created_by,
            file_name: descriptor
                .annotations
                .get(ANNOTATION_IMAGE_TITLE)
                .cloned()
                .unwrap_or_default(),
        });
    }
    layers
}

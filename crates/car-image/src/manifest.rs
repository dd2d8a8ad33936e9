//! OCI and Docker registry media types and the wire model behind them.
//!
//! The exact constant strings matter: they are sent in `Accept` headers and
//! drive content negotiation, and the response `Content-Type` is matched
//! against them to decide how to decode the body.

use std::collections::HashMap;

use serde::Deserialize;

// Image index (multi-platform).
pub const MEDIA_TYPE_OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

// Image manifest (single platform).
pub const MEDIA_TYPE_OCI_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

// Image config.
pub const MEDIA_TYPE_OCI_IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const MEDIA_TYPE_DOCKER_CONTAINER_IMAGE: &str =
    "application/vnd.docker.container.image.v1+json";
/// Set by oras when a config isn't explicitly specified.
pub const MEDIA_TYPE_UNKNOWN_IMAGE_CONFIG: &str = "application/vnd.unknown.config.v1+json";
/// From the Wasm artifact image specification.
pub const MEDIA_TYPE_WASM_IMAGE_CONFIG: &str = "application/vnd.module.wasm.config.v1+json";

// Rootfs layers (gzipped tar).
pub const MEDIA_TYPE_OCI_IMAGE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const MEDIA_TYPE_DOCKER_IMAGE_LAYER: &str =
    "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Windows foreign layers; never downloaded.
pub const MEDIA_TYPE_DOCKER_FOREIGN_LAYER: &str =
    "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";

/// A raw Wasm binary layer, from the Wasm artifact image specification.
pub const MEDIA_TYPE_WASM_IMAGE_LAYER: &str =
    "application/vnd.module.wasm.content.layer.v1+wasm";

/// Annotation holding the filename of a non-tar (Wasm) layer.
pub const ANNOTATION_IMAGE_TITLE: &str = "org.opencontainers.image.title";

/// Media types decoded as [`ImageIndex`].
pub(crate) const IMAGE_INDEX_TYPES: &[&str] =
    &[MEDIA_TYPE_OCI_IMAGE_INDEX, MEDIA_TYPE_DOCKER_MANIFEST_LIST];

/// Media types decoded as [`ImageManifest`].
pub(crate) const IMAGE_MANIFEST_TYPES: &[&str] =
    &[MEDIA_TYPE_OCI_IMAGE_MANIFEST, MEDIA_TYPE_DOCKER_MANIFEST];

/// Media types decoded as [`ImageConfig`].
pub(crate) const IMAGE_CONFIG_TYPES: &[&str] = &[
    MEDIA_TYPE_OCI_IMAGE_CONFIG,
    MEDIA_TYPE_DOCKER_CONTAINER_IMAGE,
    MEDIA_TYPE_WASM_IMAGE_CONFIG,
    MEDIA_TYPE_UNKNOWN_IMAGE_CONFIG,
];

/// Joins media types into an `Accept` header value.
pub(crate) fn accept(types: &[&str]) -> String {
    types.join(", ")
}

/// Multi-platform image index, a.k.a. Docker manifest list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageIndex {
    #[serde(default)]
    pub manifests: Vec<ManifestRef>,
}

/// One per-platform manifest descriptor inside an [`ImageIndex`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRef {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub platform: Platform,
}

/// Platform of an indexed manifest. Redefined rather than reusing serde
/// flattening because of the dotted `os.version` field name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, rename = "os.version")]
    pub os_version: String,
}

/// Single-platform image manifest: one config and ordered layer descriptors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageManifest {
    #[serde(default)]
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

/// Content descriptor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

/// Image configuration. History correlates by index with the manifest's
/// layers because `rootfs.diff_ids` don't match layer digests.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, rename = "os.version")]
    pub os_version: String,
    #[serde(default)]
    pub history: Vec<History>,
}

/// One build-history record; `empty_layer` means the step produced no
/// filesystem change.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct History {
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub empty_layer: bool,
}

//! Image reference parsing.
//!
//! Handles Docker-familiar references: `alpine:3.14.0` resolves to the
//! official `library/` repository on `index.docker.io`, while anything with
//! a registry host keeps it. This is deliberately not a strict parser; a bad
//! host simply fails later with an HTTP error.

use std::fmt;

use crate::error::{ImageError, Result};

/// Docker Hub's registry endpoint. The familiar `docker.io` name is an alias.
const DOCKER_HUB_DOMAIN: &str = "index.docker.io";

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    domain: String,
    path: String,
    tag: String,
}

impl Reference {
    /// Parses a reference string into `(domain, path, tag)`.
    ///
    /// A tag is required. A colon before the first slash denotes a
    /// `host:port`, not a tag, so `registry:5000/some/image` fails.
    ///
    /// # Errors
    ///
    /// Returns an error for empty input or an untagged reference.
    pub fn parse(reference: &str) -> Result<Self> {
        if reference.is_empty() {
            return Err(ImageError::InvalidReference);
        }

        let colon = reference.rfind(':').ok_or(ImageError::UntaggedReference)?;
        let slash = reference.find('/');
        if slash.is_some_and(|s| s > colon) {
            // e.g. host:5000/image with no tag
            return Err(ImageError::UntaggedReference);
        }

        let tag = &reference[colon + 1..];
        let remaining = &reference[..colon];

        // Familiar official image, e.g. "alpine:3.14.0".
        let Some(slash) = slash else {
            return Ok(Self {
                domain: DOCKER_HUB_DOMAIN.to_string(),
                path: format!("library/{remaining}"),
                tag: tag.to_string(),
            });
        };

        // Familiar user image, e.g. "envoyproxy/envoy:v1.18.3". A dot
        // anywhere before the tag means the first segment is a registry
        // host, not a user.
        if remaining.rfind('/') == Some(slash) && !remaining.contains('.') {
            return Ok(Self {
                domain: DOCKER_HUB_DOMAIN.to_string(),
                path: remaining.to_string(),
                tag: tag.to_string(),
            });
        }

        let domain = match &remaining[..slash] {
            "docker.io" => DOCKER_HUB_DOMAIN,
            domain => domain,
        };
        Ok(Self {
            domain: domain.to_string(),
            path: remaining[slash + 1..].to_string(),
            tag: tag.to_string(),
        })
    }

    /// Registry host, possibly with a port.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Repository path, e.g. `library/alpine`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Tag, e.g. `3.14.0`.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.domain, self.path, self.tag)
    }
}

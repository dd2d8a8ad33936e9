//! Error types for image operations.

use thiserror::Error;

/// Result type alias for image operations.
pub type Result<T> = std::result::Result<T, ImageError>;

/// Errors that can occur while resolving or reading an image.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The reference string is empty or unparseable.
    #[error("invalid reference format")]
    InvalidReference,

    /// The reference carries no tag.
    #[error("expected tagged reference")]
    UntaggedReference,

    /// A URL could not be parsed.
    #[error("invalid URL {url}: {message}")]
    Url {
        /// The offending URL.
        url: String,
        /// Parser message.
        message: String,
    },

    /// A header value could not be encoded.
    #[error("invalid header value: {0}")]
    Header(String),

    /// The request could not be sent or the body could not be read.
    #[error("error requesting {url}: {source}")]
    Request {
        /// The URL that failed.
        url: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The registry answered with a non-200 status.
    #[error("received {status} status code from {url:?}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// The URL that failed.
        url: String,
    },

    /// A response body was not the JSON document we asked for.
    #[error("error decoding {url}: {source}")]
    Json {
        /// The URL the body came from.
        url: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// The manifest endpoint negotiated a media type we do not speak.
    #[error("unknown mediaType {media_type} from {url}")]
    UnknownMediaType {
        /// The Content-Type the registry returned.
        media_type: String,
        /// The manifest URL.
        url: String,
    },

    /// The manifest references a config blob of an unrecognized type.
    #[error("invalid config media type in image {url}")]
    InvalidConfigMediaType {
        /// The manifest URL.
        url: String,
    },

    /// No platform was requested and more than one is available.
    #[error("choose a platform: {0}")]
    AmbiguousPlatform(String),

    /// The requested platform is not in the image.
    #[error("{platform} is not a supported platform: {supported}")]
    UnsupportedPlatform {
        /// The platform the caller asked for.
        platform: String,
        /// Sorted, comma-separated platforms the image has.
        supported: String,
    },

    /// Neither the index nor the config carries platform metadata.
    #[error("image config contains no platform information")]
    NoPlatform,

    /// A Wasm layer has no title annotation to name its file.
    #[error("missing filename")]
    MissingFileName,

    /// The anonymous token exchange returned an unusable token.
    #[error("invalid bearer token from {url:?}")]
    InvalidToken {
        /// The token endpoint URL.
        url: String,
    },

    /// A glob pattern failed to compile.
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        /// The offending pattern.
        pattern: String,
        /// Underlying compile error.
        #[source]
        source: glob::PatternError,
    },

    /// The per-file callback failed; aborts the layer walk.
    #[error("error calling readFile on {name}: {source}")]
    Callback {
        /// Archive-side name of the entry being read.
        name: String,
        /// The callback's error.
        #[source]
        source: Box<ImageError>,
    },

    /// Some user-supplied patterns never matched any file.
    #[error("{0} not found in layer")]
    PatternsNotFound(String),

    /// I/O error (gzip, tar, or local file writes).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

use thiserror::Error;

/// CORS configuration error
///
/// Returned by `CorsMiddlewareBuilder::build()` when the configuration
/// is invalid or violates CORS specification requirements.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorsConfigError {
    /// Wildcard origin (`*`) cannot be used with credentials
    #[error(
        "CORS configuration error: Cannot use wildcard origin (*) with credentials. \
         When allow_credentials is true, you must specify exact origins."
    )]
    WildcardWithCredentials,
    /// The origin string is not `scheme://host[:port]`.
    #[error(
        "CORS configuration error: Invalid origin format '{origin}'. \
         Expected format: scheme://host:port (e.g., https://example.com)"
    )]
    InvalidOriginFormat { origin: String },
    /// When `allow_credentials` is `true`, at least one origin must be specified.
    #[error(
        "CORS configuration error: Cannot use credentials with empty origins list. \
         When allow_credentials is true, at least one origin must be specified."
    )]
    EmptyOriginsWithCredentials,
    #[error("CORS configuration error: Invalid origin pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    /// A per-path override could not be read.
    #[error("CORS configuration error: Invalid override for '{path}': {reason}")]
    InvalidOverride { path: String, reason: String },
}

use camino::Utf8PathBuf;

/// Error types for the geoipfilter library.
///
/// Every variant is a construction-time failure. Per-event problems (bad
/// addresses, lookup misses) never surface here; the filter reports them
/// through its boolean result instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required configuration option was not supplied.
    #[error("{name} must be set in the geoip filter configuration")]
    MissingOption { name: &'static str },

    /// A configuration option was supplied with an unusable value.
    #[error("invalid value for {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },

    /// The `src` option is not a valid field path.
    #[error("invalid field path {path:?}")]
    InvalidFieldPath {
        path: String,
        #[source]
        source: field_path::ParseError,
    },

    /// MMDB database file was not found at the configured path.
    #[error("database not found: {path}")]
    DatabaseNotFound { path: Utf8PathBuf },

    /// MMDB database file exists but could not be opened.
    #[error("failed to open geoip database at {path}")]
    DatabaseOpen {
        path: Utf8PathBuf,
        #[source]
        source: maxminddb::MaxMindDbError,
    },

    /// A configuration file could not be read.
    #[error("failed to read config file {path}")]
    ConfigRead {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration was not valid JSON, or not a JSON object.
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience type alias for Results using the library error.
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the reactive data-source framework.

use std::path::PathBuf;

use horizon_datasource_core::IndexError;

use crate::service::Handle;

/// Result type alias for data-source operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the data-source framework.
///
/// Lookup misses (an unknown data-source id, an unknown key, an unknown
/// subscription handle) are not errors; they surface as `None` or `false`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Positional access outside of a map or view.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// A sorted view was requested without any sort criterion.
    #[error("sorted view requires at least one sort criterion")]
    MissingSort,

    /// A view's filter can only be set once.
    #[error("filter already set on view '{view}'")]
    FilterAlreadySet { view: String },

    /// A view's filter cannot change once other views or the cache are
    /// keyed on it.
    #[error("view '{view}' is shared; its filter can no longer be set")]
    ViewShared { view: String },

    /// Filter expression parsing error.
    #[error("Invalid filter '{expression}': {message}")]
    InvalidFilter { expression: String, message: String },

    /// Sort specification parsing error.
    #[error("Invalid sort '{spec}': {message}")]
    InvalidSort { spec: String, message: String },

    /// An attribute name the getter does not know.
    #[error("unknown attribute '{attribute}'")]
    UnknownAttribute { attribute: String },

    /// A subscription handle is already registered.
    #[error("subscription handle {handle} already in use")]
    HandleInUse { handle: Handle },

    /// A viewport command was sent to a non-viewport subscription.
    #[error("subscription {handle} is not a viewport")]
    NotAViewport { handle: Handle },

    /// A tree command was sent for a data source that is not a grouping tree.
    #[error("data source '{id}' is not a grouping tree")]
    NotATree { id: String },

    /// Configuration file I/O error.
    #[error("Failed to read config '{}': {source}", .path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration parse error.
    #[error("Invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl Error {
    /// Create a filter parse error.
    pub fn invalid_filter(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidFilter {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// Create a sort parse error.
    pub fn invalid_sort(spec: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSort {
            spec: spec.into(),
            message: message.into(),
        }
    }

    /// Create an unknown-attribute error.
    pub fn unknown_attribute(attribute: impl Into<String>) -> Self {
        Self::UnknownAttribute {
            attribute: attribute.into(),
        }
    }

    /// Create a config I/O error.
    pub fn config_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ConfigIo {
            path: path.into(),
            source,
        }
    }
}

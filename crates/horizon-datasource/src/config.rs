//! Service configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```toml
//! snapshot_segment_size = 200
//! query_marker = "$"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of rows per snapshot segment.
pub const DEFAULT_SEGMENT_SIZE: usize = 100;

/// Default viewport window size.
pub const DEFAULT_WINDOW_SIZE: usize = 50;

/// Default upper bound for viewport window sizes.
pub const DEFAULT_MAX_WINDOW_SIZE: usize = 1000;

/// Default delimiter that marks query references in filter expressions.
pub const DEFAULT_QUERY_MARKER: char = '#';

/// Default idle time before an unobserved view may be evicted.
pub const DEFAULT_IDLE_EVICTION_SECS: u64 = 300;

/// Configuration of a [`DataSourceService`](crate::service::DataSourceService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    /// Snapshots longer than this are split into segments of this size.
    pub snapshot_segment_size: usize,
    /// Window size of viewports whose subscribe request has none.
    pub default_window_size: usize,
    /// Largest window a viewport may be resized to.
    pub max_window_size: usize,
    /// Delimiter that turns a filter expression into a query reference.
    pub query_marker: char,
    /// Seconds an unobserved, non-permanent view may stay cached.
    pub idle_eviction_secs: u64,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            snapshot_segment_size: DEFAULT_SEGMENT_SIZE,
            default_window_size: DEFAULT_WINDOW_SIZE,
            max_window_size: DEFAULT_MAX_WINDOW_SIZE,
            query_marker: DEFAULT_QUERY_MARKER,
            idle_eviction_secs: DEFAULT_IDLE_EVICTION_SECS,
        }
    }
}

impl DataSourceConfig {
    /// Creates a builder starting from the defaults.
    pub fn builder() -> DataSourceConfigBuilder {
        DataSourceConfigBuilder::default()
    }

    /// Parses a TOML document. Missing fields keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str::<Self>(source)?.normalized())
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::config_io(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Idle time after which a view may be evicted.
    pub fn idle_eviction(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_secs)
    }

    /// Sizes of zero are meaningless and are raised to one.
    fn normalized(mut self) -> Self {
        self.snapshot_segment_size = self.snapshot_segment_size.max(1);
        self.max_window_size = self.max_window_size.max(1);
        self.default_window_size = self.default_window_size.clamp(1, self.max_window_size);
        self
    }
}

/// Builder for [`DataSourceConfig`].
#[derive(Debug, Default)]
pub struct DataSourceConfigBuilder {
    config: DataSourceConfig,
}

impl DataSourceConfigBuilder {
    /// Sets the snapshot segment size.
    pub fn snapshot_segment_size(mut self, rows: usize) -> Self {
        self.config.snapshot_segment_size = rows;
        self
    }

    /// Sets the default viewport window size.
    pub fn default_window_size(mut self, rows: usize) -> Self {
        self.config.default_window_size = rows;
        self
    }

    /// Sets the maximum viewport window size.
    pub fn max_window_size(mut self, rows: usize) -> Self {
        self.config.max_window_size = rows;
        self
    }

    /// Sets the query marker.
    pub fn query_marker(mut self, marker: char) -> Self {
        self.config.query_marker = marker;
        self
    }

    /// Sets the idle eviction time in seconds.
    pub fn idle_eviction_secs(mut self, secs: u64) -> Self {
        self.config.idle_eviction_secs = secs;
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> DataSourceConfig {
        self.config.normalized()
    }
}

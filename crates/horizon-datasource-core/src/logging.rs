//! Logging facilities for Horizon Datasource.
//!
//! Horizon Datasource uses the `tracing` crate for instrumentation. The
//! library never installs a subscriber; applications do:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_datasource=debug")
//!     .init();
//! ```
//!
//! Per-event dispatch is logged at `trace`, view and subscription lifecycle at
//! `debug`, and recovered conditions (an aborted viewport drain, an unknown
//! subscription handle) at `warn`.

/// Span names used throughout Horizon Datasource for tracing.
pub mod span_names {
    /// Performance span wrapping timed operations.
    pub const PERF: &str = "horizon_datasource::perf";
}

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Indexed ordered map target.
    pub const INDEXED_MAP: &str = "horizon_datasource_core::indexed_map";
    /// Observer registry target.
    pub const OBSERVER: &str = "horizon_datasource_core::observer";
    /// Reactive view target.
    pub const VIEW: &str = "horizon_datasource::view";
    /// Viewport listener target.
    pub const VIEWPORT: &str = "horizon_datasource::viewport";
    /// Grouping tree target.
    pub const GROUPING: &str = "horizon_datasource::grouping";
    /// Data source service target.
    pub const SERVICE: &str = "horizon_datasource::service";
}

/// A guard that keeps a tracing span entered until dropped.
///
/// This is useful for tracking the duration of drains and bulk loads.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    ///
    /// The span will be active until the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: span_names::PERF, "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

use crate::config::{CompressionConfig, ContentTypeFilter, InvalidThreshold, parse_size};
use crate::service::CompressionService;
use compression_core::Level;
use std::sync::Arc;
use tower::Layer;

/// A Tower layer that conditionally compresses HTTP response bodies.
///
/// The layer holds the policy: which content types are eligible, how large
/// a response must be before compression is worthwhile, the encoder level,
/// and how structured JSON bodies are rendered. The policy is resolved
/// once here and shared read-only by every service the layer produces.
#[derive(Debug, Clone)]
pub struct CompressionLayer {
    config: CompressionConfig,
}

impl CompressionLayer {
    /// Creates a new compression layer with default settings: the built-in
    /// content-type filter, a 1024-byte threshold, the codec's default
    /// level, and compact JSON rendering.
    pub fn new() -> Self {
        Self {
            config: CompressionConfig::default(),
        }
    }

    /// Sets the minimum declared response size, in bytes, below which
    /// compression is skipped. Zero disables the size check.
    pub fn threshold(mut self, bytes: usize) -> Self {
        self.config.threshold = bytes;
        self
    }

    /// Sets the threshold from a size string such as `"1mb"` or `"512kb"`.
    ///
    /// Fails on malformed input, so a configuration typo surfaces at setup
    /// rather than while serving requests.
    pub fn threshold_str(mut self, size: &str) -> Result<Self, InvalidThreshold> {
        self.config.threshold = parse_size(size)?;
        Ok(self)
    }

    /// Replaces the content-type filter with a custom predicate.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.config.filter = ContentTypeFilter::new(predicate);
        self
    }

    /// Sets the compression level handed to the encoder constructor.
    pub fn level(mut self, level: Level) -> Self {
        self.config.level = level;
        self
    }

    /// Sets the indentation width used when serializing structured JSON
    /// bodies. Zero writes compact JSON.
    pub fn json_indent(mut self, spaces: usize) -> Self {
        self.config.json_indent = spaces;
        self
    }
}

impl Default for CompressionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(inner, Arc::new(self.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_THRESHOLD;

    #[test]
    fn defaults() {
        let layer = CompressionLayer::new();
        assert_eq!(layer.config.threshold, DEFAULT_THRESHOLD);
        assert_eq!(layer.config.json_indent, 0);
    }

    #[test]
    fn threshold_from_size_string() {
        let layer = CompressionLayer::new().threshold_str("1mb").unwrap();
        assert_eq!(layer.config.threshold, 1024 * 1024);
    }

    #[test]
    fn malformed_threshold_fails_at_setup() {
        assert!(CompressionLayer::new().threshold_str("one mb").is_err());
    }

    #[test]
    fn builder_methods_chain() {
        let layer = CompressionLayer::new()
            .threshold(4096)
            .level(Level::Best)
            .json_indent(2)
            .filter(|ct| ct.starts_with("text/"));

        assert_eq!(layer.config.threshold, 4096);
        assert_eq!(layer.config.json_indent, 2);
        assert!(layer.config.filter.matches("text/html"));
        assert!(!layer.config.filter.matches("application/json"));
    }
}

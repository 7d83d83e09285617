use compression_core::Level;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Default minimum body size for compression, in bytes.
pub const DEFAULT_THRESHOLD: usize = 1024;

/// Per-response compression preference, stored in the response extensions.
///
/// Handlers insert this into `Response::extensions_mut()` to override the
/// configured content-type and threshold checks for a single response. A
/// response without the extension behaves as [`CompressionOverride::Unset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionOverride {
    /// Compress whenever the client accepts a supported encoding, even if
    /// the content type does not match the filter.
    Force,
    /// Never compress this response.
    Suppress,
    /// Apply the configured policy.
    #[default]
    Unset,
}

/// Predicate deciding which content types are eligible for compression.
#[derive(Clone)]
pub struct ContentTypeFilter {
    predicate: Arc<dyn Fn(&str) -> bool + Send + Sync>,
}

impl ContentTypeFilter {
    /// Creates a filter from a custom predicate over the `Content-Type`
    /// header value.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Returns whether the given content type is eligible for compression.
    pub fn matches(&self, content_type: &str) -> bool {
        (self.predicate)(content_type)
    }
}

impl Default for ContentTypeFilter {
    fn default() -> Self {
        Self::new(compressible)
    }
}

impl fmt::Debug for ContentTypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentTypeFilter(..)")
    }
}

/// Content types that typically shrink under compression: textual types,
/// JSON, scripts, and a handful of font and image formats that are really
/// text or uncompressed tables under the hood.
fn compressible(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();

    ct.contains("json")
        || ct.contains("text")
        || ct.contains("javascript")
        || ct.contains("dart")
        || ct.contains("image/svg+xml")
        || ct.contains("application/x-font-ttf")
        || ct.contains("application/vnd.ms-opentype")
        || ct.contains("application/vnd.ms-fontobject")
}

/// Resolved configuration shared by all clones of the service.
#[derive(Debug, Clone)]
pub(crate) struct CompressionConfig {
    pub(crate) filter: ContentTypeFilter,
    pub(crate) threshold: usize,
    pub(crate) level: Level,
    pub(crate) json_indent: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            filter: ContentTypeFilter::default(),
            threshold: DEFAULT_THRESHOLD,
            level: Level::Default,
            json_indent: 0,
        }
    }
}

/// Error returned when a threshold size string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid size string: {input:?}")]
pub struct InvalidThreshold {
    input: String,
}

/// Parses a human-readable size string such as `"1mb"`, `"512kb"` or
/// `"2048"` into a byte count. Units are powers of 1024 and a fractional
/// number part is accepted (`"1.5kb"` is 1536 bytes).
pub(crate) fn parse_size(input: &str) -> Result<usize, InvalidThreshold> {
    let invalid = || InvalidThreshold {
        input: input.to_owned(),
    };

    let trimmed = input.trim();
    let number_end = trimmed
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(number_end);

    let value: f64 = number.parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }

    let scale: usize = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1 << 10,
        "mb" => 1 << 20,
        "gb" => 1 << 30,
        _ => return Err(invalid()),
    };

    Ok((value * scale as f64) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_accepts_compressible_types() {
        let filter = ContentTypeFilter::default();

        assert!(filter.matches("text/html"));
        assert!(filter.matches("text/plain; charset=utf-8"));
        assert!(filter.matches("application/json"));
        assert!(filter.matches("application/javascript"));
        assert!(filter.matches("image/svg+xml"));
        assert!(filter.matches("application/vnd.ms-fontobject"));
        assert!(filter.matches("APPLICATION/JSON"));
    }

    #[test]
    fn default_filter_rejects_binary_types() {
        let filter = ContentTypeFilter::default();

        assert!(!filter.matches("image/png"));
        assert!(!filter.matches("video/mp4"));
        assert!(!filter.matches("application/octet-stream"));
    }

    #[test]
    fn custom_filter_predicate() {
        let filter = ContentTypeFilter::new(|ct| ct.starts_with("application/wasm"));

        assert!(filter.matches("application/wasm"));
        assert!(!filter.matches("application/json"));
    }

    #[test]
    fn default_config() {
        let config = CompressionConfig::default();

        assert_eq!(config.threshold, DEFAULT_THRESHOLD);
        assert_eq!(config.json_indent, 0);
    }

    #[test]
    fn parse_size_plain_bytes() {
        assert_eq!(parse_size("2048"), Ok(2048));
        assert_eq!(parse_size("0"), Ok(0));
        assert_eq!(parse_size("512b"), Ok(512));
    }

    #[test]
    fn parse_size_units() {
        assert_eq!(parse_size("1kb"), Ok(1024));
        assert_eq!(parse_size("1mb"), Ok(1024 * 1024));
        assert_eq!(parse_size("2gb"), Ok(2 * 1024 * 1024 * 1024));
    }

    #[test]
    fn parse_size_fractional() {
        assert_eq!(parse_size("1.5kb"), Ok(1536));
    }

    #[test]
    fn parse_size_case_and_whitespace() {
        assert_eq!(parse_size("1MB"), Ok(1024 * 1024));
        assert_eq!(parse_size(" 1 kb "), Ok(1024));
    }

    #[test]
    fn parse_size_rejects_malformed_input() {
        assert!(parse_size("").is_err());
        assert!(parse_size("mb").is_err());
        assert!(parse_size("one mb").is_err());
        assert!(parse_size("1xb").is_err());
        assert!(parse_size("-1kb").is_err());
    }

    #[test]
    fn override_defaults_to_unset() {
        assert_eq!(CompressionOverride::default(), CompressionOverride::Unset);
    }
}

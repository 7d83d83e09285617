use compression_codecs::{EncodeV2, deflate::DeflateEncoder, gzip::GzipEncoder};
use compression_core::Level;

/// Supported response encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Gzip compression.
    Gzip,
    /// Deflate compression.
    Deflate,
}

impl Encoding {
    /// Returns the `Content-Encoding` header value for this encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }

    /// Creates a new encoder for this encoding at the given level.
    pub(crate) fn encoder(&self, level: Level) -> Box<dyn EncodeV2 + Send> {
        match self {
            Encoding::Gzip => Box::new(GzipEncoder::new(level.into())),
            Encoding::Deflate => Box::new(DeflateEncoder::new(level.into())),
        }
    }

    /// Negotiates an encoding from an `Accept-Encoding` header value.
    ///
    /// Entries carry optional quality values (`"gzip, deflate;q=0.5"`).
    /// Returns `None` when the client accepts neither supported encoding,
    /// which callers treat as `identity`. A wildcard entry accepts our
    /// first choice, gzip. Ties in quality are broken in favour of gzip.
    pub fn negotiate(header: &str) -> Option<Encoding> {
        let mut best: Option<(Encoding, f32)> = None;

        for entry in header.split(',') {
            let (name, quality) = split_quality(entry.trim());
            if quality <= 0.0 {
                continue;
            }

            let candidate = if name.eq_ignore_ascii_case("gzip")
                || name.eq_ignore_ascii_case("x-gzip")
                || name == "*"
            {
                Encoding::Gzip
            } else if name.eq_ignore_ascii_case("deflate") {
                Encoding::Deflate
            } else {
                continue;
            };

            best = match best {
                None => Some((candidate, quality)),
                Some((_, held)) if quality > held => Some((candidate, quality)),
                Some((Encoding::Deflate, held)) if quality == held && candidate == Encoding::Gzip => {
                    Some((candidate, quality))
                }
                held => held,
            };
        }

        best.map(|(encoding, _)| encoding)
    }
}

/// Splits an entry like `"gzip"` or `"deflate;q=0.5"` into name and quality.
fn split_quality(entry: &str) -> (&str, f32) {
    match entry.split_once(';') {
        None => (entry, 1.0),
        Some((name, params)) => {
            let params = params.trim();
            let quality = params
                .strip_prefix("q=")
                .or_else(|| params.strip_prefix("Q="))
                .and_then(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            (name.trim(), quality)
        }
    }
}

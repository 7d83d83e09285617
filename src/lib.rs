//! Conditional HTTP response compression middleware for Tower.
//!
//! This crate provides a Tower layer that compresses HTTP response bodies
//! with Gzip or Deflate, picked from the client's `Accept-Encoding`
//! header. Compression only happens when the response is worth it: the
//! content type has to match a configurable filter and the declared size
//! has to reach a threshold. Handlers can override either check per
//! response.
//!
//! # Example
//!
//! ```ignore
//! use selective_compression::CompressionLayer;
//! use tower::ServiceBuilder;
//!
//! let service = ServiceBuilder::new()
//!     .layer(CompressionLayer::new().threshold_str("8kb")?)
//!     .service(my_service);
//! ```
//!
//! # Compression Rules
//!
//! Every response gets `Vary: Accept-Encoding`. Beyond that, the body is
//! left untouched when:
//! - the handler set [`CompressionOverride::Suppress`]
//! - the request method is `HEAD`
//! - the response status is `204` or `304`
//! - the response has no body
//! - the `Content-Type` does not match the filter (unless the handler set
//!   [`CompressionOverride::Force`])
//! - the client accepts neither `gzip` nor `deflate`
//! - the declared length is below the threshold (default: 1024 bytes)
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding` is set to the negotiated encoding
//! - `Content-Length` is removed (the compressed size is unknown)
//! - a streaming body is re-encoded frame by frame, never buffered whole
//!
//! Handlers return a [`ResponseBody`], which also carries structured
//! [`serde_json::Value`] payloads; those are serialized (with the
//! configured indentation) before the encoder sees them.

#![deny(missing_docs)]

mod body;
mod codec;
mod config;
mod future;
mod layer;
mod service;

pub use body::{BoxError, CompressionBody, ResponseBody};
pub use codec::Encoding;
pub use config::{CompressionOverride, ContentTypeFilter, DEFAULT_THRESHOLD, InvalidThreshold};
pub use future::ResponseFuture;
pub use layer::CompressionLayer;
pub use service::CompressionService;

pub use compression_core::Level;

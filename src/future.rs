use crate::body::{CompressionBody, ResponseBody};
use crate::codec::Encoding;
use crate::config::{CompressionConfig, CompressionOverride, ContentTypeFilter};
use http::{HeaderMap, Method, Response, StatusCode, header, response};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pin_project! {
    /// Future for compression service responses.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        method: Method,
        accepted: Option<Encoding>,
        config: Arc<CompressionConfig>,
    }
}

impl<F> ResponseFuture<F> {
    pub(crate) fn new(
        inner: F,
        method: Method,
        accepted: Option<Encoding>,
        config: Arc<CompressionConfig>,
    ) -> Self {
        Self {
            inner,
            method,
            accepted,
            config,
        }
    }
}

impl<F, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<ResponseBody>, E>>,
{
    type Output = Result<Response<CompressionBody>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match this.inner.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(response)) => {
                let response =
                    wrap_response(response, this.method, *this.accepted, this.config);
                Poll::Ready(Ok(response))
            }
        }
    }
}

/// Inspects the finished response and substitutes a compressing body when
/// the policy says so.
fn wrap_response(
    response: Response<ResponseBody>,
    method: &Method,
    accepted: Option<Encoding>,
    config: &CompressionConfig,
) -> Response<CompressionBody> {
    let (mut parts, body) = response.into_parts();

    // Caches must key on the negotiated encoding whether or not this
    // particular response ends up compressed.
    vary_by_accept_encoding(&mut parts.headers);

    // Structured bodies travel as serialized JSON either way; rendering
    // first also gives the threshold check a concrete length.
    let body = body.render_json(config.json_indent);

    let Some(encoding) = choose_encoding(&parts, &body, method, accepted, config) else {
        return Response::from_parts(parts, CompressionBody::passthrough(body));
    };

    tracing::debug!(encoding = encoding.as_str(), "compressing response body");

    parts.headers.insert(
        header::CONTENT_ENCODING,
        header::HeaderValue::from_static(encoding.as_str()),
    );
    // The declared length no longer holds once the body is re-encoded.
    parts.headers.remove(header::CONTENT_LENGTH);

    Response::from_parts(
        parts,
        CompressionBody::compressing(body, encoding, config.level),
    )
}

/// The eligibility checks, in order; the first failing check wins.
fn choose_encoding(
    parts: &response::Parts,
    body: &ResponseBody,
    method: &Method,
    accepted: Option<Encoding>,
    config: &CompressionConfig,
) -> Option<Encoding> {
    let directive = parts
        .extensions
        .get::<CompressionOverride>()
        .copied()
        .unwrap_or_default();

    if directive == CompressionOverride::Suppress
        || method == Method::HEAD
        || parts.status == StatusCode::NO_CONTENT
        || parts.status == StatusCode::NOT_MODIFIED
        || body.is_absent()
    {
        return None;
    }

    if directive != CompressionOverride::Force && !matches_filter(&parts.headers, &config.filter) {
        return None;
    }

    let encoding = accepted?;

    if config.threshold > 0 {
        if let Some(length) = declared_length(&parts.headers, body) {
            if length < config.threshold {
                return None;
            }
        }
    }

    Some(encoding)
}

/// A response with no `Content-Type` never matches the filter.
fn matches_filter(headers: &HeaderMap, filter: &ContentTypeFilter) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| filter.matches(content_type))
}

/// The declared response length: the `Content-Length` header when set,
/// otherwise the body's own length when knowable.
fn declared_length(headers: &HeaderMap, body: &ResponseBody) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .or_else(|| body.exact_len())
}

/// Appends `accept-encoding` to `Vary` unless it is already covered.
fn vary_by_accept_encoding(headers: &mut HeaderMap) {
    let covered = headers.get_all(header::VARY).iter().any(|value| {
        value.to_str().is_ok_and(|value| {
            value.split(',').any(|entry| {
                let entry = entry.trim();
                entry == "*" || entry.eq_ignore_ascii_case("accept-encoding")
            })
        })
    });

    if !covered {
        headers.append(
            header::VARY,
            header::HeaderValue::from_static("accept-encoding"),
        );
    }
}

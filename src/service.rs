use crate::body::{CompressionBody, ResponseBody};
use crate::codec::Encoding;
use crate::config::CompressionConfig;
use crate::future::ResponseFuture;
use http::{Request, Response};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// A Tower service that conditionally compresses HTTP response bodies.
#[derive(Debug, Clone)]
pub struct CompressionService<S> {
    inner: S,
    config: Arc<CompressionConfig>,
}

impl<S> CompressionService<S> {
    pub(crate) fn new(inner: S, config: Arc<CompressionConfig>) -> Self {
        Self { inner, config }
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody> Service<Request<ReqBody>> for CompressionService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResponseBody>>,
{
    type Response = Response<CompressionBody>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // The request facts the decision needs are gone by the time the
        // response is ready, so capture them up front.
        let accepted = req
            .headers()
            .get(http::header::ACCEPT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .and_then(Encoding::negotiate);
        let method = req.method().clone();

        let inner = self.inner.call(req);

        ResponseFuture::new(inner, method, accepted, Arc::clone(&self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressionOverride;
    use crate::layer::CompressionLayer;
    use bytes::Bytes;
    use http::{Method, StatusCode, header};
    use http_body::Body;
    use std::convert::Infallible;
    use std::future::Future;
    use std::io::Read;
    use std::pin::Pin;
    use tower::{Layer, ServiceExt};

    fn drive<F: Future>(future: F) -> F::Output {
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        let mut future = Box::pin(future);
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return output;
            }
        }
    }

    fn body_bytes(body: &mut CompressionBody) -> Vec<u8> {
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        let mut data = Vec::new();
        while let Poll::Ready(Some(result)) = Pin::new(&mut *body).poll_frame(&mut cx) {
            if let Ok(chunk) = result.unwrap().into_data() {
                data.extend_from_slice(&chunk);
            }
        }
        data
    }

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(data)
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    fn text_handler(
        text: &'static str,
    ) -> impl Service<Request<()>, Response = Response<ResponseBody>, Error = Infallible> + Clone
    {
        tower::service_fn(move |_req: Request<()>| async move {
            let mut response = Response::new(ResponseBody::from(text));
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
            Ok::<_, Infallible>(response)
        })
    }

    #[test]
    fn compresses_end_to_end() {
        let text: &'static str = "round and round the ragged rock ".repeat(64).leak();
        let service = CompressionLayer::new().layer(text_handler(text));

        let request = Request::builder()
            .method(Method::GET)
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(())
            .unwrap();
        let mut response = drive(service.oneshot(request)).unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
        assert_eq!(
            response.headers().get(header::VARY).unwrap(),
            "accept-encoding"
        );
        assert!(!response.headers().contains_key(header::CONTENT_LENGTH));

        let compressed = body_bytes(response.body_mut());
        assert_eq!(gunzip(&compressed), text.as_bytes());
    }

    #[test]
    fn head_request_passes_through() {
        let text: &'static str = "round and round the ragged rock ".repeat(64).leak();
        let service = CompressionLayer::new().layer(text_handler(text));

        let request = Request::builder()
            .method(Method::HEAD)
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(())
            .unwrap();
        let response = drive(service.oneshot(request)).unwrap();

        assert!(!response.headers().contains_key(header::CONTENT_ENCODING));
        assert_eq!(
            response.headers().get(header::VARY).unwrap(),
            "accept-encoding"
        );
    }

    #[test]
    fn missing_accept_encoding_passes_through() {
        let text: &'static str = "round and round the ragged rock ".repeat(64).leak();
        let service = CompressionLayer::new().layer(text_handler(text));

        let request = Request::builder().method(Method::GET).body(()).unwrap();
        let mut response = drive(service.oneshot(request)).unwrap();

        assert!(!response.headers().contains_key(header::CONTENT_ENCODING));
        assert_eq!(
            response.headers().get(header::VARY).unwrap(),
            "accept-encoding"
        );
        assert_eq!(body_bytes(response.body_mut()), text.as_bytes());
    }

    #[test]
    fn forced_binary_body_round_trips() {
        let payload = Bytes::from_static(&[0x42; 1024]);
        let body = payload.clone();
        let handler = tower::service_fn(move |_req: Request<()>| {
            let body = body.clone();
            async move {
                let mut response = Response::new(ResponseBody::from(body));
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    "application/octet-stream".parse().unwrap(),
                );
                response.extensions_mut().insert(CompressionOverride::Force);
                Ok::<_, Infallible>(response)
            }
        });
        let service = CompressionLayer::new().layer(handler);

        let request = Request::builder()
            .header(header::ACCEPT_ENCODING, "gzip, deflate;q=0.5")
            .body(())
            .unwrap();
        let mut response = drive(service.oneshot(request)).unwrap();

        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
        assert!(!response.headers().contains_key(header::CONTENT_LENGTH));

        let compressed = body_bytes(response.body_mut());
        assert_eq!(gunzip(&compressed), payload);
    }

    #[test]
    fn accessors_expose_inner_service() {
        let handler = text_handler("hi");
        let mut service = CompressionLayer::new().layer(handler);

        let _ = service.inner();
        let _ = service.inner_mut();
        let _ = service.into_inner();
    }
}

use crate::codec::Encoding;
use bytes::{Bytes, BytesMut};
use compression_codecs::EncodeV2;
use compression_core::Level;
use compression_core::util::{PartialBuffer, WriteBuffer};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use pin_project_lite::pin_project;
use serde::Serialize;
use serde_json::Value;
use std::io;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Boxed error type produced by stream bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

/// The body of a response before the compression decision.
///
/// Inner services produce one of these; the middleware decides whether to
/// forward it untouched or route it through an encoder. A [`Json`] body is
/// serialized before transmission, so handlers can return structured
/// values directly.
///
/// [`Json`]: ResponseBody::Json
#[derive(Debug, Default)]
pub enum ResponseBody {
    /// No body.
    #[default]
    Empty,
    /// A UTF-8 text body.
    Text(String),
    /// A raw byte body.
    Binary(Bytes),
    /// A structured value, serialized to JSON before transmission.
    Json(Value),
    /// A byte stream, pulled frame by frame and never buffered whole.
    Stream(BoxBody<Bytes, BoxError>),
}

impl ResponseBody {
    /// Creates an empty body.
    pub fn empty() -> Self {
        ResponseBody::Empty
    }

    /// Creates a streaming body from any [`Body`] yielding [`Bytes`].
    pub fn stream<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        ResponseBody::Stream(body.map_err(Into::into).boxed())
    }

    pub(crate) fn is_absent(&self) -> bool {
        matches!(self, ResponseBody::Empty)
    }

    /// The body's length when it is knowable without consuming it.
    pub(crate) fn exact_len(&self) -> Option<usize> {
        match self {
            ResponseBody::Text(text) => Some(text.len()),
            ResponseBody::Binary(data) => Some(data.len()),
            _ => None,
        }
    }

    /// Serializes a `Json` body into bytes with the given indentation
    /// width (`0` writes compact JSON). Other body kinds pass through.
    ///
    /// A serialization failure is carried by the returned body and
    /// surfaces as a stream error when it is polled.
    pub(crate) fn render_json(self, indent: usize) -> Self {
        match self {
            ResponseBody::Json(value) => match json_to_vec(&value, indent) {
                Ok(rendered) => ResponseBody::Binary(rendered.into()),
                Err(error) => {
                    tracing::error!(%error, "failed to serialize structured response body");
                    ResponseBody::Stream(FailedBody::new(error.into()).boxed())
                }
            },
            other => other,
        }
    }
}

impl From<String> for ResponseBody {
    fn from(text: String) -> Self {
        ResponseBody::Text(text)
    }
}

impl From<&str> for ResponseBody {
    fn from(text: &str) -> Self {
        ResponseBody::Text(text.to_owned())
    }
}

impl From<Bytes> for ResponseBody {
    fn from(data: Bytes) -> Self {
        ResponseBody::Binary(data)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(data: Vec<u8>) -> Self {
        ResponseBody::Binary(data.into())
    }
}

impl From<Value> for ResponseBody {
    fn from(value: Value) -> Self {
        ResponseBody::Json(value)
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match this {
            ResponseBody::Empty => Poll::Ready(None),
            ResponseBody::Stream(inner) => Pin::new(inner).poll_frame(cx),
            ResponseBody::Text(text) => {
                let data = Bytes::from(mem::take(text));
                *this = ResponseBody::Empty;
                Poll::Ready(Some(Ok(Frame::data(data))))
            }
            ResponseBody::Binary(data) => {
                let data = mem::take(data);
                *this = ResponseBody::Empty;
                Poll::Ready(Some(Ok(Frame::data(data))))
            }
            ResponseBody::Json(value) => {
                let rendered = json_to_vec(&mem::take(value), 0);
                *this = ResponseBody::Empty;
                match rendered {
                    Ok(data) => Poll::Ready(Some(Ok(Frame::data(data.into())))),
                    Err(error) => Poll::Ready(Some(Err(error.into()))),
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            ResponseBody::Empty => true,
            ResponseBody::Stream(inner) => inner.is_end_stream(),
            _ => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            ResponseBody::Empty => SizeHint::with_exact(0),
            ResponseBody::Text(text) => SizeHint::with_exact(text.len() as u64),
            ResponseBody::Binary(data) => SizeHint::with_exact(data.len() as u64),
            ResponseBody::Json(_) => SizeHint::default(),
            ResponseBody::Stream(inner) => inner.size_hint(),
        }
    }
}

fn json_to_vec(value: &Value, indent: usize) -> Result<Vec<u8>, serde_json::Error> {
    if indent == 0 {
        return serde_json::to_vec(value);
    }

    let indent = b" ".repeat(indent);
    let mut buf = Vec::with_capacity(128);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent);
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    Ok(buf)
}

/// A body that yields a single error, used to defer setup failures into
/// the response's stream-error channel.
struct FailedBody {
    error: Option<BoxError>,
}

impl FailedBody {
    fn new(error: BoxError) -> Self {
        Self { error: Some(error) }
    }
}

impl Body for FailedBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(self.error.take().map(Err))
    }

    fn is_end_stream(&self) -> bool {
        self.error.is_none()
    }
}

pin_project! {
    /// A response body after the compression decision.
    ///
    /// Either forwards the inner body unchanged or routes it through a
    /// compression encoder, pulling one frame at a time.
    #[project = CompressionBodyProj]
    #[allow(missing_docs)]
    pub enum CompressionBody {
        /// Body forwarded unchanged.
        Passthrough {
            #[pin]
            inner: ResponseBody,
        },
        /// Body routed through an encoder.
        Compressing {
            #[pin]
            inner: ResponseBody,
            encoder: EncoderState,
        },
    }
}

impl CompressionBody {
    /// Creates a body that forwards the inner body unchanged.
    pub fn passthrough(inner: ResponseBody) -> Self {
        Self::Passthrough { inner }
    }

    /// Creates a body that compresses the inner body with the given
    /// encoding and level.
    pub fn compressing(inner: ResponseBody, encoding: Encoding, level: Level) -> Self {
        Self::Compressing {
            inner,
            encoder: EncoderState::new(encoding, level),
        }
    }
}

/// Encoder and buffers for a body being compressed.
pub struct EncoderState {
    encoder: Box<dyn EncodeV2 + Send>,
    output: Vec<u8>,
    phase: Phase,
    trailers: Option<http::HeaderMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Pulling frames from the source body and feeding the encoder.
    Piping,
    /// Source exhausted; draining what the encoder still holds.
    Draining,
    /// Emitting trailers buffered while piping.
    Trailers,
    /// Nothing left to emit.
    Done,
}

impl EncoderState {
    fn new(encoding: Encoding, level: Level) -> Self {
        Self {
            encoder: encoding.encoder(level),
            output: vec![0u8; OUTPUT_BUFFER_SIZE],
            phase: Phase::Piping,
            trailers: None,
        }
    }

    fn finished(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Pulls frames from the source, returning encoded output as it
    /// becomes available. Trailer frames are buffered and re-emitted
    /// after the encoder has been drained.
    fn poll_encode(
        &mut self,
        cx: &mut Context<'_>,
        mut source: Pin<&mut ResponseBody>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        loop {
            match self.phase {
                Phase::Done => return Poll::Ready(None),

                Phase::Trailers => {
                    self.phase = Phase::Done;
                    return match self.trailers.take() {
                        Some(trailers) => Poll::Ready(Some(Ok(Frame::trailers(trailers)))),
                        None => Poll::Ready(None),
                    };
                }

                Phase::Draining => {
                    let mut sink = WriteBuffer::new_initialized(self.output.as_mut_slice());
                    match self.encoder.finish(&mut sink) {
                        Ok(done) => {
                            let written = sink.written_len();
                            if done {
                                self.phase = if self.trailers.is_some() {
                                    Phase::Trailers
                                } else {
                                    Phase::Done
                                };
                            }
                            if written > 0 {
                                let data = Bytes::copy_from_slice(&self.output[..written]);
                                return Poll::Ready(Some(Ok(Frame::data(data))));
                            }
                        }
                        Err(error) => {
                            return Poll::Ready(Some(Err(io::Error::other(error))));
                        }
                    }
                }

                Phase::Piping => match source.as_mut().poll_frame(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(None) => {
                        self.phase = Phase::Draining;
                    }
                    Poll::Ready(Some(Err(error))) => {
                        tracing::error!(
                            error = %error,
                            "response body stream failed while compressing"
                        );
                        return Poll::Ready(Some(Err(io::Error::other(error))));
                    }
                    Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                        Ok(data) => match self.encode_chunk(&data) {
                            // The encoder may buffer small inputs without
                            // producing output; pull more source data.
                            Ok(None) => {}
                            Ok(Some(chunk)) => {
                                return Poll::Ready(Some(Ok(Frame::data(chunk))));
                            }
                            Err(error) => return Poll::Ready(Some(Err(error))),
                        },
                        Err(frame) => {
                            if let Ok(trailers) = frame.into_trailers() {
                                self.trailers = Some(trailers);
                                self.phase = Phase::Draining;
                            }
                        }
                    },
                },
            }
        }
    }

    /// Feeds one chunk through the encoder, returning whatever output it
    /// produced.
    fn encode_chunk(&mut self, input: &[u8]) -> Result<Option<Bytes>, io::Error> {
        let mut source = PartialBuffer::new(input);
        let mut produced = BytesMut::new();

        while source.written_len() < input.len() {
            let consumed = source.written_len();
            let mut sink = WriteBuffer::new_initialized(self.output.as_mut_slice());

            self.encoder
                .encode(&mut source, &mut sink)
                .map_err(io::Error::other)?;

            let written = sink.written_len();
            if written > 0 {
                produced.extend_from_slice(&self.output[..written]);
            } else if source.written_len() == consumed {
                // No output and no input consumed; bail rather than spin.
                break;
            }
        }

        Ok((!produced.is_empty()).then(|| produced.freeze()))
    }
}

impl Body for CompressionBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            CompressionBodyProj::Passthrough { inner } => match inner.poll_frame(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Ready(Some(Ok(frame))) => Poll::Ready(Some(Ok(frame))),
                Poll::Ready(Some(Err(error))) => Poll::Ready(Some(Err(io::Error::other(error)))),
            },
            CompressionBodyProj::Compressing { inner, encoder } => encoder.poll_encode(cx, inner),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            CompressionBody::Passthrough { inner } => inner.is_end_stream(),
            CompressionBody::Compressing { encoder, .. } => encoder.finished(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            CompressionBody::Passthrough { inner } => inner.size_hint(),
            // Compressed length is unknown until the encoder finishes.
            CompressionBody::Compressing { .. } => SizeHint::default(),
        }
    }
}

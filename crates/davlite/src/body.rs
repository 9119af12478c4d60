//! Response body type shared by every handler.

use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::{BodyExt, Empty, Full, StreamBody, combinators::BoxBody};
use hyper::body::Frame;
use std::io;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// Boxed body: either buffered bytes or a streamed file.
pub type DavBody = BoxBody<Bytes, io::Error>;

/// An empty body.
pub fn empty() -> DavBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// A fully buffered body.
pub fn full(data: impl Into<Bytes>) -> DavBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

/// A body streamed from an async reader.
///
/// The reader is dropped (closing any file handle) as soon as the body is
/// dropped, e.g. when the client disconnects mid-transfer.
pub fn stream<R>(reader: R) -> DavBody
where
    R: AsyncRead + Send + Sync + 'static,
{
    let frames = ReaderStream::new(reader).map_ok(Frame::data);
    BodyExt::boxed(StreamBody::new(frames))
}

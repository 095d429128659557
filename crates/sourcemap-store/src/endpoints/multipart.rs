//! Helper utilities to handle HTTP multipart bodies.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::multipart::Field;
use bytes::Bytes;
use futures::prelude::*;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

/// Newtype around axum's multipart [`Field`].
///
/// [`StreamReader`] needs a [`Stream`] of `Result<T, std::io::Error>`, the original [`Field`]
/// yields its own error type.
struct MultipartField<'a> {
    inner: Field<'a>,
}

impl Stream for MultipartField<'_> {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        Pin::new(&mut this.inner)
            .poll_next(cx)
            .map_err(io::Error::other)
    }
}

/// Reads the contents of a multipart field as they arrive.
pub fn field_reader(field: Field<'_>) -> impl AsyncRead + Unpin + Send + '_ {
    StreamReader::new(MultipartField { inner: field })
}

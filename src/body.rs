use std::pin::Pin;

use crate::error::ServerError;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, SizeHint};

pub struct ResponseBody {
    inner: Pin<Box<dyn Body<Data = Bytes, Error = ServerError> + Send + 'static>>,
}

impl ResponseBody {
    pub fn new(body: impl Body<Data = Bytes, Error = ServerError> + Send + Sync + 'static) -> Self {
        Self {
            inner: Box::pin(body),
        }
    }
    pub fn plain_text(text: impl Into<String>) -> Self {
        Self::new(Full::from(text.into()).map_err(Into::into))
    }
    pub fn json(bytes: impl Into<Bytes>) -> Self {
        Self::new(Full::new(bytes.into()).map_err(Into::into))
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = ServerError;
    fn poll_frame(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Result<hyper::body::Frame<Self::Data>, Self::Error>>> {
        self.inner.as_mut().poll_frame(cx)
    }
    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }
    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_text_body_is_collected() {
        let body = ResponseBody::plain_text("hello");
        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello");
    }

    #[test]
    fn full_body_reports_its_size() {
        let body = ResponseBody::json(&b"{}"[..]);
        assert!(!body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(2));
    }
}

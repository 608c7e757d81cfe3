//! Chunk-for-chunk response relay.
//!
//! `RelayBody` sits between the upstream byte stream and the client body. It
//! yields every upstream chunk as soon as it is polled, unchanged and in
//! order, and records what it relayed on the forward span. Dropping it
//! before the upstream finished means the client went away: the inner
//! stream is dropped with it, which closes the upstream connection.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use futures_core::Stream;

type BoxByteStream<E> = Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>;

pub struct RelayBody<E = reqwest::Error> {
    inner: BoxByteStream<E>,
    span: tracing::Span,
    /// When the upstream request was sent.
    start: Instant,
    chunks: u64,
    bytes: u64,
    finished: bool,
}

impl<E> RelayBody<E> {
    pub fn new<S>(inner: S, span: tracing::Span, start: Instant) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    {
        Self {
            inner: Box::pin(inner),
            span,
            start,
            chunks: 0,
            bytes: 0,
            finished: false,
        }
    }

    fn record_totals(&self) {
        self.span
            .record("total_duration_ms", self.start.elapsed().as_millis() as u64);
        self.span.record("chunks", self.chunks);
        self.span.record("bytes", self.bytes);
    }
}

impl<E: std::fmt::Display> Stream for RelayBody<E> {
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if self.chunks == 0 {
                    self.span
                        .record("ttfb_ms", self.start.elapsed().as_millis() as u64);
                }
                self.chunks += 1;
                self.bytes += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.finished = true;
                self.record_totals();
                tracing::warn!(
                    parent: &self.span,
                    error = %e,
                    chunks = self.chunks,
                    bytes = self.bytes,
                    "Upstream stream failed mid-response"
                );
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                self.record_totals();
                tracing::debug!(
                    parent: &self.span,
                    chunks = self.chunks,
                    bytes = self.bytes,
                    "Relay complete"
                );
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<E> Drop for RelayBody<E> {
    fn drop(&mut self) {
        if !self.finished {
            self.record_totals();
            tracing::debug!(
                parent: &self.span,
                chunks = self.chunks,
                bytes = self.bytes,
                "Client disconnected, closing upstream stream"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use futures_util::{stream, StreamExt};

    use super::*;

    fn relay<S>(inner: S) -> RelayBody<String>
    where
        S: Stream<Item = Result<Bytes, String>> + Send + 'static,
    {
        RelayBody::new(inner, tracing::Span::none(), Instant::now())
    }

    #[tokio::test]
    async fn test_chunks_relayed_one_for_one_in_order() {
        let chunks = vec![
            Ok(Bytes::from_static(b"data: one\n\n")),
            Ok(Bytes::from_static(b"data: two\n\n")),
            Ok(Bytes::from_static(b"")),
            Ok(Bytes::from_static(b"data: three\n\n")),
        ];
        let expected: Vec<Bytes> = chunks.iter().map(|c| c.clone().unwrap()).collect();

        let relayed: Vec<Bytes> = relay(stream::iter(chunks))
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(relayed, expected);
    }

    #[tokio::test]
    async fn test_error_is_passed_through_and_ends_stream() {
        let inner = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err("connection reset".to_string()),
            Ok(Bytes::from_static(b"never seen")),
        ]);
        let mut body = relay(inner);

        assert_eq!(body.next().await, Some(Ok(Bytes::from_static(b"partial"))));
        assert_eq!(body.next().await, Some(Err("connection reset".to_string())));
        assert_eq!(body.next().await, None);
    }

    #[tokio::test]
    async fn test_drop_releases_upstream_stream() {
        struct Guarded {
            dropped: Arc<AtomicBool>,
        }
        impl Drop for Guarded {
            fn drop(&mut self) {
                self.dropped.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let guard = Guarded {
            dropped: dropped.clone(),
        };
        // Endless upstream: only ends when the relay is dropped.
        let inner = stream::repeat(()).map(move |_| {
            let _alive = &guard;
            Ok::<_, String>(Bytes::from_static(b"tick"))
        });

        let mut body = relay(inner);
        assert_eq!(body.next().await, Some(Ok(Bytes::from_static(b"tick"))));
        assert!(!dropped.load(Ordering::SeqCst));

        drop(body);
        assert!(dropped.load(Ordering::SeqCst));
    }
}

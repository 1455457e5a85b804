//! Response bodies that feed the per-stream bandwidth meter.

use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::process::Child;

use super::bandwidth::BandwidthMeter;
use super::connections::ConnectionGuard;

/// Wraps a byte stream, recording every chunk in a [`BandwidthMeter`].
///
/// Owns the client's [`ConnectionGuard`] and, for piped encoder output, the
/// encoder process, so both live exactly as long as the response body.
pub struct MeteredStream<S> {
    inner: S,
    meter: Option<Arc<BandwidthMeter>>,
    _guard: Option<ConnectionGuard>,
    _child: Option<Child>,
}

impl<S> MeteredStream<S> {
    pub fn new(inner: S, meter: Option<Arc<BandwidthMeter>>) -> Self {
        Self {
            inner,
            meter,
            _guard: None,
            _child: None,
        }
    }

    pub fn with_guard(mut self, guard: Option<ConnectionGuard>) -> Self {
        self._guard = guard;
        self
    }

    pub fn with_child(mut self, child: Child) -> Self {
        self._child = Some(child);
        self
    }
}

impl<S> Stream for MeteredStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let poll = Pin::new(&mut this.inner).poll_next(cx);
        if let (Poll::Ready(Some(Ok(chunk))), Some(meter)) = (&poll, &this.meter) {
            meter.record(chunk.len() as u64);
        }
        poll
    }
}

// Copyright 2025 Cloudflare, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Mirror a response body into the store while it streams downstream

use super::*;

use futures::StreamExt;
use larder_error::{Error, ErrorType};
use log::{debug, trace, warn};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// What is known about a capture before its body arrives
pub(crate) struct PendingEntry {
    pub key: CacheKey,
    pub meta: RequestMeta,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub vary: Option<VaryCapture>,
}

pub(crate) struct Capture {
    store: Arc<StoreInner>,
    pending: PendingEntry,
    writer: FrameWriter,
    dirty: bool,
}

impl Capture {
    pub fn new(store: Arc<StoreInner>, pending: PendingEntry, writer: FrameWriter) -> Self {
        Capture {
            store,
            pending,
            writer,
            dirty: false,
        }
    }

    fn mirror(&mut self, chunk: &[u8]) {
        if self.dirty {
            return;
        }
        match self.writer.write(chunk) {
            Ok(()) => trace!(
                "mirrored {} bytes of {}, {} so far",
                chunk.len(),
                self.pending.key,
                self.writer.size()
            ),
            Err(e) => {
                let e = Error::because(
                    ErrorType::CaptureWriteError,
                    format!("abandoning capture of {}", self.pending.meta.uri),
                    e,
                );
                // bodies over the limit are expected, anything else is not
                if e.root_etype() == &ErrorType::SizeLimitExceeded {
                    debug!("{e}");
                } else {
                    warn!("{e}");
                }
                self.dirty = true;
            }
        }
    }

    fn upstream_failed(&mut self) {
        if !self.dirty {
            debug!("body of {} failed, abandoning capture", self.pending.meta.uri);
            self.dirty = true;
        }
    }

    fn finish(mut self) {
        if self.dirty {
            debug!("capture of {} is dirty, nothing cached", self.pending.meta.uri);
            self.store.metrics.capture_abandoned();
            return;
        }
        let frames = match self.writer.close().and_then(|_| self.writer.frames()) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("failed to seal capture of {}: {e}", self.pending.meta.uri);
                self.store.metrics.capture_abandoned();
                return;
            }
        };
        self.store.complete(self.pending, frames);
    }

    fn cancel(self) {
        debug!(
            "body of {} dropped before completion, nothing cached",
            self.pending.meta.uri
        );
        self.store.metrics.capture_abandoned();
    }
}

/// A response body that is captured into the store as it is polled.
///
/// Every chunk is yielded unchanged. Failing to capture never fails the body: the capture is
/// abandoned and the remaining chunks simply pass through. The entry is installed when the
/// inner stream ends without error, before the end of stream is yielded.
pub struct CaptureStream<S> {
    inner: S,
    capture: Option<Capture>,
}

impl<S> CaptureStream<S> {
    pub(crate) fn new(inner: S, capture: Capture) -> Self {
        CaptureStream {
            inner,
            capture: Some(capture),
        }
    }

    /// A stream that captures nothing
    pub fn passthrough(inner: S) -> Self {
        CaptureStream {
            inner,
            capture: None,
        }
    }

    /// Whether the body is still being captured
    pub fn is_capturing(&self) -> bool {
        self.capture.as_ref().is_some_and(|c| !c.dirty)
    }
}

impl<S, E> Stream for CaptureStream<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
{
    type Item = std::result::Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let item = ready!(this.inner.poll_next_unpin(cx));
        match &item {
            Some(Ok(chunk)) => {
                if let Some(capture) = this.capture.as_mut() {
                    capture.mirror(chunk);
                }
            }
            Some(Err(_)) => {
                if let Some(capture) = this.capture.as_mut() {
                    capture.upstream_failed();
                }
            }
            None => {
                if let Some(capture) = this.capture.take() {
                    capture.finish();
                }
            }
        }
        Poll::Ready(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S> Drop for CaptureStream<S> {
    fn drop(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.cancel();
        }
    }
}

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

//! Chunked body buffer
//!
//! A captured body is kept as a list of fixed size frames instead of one contiguous
//! allocation. [FrameWriter] fills the frames while the body streams through, once it is
//! sealed the resulting [FrameList] is immutable and can be replayed by any number of
//! readers at the same time.

use super::*;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use larder_error::{Error, ErrorType};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Bytes per frame unless configured otherwise
pub const DEFAULT_FRAME_SIZE: usize = 100_000;
/// Upper bound of the frame index pre-allocation
pub const MAXIMUM_FRAMES: usize = 100_000;

/// The write side of the buffer.
pub struct FrameWriter {
    frame_size: usize,
    max_size: Option<u64>,
    frames: Vec<Bytes>,
    current: BytesMut,
    written: u64,
    sealed: Option<FrameList>,
}

impl FrameWriter {
    /// Create a writer.
    ///
    /// `estimated_size` only sizes the frame index, capped at `max_frames` slots. Writes that
    /// would take the total past `max_size` fail with [ErrorType::SizeLimitExceeded].
    ///
    /// # Panics
    /// When `frame_size` is zero.
    pub fn new(
        frame_size: usize,
        estimated_size: u64,
        max_frames: usize,
        max_size: Option<u64>,
    ) -> Self {
        assert!(frame_size > 0, "frame size must be positive");
        let slots = (estimated_size / frame_size as u64).saturating_add(1);
        let slots = slots.min(max_frames as u64) as usize;
        FrameWriter {
            frame_size,
            max_size,
            frames: Vec::with_capacity(slots),
            current: BytesMut::new(),
            written: 0,
            sealed: None,
        }
    }

    /// Append `buf`. Either all of it is appended or, on error, none of it.
    pub fn write(&mut self, mut buf: &[u8]) -> Result<()> {
        if self.sealed.is_some() {
            return Error::e_explain(ErrorType::StreamClosed, "frame buffer already sealed");
        }
        let total = self.written.saturating_add(buf.len() as u64);
        if let Some(max) = self.max_size {
            if total > max {
                return Error::e_explain(
                    ErrorType::SizeLimitExceeded,
                    format!("{total} bytes exceeds the {max} bytes limit"),
                );
            }
        }
        while !buf.is_empty() {
            if self.current.len() == self.frame_size {
                let full = std::mem::take(&mut self.current).freeze();
                self.frames.push(full);
            }
            if self.current.is_empty() && self.current.capacity() < self.frame_size {
                self.current.reserve(self.frame_size);
            }
            let n = (self.frame_size - self.current.len()).min(buf.len());
            self.current.extend_from_slice(&buf[..n]);
            buf = &buf[n..];
        }
        self.written = total;
        Ok(())
    }

    /// Seal the buffer. The last frame is trimmed to what was written into it.
    pub fn close(&mut self) -> Result<()> {
        if self.sealed.is_some() {
            return Error::e_explain(ErrorType::StreamClosed, "frame buffer closed twice");
        }
        let last = std::mem::take(&mut self.current);
        if last.len() == self.frame_size {
            self.frames.push(last.freeze());
        } else if !last.is_empty() {
            self.frames.push(Bytes::copy_from_slice(&last));
        }
        let frames = std::mem::take(&mut self.frames);
        self.sealed = Some(FrameList(frames.into()));
        Ok(())
    }

    /// The sealed frames. Fails with [ErrorType::BufferNotSealed] before [Self::close()].
    pub fn frames(&self) -> Result<FrameList> {
        match &self.sealed {
            Some(frames) => Ok(frames.clone()),
            None => Error::e_explain(ErrorType::BufferNotSealed, "frames read before close"),
        }
    }

    /// Total bytes written so far
    pub fn size(&self) -> u64 {
        self.written
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.is_some()
    }
}

impl io::Write for FrameWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        FrameWriter::write(self, buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An immutable, sealed list of frames. Cloning shares the frames.
#[derive(Debug, Clone)]
pub struct FrameList(Arc<[Bytes]>);

impl FrameList {
    pub fn frames(&self) -> &[Bytes] {
        &self.0
    }

    pub fn frame_count(&self) -> usize {
        self.0.len()
    }

    /// Total bytes across all frames
    pub fn size(&self) -> u64 {
        self.0.iter().map(|f| f.len() as u64).sum()
    }

    /// A blocking reader starting at the first byte
    pub fn reader(&self) -> FrameReader {
        FrameReader::new(self.clone())
    }

    /// An async stream yielding one chunk per frame
    pub fn stream(&self) -> FrameStream {
        FrameStream {
            frames: self.clone(),
            index: 0,
        }
    }
}

impl From<Vec<Bytes>> for FrameList {
    fn from(frames: Vec<Bytes>) -> Self {
        FrameList(frames.into())
    }
}

/// The read side of the buffer. Each reader keeps its own position.
pub struct FrameReader {
    frames: FrameList,
    index: usize,
    pos: usize,
    remaining: usize,
}

impl FrameReader {
    pub fn new(frames: FrameList) -> Self {
        // saturates instead of wrapping on (theoretical) overflow
        let remaining = frames
            .frames()
            .iter()
            .fold(0usize, |acc, f| acc.saturating_add(f.len()));
        FrameReader {
            frames,
            index: 0,
            pos: 0,
            remaining,
        }
    }

    /// Bytes left to read, saturated at `usize::MAX`.
    pub fn available(&self) -> usize {
        self.remaining
    }

    /// Read a single byte, `None` at the end.
    pub fn read_byte(&mut self) -> Option<u8> {
        let frames = self.frames.frames();
        while let Some(frame) = frames.get(self.index) {
            if let Some(b) = frame.get(self.pos) {
                self.pos += 1;
                self.remaining = self.remaining.saturating_sub(1);
                return Some(*b);
            }
            self.index += 1;
            self.pos = 0;
        }
        None
    }
}

impl io::Read for FrameReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let Some(frame) = self.frames.frames().get(self.index) else {
                break;
            };
            let rest = &frame[self.pos..];
            if rest.is_empty() {
                self.index += 1;
                self.pos = 0;
                continue;
            }
            let n = rest.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&rest[..n]);
            filled += n;
            self.pos += n;
        }
        self.remaining = self.remaining.saturating_sub(filled);
        Ok(filled)
    }
}

/// See [FrameList::stream()]
pub struct FrameStream {
    frames: FrameList,
    index: usize,
}

impl Stream for FrameStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let next = self.frames.frames().get(self.index).cloned();
        if next.is_some() {
            self.index += 1;
        }
        Poll::Ready(next.map(Ok))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.frames.frame_count() - self.index;
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io::{Read, Write};

    fn payload(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    fn capture(data: &[u8], frame_size: usize, chunk: usize) -> FrameList {
        let mut writer = FrameWriter::new(frame_size, data.len() as u64, MAXIMUM_FRAMES, None);
        for c in data.chunks(chunk) {
            writer.write(c).unwrap();
        }
        writer.close().unwrap();
        writer.frames().unwrap()
    }

    #[test]
    fn test_replay_sizes() {
        for n in [0, 1, 9, 10, 11, 35] {
            let data = payload(n);
            let frames = capture(&data, 10, 3);
            assert_eq!(frames.size(), n as u64);
            assert_eq!(frames.frame_count(), n.div_ceil(10));

            let mut out = vec![];
            frames.reader().read_to_end(&mut out).unwrap();
            assert_eq!(out, data);
        }
    }

    #[test]
    fn test_last_frame_trimmed() {
        let frames = capture(&payload(25), 10, 7);
        let lens: Vec<_> = frames.frames().iter().map(|f| f.len()).collect();
        assert_eq!(lens, vec![10, 10, 5]);
    }

    #[test]
    fn test_single_write_spans_frames() {
        let data = payload(1000);
        let frames = capture(&data, 64, 1000);
        assert_eq!(frames.frame_count(), 16);
        assert_eq!(frames.reader().bytes().count(), 1000);
    }

    #[test]
    fn test_write_after_close() {
        let mut writer = FrameWriter::new(10, 0, MAXIMUM_FRAMES, None);
        writer.write(b"abc").unwrap();
        writer.close().unwrap();
        let e = writer.write(b"d").unwrap_err();
        assert_eq!(e.etype(), &ErrorType::StreamClosed);
        let e = writer.close().unwrap_err();
        assert_eq!(e.etype(), &ErrorType::StreamClosed);
        assert_eq!(writer.size(), 3);
    }

    #[test]
    fn test_frames_before_close() {
        let mut writer = FrameWriter::new(10, 0, MAXIMUM_FRAMES, None);
        writer.write(b"abc").unwrap();
        let e = writer.frames().unwrap_err();
        assert_eq!(e.etype(), &ErrorType::BufferNotSealed);
        assert!(!writer.is_sealed());
    }

    #[test]
    fn test_size_limit() {
        let mut writer = FrameWriter::new(4, 0, MAXIMUM_FRAMES, Some(10));
        writer.write(b"0123456789").unwrap();
        let e = writer.write(b"a").unwrap_err();
        assert_eq!(e.etype(), &ErrorType::SizeLimitExceeded);
        // the rejected write left nothing behind
        assert_eq!(writer.size(), 10);
        writer.close().unwrap();
        assert_eq!(writer.frames().unwrap().size(), 10);
    }

    #[test]
    fn test_index_presize_capped() {
        let writer = FrameWriter::new(10, u64::MAX, 8, None);
        assert!(writer.frames.capacity() >= 8);
        assert!(writer.frames.capacity() < 1000);
    }

    #[test]
    #[should_panic]
    fn test_zero_frame_size() {
        FrameWriter::new(0, 0, MAXIMUM_FRAMES, None);
    }

    #[test]
    fn test_io_write() {
        let mut writer = FrameWriter::new(8, 0, MAXIMUM_FRAMES, Some(16));
        let mut src: &[u8] = b"hello frames";
        std::io::copy(&mut src, &mut writer).unwrap();
        assert!(writer.write_all(b"overflowing").is_err());
        writer.close().unwrap();

        let mut out = String::new();
        writer.frames().unwrap().reader().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello frames");
    }

    #[test]
    fn test_reader_byte_and_block() {
        let frames = capture(b"abcdefghij", 4, 10);
        let mut reader = frames.reader();
        assert_eq!(reader.available(), 10);
        assert_eq!(reader.read_byte(), Some(b'a'));
        assert_eq!(reader.available(), 9);

        let mut buf = [0u8; 5];
        assert_eq!(reader.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"bcdef");
        assert_eq!(reader.available(), 4);

        assert_eq!(reader.read_byte(), Some(b'g'));
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"hij");
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(reader.read_byte(), None);
        assert_eq!(reader.available(), 0);
    }

    #[test]
    fn test_independent_readers() {
        let frames = capture(b"shared", 2, 6);
        let mut a = frames.reader();
        let mut b = frames.reader();
        assert_eq!(a.read_byte(), Some(b's'));
        assert_eq!(a.read_byte(), Some(b'h'));
        assert_eq!(b.read_byte(), Some(b's'));
        let mut rest = vec![];
        a.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"ared");
    }

    #[tokio::test]
    async fn test_stream_frames() {
        let frames = capture(b"0123456789abc", 5, 13);
        let stream = frames.stream();
        assert_eq!(stream.size_hint(), (3, Some(3)));
        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec!["01234", "56789", "abc"]);
    }
}

//! Object contents backed by one shared random sample buffer.
//!
//! A [`ContentSource`] holds `S` random bytes and a logical object length `L`. Every
//! [`ContentReader`] handed out by the source is a cursor over a stream of exactly `L` bytes in
//! which byte `i` is `sample[i % S]`. The sample is reference counted and never copied, so
//! thousands of multi-gigabyte objects can be written from a few megabytes of memory.

use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;
use std::pin::Pin;
use std::{fmt, task};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use crate::error::{Error, Result};

/// The shared, immutable contents for every object written in a run.
#[derive(Clone)]
pub struct ContentSource {
    sample: Bytes,
    len: u64,
}

impl ContentSource {
    /// Generates a random sample and wraps it as a source of `object_size` bytes.
    ///
    /// The sample holds `ceil(object_size / split)` bytes, so a `split` of 1 keeps the entire
    /// object in memory and larger values repeat a smaller sample.
    pub fn generate(object_size: u64, split: u64) -> Result<Self> {
        if object_size == 0 {
            return Err(Error::InvalidConfig(
                "object size must be at least one byte".into(),
            ));
        }

        let size = object_size.div_ceil(split.clamp(1, object_size));
        let capacity = usize::try_from(size).map_err(|_| Error::Allocation { size })?;

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(capacity)
            .map_err(|_| Error::Allocation { size })?;
        buffer.resize(capacity, 0);
        SmallRng::from_rng(&mut rand::rng()).fill_bytes(&mut buffer);

        Ok(Self::new(Bytes::from(buffer), object_size))
    }

    /// Wraps an existing sample as a source of `len` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `sample` is empty.
    pub fn new(sample: Bytes, len: u64) -> Self {
        assert!(!sample.is_empty(), "content sample must not be empty");
        Self { sample, len }
    }

    /// The logical length of every object produced from this source.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if objects produced from this source are empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The size of the in-memory sample.
    pub fn sample_len(&self) -> usize {
        self.sample.len()
    }

    /// How many times the sample is (partially) repeated to fill one object.
    pub fn repeats(&self) -> u64 {
        self.len.div_ceil(self.sample.len() as u64)
    }

    /// Creates a new cursor positioned at the start of the object.
    pub fn reader(&self) -> ContentReader {
        ContentReader {
            sample: self.sample.clone(),
            len: self.len,
            repeats: self.repeats(),
            repeat: 0,
            offset: 0,
        }
    }
}

impl fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentSource")
            .field("sample_len", &self.sample.len())
            .field("len", &self.len)
            .finish()
    }
}

/// A readable and seekable cursor over the logical contents of one object.
///
/// The position is tracked as the index of the current repetition plus an offset into the
/// sample. Cloning a reader copies the cursor, not the sample.
#[derive(Clone)]
pub struct ContentReader {
    sample: Bytes,
    len: u64,
    repeats: u64,
    repeat: u64,
    offset: usize,
}

impl ContentReader {
    /// The logical length of the object.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if the object is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The current logical position.
    pub fn position(&self) -> u64 {
        self.repeat * self.sample.len() as u64 + self.offset as u64
    }

    /// Bytes left between the current position and the end of the object.
    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.position())
    }

    /// Converts the rest of this reader into a streaming request body.
    pub fn into_body(self) -> ContentBody {
        let remaining = self.remaining();
        ContentBody {
            reader: self,
            remaining,
        }
    }

    /// Converts at most `limit` bytes from the current position into a streaming request body.
    pub fn take_body(self, limit: u64) -> ContentBody {
        let remaining = self.remaining().min(limit);
        ContentBody {
            reader: self,
            remaining,
        }
    }

    /// Returns the next contiguous run of the sample, sharing its memory.
    fn next_chunk(&mut self, max: u64) -> Option<Bytes> {
        let max = usize::try_from(max).unwrap_or(usize::MAX);
        let range = self.advance(max)?;
        Some(self.sample.slice(range))
    }

    /// Moves the cursor forward by up to `max` bytes within a single repetition and returns the
    /// range of the sample that was passed over.
    fn advance(&mut self, max: usize) -> Option<Range<usize>> {
        loop {
            let remaining = self.remaining();
            if remaining == 0 || max == 0 {
                return None;
            }

            let available = self.sample.len() - self.offset;
            if available == 0 {
                // A drained repetition is not the end of the object unless it was the last one.
                if self.repeat + 1 >= self.repeats {
                    return None;
                }
                self.repeat += 1;
                self.offset = 0;
                continue;
            }

            let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
            let n = available.min(max).min(remaining);
            let start = self.offset;
            self.offset += n;
            return Some(start..start + n);
        }
    }
}

impl fmt::Debug for ContentReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentReader")
            .field("len", &self.len)
            .field("repeat", &self.repeat)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl Read for ContentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(range) = self.advance(buf.len()) else {
            return Ok(0);
        };

        let n = range.len();
        buf[..n].copy_from_slice(&self.sample[range]);
        Ok(n)
    }
}

impl Seek for ContentReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position().checked_add_signed(delta),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
        };

        let Some(target) = target else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            ));
        };

        let sample_len = self.sample.len() as u64;
        self.repeat = target / sample_len;
        self.offset = (target % sample_len) as usize;

        Ok(target)
    }
}

/// A streaming HTTP body over a [`ContentReader`].
///
/// Frames are zero-copy slices of the shared sample, and the size hint is exact so clients can
/// send a `Content-Length` without buffering.
#[derive(Debug)]
pub struct ContentBody {
    reader: ContentReader,
    remaining: u64,
}

impl ContentBody {
    /// The number of bytes this body will yield.
    pub fn content_length(&self) -> u64 {
        self.remaining
    }
}

impl Body for ContentBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.remaining == 0 {
            return task::Poll::Ready(None);
        }

        let Some(chunk) = this.reader.next_chunk(this.remaining) else {
            return task::Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "content ended before the announced length",
            ))));
        };

        this.remaining -= chunk.len() as u64;
        task::Poll::Ready(Some(Ok(Frame::data(chunk))))
    }

    fn is_end_stream(&self) -> bool {
        self.remaining == 0
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining)
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;

    use super::*;

    fn sample(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>().into()
    }

    fn collect_body(mut body: ContentBody) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        futures::executor::block_on(async {
            while let Some(frame) = poll_fn(|cx| Pin::new(&mut body).poll_frame(cx)).await {
                chunks.push(frame.unwrap().into_data().unwrap());
            }
        });
        chunks
    }

    #[test]
    fn repeats_sample_to_object_size() {
        let sample = sample(1024);
        let source = ContentSource::new(sample.clone(), 4096);
        assert_eq!(source.repeats(), 4);

        let mut reader = source.reader();
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).unwrap();

        assert_eq!(contents.len(), 4096);
        for (i, byte) in contents.iter().enumerate() {
            assert_eq!(*byte, sample[i % 1024], "mismatch at {i}");
        }

        let mut one = [0; 1];
        assert_eq!(reader.read(&mut one).unwrap(), 0);
    }

    #[test]
    fn length_is_authoritative() {
        let sample = sample(1024);
        let source = ContentSource::new(sample.clone(), 2500);
        assert_eq!(source.repeats(), 3);

        let mut contents = Vec::new();
        source.reader().read_to_end(&mut contents).unwrap();

        assert_eq!(contents.len(), 2500);
        assert_eq!(contents[2499], sample[2499 % 1024]);
    }

    #[test]
    fn continues_across_repetition_boundary() {
        let source = ContentSource::new(sample(16), 48);
        let mut reader = source.reader();

        let mut buf = [0; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), 16);
        assert_eq!(reader.position(), 16);

        // The first repetition is drained, but the object is not.
        assert_eq!(reader.read(&mut buf).unwrap(), 16);
        assert_eq!(buf[0], 0);
        assert_eq!(reader.read(&mut buf).unwrap(), 16);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn reads_never_cross_repetitions() {
        let source = ContentSource::new(sample(10), 25);
        let mut reader = source.reader();

        let mut buf = [0; 64];
        let sizes: Vec<_> = std::iter::from_fn(|| match reader.read(&mut buf).unwrap() {
            0 => None,
            n => Some(n),
        })
        .collect();

        assert_eq!(sizes, [10, 10, 5]);
    }

    #[test]
    fn seek_start_matches_sequential_read() {
        let source = ContentSource::new(sample(1024), 4096);
        let mut sequential = Vec::new();
        source.reader().read_to_end(&mut sequential).unwrap();

        let mut reader = source.reader();
        for offset in [0, 1, 1023, 1024, 1025, 2047, 2048, 3000, 4095] {
            assert_eq!(reader.seek(SeekFrom::Start(offset)).unwrap(), offset);
            let mut byte = [0; 1];
            assert_eq!(reader.read(&mut byte).unwrap(), 1);
            assert_eq!(byte[0], sequential[offset as usize], "offset {offset}");
        }
    }

    #[test]
    fn seek_current_resolves_position_first() {
        let sample = sample(100);
        let source = ContentSource::new(sample.clone(), 1000);
        let mut reader = source.reader();

        reader.seek(SeekFrom::Start(250)).unwrap();
        assert_eq!(reader.seek(SeekFrom::Current(120)).unwrap(), 370);
        assert_eq!(reader.seek(SeekFrom::Current(-300)).unwrap(), 70);
        assert_eq!(reader.stream_position().unwrap(), 70);

        let mut byte = [0; 1];
        reader.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], sample[70]);
    }

    #[test]
    fn seek_end_counts_back_from_last_repetition() {
        let sample = sample(100);
        let source = ContentSource::new(sample.clone(), 400);
        let mut reader = source.reader();

        assert_eq!(reader.seek(SeekFrom::End(-1)).unwrap(), 399);
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, [sample[99]]);

        assert_eq!(reader.seek(SeekFrom::End(-150)).unwrap(), 250);
        assert_eq!(reader.remaining(), 150);
    }

    #[test]
    fn seek_before_start_fails() {
        let mut reader = ContentSource::new(sample(8), 32).reader();
        reader.seek(SeekFrom::Start(4)).unwrap();

        let err = reader.seek(SeekFrom::Current(-5)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(reader.seek(SeekFrom::End(-33)).is_err());
    }

    #[test]
    fn seek_past_end_reads_nothing() {
        let mut reader = ContentSource::new(sample(8), 32).reader();
        reader.seek(SeekFrom::Start(100)).unwrap();

        let mut buf = [0; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn body_shares_sample_memory() {
        let sample = sample(1024);
        let source = ContentSource::new(sample.clone(), 3000);

        let body = source.reader().into_body();
        assert_eq!(body.size_hint().exact(), Some(3000));

        let chunks = collect_body(body);
        let lengths: Vec<_> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(lengths, [1024, 1024, 952]);
        assert_eq!(chunks[0].as_ptr(), sample.as_ptr());
    }

    #[test]
    fn part_body_starts_at_cursor() {
        let sample = sample(1024);
        let source = ContentSource::new(sample.clone(), 4096);

        let mut reader = source.reader();
        reader.seek(SeekFrom::Start(1500)).unwrap();
        let body = reader.take_body(1000);
        assert_eq!(body.content_length(), 1000);

        let contents: Vec<u8> = collect_body(body).concat();
        assert_eq!(contents.len(), 1000);
        assert_eq!(contents[0], sample[1500 % 1024]);
        assert_eq!(contents[999], sample[2499 % 1024]);
    }

    #[test]
    fn generate_splits_sample() {
        let source = ContentSource::generate(4096, 4).unwrap();
        assert_eq!(source.sample_len(), 1024);
        assert_eq!(source.repeats(), 4);
        assert_eq!(source.len(), 4096);

        let source = ContentSource::generate(1000, 3).unwrap();
        assert_eq!(source.sample_len(), 334);
        assert_eq!(source.repeats(), 3);

        assert!(ContentSource::generate(0, 1).is_err());
    }
}

//! Non-contiguous receive buffer.
//!
//! A [`ByteSequence`] is an ordered list of [`Bytes`] segments, one per network
//! read. Appending and consuming never copy payload bytes, and slicing a range
//! out of the sequence yields another sequence that shares the same storage.

use std::ops::Range;

use bytes::{Bytes, BytesMut};
use memchr::memmem;
use smallvec::SmallVec;

type Segments = SmallVec<[Bytes; 4]>;

/// An ordered run of byte segments treated as one logical buffer.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ByteSequence {
    segments: Segments,
    len: usize,
}

impl std::fmt::Debug for ByteSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteSequence")
            .field("len", &self.len)
            .field("segments", &self.segments.len())
            .finish()
    }
}

impl From<Bytes> for ByteSequence {
    fn from(bytes: Bytes) -> Self {
        let mut seq = Self::new();
        seq.append(bytes);
        seq
    }
}

impl From<&'static [u8]> for ByteSequence {
    fn from(bytes: &'static [u8]) -> Self {
        Self::from(Bytes::from_static(bytes))
    }
}

impl From<Vec<u8>> for ByteSequence {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from(Bytes::from(bytes))
    }
}

impl ByteSequence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sequence from several segments, preserving their boundaries.
    pub fn from_segments<I>(segments: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        let mut seq = Self::new();
        for s in segments {
            seq.append(s);
        }
        seq
    }

    /// Append newly received bytes. Empty segments are ignored.
    pub fn append(&mut self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.segments.push(bytes);
    }

    /// Drop the first `n` bytes of the sequence.
    pub fn consume(&mut self, mut n: usize) {
        n = n.min(self.len);
        self.len -= n;
        let mut drained = 0;
        for seg in self.segments.iter_mut() {
            if n == 0 {
                break;
            }
            if seg.len() <= n {
                n -= seg.len();
                drained += 1;
            } else {
                *seg = seg.slice(n..);
                n = 0;
            }
        }
        self.segments.drain(..drained);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_single_segment(&self) -> bool {
        self.segments.len() <= 1
    }

    pub fn segments(&self) -> impl Iterator<Item = &Bytes> {
        self.segments.iter()
    }

    /// Byte at logical offset `idx`.
    #[must_use]
    pub fn byte_at(&self, mut idx: usize) -> Option<u8> {
        for seg in &self.segments {
            if idx < seg.len() {
                return Some(seg[idx]);
            }
            idx -= seg.len();
        }
        None
    }

    /// Locate `needle` at or after logical offset `from`.
    ///
    /// Matches that straddle segment boundaries are found by scanning a small
    /// stitched window around each boundary.
    #[must_use]
    pub fn find(&self, needle: &[u8], from: usize) -> Option<usize> {
        if needle.is_empty() {
            return (from <= self.len).then_some(from);
        }
        if from >= self.len {
            return None;
        }
        if let [only] = self.segments.as_slice() {
            return memmem::find(&only[from..], needle).map(|p| p + from);
        }

        let finder = memmem::Finder::new(needle);
        let mut base = 0;
        for (i, seg) in self.segments.iter().enumerate() {
            let seg_end = base + seg.len();
            if seg_end > from {
                let start = from.saturating_sub(base);
                if let Some(p) = finder.find(&seg[start..]) {
                    return Some(base + start + p);
                }
                // Stitch the tail of this segment with the head of the following ones.
                if needle.len() > 1 && i + 1 < self.segments.len() {
                    let tail_start = seg.len().saturating_sub(needle.len() - 1).max(start);
                    let window_start = base + tail_start;
                    let window_len = (seg.len() - tail_start) + needle.len() - 1;
                    let window = self.copy_range(window_start..(window_start + window_len).min(self.len));
                    if let Some(p) = finder.find(&window) {
                        return Some(window_start + p);
                    }
                }
            }
            base = seg_end;
        }
        None
    }

    /// Zero-copy view of a sub-range.
    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> ByteSequence {
        let end = range.end.min(self.len);
        let mut start = range.start.min(end);
        let mut remaining = end - start;
        let mut out = ByteSequence::new();
        for seg in &self.segments {
            if remaining == 0 {
                break;
            }
            if start >= seg.len() {
                start -= seg.len();
                continue;
            }
            let take = (seg.len() - start).min(remaining);
            out.append(seg.slice(start..start + take));
            remaining -= take;
            start = 0;
        }
        out
    }

    /// Copy a sub-range into a fresh vector.
    #[must_use]
    pub fn copy_range(&self, range: Range<usize>) -> Vec<u8> {
        let view = self.slice(range);
        let mut out = Vec::with_capacity(view.len());
        for seg in &view.segments {
            out.extend_from_slice(seg);
        }
        out
    }

    /// Copy the whole sequence into one vector.
    #[must_use]
    pub fn copy_to_vec(&self) -> Vec<u8> {
        self.copy_range(0..self.len)
    }

    /// Contiguous view of the whole sequence. Free for zero or one segment;
    /// multi-segment sequences are copied once.
    #[must_use]
    pub fn to_contiguous(&self) -> Bytes {
        match self.segments.as_slice() {
            [] => Bytes::new(),
            [only] => only.clone(),
            many => {
                let mut buf = BytesMut::with_capacity(self.len);
                for seg in many {
                    buf.extend_from_slice(seg);
                }
                buf.freeze()
            }
        }
    }

    /// Copy bytes starting at `offset` into `dst`, returning how many were copied.
    pub fn copy_into(&self, offset: usize, dst: &mut [u8]) -> usize {
        let view = self.slice(offset..offset + dst.len());
        let mut written = 0;
        for seg in &view.segments {
            dst[written..written + seg.len()].copy_from_slice(seg);
            written += seg.len();
        }
        written
    }
}

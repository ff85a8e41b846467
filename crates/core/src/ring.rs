// SPDX-FileCopyrightText: © 2026 IngestKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! A dynamically resizing byte FIFO.
//!
//! [`ElasticRing`] is a circular buffer that grows geometrically up to a
//! hard maximum and shrinks back to its initial allocation once drained.
//! When a write would push past the maximum, the ring admits the write
//! anyway by discarding the oldest bytes and flagging an overflow, so a
//! real-time producer always makes progress under memory pressure.
//!
//! The ring is not thread safe; [`SharedRing`] wraps it in a mutex for the
//! paths where more than one task touches the same ring.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{IngestError, Result};

/// Result of a [`ElasticRing::write`] call.
///
/// The write itself always succeeds; `overflowed` reports that the ring hit
/// its maximum size and the oldest bytes were discarded to make room. That
/// data is lost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub overflowed: bool,
}

/// A byte FIFO over linear memory, indexed modulo the current capacity.
#[derive(Debug)]
pub struct ElasticRing {
    data: Vec<u8>,
    head: usize,
    fill: usize,
    initial: usize,
    max: usize,
}

impl ElasticRing {
    /// Creates a ring with an initial allocation and a maximum growable
    /// size, both in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Configuration`] when either size is zero or
    /// `initial > max`.
    pub fn new(initial: usize, max: usize) -> Result<Self> {
        if initial == 0 || max == 0 || initial > max {
            return Err(IngestError::Configuration(format!(
                "invalid ring bounds: initial = {initial}, max = {max}"
            )));
        }
        Ok(Self { data: vec![0; initial], head: 0, fill: 0, initial, max })
    }

    /// Bytes currently queued.
    pub const fn used(&self) -> usize {
        self.fill
    }

    /// Free space left, assuming the ring is allowed to grow to its
    /// maximum.
    pub const fn unused(&self) -> usize {
        self.max - self.fill
    }

    pub const fn is_empty(&self) -> bool {
        self.fill == 0
    }

    /// True once the fill level has reached the maximum allowable size.
    pub const fn is_full(&self) -> bool {
        self.fill == self.max
    }

    /// Current allocation size (`initial ≤ capacity ≤ max`).
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Drops all queued bytes without touching the allocation.
    pub fn clear(&mut self) {
        self.head = 0;
        self.fill = 0;
    }

    /// Appends `src` to the tail, growing the ring as needed. Never
    /// short-writes: if growth would exceed the maximum, the oldest
    /// `src.len()` bytes are discarded first and the outcome flags an
    /// overflow.
    pub fn write(&mut self, src: &[u8]) -> WriteOutcome {
        let n = src.len();
        if n == 0 {
            return WriteOutcome::default();
        }

        let mut src = src;
        let mut overflowed = false;
        if self.fill + n > self.data.len() {
            if self.fill + n <= self.max {
                // Geometric growth, amortized well past the immediate need.
                let target = (self.data.len() + n.saturating_mul(128)).min(self.max);
                self.realize(target);
            } else {
                self.realize(self.max);
                let dropped = n.min(self.fill);
                self.advance_head(dropped);
                overflowed = true;
                if n > self.data.len() {
                    // Larger than the ring can ever hold: keep the newest bytes.
                    src = &src[n - self.data.len()..];
                }
            }
        }

        let n = src.len();
        let cap = self.data.len();
        let tail = (self.head + self.fill) % cap;
        let contiguous = n.min(cap - tail);
        self.data[tail..tail + contiguous].copy_from_slice(&src[..contiguous]);
        self.data[..n - contiguous].copy_from_slice(&src[contiguous..]);
        self.fill += n;

        WriteOutcome { overflowed }
    }

    /// Copies up to `dst.len()` bytes from the head and advances past them,
    /// returning the number copied. Draining the ring releases any growth
    /// beyond the initial allocation.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = self.copy_out(dst);
        self.advance_head(n);
        self.maybe_shrink();
        n
    }

    /// Reads up to `n` bytes into a freshly allocated buffer.
    pub fn read_vec(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0; n.min(self.fill)];
        let got = self.read(&mut buf);
        buf.truncate(got);
        buf
    }

    /// As [`Self::read`] but leaves the queued bytes in place.
    pub fn peek(&self, dst: &mut [u8]) -> usize {
        self.copy_out(dst)
    }

    /// Advances the head past `min(n, used)` bytes.
    pub fn discard(&mut self, n: usize) {
        self.advance_head(n.min(self.fill));
    }

    /// Drains the entire ring to a writer, framed with `HEAD`, a big-endian
    /// 32-bit length and `TAIL`. Forensics helper for journaling ring
    /// contents to disk.
    ///
    /// # Errors
    ///
    /// Propagates writer errors; the ring may be partially drained.
    pub fn dump_to(&mut self, w: &mut impl Write) -> std::io::Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        w.write_all(b"HEAD")?;
        #[allow(clippy::cast_possible_truncation)]
        w.write_all(&(self.fill as u32).to_be_bytes())?;
        let mut chunk = [0u8; 8192];
        loop {
            let n = self.read(&mut chunk);
            if n == 0 {
                break;
            }
            w.write_all(&chunk[..n])?;
        }
        w.write_all(b"TAIL")
    }

    fn copy_out(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.fill);
        let cap = self.data.len();
        let contiguous = n.min(cap - self.head);
        dst[..contiguous].copy_from_slice(&self.data[self.head..self.head + contiguous]);
        dst[contiguous..n].copy_from_slice(&self.data[..n - contiguous]);
        n
    }

    fn advance_head(&mut self, n: usize) {
        self.head = (self.head + n) % self.data.len();
        self.fill -= n;
    }

    /// Reallocates at `new_cap`, linearizing the logical sequence with the
    /// head back at offset zero. `new_cap` must hold the current fill.
    fn realize(&mut self, new_cap: usize) {
        let mut next = vec![0; new_cap];
        let n = self.copy_out(&mut next[..self.fill.min(new_cap)]);
        self.data = next;
        self.head = 0;
        self.fill = n;
    }

    fn maybe_shrink(&mut self) {
        if self.fill == 0 && self.data.len() > self.initial {
            self.data = vec![0; self.initial];
            self.head = 0;
        }
    }
}

/// Thread-safe ring: every public operation is serialized under one mutex.
///
/// Cloning yields another handle to the same ring.
#[derive(Debug, Clone)]
pub struct SharedRing {
    inner: Arc<Mutex<ElasticRing>>,
}

impl SharedRing {
    /// See [`ElasticRing::new`].
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Configuration`] on invalid bounds.
    pub fn new(initial: usize, max: usize) -> Result<Self> {
        Ok(Self { inner: Arc::new(Mutex::new(ElasticRing::new(initial, max)?)) })
    }

    pub fn write(&self, src: &[u8]) -> WriteOutcome {
        self.lock().write(src)
    }

    pub fn read(&self, dst: &mut [u8]) -> usize {
        self.lock().read(dst)
    }

    pub fn peek(&self, dst: &mut [u8]) -> usize {
        self.lock().peek(dst)
    }

    pub fn discard(&self, n: usize) {
        self.lock().discard(n);
    }

    pub fn used(&self) -> usize {
        self.lock().used()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lock().is_full()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, ElasticRing> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

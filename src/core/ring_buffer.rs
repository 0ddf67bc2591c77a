//! Fixed-capacity byte ring with independent read and write cursors.
//!
//! Setiap connection slot punya dua ring: inbound (socket -> framing) dan
//! outbound (work item -> socket). Dialokasi sekali bersama slot, hanya
//! disentuh oleh tick thread.
//!
//! Invariant: `len == (write_pos - read_pos) mod capacity`, with the full ring
//! (`write_pos == read_pos`, `len == capacity`) told apart from the empty one by
//! `len`.

use std::io::{self, Write};

use bytes::BytesMut;

use crate::error::{Error, Result};

/// Byte ring buffer. Writes past the end wrap and split into two copies.
pub struct ByteRing {
    buffer: Box<[u8]>,
    // Posisi write berikutnya
    write_pos: usize,
    // Posisi read berikutnya
    read_pos: usize,
    // Jumlah byte yang bisa dibaca
    len: usize,
}

/// Read-only look at the unread region, handed to framing predicates.
#[derive(Clone, Copy)]
pub struct RingView<'a> {
    buffer: &'a [u8],
    read_pos: usize,
    write_pos: usize,
    len: usize,
}

impl<'a> RingView<'a> {
    /// Raw backing array, including bytes outside the unread region.
    #[inline(always)]
    pub fn raw(&self) -> &'a [u8] {
        self.buffer
    }

    #[inline(always)]
    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    #[inline(always)]
    pub fn write_pos(&self) -> usize {
        self.write_pos
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The unread bytes as at most two contiguous segments, in order.
    ///
    /// The second segment is non-empty only when the unread region wraps.
    pub fn segments(&self) -> (&'a [u8], &'a [u8]) {
        if self.len == 0 {
            return (&[], &[]);
        }
        if self.read_pos < self.write_pos {
            (&self.buffer[self.read_pos..self.write_pos], &[])
        } else {
            (&self.buffer[self.read_pos..], &self.buffer[..self.write_pos])
        }
    }
}

impl ByteRing {
    /// Alokasi ring. Tidak ada alokasi lain setelah ini.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            write_pos: 0,
            read_pos: 0,
            len: 0,
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Readable bytes.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sisa space untuk write.
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// Appends `data`, wrapping the write cursor.
    ///
    /// Fails without touching the ring when `data` does not fit.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.remaining() {
            return Err(Error::CapacityExceeded {
                needed: data.len(),
                available: self.remaining(),
            });
        }

        let capacity = self.capacity();
        let first = (capacity - self.write_pos).min(data.len());
        self.buffer[self.write_pos..self.write_pos + first].copy_from_slice(&data[..first]);

        if first < data.len() {
            let rest = data.len() - first;
            self.buffer[..rest].copy_from_slice(&data[first..]);
            self.write_pos = rest;
        } else {
            self.write_pos = (self.write_pos + first) % capacity;
        }

        self.len += data.len();
        Ok(())
    }

    /// Copies exactly `out.len()` bytes out of the ring.
    pub fn read(&mut self, out: &mut [u8]) -> Result<()> {
        let length = out.len();
        self.check_readable(length)?;

        let capacity = self.capacity();
        let first = (capacity - self.read_pos).min(length);
        out[..first].copy_from_slice(&self.buffer[self.read_pos..self.read_pos + first]);

        if first < length {
            let rest = length - first;
            out[first..].copy_from_slice(&self.buffer[..rest]);
        }

        self.advance(length);
        Ok(())
    }

    /// Moves `length` bytes from the ring onto the end of `dst`.
    pub fn read_into(&mut self, length: usize, dst: &mut BytesMut) -> Result<()> {
        self.check_readable(length)?;

        let capacity = self.capacity();
        let first = (capacity - self.read_pos).min(length);
        dst.extend_from_slice(&self.buffer[self.read_pos..self.read_pos + first]);

        if first < length {
            dst.extend_from_slice(&self.buffer[..length - first]);
        }

        self.advance(length);
        Ok(())
    }

    /// Drops `length` unread bytes.
    pub fn discard(&mut self, length: usize) -> Result<()> {
        self.check_readable(length)?;
        self.advance(length);
        Ok(())
    }

    /// Snapshot of the unread region.
    #[inline(always)]
    pub fn view(&self) -> RingView<'_> {
        RingView {
            buffer: &self.buffer,
            read_pos: self.read_pos,
            write_pos: self.write_pos,
            len: self.len,
        }
    }

    /// Lets framing code decide, without consuming anything, whether the data
    /// it waits for has arrived.
    #[inline]
    pub fn peek_ready<F>(&self, predicate: F) -> bool
    where
        F: FnOnce(RingView<'_>) -> bool,
    {
        predicate(self.view())
    }

    /// Blocking flush of every readable byte into `writer`.
    ///
    /// Bytes accepted by the writer are consumed even if a later write fails.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        let mut written = 0;

        while self.len > 0 {
            let (first, _) = self.view().segments();
            let n = writer.write(first)?;

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "socket accepted zero bytes",
                ));
            }

            self.advance(n);
            written += n;
        }

        Ok(written)
    }

    /// Reset ring, semua byte dibuang.
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
        self.len = 0;
    }

    #[inline(always)]
    fn check_readable(&self, requested: usize) -> Result<()> {
        if requested > self.len {
            return Err(Error::Underflow {
                requested,
                available: self.len,
            });
        }
        Ok(())
    }

    #[inline(always)]
    fn advance(&mut self, length: usize) {
        self.read_pos = (self.read_pos + length) % self.capacity();
        self.len -= length;
    }
}

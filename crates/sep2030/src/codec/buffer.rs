// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A fixed-capacity input buffer with compaction ("rebuffer") semantics:
//! the parser reads whatever is available, and unconsumed bytes are
//! shifted back to the front so more can be read in without growing
//! the buffer.

/// Bounded byte buffer: bytes are appended up to `capacity`, consumed
/// from the front via `advance`, and the unconsumed tail is shifted back
/// to offset zero with `compact` so more bytes can be read in.
pub struct Buffer {
    data: Vec<u8>,
    pos: usize,
    capacity: usize,
}

impl Buffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            pos: 0,
            capacity,
        }
    }

    /// Append as many bytes from `src` as fit before the buffer is full;
    /// returns the number of bytes actually copied.
    pub fn fill_from(&mut self, src: &[u8]) -> usize {
        let room = self.capacity.saturating_sub(self.data.len());
        let n = room.min(src.len());
        self.data.extend_from_slice(&src[..n]);
        n
    }

    /// The unconsumed portion of the buffer.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    /// Mark `n` bytes as consumed.
    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.data.len());
    }

    /// Shift the unconsumed tail to the front, freeing room at the back
    /// for more bytes to be read in.
    pub fn compact(&mut self) {
        if self.pos > 0 {
            self.data.drain(0..self.pos);
            self.pos = 0;
        }
    }

    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_respects_capacity() {
        let mut buf = Buffer::new(4);
        assert_eq!(buf.fill_from(b"hello"), 4);
        assert!(buf.is_full());
    }

    #[test]
    fn compact_shifts_unconsumed_tail() {
        let mut buf = Buffer::new(8);
        buf.fill_from(b"abcdefgh");
        buf.advance(5);
        assert_eq!(buf.remaining(), b"fgh");
        buf.compact();
        assert_eq!(buf.remaining(), b"fgh");
        assert_eq!(buf.fill_from(b"ij"), 2);
        assert_eq!(buf.remaining(), b"fghij");
    }
}

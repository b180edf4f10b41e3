use crate::Error;

/// Default maximum UDP payload size (§6.2).
pub const MAX_UDP_PAYLOAD: usize = 6000;

/// A bounded byte buffer with independent read and write cursors (§4.2).
///
/// Used for both UDP datagrams (capped at [`MAX_UDP_PAYLOAD`]) and TCP
/// streams (sized per use site). `retrieve` never reads past the write
/// cursor, and [`crate::Element::safe_decode`] uses the read cursor as a
/// checkpoint it can roll back to when a frame is incomplete.
#[derive(Debug)]
pub struct Buffer {
    storage: Vec<u8>,
    capacity: usize,
    write: usize,
    read: usize,
}

impl Buffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity],
            capacity,
            write: 0,
            read: 0,
        }
    }

    /// Wrap already-received bytes (e.g. a freshly read UDP datagram) as a
    /// buffer ready for decoding.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = Self::with_capacity(bytes.len());
        buf.append(bytes).expect("buffer sized to fit the input");
        buf
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn read_pos(&self) -> usize {
        self.read
    }

    pub fn write_pos(&self) -> usize {
        self.write
    }

    /// Bytes available to be retrieved (`write - read`).
    pub fn remaining(&self) -> usize {
        self.write - self.read
    }

    pub fn set_read_pos(&mut self, pos: usize) {
        debug_assert!(pos <= self.write);
        self.read = pos;
    }

    /// Test-only knob used to simulate a partially received frame.
    #[doc(hidden)]
    pub fn truncate_write(&mut self, pos: usize) {
        debug_assert!(pos <= self.write);
        self.write = pos;
    }

    /// Append bytes at the write cursor, failing if capacity would be
    /// exceeded.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if self.write + bytes.len() > self.capacity {
            return Err(Error::BufferOverflow);
        }

        self.storage[self.write..self.write + bytes.len()].copy_from_slice(bytes);
        self.write += bytes.len();
        Ok(())
    }

    /// Advance the write cursor without copying, for callers that wrote
    /// directly into [`Self::spare_capacity_mut`] (e.g. a raw socket read).
    pub fn advance_write(&mut self, n: usize) -> Result<(), Error> {
        if self.write + n > self.capacity {
            return Err(Error::BufferOverflow);
        }

        self.write += n;
        Ok(())
    }

    /// The unwritten tail of the backing storage, for in-place socket reads.
    pub fn spare_capacity_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.write..self.capacity]
    }

    /// Everything written so far, regardless of the read cursor.
    pub fn written(&self) -> &[u8] {
        &self.storage[..self.write]
    }

    /// Everything not yet retrieved.
    pub fn unread(&self) -> &[u8] {
        &self.storage[self.read..self.write]
    }

    /// Copy `dst.len()` bytes starting at the read cursor, advancing it.
    ///
    /// Succeeds only if both `read + n <= capacity` and `read + n <= write`
    /// (never reads past written data).
    pub fn retrieve(&mut self, dst: &mut [u8]) -> Result<(), Error> {
        let n = dst.len();

        if self.read + n > self.capacity || self.read + n > self.write {
            return Err(Error::Incomplete);
        }

        dst.copy_from_slice(&self.storage[self.read..self.read + n]);
        self.read += n;
        Ok(())
    }

    /// Shift unread bytes to the front of the buffer, freeing space at the
    /// tail for another socket read. Used by the TCP stream reader between
    /// frames.
    pub fn compact(&mut self) {
        if self.read == 0 {
            return;
        }

        self.storage.copy_within(self.read..self.write, 0);
        self.write -= self.read;
        self.read = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_fails_on_overflow() {
        let mut buf = Buffer::with_capacity(4);
        assert!(buf.append(&[1, 2, 3, 4]).is_ok());
        assert!(matches!(buf.append(&[5]), Err(Error::BufferOverflow)));
    }

    #[test]
    fn retrieve_never_reads_past_write_cursor() {
        let mut buf = Buffer::with_capacity(8);
        buf.append(&[1, 2, 3]).unwrap();

        let mut dst = [0u8; 4];
        assert!(matches!(buf.retrieve(&mut dst), Err(Error::Incomplete)));

        let mut dst = [0u8; 3];
        buf.retrieve(&mut dst).unwrap();
        assert_eq!(dst, [1, 2, 3]);
    }

    #[test]
    fn compact_shifts_unread_tail_to_front() {
        let mut buf = Buffer::with_capacity(8);
        buf.append(&[1, 2, 3, 4]).unwrap();

        let mut dst = [0u8; 2];
        buf.retrieve(&mut dst).unwrap();

        buf.compact();
        assert_eq!(buf.read_pos(), 0);
        assert_eq!(buf.remaining(), 2);

        buf.append(&[5, 6]).unwrap();
        let mut rest = [0u8; 4];
        buf.retrieve(&mut rest).unwrap();
        assert_eq!(rest, [3, 4, 5, 6]);
    }
}

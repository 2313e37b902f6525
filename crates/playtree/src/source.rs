use std::io::{self, SeekFrom};

use bytes::Bytes;

/// Byte-source collaborator. The parser only ever consumes bytes that were
/// already delivered; transport is someone else's job.
///
/// `size` and `last_available_position` both return `None` while the figure
/// is not yet known. The parser refuses to run until both are known and
/// equal, so it never observes a torn document mid-stream.
pub trait ByteSource {
    /// Fill `buf` without consuming. Returns false if that many bytes are
    /// not available yet.
    fn peek(&mut self, buf: &mut [u8]) -> bool;

    /// Consuming read. Short reads are not errors.
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// Total size of the document, if known.
    fn size(&self) -> Option<u64>;

    /// Upper bound of the contiguous readable region, if known.
    fn last_available_position(&self) -> Option<u64>;
}

/// A fully buffered in-memory source. Used for tests and for re-parsing a
/// patched document after error recovery.
pub struct MemorySource {
    data: Bytes,
    position: usize,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: 0,
        }
    }
}

impl ByteSource for MemorySource {
    fn peek(&mut self, buf: &mut [u8]) -> bool {
        let end = self.position + buf.len();
        if end > self.data.len() {
            return false;
        }
        buf.copy_from_slice(&self.data[self.position..end]);
        true
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.position..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        self.position += count;
        Ok(count)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.data.len() as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if target < 0 || target > self.data.len() as i64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek out of range",
            ));
        }
        self.position = target as usize;
        Ok(self.position as u64)
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn last_available_position(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_does_not_consume() {
        let mut source = MemorySource::new(&b"<ASX version=\"3.0\"/>"[..]);

        let mut probe = [0u8; 4];
        assert!(source.peek(&mut probe));
        assert_eq!(&probe, b"<ASX");

        let mut all = vec![0u8; 20];
        assert_eq!(source.read_some(&mut all).unwrap(), 20);
        assert_eq!(&all, b"<ASX version=\"3.0\"/>");
    }

    #[test]
    fn test_peek_beyond_end() {
        let mut source = MemorySource::new(&b"abc"[..]);
        let mut probe = [0u8; 4];
        assert!(!source.peek(&mut probe));
    }

    #[test]
    fn test_short_read_is_not_an_error() {
        let mut source = MemorySource::new(&b"abc"[..]);
        let mut buf = [0u8; 16];
        assert_eq!(source.read_some(&mut buf).unwrap(), 3);
        assert_eq!(source.read_some(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_seek_and_bounds() {
        let mut source = MemorySource::new(&b"abcdef"[..]);
        assert_eq!(source.seek(SeekFrom::Start(4)).unwrap(), 4);
        let mut buf = [0u8; 4];
        assert_eq!(source.read_some(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert!(source.seek(SeekFrom::Current(10)).is_err());
    }

    #[test]
    fn test_fully_buffered_reports_size() {
        let source = MemorySource::new(&b"abc"[..]);
        assert_eq!(source.size(), Some(3));
        assert_eq!(source.last_available_position(), Some(3));
    }
}

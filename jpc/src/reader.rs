use byteorder::{BigEndian, ReadBytesExt};
use std::io;

/// Sequential big-endian byte source.
///
/// The box and marker walkers only ever move forward through the data. Every
/// multi-byte integer in a JP2 file or a JPEG 2000 codestream is big endian
/// and unsigned.
///
/// All operations fail with an [io::Error] when the underlying medium is
/// exhausted or unreadable; structural problems are reported by the callers.
pub trait ByteSource {
    fn read_u8(&mut self) -> io::Result<u8>;

    fn read_u16(&mut self) -> io::Result<u16>;

    fn read_u32(&mut self) -> io::Result<u32>;

    fn read_u64(&mut self) -> io::Result<u64>;

    /// Read exactly `length` bytes.
    fn read_bytes(&mut self, length: usize) -> io::Result<Vec<u8>>;

    /// Read exactly `length` bytes as a fixed length string.
    ///
    /// The bytes are expected to be ISO 646 (ASCII) or UTF-8; invalid
    /// sequences are replaced rather than rejected.
    fn read_string(&mut self, length: usize) -> io::Result<String> {
        let bytes = self.read_bytes(length)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Four character code, e.g. a box type.
    fn read_four_cc(&mut self) -> io::Result<[u8; 4]> {
        Ok(self.read_u32()?.to_be_bytes())
    }

    fn skip(&mut self, length: u64) -> io::Result<()>;

    /// Whether any bytes are left; only used to find the end of the top level
    /// box sequence.
    fn has_data_remaining(&mut self) -> io::Result<bool>;

    /// Number of bytes left in the source, if the source knows it.
    fn bytes_remaining(&mut self) -> io::Result<Option<u64>> {
        Ok(None)
    }

    /// Byte offset from the start of the source, for diagnostics.
    fn position(&self) -> u64;
}

/// [ByteSource] over anything that can be read and seeked, such as a
/// `BufReader<File>` or an in-memory `Cursor<Vec<u8>>`.
#[derive(Debug)]
pub struct Reader<R> {
    inner: R,
    position: u64,
    length: u64,
}

impl<R: io::Read + io::Seek> Reader<R> {
    pub fn new(mut inner: R) -> io::Result<Reader<R>> {
        let position = inner.stream_position()?;
        let length = inner.seek(io::SeekFrom::End(0))?;
        inner.seek(io::SeekFrom::Start(position))?;

        Ok(Reader {
            inner,
            position,
            length,
        })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    // Refuse requests that run past the end before allocating or seeking, a
    // corrupt length field can ask for gigabytes.
    fn ensure_available(&self, length: u64) -> io::Result<()> {
        let available = self.length.saturating_sub(self.position);
        if length > available {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "requested {} bytes at offset {} but only {} remain",
                    length, self.position, available
                ),
            ));
        }
        Ok(())
    }

    fn advance(&mut self, length: u64) {
        self.position += length;
    }
}

impl<R: io::Read + io::Seek> ByteSource for Reader<R> {
    fn read_u8(&mut self) -> io::Result<u8> {
        self.ensure_available(1)?;
        let value = self.inner.read_u8()?;
        self.advance(1);
        Ok(value)
    }

    fn read_u16(&mut self) -> io::Result<u16> {
        self.ensure_available(2)?;
        let value = self.inner.read_u16::<BigEndian>()?;
        self.advance(2);
        Ok(value)
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        self.ensure_available(4)?;
        let value = self.inner.read_u32::<BigEndian>()?;
        self.advance(4);
        Ok(value)
    }

    fn read_u64(&mut self) -> io::Result<u64> {
        self.ensure_available(8)?;
        let value = self.inner.read_u64::<BigEndian>()?;
        self.advance(8);
        Ok(value)
    }

    fn read_bytes(&mut self, length: usize) -> io::Result<Vec<u8>> {
        self.ensure_available(length as u64)?;
        let mut buffer = vec![0; length];
        self.inner.read_exact(&mut buffer)?;
        self.advance(length as u64);
        Ok(buffer)
    }

    fn skip(&mut self, length: u64) -> io::Result<()> {
        self.ensure_available(length)?;
        // Bounded by the stream length, which fits in an i64 for any real
        // file.
        let offset = i64::try_from(length)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.inner.seek(io::SeekFrom::Current(offset))?;
        self.advance(length);
        Ok(())
    }

    fn has_data_remaining(&mut self) -> io::Result<bool> {
        Ok(self.position < self.length)
    }

    fn bytes_remaining(&mut self) -> io::Result<Option<u64>> {
        Ok(Some(self.length.saturating_sub(self.position)))
    }

    fn position(&self) -> u64 {
        self.position
    }
}

/// Not enough bytes left in a [Budget].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub needed: u64,
    pub available: u64,
}

/// Remaining byte countdown of a length-prefixed structure.
///
/// Boxes and codestreams declare their own length up front; every parser
/// takes what it reads out of the budget so that overruns surface as an error
/// instead of an underflowed counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    length: u64,
    remaining: u64,
}

impl Budget {
    pub fn new(length: u64) -> Budget {
        Budget {
            length,
            remaining: length,
        }
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn consumed(&self) -> u64 {
        self.length - self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    pub fn consume(&mut self, count: u64) -> Result<(), Shortfall> {
        match self.remaining.checked_sub(count) {
            Some(remaining) => {
                self.remaining = remaining;
                Ok(())
            }
            None => Err(Shortfall {
                needed: count,
                available: self.remaining,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_reads_big_endian() {
        let data = vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, b'j', b'p', b'2', b' '];
        let mut reader = Reader::new(Cursor::new(data)).unwrap();

        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert_eq!(reader.read_u16().unwrap(), 0x0203);
        assert_eq!(reader.read_u32().unwrap(), 0x0405_0607);
        assert_eq!(reader.position(), 7);
        assert_eq!(reader.read_string(4).unwrap(), "jp2 ");
        assert!(!reader.has_data_remaining().unwrap());
    }

    #[test]
    fn test_skip_and_remaining() {
        let mut reader = Reader::new(Cursor::new(vec![0u8; 10])).unwrap();
        reader.skip(6).unwrap();
        assert_eq!(reader.position(), 6);
        assert_eq!(reader.bytes_remaining().unwrap(), Some(4));
        assert!(reader.has_data_remaining().unwrap());
        assert_eq!(reader.read_bytes(4).unwrap(), vec![0; 4]);
        assert!(!reader.has_data_remaining().unwrap());
    }

    #[test]
    fn test_past_end_is_eof() {
        let mut reader = Reader::new(Cursor::new(vec![0u8; 3])).unwrap();
        let error = reader.read_u32().unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
        // Nothing was consumed by the failed read.
        assert_eq!(reader.position(), 0);

        let error = reader.skip(4).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);

        let error = reader.read_bytes(usize::MAX).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_starts_at_current_position() {
        let mut cursor = Cursor::new(vec![0xAA, 0xBB, 0xCC]);
        cursor.set_position(1);
        let mut reader = Reader::new(cursor).unwrap();
        assert_eq!(reader.position(), 1);
        assert_eq!(reader.read_u8().unwrap(), 0xBB);
    }

    #[test]
    fn test_budget() {
        let mut budget = Budget::new(10);
        assert!(budget.consume(4).is_ok());
        assert_eq!(budget.remaining(), 6);
        assert_eq!(budget.consumed(), 4);
        assert_eq!(
            budget.consume(7),
            Err(Shortfall {
                needed: 7,
                available: 6
            })
        );
        // A failed consume leaves the budget untouched.
        assert_eq!(budget.remaining(), 6);
        assert!(budget.consume(6).is_ok());
        assert!(budget.is_exhausted());
    }
}

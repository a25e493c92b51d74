//! Endian-aware cursors over seekable byte streams.
//!
//! [`Reader`] and [`Writer`] carry the default byte order of the format
//! being processed, so the common case reads `rd.read_unsigned(2)?` rather
//! than repeating the endianness at every call site. Format code that needs
//! a different order for a single field uses the `_endian` variants.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::endian::{self, Endian};
use crate::error::{Error, Result};

pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

pub trait WriteSeek: Write + Seek {}
impl<T: Write + Seek> WriteSeek for T {}

/// Cursor for importing binary data.
pub struct Reader<'a> {
    /// Default byte order for multibyte reads
    pub endian: Endian,
    inner: Box<dyn ReadSeek + 'a>,
}

impl<'a> Reader<'a> {
    pub fn new(endian: Endian, inner: Box<dyn ReadSeek + 'a>) -> Self {
        Reader { endian, inner }
    }

    /// Reads exactly `count` bytes. A short read reports how much was
    /// actually available.
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        let data = self.read_up_to(count)?;
        if data.len() != count {
            return Err(Error::Malformed(format!(
                "truncated input: wanted {count} bytes, got {}",
                data.len()
            )));
        }
        Ok(data)
    }

    /// Reads up to `count` bytes, stopping quietly at end of stream.
    pub fn read_up_to(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut data = vec![0u8; count];
        let mut filled = 0;
        while filled < count {
            let n = self.inner.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data.truncate(filled);
        Ok(data)
    }

    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.inner.read_to_end(&mut data)?;
        Ok(data)
    }

    pub fn read_unsigned(&mut self, bytes: usize) -> Result<u64> {
        self.read_unsigned_endian(bytes, self.endian)
    }

    pub fn read_unsigned_endian(&mut self, bytes: usize, endian: Endian) -> Result<u64> {
        let data = self.read_bytes(bytes)?;
        Ok(endian::read_unsigned(bytes, &data, endian))
    }

    pub fn read_signed(&mut self, bytes: usize) -> Result<i64> {
        self.read_signed_endian(bytes, self.endian)
    }

    pub fn read_signed_endian(&mut self, bytes: usize, endian: Endian) -> Result<i64> {
        let data = self.read_bytes(bytes)?;
        Ok(endian::read_signed(bytes, &data, endian))
    }

    /// Reads a fixed-length field as text, keeping any embedded NULs out.
    pub fn read_string(&mut self, count: usize) -> Result<String> {
        let data = self.read_bytes(count)?;
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        Ok(String::from_utf8_lossy(&data[..end]).into_owned())
    }

    /// Reads a NUL-terminated string of at most `maximum` bytes.
    pub fn read_asciiz(&mut self, maximum: usize) -> Result<String> {
        let mut data = Vec::new();
        let mut byte = [0u8; 1];
        while data.len() < maximum {
            let n = self.inner.read(&mut byte)?;
            if n == 0 || byte[0] == 0 {
                break;
            }
            data.push(byte[0]);
        }
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    pub fn seek(&mut self, offset: u64) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::Start(offset))?)
    }

    pub fn skip(&mut self, delta: i64) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::Current(delta))?)
    }

    pub fn seek_end(&mut self, delta: i64) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::End(delta))?)
    }

    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }
}

/// Cursor for exporting binary data.
pub struct Writer<'a> {
    /// Default byte order for multibyte writes
    pub endian: Endian,
    inner: Box<dyn WriteSeek + 'a>,
}

impl<'a> Writer<'a> {
    pub fn new(endian: Endian, inner: Box<dyn WriteSeek + 'a>) -> Self {
        Writer { endian, inner }
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        Ok(())
    }

    pub fn write_word(&mut self, bytes: usize, value: u64) -> Result<()> {
        self.write_word_endian(bytes, value, self.endian)
    }

    pub fn write_word_endian(&mut self, bytes: usize, value: u64, endian: Endian) -> Result<()> {
        let mut data = [0u8; 8];
        endian::write_word(bytes, &mut data[..bytes], value, endian);
        self.write_bytes(&data[..bytes])
    }

    /// Writes `text` into a field of exactly `count` bytes, truncating or
    /// padding with `padding` as needed.
    pub fn write_string(&mut self, count: usize, text: &str, padding: u8) -> Result<()> {
        let bytes = text.as_bytes();
        if bytes.len() >= count {
            self.write_bytes(&bytes[..count])
        } else {
            self.write_bytes(bytes)?;
            self.write_zeroes_with(count - bytes.len(), padding)
        }
    }

    fn write_zeroes_with(&mut self, count: usize, fill: u8) -> Result<()> {
        // chunked so a large bss gap does not allocate its full size
        let chunk = [fill; 256];
        let mut remaining = count;
        while remaining > 0 {
            let n = remaining.min(chunk.len());
            self.inner.write_all(&chunk[..n])?;
            remaining -= n;
        }
        Ok(())
    }

    pub fn seek(&mut self, offset: u64) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::Start(offset))?)
    }

    pub fn skip(&mut self, delta: i64) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::Current(delta))?)
    }

    pub fn seek_end(&mut self, delta: i64) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::End(delta))?)
    }

    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    /// Moves to `position`, extending the stream with zeroes if it is
    /// beyond the current end.
    pub fn fill_to(&mut self, position: u64) -> Result<()> {
        let length = self.inner.seek(SeekFrom::End(0))?;
        if position > length {
            self.write_zeroes_with((position - length) as usize, 0)?;
        } else {
            self.inner.seek(SeekFrom::Start(position))?;
        }
        Ok(())
    }

    /// Zero-pads so the cursor lands on the next multiple of `align`.
    pub fn align_to(&mut self, align: u64) -> Result<()> {
        let position = self.tell()?;
        self.fill_to(endian::align_to(position, align))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(bytes: &[u8]) -> Reader<'static> {
        Reader::new(Endian::Little, Box::new(Cursor::new(bytes.to_vec())))
    }

    #[test]
    fn words_and_strings() {
        let mut rd = reader(&[0x34, 0x12, b'h', b'i', 0, b'x', 0xFF]);
        assert_eq!(rd.read_unsigned(2).unwrap(), 0x1234);
        assert_eq!(rd.read_asciiz(16).unwrap(), "hi");
        assert_eq!(rd.read_string(1).unwrap(), "x");
        assert_eq!(rd.read_signed(1).unwrap(), -1);
    }

    #[test]
    fn truncated_read_reports_actual_count() {
        let mut rd = reader(&[1, 2, 3]);
        match rd.read_bytes(8) {
            Err(Error::Malformed(msg)) => assert!(msg.contains("got 3"), "{msg}"),
            other => panic!("expected truncation error, got {other:?}"),
        }
    }

    #[test]
    fn read_up_to_stops_at_eof() {
        let mut rd = reader(&[1, 2, 3]);
        assert_eq!(rd.read_up_to(8).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn writer_fill_and_align() {
        let mut wr = Writer::new(Endian::Big, Box::new(Cursor::new(Vec::new())));
        wr.write_word(2, 0x1234).unwrap();
        wr.align_to(8).unwrap();
        assert_eq!(wr.tell().unwrap(), 8);
        wr.fill_to(4).unwrap();
        assert_eq!(wr.tell().unwrap(), 4);
        wr.write_string(6, "ab", b' ').unwrap();
        assert_eq!(wr.tell().unwrap(), 10);
    }
}

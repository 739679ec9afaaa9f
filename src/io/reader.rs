//! Positioned binary reader over an in-memory buffer.

use super::{Decodable, IoError, IoResult};

/// Limit on decoded sequence lengths; anything longer than the largest
/// valid network payload is malformed by definition.
pub(crate) const MAX_DECODE_LEN: u64 = 0x0200_0000;

/// Reads little-endian primitives and var-uint prefixed data from a slice.
#[derive(Debug)]
pub struct BinReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BinReader { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize, context: &'static str) -> IoResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(IoError::EndOfStream {
                expected: n - self.remaining(),
                context,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_into(&mut self, buf: &mut [u8]) -> IoResult<()> {
        let slice = self.take(buf.len(), "fixed buffer")?;
        buf.copy_from_slice(slice);
        Ok(())
    }

    pub fn read_bytes(&mut self, n: usize) -> IoResult<Vec<u8>> {
        Ok(self.take(n, "byte run")?.to_vec())
    }

    pub fn read_u8(&mut self) -> IoResult<u8> {
        Ok(self.take(1, "u8")?[0])
    }

    pub fn read_bool(&mut self) -> IoResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16_le(&mut self) -> IoResult<u16> {
        let b = self.take(2, "u16")?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&mut self) -> IoResult<u32> {
        let b = self.take(4, "u32")?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_le(&mut self) -> IoResult<u64> {
        let b = self.take(8, "u64")?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads the var-uint length prefix described in [`super::BinWriter::write_var_uint`].
    pub fn read_var_uint(&mut self) -> IoResult<u64> {
        match self.read_u8()? {
            b @ 0x00..=0xfc => Ok(b as u64),
            0xfd => Ok(self.read_u16_le()? as u64),
            0xfe => Ok(self.read_u32_le()? as u64),
            0xff => self.read_u64_le(),
        }
    }

    /// Reads a length-prefixed byte string.
    pub fn read_var_bytes(&mut self) -> IoResult<Vec<u8>> {
        let len = self.read_var_uint()?;
        if len > MAX_DECODE_LEN {
            return Err(IoError::TooLarge {
                got: len,
                limit: MAX_DECODE_LEN,
                context: "var bytes",
            });
        }
        self.read_bytes(len as usize)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> IoResult<String> {
        let bytes = self.read_var_bytes()?;
        String::from_utf8(bytes)
            .map_err(|e| IoError::InvalidFormat(format!("invalid utf-8 string: {e}")))
    }

    /// Reads a length-prefixed sequence of decodable values.
    pub fn read_array<T: Decodable>(&mut self) -> IoResult<Vec<T>> {
        let len = self.read_var_uint()?;
        if len > MAX_DECODE_LEN {
            return Err(IoError::TooLarge {
                got: len,
                limit: MAX_DECODE_LEN,
                context: "array",
            });
        }
        let mut items = Vec::with_capacity(len.min(1024) as usize);
        for _ in 0..len {
            items.push(T::decode_binary(self)?);
        }
        Ok(items)
    }
}

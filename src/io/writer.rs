//! Buffered binary writer with little-endian primitives.

use super::{Encodable, IoResult};

/// Accumulates the binary encoding of a value in memory.
#[derive(Debug, Default)]
pub struct BinWriter {
    buf: Vec<u8>,
}

impl BinWriter {
    pub fn new() -> Self {
        BinWriter::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        BinWriter {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Consumes the writer, returning the accumulated bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> IoResult<()> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> IoResult<()> {
        self.buf.push(v);
        Ok(())
    }

    pub fn write_bool(&mut self, v: bool) -> IoResult<()> {
        self.write_u8(u8::from(v))
    }

    pub fn write_u16_le(&mut self, v: u16) -> IoResult<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_u32_le(&mut self, v: u32) -> IoResult<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_u64_le(&mut self, v: u64) -> IoResult<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    /// Writes the variable-width unsigned integer prefix:
    /// `<0xFD` one byte, `0xFD` + u16, `0xFE` + u32, `0xFF` + u64.
    pub fn write_var_uint(&mut self, v: u64) -> IoResult<()> {
        if v < 0xfd {
            self.write_u8(v as u8)
        } else if v <= u16::MAX as u64 {
            self.write_u8(0xfd)?;
            self.write_u16_le(v as u16)
        } else if v <= u32::MAX as u64 {
            self.write_u8(0xfe)?;
            self.write_u32_le(v as u32)
        } else {
            self.write_u8(0xff)?;
            self.write_u64_le(v)
        }
    }

    /// Length-prefixed byte string.
    pub fn write_var_bytes(&mut self, data: &[u8]) -> IoResult<()> {
        self.write_var_uint(data.len() as u64)?;
        self.write_bytes(data)
    }

    /// Length-prefixed UTF-8 string.
    pub fn write_string(&mut self, s: &str) -> IoResult<()> {
        self.write_var_bytes(s.as_bytes())
    }

    /// Length-prefixed sequence of encodable values.
    pub fn write_array<T: Encodable>(&mut self, items: &[T]) -> IoResult<()> {
        self.write_var_uint(items.len() as u64)?;
        for item in items {
            item.encode_binary(self)?;
        }
        Ok(())
    }
}

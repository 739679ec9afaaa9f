//! Binary codec shared by the wire protocol and the storage layer.
//!
//! Everything persisted or sent over the network goes through
//! [`BinWriter`]/[`BinReader`]: little-endian primitives and var-uint
//! length prefixes. Types implement [`Encodable`]/[`Decodable`]; nested
//! encoders propagate errors with `?` so only the top-level caller deals
//! with them.

mod reader;
mod writer;

pub use reader::BinReader;
pub use writer::BinWriter;

use thiserror::Error;

/// Codec failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IoError {
    /// Input ended before the expected number of bytes was read.
    #[error("unexpected end of stream: {expected} more bytes needed while reading {context}")]
    EndOfStream { expected: usize, context: &'static str },

    /// The bytes decoded into something structurally invalid.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// A declared length exceeds what the context allows.
    #[error("size {got} exceeds limit {limit} while reading {context}")]
    TooLarge {
        got: u64,
        limit: u64,
        context: &'static str,
    },
}

pub type IoResult<T> = Result<T, IoError>;

/// Writes a value in its canonical binary form.
pub trait Encodable {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()>;
}

/// Reads a value from its canonical binary form.
pub trait Decodable: Sized {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self>;
}

/// Encodes a value into a fresh byte vector.
pub fn to_bytes<T: Encodable>(value: &T) -> IoResult<Vec<u8>> {
    let mut w = BinWriter::new();
    value.encode_binary(&mut w)?;
    Ok(w.into_bytes())
}

/// Decodes a value, requiring the input to be fully consumed.
pub fn from_bytes<T: Decodable>(data: &[u8]) -> IoResult<T> {
    let mut r = BinReader::new(data);
    let value = T::decode_binary(&mut r)?;
    if r.remaining() != 0 {
        return Err(IoError::InvalidFormat(format!(
            "{} trailing bytes after decode",
            r.remaining()
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_uint_widths() {
        let cases: [(u64, usize); 4] = [(0xfc, 1), (0xfd, 3), (0x1_0000, 5), (0x1_0000_0000, 9)];
        for (value, encoded_len) in cases {
            let mut w = BinWriter::new();
            w.write_var_uint(value).unwrap();
            let bytes = w.into_bytes();
            assert_eq!(bytes.len(), encoded_len, "width for {value:#x}");
            let mut r = BinReader::new(&bytes);
            assert_eq!(r.read_var_uint().unwrap(), value);
        }
    }

    #[test]
    fn var_bytes_round_trip() {
        let mut w = BinWriter::new();
        w.write_var_bytes(b"cobalt").unwrap();
        let bytes = w.into_bytes();
        let mut r = BinReader::new(&bytes);
        assert_eq!(r.read_var_bytes().unwrap(), b"cobalt");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn truncated_input_errors() {
        let mut r = BinReader::new(&[0x01]);
        assert!(matches!(
            r.read_u32_le(),
            Err(IoError::EndOfStream { .. })
        ));
    }

    #[test]
    fn from_bytes_rejects_trailing_garbage() {
        #[derive(Debug)]
        struct Byte(u8);
        impl Decodable for Byte {
            fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
                Ok(Byte(r.read_u8()?))
            }
        }
        assert!(from_bytes::<Byte>(&[1, 2]).is_err());
        assert!(from_bytes::<Byte>(&[1]).is_ok());
    }
}

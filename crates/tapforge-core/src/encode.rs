//! Bitcoin consensus encoding.
//!
//! Integers are little-endian; variable-length collections are prefixed with
//! a CompactSize. Decoding goes through a bounds-checked [`Reader`] and
//! rejects non-minimal CompactSize prefixes.

use crate::error::EncodingError;

/// Largest length prefix accepted while decoding (the block weight limit).
pub const MAX_DECODE_LEN: u64 = 4_000_000;

/// Types with a consensus byte encoding.
pub trait Encodable {
    fn consensus_encode(&self, out: &mut Vec<u8>);
}

/// Types decodable from their consensus byte encoding.
pub trait Decodable: Sized {
    fn consensus_decode(reader: &mut Reader<'_>) -> Result<Self, EncodingError>;
}

/// Serialize a value to a fresh byte vector.
pub fn serialize<T: Encodable + ?Sized>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.consensus_encode(&mut out);
    out
}

/// Deserialize a value, requiring that every byte is consumed.
pub fn deserialize<T: Decodable>(data: &[u8]) -> Result<T, EncodingError> {
    let mut reader = Reader::new(data);
    let value = T::consensus_decode(&mut reader)?;
    reader.finish()?;
    Ok(value)
}

/// Append a CompactSize length prefix.
pub fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

/// Encoded size of a CompactSize prefix for `n`.
pub fn compact_size_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Append `data` prefixed with its CompactSize length.
pub fn write_var_bytes(out: &mut Vec<u8>, data: &[u8]) {
    write_compact_size(out, data.len() as u64);
    out.extend_from_slice(data);
}

/// Bounds-checked cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> Result<u8, EncodingError> {
        self.data.get(self.pos).copied().ok_or(EncodingError::UnexpectedEof)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], EncodingError> {
        if self.remaining() < n {
            return Err(EncodingError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], EncodingError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.read_bytes(N)?);
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8, EncodingError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16, EncodingError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, EncodingError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32, EncodingError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, EncodingError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Read a CompactSize, rejecting non-minimal encodings.
    pub fn read_compact_size(&mut self) -> Result<u64, EncodingError> {
        let n = match self.read_u8()? {
            0xff => {
                let v = self.read_u64_le()?;
                if v < 0x1_0000_0000 {
                    return Err(EncodingError::NonMinimalVarInt);
                }
                v
            }
            0xfe => {
                let v = self.read_u32_le()? as u64;
                if v < 0x1_0000 {
                    return Err(EncodingError::NonMinimalVarInt);
                }
                v
            }
            0xfd => {
                let v = self.read_u16_le()? as u64;
                if v < 0xfd {
                    return Err(EncodingError::NonMinimalVarInt);
                }
                v
            }
            b => b as u64,
        };
        Ok(n)
    }

    /// Read a CompactSize used as a length or count, bounded by [`MAX_DECODE_LEN`].
    pub fn read_length(&mut self) -> Result<usize, EncodingError> {
        let n = self.read_compact_size()?;
        if n > MAX_DECODE_LEN {
            return Err(EncodingError::OversizedLength(n));
        }
        Ok(n as usize)
    }

    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, EncodingError> {
        let len = self.read_length()?;
        Ok(self.read_bytes(len)?.to_vec())
    }

    /// Fail if any bytes remain unread.
    pub fn finish(&self) -> Result<(), EncodingError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(EncodingError::TrailingBytes(n)),
        }
    }
}

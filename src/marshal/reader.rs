/*!
  A cursor over the input buffer. Offsets are absolute positions in the buffer, so errors can
  point at the exact byte of the file where decoding stopped.
*/

use crate::error::Corruption;

#[derive(Clone, Debug)]
pub struct Reader<'a> {
  bytes: &'a [u8],
  offset: usize,
}

impl<'a> Reader<'a> {
  pub fn new(bytes: &'a [u8]) -> Self {
    Reader { bytes, offset: 0 }
  }

  /// A reader positioned at `offset`. Positions past the end are clamped.
  pub fn at(bytes: &'a [u8], offset: usize) -> Self {
    Reader { bytes, offset: offset.min(bytes.len()) }
  }

  pub fn offset(&self) -> usize {
    self.offset
  }

  pub fn remaining(&self) -> usize {
    self.bytes.len() - self.offset
  }

  pub fn take(&mut self, len: usize) -> Result<&'a [u8], Corruption> {
    let eof = Corruption::UnexpectedEof { wanted: len, available: self.remaining() };
    let end = self.offset.checked_add(len).ok_or_else(|| eof.clone())?;
    let slice = self.bytes.get(self.offset..end).ok_or(eof)?;
    self.offset = end;
    Ok(slice)
  }

  /// A count prefix that must not be negative.
  pub fn read_length(&mut self) -> Result<usize, Corruption> {
    let length = self.read_i32()?;
    match length < 0 {
      true => Err(Corruption::NegativeLength(length)),
      false => Ok(length as usize)
    }
  }

  pub fn peek(&self) -> Option<u8> {
    self.bytes.get(self.offset).copied()
  }

  pub fn read_u8(&mut self) -> Result<u8, Corruption> {
    Ok(self.take(1)?[0])
  }

  pub fn read_u16(&mut self) -> Result<u16, Corruption> {
    let b = self.take(2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
  }

  pub fn read_i32(&mut self) -> Result<i32, Corruption> {
    let b = self.take(4)?;
    Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
  }

  pub fn read_u32(&mut self) -> Result<u32, Corruption> {
    let b = self.take(4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
  }

  pub fn read_i64(&mut self) -> Result<i64, Corruption> {
    Ok(self.read_u64()? as i64)
  }

  pub fn read_u64(&mut self) -> Result<u64, Corruption> {
    let b = self.take(8)?;
    Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
  }

  pub fn read_f64(&mut self) -> Result<f64, Corruption> {
    Ok(f64::from_bits(self.read_u64()?))
  }
}

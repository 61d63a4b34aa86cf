/*!
  Line number tables. Each release family packs the mapping from instruction offsets to source
  lines differently; all of them decode to the same list of `LineStart`s, the offsets at which a
  new source line begins.
*/

use crate::error::Corruption;
use crate::marshal::Reader;
use crate::registry::LineFormat;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct LineStart {
  pub offset: usize,
  pub line: u32,
}

/// Collects starts, skipping repeats of the previous line and lines that are not representable.
struct Starts {
  starts: Vec<LineStart>,
  last: Option<i64>,
}

impl Starts {
  fn new() -> Starts {
    Starts { starts: Vec::new(), last: None }
  }

  fn push(&mut self, offset: usize, line: i64) {
    if self.last == Some(line) {
      return;
    }
    self.last = Some(line);
    if line >= 0 && line <= u32::max_value() as i64 {
      self.starts.push(LineStart { offset, line: line as u32 });
    }
  }
}

pub fn decode(format: LineFormat, table: &[u8], first_line: u32) -> Result<Vec<LineStart>, Corruption> {
  match format {
    LineFormat::Lnotab => lnotab(table, first_line, false),
    LineFormat::LnotabSigned => lnotab(table, first_line, true),
    LineFormat::LineTable => linetable(table, first_line),
    LineFormat::Locations => locations(table, first_line),
  }
}

/// `(byte increment, line increment)` pairs.
fn lnotab(table: &[u8], first_line: u32, signed: bool) -> Result<Vec<LineStart>, Corruption> {
  if table.len() % 2 != 0 {
    return Err(Corruption::LineTable);
  }

  let mut starts = Starts::new();
  let mut line = first_line as i64;
  let mut offset = 0usize;

  for pair in table.chunks(2) {
    let (byte_increment, line_increment) = (pair[0], pair[1]);
    if byte_increment != 0 {
      starts.push(offset, line);
      offset += byte_increment as usize;
    }
    line += match signed {
      true => line_increment as i8 as i64,
      false => line_increment as i64
    };
  }
  starts.push(offset, line);

  Ok(starts.starts)
}

/// `(byte delta, signed line delta)` pairs. A line delta of -128 marks bytes with no line.
fn linetable(table: &[u8], first_line: u32) -> Result<Vec<LineStart>, Corruption> {
  if table.len() % 2 != 0 {
    return Err(Corruption::LineTable);
  }

  let mut starts = Starts::new();
  let mut line = first_line as i64;
  let mut offset = 0usize;

  for pair in table.chunks(2) {
    let (byte_delta, line_delta) = (pair[0] as usize, pair[1] as i8);
    let start = offset;
    offset += byte_delta;

    if line_delta == -128 {
      continue;
    }
    line += line_delta as i64;
    if start < offset {
      starts.push(start, line);
    }
  }

  Ok(starts.starts)
}

fn varint(reader: &mut Reader) -> Result<u64, Corruption> {
  let mut byte = reader.read_u8().map_err(|_| Corruption::LineTable)?;
  let mut value = (byte & 63) as u64;
  let mut shift = 0;
  while byte & 64 != 0 {
    byte = reader.read_u8().map_err(|_| Corruption::LineTable)?;
    shift += 6;
    if shift >= 64 {
      return Err(Corruption::LineTable);
    }
    value |= ((byte & 63) as u64) << shift;
  }
  Ok(value)
}

fn signed_varint(reader: &mut Reader) -> Result<i64, Corruption> {
  let value = varint(reader)?;
  match value & 1 {
    1 => Ok(-((value >> 1) as i64)),
    _ => Ok((value >> 1) as i64)
  }
}

/**
  The location table. Each entry starts with a byte `1cccclll`: `lll + 1` is the number of code
  units covered, `cccc` selects the entry form.

  | code   | form                                                       |
  |--------|------------------------------------------------------------|
  | 15     | no location                                                |
  | 14     | signed varint line delta, then end line, column, end column |
  | 13     | signed varint line delta only                              |
  | 10..12 | line delta `code - 10`, then two column bytes               |
  | 0..9   | same line, one column byte                                 |
*/
fn locations(table: &[u8], first_line: u32) -> Result<Vec<LineStart>, Corruption> {
  let mut reader = Reader::new(table);
  let mut starts = Starts::new();
  let mut line = first_line as i64;
  let mut offset = 0usize;

  while reader.remaining() > 0 {
    let first = reader.read_u8().map_err(|_| Corruption::LineTable)?;
    if first & 0x80 == 0 {
      return Err(Corruption::LineTable);
    }
    let code = (first >> 3) & 15;
    let start = offset;
    offset += 2 * ((first & 7) as usize + 1);

    let has_line = match code {
      15 => false,
      14 => {
        line += signed_varint(&mut reader)?;
        for _ in 0..3 {
          varint(&mut reader)?;
        }
        true
      }
      13 => {
        line += signed_varint(&mut reader)?;
        true
      }
      10..=12 => {
        line += (code - 10) as i64;
        reader.take(2).map_err(|_| Corruption::LineTable)?;
        true
      }
      _ => {
        reader.take(1).map_err(|_| Corruption::LineTable)?;
        true
      }
    };

    if has_line {
      starts.push(start, line);
    }
  }

  Ok(starts.starts)
}

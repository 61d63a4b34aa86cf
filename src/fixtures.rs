/*!
  Test-only builders for compiled module images: a marshal writer, a code object builder that
  follows a dialect's layout, and a header writer.
*/

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::marshal::{RawUnit, Value};
use crate::registry::{magic_bytes, Dialect, HeaderLayout, StringFlavor, UnitField};

pub const MTIME: u32 = 1_600_000_000;
pub const SOURCE_SIZE: u32 = 22;

/// Encodes `value` the way a writer of the given marshal version would, without references.
pub fn marshal(value: &Value, version: u8) -> Vec<u8> {
  let mut out = Vec::new();
  write_value(&mut out, value, version);
  out
}

fn write_i32(out: &mut Vec<u8>, value: i32) {
  out.extend_from_slice(&value.to_le_bytes());
}

fn write_sized(out: &mut Vec<u8>, tag: u8, bytes: &[u8]) {
  out.push(tag);
  write_i32(out, bytes.len() as i32);
  out.extend_from_slice(bytes);
}

fn write_items(out: &mut Vec<u8>, tag: u8, items: &[Value], version: u8) {
  out.push(tag);
  write_i32(out, items.len() as i32);
  for item in items {
    write_value(out, item, version);
  }
}

fn write_value(out: &mut Vec<u8>, value: &Value, version: u8) {
  match value {
    Value::None => out.push(b'N'),
    Value::Bool(true) => out.push(b'T'),
    Value::Bool(false) => out.push(b'F'),
    Value::StopIteration => out.push(b'S'),
    Value::Ellipsis => out.push(b'.'),
    Value::Int(value) if *value >= i32::min_value() as i64 && *value <= i32::max_value() as i64 => {
      out.push(b'i');
      write_i32(out, *value as i32);
    }
    Value::Int(value) => {
      out.push(b'I');
      out.extend_from_slice(&value.to_le_bytes());
    }
    Value::Long(value) => write_long(out, value),
    Value::Float(value) => {
      out.push(b'g');
      out.extend_from_slice(&value.to_bits().to_le_bytes());
    }
    Value::Complex(real, imag) => {
      out.push(b'y');
      out.extend_from_slice(&real.to_bits().to_le_bytes());
      out.extend_from_slice(&imag.to_bits().to_le_bytes());
    }
    Value::Bytes(bytes) => write_sized(out, b's', bytes),
    Value::Str(text) if version >= 4 && text.is_ascii() && text.len() < 256 => {
      out.push(b'z');
      out.push(text.len() as u8);
      out.extend_from_slice(text.as_bytes());
    }
    Value::Str(text) => write_sized(out, b'u', text.as_bytes()),
    Value::Tuple(items) if version >= 4 && items.len() < 256 => {
      out.push(b')');
      out.push(items.len() as u8);
      for item in items {
        write_value(out, item, version);
      }
    }
    Value::Tuple(items) => write_items(out, b'(', items, version),
    Value::List(items) => write_items(out, b'[', items, version),
    Value::Set(items) => write_items(out, b'<', items, version),
    Value::FrozenSet(items) => write_items(out, b'>', items, version),
    Value::Dict(pairs) => {
      out.push(b'{');
      for (key, value) in pairs {
        write_value(out, key, version);
        write_value(out, value, version);
      }
      out.push(b'0');
    }
    Value::Code(unit) => {
      out.push(b'c');
      for (field, value) in unit.fields.iter() {
        match field.is_integer() {
          true => write_i32(out, value.as_int().unwrap_or(0) as i32),
          false => write_value(out, value, version)
        }
      }
    }
  }
}

/// 15 bit digits, least significant first, with the sign on the digit count.
fn write_long(out: &mut Vec<u8>, value: &BigInt) {
  let mut magnitude = value.abs();
  let mask = BigInt::from(0x7FFF);
  let mut digits: Vec<u16> = Vec::new();
  while !magnitude.is_zero() {
    digits.push((&magnitude & &mask).to_u16().unwrap_or(0));
    magnitude = magnitude >> 15usize;
  }
  out.push(b'l');
  let count = digits.len() as i32;
  write_i32(out, if value.is_negative() { -count } else { count });
  for digit in digits {
    out.extend_from_slice(&digit.to_le_bytes());
  }
}

/// The parts of a code object a test cares about. Everything else gets a plausible default.
#[derive(Clone, Debug)]
pub struct UnitParts {
  pub name: &'static str,
  pub filename: &'static str,
  pub argcount: u32,
  pub flags: u32,
  pub firstlineno: u32,
  pub code: Vec<u8>,
  pub consts: Vec<Value>,
  pub names: Vec<&'static str>,
  pub varnames: Vec<&'static str>,
  pub cellvars: Vec<&'static str>,
  pub freevars: Vec<&'static str>,
  pub lines: Vec<u8>,
}

impl UnitParts {
  pub fn new(name: &'static str, code: Vec<u8>) -> UnitParts {
    UnitParts {
      name,
      filename: "hello.py",
      argcount: 0,
      flags: 0x40,
      firstlineno: 1,
      code,
      consts: vec![],
      names: vec![],
      varnames: vec![],
      cellvars: vec![],
      freevars: vec![],
      lines: vec![],
    }
  }
}

fn string(dialect: &Dialect, text: &str) -> Value {
  match dialect.strings {
    StringFlavor::Bytes => Value::Bytes(text.as_bytes().to_vec()),
    StringFlavor::Text => Value::Str(text.to_string())
  }
}

fn strings(dialect: &Dialect, texts: &[&str]) -> Value {
  Value::Tuple(texts.iter().map(|text| string(dialect, text)).collect())
}

/// A `Value::Code` with the fields of `dialect`'s layout, in layout order.
pub fn unit(dialect: &Dialect, parts: UnitParts) -> Value {
  let plus_names: Vec<&str> =
    parts.varnames.iter().chain(parts.cellvars.iter()).chain(parts.freevars.iter()).copied().collect();
  let plus_kinds: Vec<u8> = parts.varnames.iter().map(|_| 0x20)
    .chain(parts.cellvars.iter().map(|_| 0x40))
    .chain(parts.freevars.iter().map(|_| 0x80))
    .collect();

  let fields = dialect.layout.iter().map(|field| {
    let value = match field {
      UnitField::ArgCount => Value::Int(parts.argcount as i64),
      UnitField::PosOnlyArgCount | UnitField::KwOnlyArgCount => Value::Int(0),
      UnitField::NLocals => Value::Int(parts.varnames.len() as i64),
      UnitField::StackSize => Value::Int(2),
      UnitField::Flags => Value::Int(parts.flags as i64),
      UnitField::Code => Value::Bytes(parts.code.clone()),
      UnitField::Consts => Value::Tuple(parts.consts.clone()),
      UnitField::Names => strings(dialect, &parts.names),
      UnitField::VarNames => strings(dialect, &parts.varnames),
      UnitField::FreeVars => strings(dialect, &parts.freevars),
      UnitField::CellVars => strings(dialect, &parts.cellvars),
      UnitField::LocalsPlusNames => strings(dialect, &plus_names),
      UnitField::LocalsPlusKinds => Value::Bytes(plus_kinds.clone()),
      UnitField::FileName => string(dialect, parts.filename),
      UnitField::Name | UnitField::QualName => string(dialect, parts.name),
      UnitField::FirstLineNo => Value::Int(parts.firstlineno as i64),
      UnitField::LineTable => Value::Bytes(parts.lines.clone()),
      UnitField::ExceptionTable => Value::Bytes(vec![]),
    };
    (*field, value)
  }).collect();

  Value::Code(Box::new(RawUnit { offset: 0, fields }))
}

/// The header of a compiled module for the 16 bit magic `number`.
pub fn header(number: u16, dialect: &Dialect, flags: u32) -> Vec<u8> {
  let mut out = magic_bytes(number).to_vec();
  match dialect.header {
    HeaderLayout::Classic => out.extend_from_slice(&MTIME.to_le_bytes()),
    HeaderLayout::Sized => {
      out.extend_from_slice(&MTIME.to_le_bytes());
      out.extend_from_slice(&SOURCE_SIZE.to_le_bytes());
    }
    HeaderLayout::Flagged => {
      out.extend_from_slice(&flags.to_le_bytes());
      out.extend_from_slice(&MTIME.to_le_bytes());
      out.extend_from_slice(&SOURCE_SIZE.to_le_bytes());
    }
  }
  out
}

/// A complete compiled module image with a timestamp header.
pub fn pyc(number: u16, dialect: &Dialect, body: &Value) -> Vec<u8> {
  let mut out = header(number, dialect, 0);
  out.extend(marshal(body, dialect.marshal_version));
  out
}

// region Images written by CPython

/// `print('Hello, World')` compiled by CPython 2.7.18.
pub const HELLO_27: &[u8] = &[
  0x03, 0xf3, 0x0d, 0x0a, 0x3b, 0x04, 0xd5, 0x6a, 0x63, 0x00, 0x00, 0x00,
  0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00,
  0x00, 0x73, 0x09, 0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x47, 0x48, 0x64,
  0x01, 0x00, 0x53, 0x28, 0x02, 0x00, 0x00, 0x00, 0x73, 0x0c, 0x00, 0x00,
  0x00, 0x48, 0x65, 0x6c, 0x6c, 0x6f, 0x2c, 0x20, 0x57, 0x6f, 0x72, 0x6c,
  0x64, 0x4e, 0x28, 0x00, 0x00, 0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x00,
  0x28, 0x00, 0x00, 0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x00, 0x73, 0x08,
  0x00, 0x00, 0x00, 0x68, 0x65, 0x6c, 0x6c, 0x6f, 0x2e, 0x70, 0x79, 0x74,
  0x08, 0x00, 0x00, 0x00, 0x3c, 0x6d, 0x6f, 0x64, 0x75, 0x6c, 0x65, 0x3e,
  0x01, 0x00, 0x00, 0x00, 0x74, 0x00, 0x00, 0x00, 0x00,
];

/// `print('Hello, World')` compiled by CPython 3.8.18.
pub const HELLO_38: &[u8] = &[
  0x55, 0x0d, 0x0d, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x3b, 0x04, 0xd5, 0x6a,
  0x16, 0x00, 0x00, 0x00, 0xe3, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
  0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00,
  0x00, 0x40, 0x00, 0x00, 0x00, 0x73, 0x0c, 0x00, 0x00, 0x00, 0x65, 0x00,
  0x64, 0x00, 0x83, 0x01, 0x01, 0x00, 0x64, 0x01, 0x53, 0x00, 0x29, 0x02,
  0x7a, 0x0c, 0x48, 0x65, 0x6c, 0x6c, 0x6f, 0x2c, 0x20, 0x57, 0x6f, 0x72,
  0x6c, 0x64, 0x4e, 0x29, 0x01, 0xda, 0x05, 0x70, 0x72, 0x69, 0x6e, 0x74,
  0xa9, 0x00, 0x72, 0x02, 0x00, 0x00, 0x00, 0x72, 0x02, 0x00, 0x00, 0x00,
  0xfa, 0x08, 0x68, 0x65, 0x6c, 0x6c, 0x6f, 0x2e, 0x70, 0x79, 0xda, 0x08,
  0x3c, 0x6d, 0x6f, 0x64, 0x75, 0x6c, 0x65, 0x3e, 0x01, 0x00, 0x00, 0x00,
  0xf3, 0x00, 0x00, 0x00, 0x00,
];

/// A module defining `greet(name)`, compiled by CPython 2.7.18. Names are shared through the
/// intern table.
pub const GREET_27: &[u8] = &[
  0x03, 0xf3, 0x0d, 0x0a, 0x44, 0x04, 0xd5, 0x6a, 0x63, 0x00, 0x00, 0x00,
  0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00,
  0x00, 0x73, 0x0d, 0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x84, 0x00, 0x00,
  0x5a, 0x00, 0x00, 0x64, 0x01, 0x00, 0x53, 0x28, 0x02, 0x00, 0x00, 0x00,
  0x63, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00,
  0x00, 0x43, 0x00, 0x00, 0x00, 0x73, 0x08, 0x00, 0x00, 0x00, 0x64, 0x01,
  0x00, 0x7c, 0x00, 0x00, 0x17, 0x53, 0x28, 0x02, 0x00, 0x00, 0x00, 0x4e,
  0x73, 0x07, 0x00, 0x00, 0x00, 0x48, 0x65, 0x6c, 0x6c, 0x6f, 0x2c, 0x20,
  0x28, 0x00, 0x00, 0x00, 0x00, 0x28, 0x01, 0x00, 0x00, 0x00, 0x74, 0x04,
  0x00, 0x00, 0x00, 0x6e, 0x61, 0x6d, 0x65, 0x28, 0x00, 0x00, 0x00, 0x00,
  0x28, 0x00, 0x00, 0x00, 0x00, 0x73, 0x08, 0x00, 0x00, 0x00, 0x67, 0x72,
  0x65, 0x65, 0x74, 0x2e, 0x70, 0x79, 0x74, 0x05, 0x00, 0x00, 0x00, 0x67,
  0x72, 0x65, 0x65, 0x74, 0x01, 0x00, 0x00, 0x00, 0x73, 0x02, 0x00, 0x00,
  0x00, 0x00, 0x01, 0x4e, 0x28, 0x01, 0x00, 0x00, 0x00, 0x52, 0x01, 0x00,
  0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x00,
  0x28, 0x00, 0x00, 0x00, 0x00, 0x73, 0x08, 0x00, 0x00, 0x00, 0x67, 0x72,
  0x65, 0x65, 0x74, 0x2e, 0x70, 0x79, 0x74, 0x08, 0x00, 0x00, 0x00, 0x3c,
  0x6d, 0x6f, 0x64, 0x75, 0x6c, 0x65, 0x3e, 0x01, 0x00, 0x00, 0x00, 0x74,
  0x00, 0x00, 0x00, 0x00,
];

/// The same module compiled by CPython 3.8.18. Names are shared through flagged references.
pub const GREET_38: &[u8] = &[
  0x55, 0x0d, 0x0d, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x44, 0x04, 0xd5, 0x6a,
  0x2d, 0x00, 0x00, 0x00, 0xe3, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
  0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00,
  0x00, 0x40, 0x00, 0x00, 0x00, 0x73, 0x0c, 0x00, 0x00, 0x00, 0x64, 0x00,
  0x64, 0x01, 0x84, 0x00, 0x5a, 0x00, 0x64, 0x02, 0x53, 0x00, 0x29, 0x03,
  0x63, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
  0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x43, 0x00, 0x00,
  0x00, 0x73, 0x08, 0x00, 0x00, 0x00, 0x64, 0x01, 0x7c, 0x00, 0x17, 0x00,
  0x53, 0x00, 0x29, 0x02, 0x4e, 0x7a, 0x07, 0x48, 0x65, 0x6c, 0x6c, 0x6f,
  0x2c, 0x20, 0xa9, 0x00, 0x29, 0x01, 0xda, 0x04, 0x6e, 0x61, 0x6d, 0x65,
  0x72, 0x01, 0x00, 0x00, 0x00, 0x72, 0x01, 0x00, 0x00, 0x00, 0xfa, 0x08,
  0x67, 0x72, 0x65, 0x65, 0x74, 0x2e, 0x70, 0x79, 0xda, 0x05, 0x67, 0x72,
  0x65, 0x65, 0x74, 0x01, 0x00, 0x00, 0x00, 0x73, 0x02, 0x00, 0x00, 0x00,
  0x00, 0x01, 0x72, 0x04, 0x00, 0x00, 0x00, 0x4e, 0x29, 0x01, 0x72, 0x04,
  0x00, 0x00, 0x00, 0x72, 0x01, 0x00, 0x00, 0x00, 0x72, 0x01, 0x00, 0x00,
  0x00, 0x72, 0x01, 0x00, 0x00, 0x00, 0x72, 0x03, 0x00, 0x00, 0x00, 0xda,
  0x08, 0x3c, 0x6d, 0x6f, 0x64, 0x75, 0x6c, 0x65, 0x3e, 0x01, 0x00, 0x00,
  0x00, 0xf3, 0x00, 0x00, 0x00, 0x00,
];

// endregion

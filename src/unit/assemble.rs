use std::convert::TryFrom;

use string_cache::DefaultAtom;

use super::{lines, CodeFlags, CodeObject, Constant, KIND_CELL, KIND_FREE, KIND_LOCAL};
use crate::bytecode::{Argument, BytecodeError, Instruction, InstructionDecoder, Operand, Pool, RawInstruction};
use crate::error::{Corruption, Error, Result};
use crate::marshal::{RawUnit, Value};
use crate::registry::{Dialect, LocalsLayout, UnitField, REQUIRED_FIELDS};

/// Builds `CodeObject`s from raw units of one release.
pub struct Assembler<'d> {
  dialect: &'d Dialect,
  release: DefaultAtom,
}

/// The tables instruction operands are resolved against, built once per unit.
struct Pools<'u> {
  consts: &'u [Constant],
  names: Vec<&'u str>,
  locals: Vec<&'u str>,
  free: Vec<&'u str>,
  compare: Vec<&'u str>,
  binary: Vec<&'u str>,
}

/// A unit whose constant pool is still being filled.
struct Frame<'u> {
  unit: &'u RawUnit,
  items: &'u [Value],
  consts: Vec<Constant>,
}

impl<'d> Assembler<'d> {
  pub fn new(dialect: &'d Dialect, release: DefaultAtom) -> Self {
    Assembler { dialect, release }
  }

  fn corrupt(&self, unit: &RawUnit, reason: Corruption) -> Error {
    Error::corrupt(unit.offset, &self.release, reason)
  }

  // region Field extraction

  fn integer(&self, unit: &RawUnit, field: UnitField) -> Result<u32> {
    match unit.field(field) {
      None => Ok(0),
      Some(Value::Int(value)) => {
        u32::try_from(*value).map_err(|_| self.corrupt(unit, Corruption::FieldRange { field, value: *value }))
      }
      Some(_) => Err(self.corrupt(unit, Corruption::FieldType { field, expected: "an integer" }))
    }
  }

  fn text(&self, unit: &RawUnit, field: UnitField) -> Result<Option<String>> {
    match unit.field(field) {
      None => Ok(None),
      Some(value) => {
        value
          .as_text()
          .map(|text| Some(text.to_string()))
          .ok_or_else(|| self.corrupt(unit, Corruption::FieldType { field, expected: "a string" }))
      }
    }
  }

  fn bytes(&self, unit: &RawUnit, field: UnitField) -> Result<Vec<u8>> {
    match unit.field(field) {
      None => Ok(Vec::new()),
      Some(value) => {
        value
          .as_bytes()
          .map(|bytes| bytes.to_vec())
          .ok_or_else(|| self.corrupt(unit, Corruption::FieldType { field, expected: "a byte string" }))
      }
    }
  }

  fn names(&self, unit: &RawUnit, field: UnitField) -> Result<Vec<String>> {
    let expected = Corruption::FieldType { field, expected: "a tuple of strings" };
    match unit.field(field) {
      None => Ok(Vec::new()),
      Some(value) => {
        let items = value.as_sequence().ok_or_else(|| self.corrupt(unit, expected.clone()))?;
        items
          .iter()
          .map(|item| item.as_text().map(String::from).ok_or_else(|| self.corrupt(unit, expected.clone())))
          .collect()
      }
    }
  }

  fn frame<'u>(&self, unit: &'u RawUnit) -> Result<Frame<'u>> {
    for field in REQUIRED_FIELDS.iter() {
      if unit.field(*field).is_none() {
        return Err(self.corrupt(unit, Corruption::MissingField(*field)));
      }
    }

    let expected = Corruption::FieldType { field: UnitField::Consts, expected: "a tuple" };
    let items = unit
      .field(UnitField::Consts)
      .and_then(Value::as_sequence)
      .ok_or_else(|| self.corrupt(unit, expected))?;
    Ok(Frame { unit, items, consts: Vec::with_capacity(items.len()) })
  }

  // endregion

  /**
    Assembles `unit` and every unit nested in its constant pool. Nested units wait on an
    explicit stack while their own constants are assembled, so deep nesting costs heap rather
    than call stack.
  */
  pub fn build(&self, unit: &RawUnit) -> Result<CodeObject> {
    let mut root = self.frame(unit)?;
    let mut nested: Vec<Frame> = Vec::new();
    loop {
      let top = nested.last_mut().unwrap_or(&mut root);
      let items = top.items;
      match items.get(top.consts.len()) {
        Some(Value::Code(raw)) => {
          let frame = self.frame(raw)?;
          nested.push(frame);
        }
        Some(value) => top.consts.push(Constant::Value(value.clone())),
        None => match nested.pop() {
          Some(frame) => {
            let child = self.assemble(frame.unit, frame.consts)?;
            let parent = nested.last_mut().unwrap_or(&mut root);
            parent.consts.push(Constant::Code(Box::new(child)));
          }
          None => return self.assemble(root.unit, root.consts)
        }
      }
    }
  }

  /// Assembles one unit whose constant pool is complete.
  fn assemble(&self, unit: &RawUnit, consts: Vec<Constant>) -> Result<CodeObject> {
    let name = self.text(unit, UnitField::Name)?.unwrap_or_default();
    let qualname = self.text(unit, UnitField::QualName)?.unwrap_or_else(|| name.clone());
    let filename = self.text(unit, UnitField::FileName)?.unwrap_or_default();
    let firstlineno = self.integer(unit, UnitField::FirstLineNo)?;
    let code = self.bytes(unit, UnitField::Code)?;
    let names = self.names(unit, UnitField::Names)?;

    let mut varnames = self.names(unit, UnitField::VarNames)?;
    let mut freevars = self.names(unit, UnitField::FreeVars)?;
    let mut cellvars = self.names(unit, UnitField::CellVars)?;
    let mut nlocals = self.integer(unit, UnitField::NLocals)?;
    let mut localsplus = Vec::new();

    if self.dialect.locals == LocalsLayout::LocalsPlus {
      let plus_names = self.names(unit, UnitField::LocalsPlusNames)?;
      let kinds = self.bytes(unit, UnitField::LocalsPlusKinds)?;
      if kinds.len() != plus_names.len() {
        return Err(self.corrupt(unit, Corruption::FieldType {
          field: UnitField::LocalsPlusKinds,
          expected: "one kind byte per name"
        }));
      }
      for (plus_name, kind) in plus_names.into_iter().zip(kinds.into_iter()) {
        if kind & KIND_LOCAL != 0 {
          varnames.push(plus_name.clone());
        }
        if kind & KIND_CELL != 0 {
          cellvars.push(plus_name.clone());
        }
        if kind & KIND_FREE != 0 {
          freevars.push(plus_name.clone());
        }
        localsplus.push((plus_name, kind));
      }
      nlocals = varnames.len() as u32;
    }

    let pools = Pools {
      consts: &consts,
      names: names.iter().map(String::as_str).collect(),
      locals: match self.dialect.locals {
        LocalsLayout::VarNames => varnames.iter().map(String::as_str).collect(),
        LocalsLayout::LocalsPlus => localsplus.iter().map(|(name, _)| name.as_str()).collect(),
      },
      free: match self.dialect.locals {
        LocalsLayout::VarNames => cellvars.iter().chain(freevars.iter()).map(String::as_str).collect(),
        LocalsLayout::LocalsPlus => localsplus.iter().map(|(name, _)| name.as_str()).collect(),
      },
      compare: self.dialect.compare_ops.iter().map(String::as_str).collect(),
      binary: self.dialect.binary_ops.iter().map(String::as_str).collect(),
    };

    let raw_instructions = InstructionDecoder::new(self.dialect)
      .decode(&code)
      .map_err(|error| self.bytecode_error(unit, &name, error))?;
    let instructions = raw_instructions
      .iter()
      .map(|raw| self.resolve(raw, &pools, &name))
      .collect::<Result<Vec<Instruction>>>()?;

    let line_table = self.bytes(unit, UnitField::LineTable)?;
    let lines = lines::decode(self.dialect.lines, &line_table, firstlineno)
      .map_err(|reason| self.corrupt(unit, reason))?;

    #[cfg(feature = "trace_decoding")]
    eprintln!(
      "[{}] assembled `{}`: {} instructions, {} constants",
      self.release, name, instructions.len(), consts.len()
    );

    Ok(CodeObject {
      argcount: self.integer(unit, UnitField::ArgCount)?,
      posonlyargcount: self.integer(unit, UnitField::PosOnlyArgCount)?,
      kwonlyargcount: self.integer(unit, UnitField::KwOnlyArgCount)?,
      nlocals,
      stacksize: self.integer(unit, UnitField::StackSize)?,
      flags: CodeFlags(self.integer(unit, UnitField::Flags)?),
      filename,
      name,
      qualname,
      firstlineno,
      consts,
      names,
      varnames,
      freevars,
      cellvars,
      localsplus,
      lines,
      code,
      exception_table: self.bytes(unit, UnitField::ExceptionTable)?,
      instructions,
      strings: self.dialect.strings,
    })
  }

  fn bytecode_error(&self, unit: &RawUnit, name: &str, error: BytecodeError) -> Error {
    match error {
      BytecodeError::UnknownOpcode { opcode, offset } => Error::UnknownOpcode {
        opcode,
        offset,
        unit: name.to_string(),
        release: self.release.clone()
      },
      BytecodeError::Corrupt { reason, .. } => self.corrupt(unit, reason),
    }
  }

  fn resolve(&self, raw: &RawInstruction, pools: &Pools, unit: &str) -> Result<Instruction> {
    let out_of_range = |pool: Pool, index: u32, len: usize| Error::CorruptOperandIndex {
      pool,
      index,
      len,
      offset: raw.offset,
      unit: unit.to_string(),
      release: self.release.clone()
    };
    let pick = |pool: Pool, index: u32, table: &[&str]| -> Result<String> {
      table
        .get(index as usize)
        .map(|name| name.to_string())
        .ok_or_else(|| out_of_range(pool, index, table.len()))
    };

    let argument = match raw.operand {
      Operand::None => Argument::None,
      Operand::Immediate(value) => Argument::Immediate(value),
      Operand::Jump(target) => Argument::Jump(target),

      Operand::Index(Pool::Constants, index) => {
        match pools.consts.get(index as usize) {
          Some(Constant::Value(value)) => Argument::Const(value.clone()),
          Some(Constant::Code(code)) => Argument::Code { index: index as usize, name: code.name.clone() },
          None => return Err(out_of_range(Pool::Constants, index, pools.consts.len()))
        }
      }
      Operand::Index(Pool::Names, index) => Argument::Name(pick(Pool::Names, index, &pools.names)?),
      Operand::Index(Pool::Locals, index) => Argument::Local(pick(Pool::Locals, index, &pools.locals[..])?),
      Operand::Index(Pool::Free, index) => Argument::Free(pick(Pool::Free, index, &pools.free[..])?),
      Operand::Index(Pool::CompareOps, index) => {
        Argument::Compare(pick(Pool::CompareOps, index, &pools.compare)?)
      }
      Operand::Index(Pool::BinaryOps, index) => {
        Argument::BinaryOp(pick(Pool::BinaryOps, index, &pools.binary)?)
      }
    };

    Ok(Instruction {
      offset: raw.offset,
      size: raw.size,
      opname: raw.opname.clone(),
      arg: raw.arg,
      argument
    })
  }
}

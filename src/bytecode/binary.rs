/*!
  Decoding of a unit's raw instruction bytes.

  Two encodings exist. The variable encoding stores one opcode byte, followed by a two byte
  little-endian argument only when the opcode takes one. Wordcode stores every instruction as an
  opcode byte and an argument byte. In both, an argument extension opcode contributes the high
  bits of the next instruction's argument and is not emitted itself; the folded instruction keeps
  its own offset.

  Instructions can be followed by inline cache entries, two bytes each, which are skipped. Jump
  targets are computed relative to the end of the instruction, caches included.
*/

use thiserror::Error;

use super::{Operand, Pool, RawInstruction};
use crate::error::Corruption;
use crate::registry::{Dialect, Encoding, OperandKind};

/// Failures local to one unit's instruction stream. Offsets are relative to the start of the code.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BytecodeError {
  #[error("unknown opcode {opcode:#04x} at offset {offset}")]
  UnknownOpcode { opcode: u8, offset: usize },

  #[error("corrupt instruction stream at offset {offset}: {reason}")]
  Corrupt { offset: usize, reason: Corruption },
}

impl BytecodeError {
  fn corrupt(offset: usize, reason: Corruption) -> BytecodeError {
    BytecodeError::Corrupt { offset, reason }
  }
}

pub struct InstructionDecoder<'d> {
  dialect: &'d Dialect,
}

impl<'d> InstructionDecoder<'d> {
  pub fn new(dialect: &'d Dialect) -> Self {
    InstructionDecoder { dialect }
  }

  pub fn decode(&self, code: &[u8]) -> Result<Vec<RawInstruction>, BytecodeError> {
    let shift = self.dialect.extension_shift();
    let mut instructions = Vec::with_capacity(code.len() / 2);
    let mut offset = 0usize;
    // Accumulated extension bits, and where the pending extension started.
    let mut extension: u32 = 0;
    let mut pending: Option<usize> = None;

    while offset < code.len() {
      let start = offset;
      let opcode = code[start];
      let (opname, info) = self.dialect
                               .opcodes
                               .lookup(opcode)
                               .ok_or(BytecodeError::UnknownOpcode { opcode, offset: start })?;
      let truncated = BytecodeError::corrupt(start, Corruption::TruncatedInstruction(start));

      let (arg, next) = match self.dialect.encoding {
        Encoding::Variable => {
          match info.has_argument() {
            true => {
              let bytes = code.get(start + 1..start + 3).ok_or_else(|| truncated.clone())?;
              (Some(u16::from_le_bytes([bytes[0], bytes[1]]) as u32), start + 3)
            }
            false => (None, start + 1)
          }
        }
        Encoding::Wordcode => {
          let byte = *code.get(start + 1).ok_or_else(|| truncated.clone())?;
          (if info.has_argument() { Some(byte as u32) } else { None }, start + 2)
        }
      };

      let end = next + 2 * info.cache as usize;
      if end > code.len() {
        return Err(truncated);
      }

      if info.kind == Some(OperandKind::Extend) {
        extension = (extension | arg.unwrap_or(0)) << shift;
        pending = pending.or(Some(start));
        offset = end;
        continue;
      }

      let arg = arg.map(|arg| arg | extension);
      extension = 0;
      pending = None;

      let operand = match (info.kind, arg) {
        (Some(kind), Some(arg)) => self.operand(kind, arg >> info.shift, arg, start, end)?,
        _ => Operand::None
      };

      instructions.push(RawInstruction {
        offset: start,
        size: end - start,
        opcode,
        opname: opname.clone(),
        arg,
        operand
      });
      offset = end;
    }

    match pending {
      Some(at) => Err(BytecodeError::corrupt(at, Corruption::DanglingExtension(at))),
      None => Ok(instructions)
    }
  }

  fn operand(&self, kind: OperandKind, index: u32, arg: u32, start: usize, end: usize)
    -> Result<Operand, BytecodeError>
  {
    let distance = arg as usize * self.dialect.jump_unit as usize;
    let operand = match kind {
      OperandKind::Immediate | OperandKind::Extend => Operand::Immediate(arg),
      OperandKind::Const => Operand::Index(Pool::Constants, index),
      OperandKind::Name => Operand::Index(Pool::Names, index),
      OperandKind::Local => Operand::Index(Pool::Locals, index),
      OperandKind::Free => Operand::Index(Pool::Free, index),
      OperandKind::Compare => Operand::Index(Pool::CompareOps, index),
      OperandKind::BinaryOp => Operand::Index(Pool::BinaryOps, index),
      OperandKind::JumpAbsolute => Operand::Jump(distance),
      OperandKind::JumpForward => Operand::Jump(end + distance),
      OperandKind::JumpBackward => {
        let target = end
          .checked_sub(distance)
          .ok_or_else(|| BytecodeError::corrupt(start, Corruption::JumpBeforeStart(start)))?;
        Operand::Jump(target)
      }
    };
    Ok(operand)
  }
}

/*!
  Instruction streams. `InstructionDecoder` turns a unit's raw instruction bytes into
  `RawInstruction`s whose operands are classified (pool index, immediate, absolute jump target)
  but not looked up. The `unit` module resolves them into `Instruction`s.

  Everything release specific, the opcode table, the encoding, the extension shift and the jump
  unit, comes from the `Dialect`.
*/

mod binary;
mod instruction;

pub use binary::{BytecodeError, InstructionDecoder};
pub use instruction::{Argument, Instruction, Operand, Pool, RawInstruction};

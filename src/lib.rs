/*!
  A disassembler for compiled Python modules (`.pyc` files) written by many interpreter releases.

  The pipeline is data driven. A `VersionRegistry` maps the file's magic number to a release and
  its `Dialect`; the marshal decoder reads the serialized body into `Value`s; the assembler turns
  each code object into a `CodeObject` with symbolic, resolved instructions.

  ```no_run
  let module = pycdis::disassemble("hello.pyc")?;
  println!("{}", module);
  # Ok::<(), pycdis::Error>(())
  ```
*/

#[macro_use] extern crate lazy_static;
#[macro_use] extern crate prettytable;

pub mod bytecode;
pub mod cli;
pub mod error;
mod listing;
pub mod marshal;
pub mod module;
pub mod registry;
pub mod unit;

#[cfg(test)]
mod fixtures;

pub use error::{Corruption, Error, Limit, Result};
pub use module::{disassemble, DecodeOptions, Disassembler, Fingerprint, Module};
pub use registry::{Dialect, Release, VersionRegistry};
pub use unit::{CodeObject, Constant};
pub use bytecode::{Argument, Instruction};
pub use marshal::Value;

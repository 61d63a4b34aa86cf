/*!
  The self-describing serialization format compiled modules are stored in. Decoding produces a
  tree of `Value`s; code objects come out as `RawUnit` placeholders holding their raw fields,
  which the `unit` module assembles.
*/

mod decode;
mod reader;
mod tag;
mod value;

pub use decode::{ValueDecoder, DEFAULT_MAX_DEPTH};
pub use reader::Reader;
pub use tag::{Tag, FLAG_REF};
pub use value::{RawUnit, Repr, Value};

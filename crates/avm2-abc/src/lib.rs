//! # AVM2 ABC codec
//!
//! Reads and writes ActionScript Byte Code units, the payload of `DoABC`
//! tags in SWF files.
//!
//! ## Design Principles
//!
//! - **Lossless when untouched**: a decoded unit that is never edited
//!   encodes back to its exact input bytes
//! - **Lazy**: method bodies stay as raw bytes until something asks for
//!   their instructions
//! - **Graph, not indices**: decoded operands hold namespaces, multinames,
//!   methods and classes; every pool is rebuilt from scratch on encode
//! - **Symbolic jumps**: branch operands name their target instruction, so
//!   code can be spliced freely before re-assembly
//!
//! ## Example
//!
//! ```no_run
//! use avm2_abc::{AbcFile, EncodeOptions};
//!
//! # fn main() -> avm2_abc::Result<()> {
//! let bytes = std::fs::read("unit.abc")?;
//! let mut abc = AbcFile::decode(&bytes)?;
//! abc.mark_tampered()?;
//! let rebuilt = abc.encode(&EncodeOptions::default().with_debug_instrumentation(true))?;
//! # let _ = rebuilt;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod abc;
pub mod assembler;
pub mod class;
pub mod constant;
mod disasm;
pub mod error;
pub mod instruction;
pub mod listing;
pub mod marshal;
pub mod method;
pub mod operand;
pub mod packed;
mod reader;
pub mod summary;
pub mod traits;

pub use abc::{AbcFile, MAJOR_VERSION, MINOR_VERSION};
pub use assembler::EncodeOptions;
pub use class::{AdobeClass, As3Class, ClassDef, ClassFlags, Metadata, Script};
pub use constant::{
    ANY_NAME, ConstantPool, Multiname, MultinameKind, Namespace, NamespaceKind, NamespaceSet,
    TypeApplication,
};
pub use error::{AbcError, ErrorKind, Result};
pub use instruction::{Instruction, Opcode};
pub use listing::MethodListing;
pub use marshal::Marshaller;
pub use method::{ExceptionHandler, Method, MethodBody, MethodBuilder, MethodFlags};
pub use operand::{ClassId, CodePosition, InstrId, JumpTarget, MethodId, Operand, OperandKind};
pub use summary::{ClassSummary, UnitSummary};
pub use traits::{DefaultValue, Trait, TraitAttributes, TraitKind};

//! Instruction operands and object handles

use std::fmt;
use std::sync::Arc;

use crate::constant::{Multiname, Namespace};
use crate::error::{AbcError, Result};

/// Handle to a method in an [`AbcFile`](crate::AbcFile)'s method arena
///
/// Handles are stable: re-encoding may change a method's position in the
/// wire table but never its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct MethodId(pub u32);

impl MethodId {
    /// Arena index
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle to a class in an [`AbcFile`](crate::AbcFile)'s class arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ClassId(pub u32);

impl ClassId {
    /// Arena index
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identity of one instruction, unique within its unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct InstrId(pub u32);

/// Jump operand: a raw relative offset before disassembly, a reference to
/// the target instruction after it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JumpTarget {
    /// Relative byte offset as found on the wire
    Offset(i32),
    /// Target instruction
    Instr(InstrId),
}

impl JumpTarget {
    /// Raw offset; fails once the target has been resolved
    pub fn offset(self) -> Result<i32> {
        match self {
            Self::Offset(offset) => Ok(offset),
            Self::Instr(id) => Err(AbcError::invalid_state(format!(
                "jump target already resolved to instruction {}",
                id.0
            ))),
        }
    }

    /// Target instruction; fails while the target is still a raw offset
    pub fn instr(self) -> Result<InstrId> {
        match self {
            Self::Instr(id) => Ok(id),
            Self::Offset(offset) => Err(AbcError::invalid_state(format!(
                "jump target is an unresolved offset ({offset})"
            ))),
        }
    }
}

/// Position inside a method body, used by exception handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodePosition {
    /// Absolute byte offset from the start of the body
    Offset(u32),
    /// Start of an instruction
    Instr(InstrId),
    /// One past the last instruction
    End,
}

impl CodePosition {
    /// Byte offset; fails once the position has been resolved
    pub fn offset(self) -> Result<u32> {
        match self {
            Self::Offset(offset) => Ok(offset),
            other => Err(AbcError::invalid_state(format!(
                "code position already resolved ({other:?})"
            ))),
        }
    }

    /// Instruction; fails for offsets and for the end marker
    pub fn instr(self) -> Result<InstrId> {
        match self {
            Self::Instr(id) => Ok(id),
            other => Err(AbcError::invalid_state(format!(
                "code position does not name an instruction ({other:?})"
            ))),
        }
    }

    /// Check whether the position is still a raw offset
    pub fn is_offset(self) -> bool {
        matches!(self, Self::Offset(_))
    }
}

/// Wire encoding and in-memory type of one operand slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// Unsigned byte literal
    U8,
    /// Signed byte literal
    S8,
    /// Packed unsigned literal (counts, registers, slots)
    U30,
    /// Index into the int table
    Int,
    /// Index into the uint table
    UInt,
    /// Index into the double table
    Double,
    /// Index into the string table
    String,
    /// Index into the namespace table
    Namespace,
    /// Index into the multiname table
    Multiname,
    /// Index into the method table
    Method,
    /// Index into the class table
    Class,
    /// Signed 24-bit relative jump offset
    Offset,
}

impl OperandKind {
    /// Check whether this operand is encoded as a jump offset
    pub fn is_jump(self) -> bool {
        self == Self::Offset
    }

    /// Name used in diagnostics
    pub const fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::S8 => "s8",
            Self::U30 => "u30",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Double => "double",
            Self::String => "string",
            Self::Namespace => "namespace",
            Self::Multiname => "multiname",
            Self::Method => "method",
            Self::Class => "class",
            Self::Offset => "offset",
        }
    }
}

/// A decoded operand value
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Unsigned byte literal
    U8(u8),
    /// Signed byte literal
    S8(i8),
    /// Packed unsigned literal
    U30(u32),
    /// Integer constant
    Int(i32),
    /// Unsigned integer constant
    UInt(u32),
    /// Double constant
    Double(f64),
    /// String constant
    String(Arc<str>),
    /// Namespace reference
    Namespace(Namespace),
    /// Multiname reference
    Multiname(Multiname),
    /// Method reference
    Method(MethodId),
    /// Class reference
    Class(ClassId),
    /// Jump target
    Target(JumpTarget),
}

impl Operand {
    /// Kind this value satisfies
    pub fn kind(&self) -> OperandKind {
        match self {
            Self::U8(_) => OperandKind::U8,
            Self::S8(_) => OperandKind::S8,
            Self::U30(_) => OperandKind::U30,
            Self::Int(_) => OperandKind::Int,
            Self::UInt(_) => OperandKind::UInt,
            Self::Double(_) => OperandKind::Double,
            Self::String(_) => OperandKind::String,
            Self::Namespace(_) => OperandKind::Namespace,
            Self::Multiname(_) => OperandKind::Multiname,
            Self::Method(_) => OperandKind::Method,
            Self::Class(_) => OperandKind::Class,
            Self::Target(_) => OperandKind::Offset,
        }
    }

    /// Build a string operand
    pub fn string(value: impl Into<Arc<str>>) -> Self {
        Self::String(value.into())
    }

    /// Literal value of a `U30` operand
    pub fn as_u30(&self) -> Option<u32> {
        match self {
            Self::U30(value) => Some(*value),
            _ => None,
        }
    }

    /// Jump target of an `Offset` operand
    pub fn as_target(&self) -> Option<JumpTarget> {
        match self {
            Self::Target(target) => Some(*target),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8(v) => write!(f, "{v}"),
            Self::S8(v) => write!(f, "{v}"),
            Self::U30(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}u"),
            Self::Double(v) => write!(f, "{v:?}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Namespace(ns) => write!(f, "{ns}"),
            Self::Multiname(name) => write!(f, "{name}"),
            Self::Method(id) => write!(f, "method#{}", id.0),
            Self::Class(id) => write!(f, "class#{}", id.0),
            Self::Target(JumpTarget::Offset(offset)) => write!(f, "{offset:+}"),
            Self::Target(JumpTarget::Instr(id)) => write!(f, "@{}", id.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_jump_target_states() {
        let raw = JumpTarget::Offset(-8);
        assert_eq!(raw.offset().unwrap(), -8);
        assert_eq!(raw.instr().unwrap_err().kind(), ErrorKind::Construction);

        let resolved = JumpTarget::Instr(InstrId(3));
        assert_eq!(resolved.instr().unwrap(), InstrId(3));
        assert!(matches!(resolved.offset(), Err(AbcError::InvalidState(_))));
    }

    #[test]
    fn test_code_position_states() {
        assert_eq!(CodePosition::Offset(4).offset().unwrap(), 4);
        assert!(CodePosition::End.instr().is_err());
        assert!(CodePosition::End.offset().is_err());
        assert!(CodePosition::Instr(InstrId(1)).offset().is_err());
    }

    #[test]
    fn test_operand_kind() {
        assert_eq!(Operand::U30(1).kind(), OperandKind::U30);
        assert_eq!(Operand::string("x").kind(), OperandKind::String);
        assert_eq!(
            Operand::Target(JumpTarget::Offset(0)).kind(),
            OperandKind::Offset
        );
        assert!(OperandKind::Offset.is_jump());
    }
}

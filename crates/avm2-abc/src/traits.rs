//! Trait declarations
//!
//! A trait is a named member of a class, instance, script or activation.
//! The payload is a closed sum type so every consumer matches exhaustively.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::constant::{Multiname, Namespace};
use crate::operand::{ClassId, MethodId};

/// Constant value of a slot default or an optional parameter
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// Entry of the int table
    Int(i32),
    /// Entry of the uint table
    UInt(u32),
    /// Entry of the double table
    Double(f64),
    /// Entry of the string table
    Utf8(Arc<str>),
    /// `true`
    True,
    /// `false`
    False,
    /// `null`
    Null,
    /// `undefined`
    Undefined,
    /// Entry of the namespace table; the kind byte is the namespace's kind
    Namespace(Namespace),
}

impl DefaultValue {
    pub(crate) const INT: u8 = 0x03;
    pub(crate) const UINT: u8 = 0x04;
    pub(crate) const DOUBLE: u8 = 0x06;
    pub(crate) const UTF8: u8 = 0x01;
    pub(crate) const TRUE: u8 = 0x0B;
    pub(crate) const FALSE: u8 = 0x0A;
    pub(crate) const NULL: u8 = 0x0C;
    pub(crate) const UNDEFINED: u8 = 0x00;

    /// Value kind byte written after the value index
    pub fn kind_byte(&self) -> u8 {
        match self {
            Self::Int(_) => Self::INT,
            Self::UInt(_) => Self::UINT,
            Self::Double(_) => Self::DOUBLE,
            Self::Utf8(_) => Self::UTF8,
            Self::True => Self::TRUE,
            Self::False => Self::FALSE,
            Self::Null => Self::NULL,
            Self::Undefined => Self::UNDEFINED,
            Self::Namespace(ns) => ns.kind().to_byte(),
        }
    }

    /// Index written for kinds that carry no table entry
    ///
    /// The VM ignores it, but it must be non-zero for slot defaults since a
    /// zero index means "no default".
    pub(crate) fn valueless_index(&self) -> Option<u32> {
        match self {
            Self::True | Self::False | Self::Null => Some(u32::from(self.kind_byte())),
            Self::Undefined => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}u"),
            Self::Double(v) => write!(f, "{v:?}"),
            Self::Utf8(s) => write!(f, "{s:?}"),
            Self::True => f.write_str("true"),
            Self::False => f.write_str("false"),
            Self::Null => f.write_str("null"),
            Self::Undefined => f.write_str("undefined"),
            Self::Namespace(ns) => write!(f, "{ns}"),
        }
    }
}

/// Attribute bits stored in the high nibble of the trait kind byte
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TraitAttributes {
    /// Cannot be overridden
    pub is_final: bool,
    /// Overrides a member of the superclass
    pub is_override: bool,
}

impl TraitAttributes {
    const FINAL: u8 = 0x1;
    const OVERRIDE: u8 = 0x2;
    pub(crate) const METADATA: u8 = 0x4;

    pub(crate) fn from_bits(bits: u8) -> Self {
        Self {
            is_final: bits & Self::FINAL != 0,
            is_override: bits & Self::OVERRIDE != 0,
        }
    }

    pub(crate) fn to_bits(self, has_metadata: bool) -> u8 {
        let mut bits = 0;
        if self.is_final {
            bits |= Self::FINAL;
        }
        if self.is_override {
            bits |= Self::OVERRIDE;
        }
        if has_metadata {
            bits |= Self::METADATA;
        }
        bits
    }
}

/// Kind-specific trait payload
#[derive(Debug, Clone, PartialEq)]
pub enum TraitKind {
    /// Variable
    Slot {
        /// Slot position, 0 lets the VM assign one
        slot_id: u32,
        /// Declared type, the any multiname when untyped
        type_name: Multiname,
        /// Initial value
        value: Option<DefaultValue>,
    },
    /// Constant
    Const {
        /// Slot position, 0 lets the VM assign one
        slot_id: u32,
        /// Declared type, the any multiname when untyped
        type_name: Multiname,
        /// Initial value
        value: Option<DefaultValue>,
    },
    /// Method
    Method {
        /// Dispatch id, 0 lets the VM assign one
        disp_id: u32,
        /// Implementation
        method: MethodId,
    },
    /// Getter
    Getter {
        /// Dispatch id, 0 lets the VM assign one
        disp_id: u32,
        /// Implementation
        method: MethodId,
    },
    /// Setter
    Setter {
        /// Dispatch id, 0 lets the VM assign one
        disp_id: u32,
        /// Implementation
        method: MethodId,
    },
    /// Class binding
    Class {
        /// Slot position
        slot_id: u32,
        /// Bound class
        class: ClassId,
    },
    /// Function closure bound to a slot
    Function {
        /// Slot position
        slot_id: u32,
        /// Implementation
        method: MethodId,
    },
}

impl TraitKind {
    pub(crate) const SLOT: u8 = 0;
    pub(crate) const METHOD: u8 = 1;
    pub(crate) const GETTER: u8 = 2;
    pub(crate) const SETTER: u8 = 3;
    pub(crate) const CLASS: u8 = 4;
    pub(crate) const FUNCTION: u8 = 5;
    pub(crate) const CONST: u8 = 6;

    /// Kind tag written in the low nibble of the kind byte
    pub fn tag(&self) -> u8 {
        match self {
            Self::Slot { .. } => Self::SLOT,
            Self::Method { .. } => Self::METHOD,
            Self::Getter { .. } => Self::GETTER,
            Self::Setter { .. } => Self::SETTER,
            Self::Class { .. } => Self::CLASS,
            Self::Function { .. } => Self::FUNCTION,
            Self::Const { .. } => Self::CONST,
        }
    }

    /// Name used in listings
    pub fn name(&self) -> &'static str {
        match self {
            Self::Slot { .. } => "slot",
            Self::Const { .. } => "const",
            Self::Method { .. } => "method",
            Self::Getter { .. } => "getter",
            Self::Setter { .. } => "setter",
            Self::Class { .. } => "class",
            Self::Function { .. } => "function",
        }
    }

    /// Method implementing this trait, if any
    pub fn method(&self) -> Option<MethodId> {
        match self {
            Self::Method { method, .. }
            | Self::Getter { method, .. }
            | Self::Setter { method, .. }
            | Self::Function { method, .. } => Some(*method),
            Self::Slot { .. } | Self::Const { .. } | Self::Class { .. } => None,
        }
    }
}

/// A named member declaration
#[derive(Debug, Clone, PartialEq)]
pub struct Trait {
    /// Member name
    pub name: Multiname,
    /// Payload
    pub kind: TraitKind,
    /// Final/override attributes
    pub attrs: TraitAttributes,
    /// Indices into the unit's metadata table
    pub metadata: Vec<u32>,
}

impl Trait {
    /// Create a trait with no attributes and no metadata
    pub fn new(name: Multiname, kind: TraitKind) -> Self {
        Self {
            name,
            kind,
            attrs: TraitAttributes::default(),
            metadata: Vec::new(),
        }
    }

    /// Untyped variable with no initial value
    pub fn slot(name: Multiname, slot_id: u32) -> Self {
        Self::new(
            name,
            TraitKind::Slot {
                slot_id,
                type_name: Multiname::any(),
                value: None,
            },
        )
    }

    /// Method member
    pub fn method(name: Multiname, method: MethodId) -> Self {
        Self::new(name, TraitKind::Method { disp_id: 0, method })
    }

    /// Class binding
    pub fn class(name: Multiname, slot_id: u32, class: ClassId) -> Self {
        Self::new(name, TraitKind::Class { slot_id, class })
    }
}

//! AVM2 instruction set
//!
//! One table drives the [`Opcode`] enum, byte lookup, mnemonics and the
//! ordered operand kinds of every instruction. Bytes missing from the table
//! are undefined and fail fast. `lookupswitch` is the only instruction with a
//! variable operand list: `default, case_count, case_0 ..= case_{case_count}`.

use crate::error::{AbcError, Result};
use crate::operand::{InstrId, JumpTarget, Operand, OperandKind};

macro_rules! opcodes {
    ($( $variant:ident = $byte:literal, $mnemonic:literal, [$($kind:ident),*]; )*) => {
        /// Instruction bytes with a known operand layout
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $(
                #[doc = $mnemonic]
                $variant = $byte,
            )*
        }

        impl Opcode {
            /// Every defined opcode, in byte order
            pub const ALL: &'static [Opcode] = &[$(Self::$variant),*];

            /// Convert from raw byte
            pub fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $($byte => Some(Self::$variant),)*
                    _ => None,
                }
            }

            /// Assembler mnemonic
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $(Self::$variant => $mnemonic,)*
                }
            }

            /// Fixed operand kinds, in wire order
            ///
            /// For `lookupswitch` this is only the `default, case_count`
            /// prefix; the case offsets follow.
            pub const fn operand_kinds(self) -> &'static [OperandKind] {
                match self {
                    $(Self::$variant => &[$(OperandKind::$kind),*],)*
                }
            }
        }
    };
}

opcodes! {
    Bkpt = 0x01, "bkpt", [];
    Nop = 0x02, "nop", [];
    Throw = 0x03, "throw", [];
    GetSuper = 0x04, "getsuper", [Multiname];
    SetSuper = 0x05, "setsuper", [Multiname];
    Dxns = 0x06, "dxns", [String];
    DxnsLate = 0x07, "dxnslate", [];
    Kill = 0x08, "kill", [U30];
    Label = 0x09, "label", [];
    IfNlt = 0x0C, "ifnlt", [Offset];
    IfNle = 0x0D, "ifnle", [Offset];
    IfNgt = 0x0E, "ifngt", [Offset];
    IfNge = 0x0F, "ifnge", [Offset];
    Jump = 0x10, "jump", [Offset];
    IfTrue = 0x11, "iftrue", [Offset];
    IfFalse = 0x12, "iffalse", [Offset];
    IfEq = 0x13, "ifeq", [Offset];
    IfNe = 0x14, "ifne", [Offset];
    IfLt = 0x15, "iflt", [Offset];
    IfLe = 0x16, "ifle", [Offset];
    IfGt = 0x17, "ifgt", [Offset];
    IfGe = 0x18, "ifge", [Offset];
    IfStrictEq = 0x19, "ifstricteq", [Offset];
    IfStrictNe = 0x1A, "ifstrictne", [Offset];
    LookupSwitch = 0x1B, "lookupswitch", [Offset, U30];
    PushWith = 0x1C, "pushwith", [];
    PopScope = 0x1D, "popscope", [];
    NextName = 0x1E, "nextname", [];
    HasNext = 0x1F, "hasnext", [];
    PushNull = 0x20, "pushnull", [];
    PushUndefined = 0x21, "pushundefined", [];
    NextValue = 0x23, "nextvalue", [];
    PushByte = 0x24, "pushbyte", [S8];
    PushShort = 0x25, "pushshort", [U30];
    PushTrue = 0x26, "pushtrue", [];
    PushFalse = 0x27, "pushfalse", [];
    PushNaN = 0x28, "pushnan", [];
    Pop = 0x29, "pop", [];
    Dup = 0x2A, "dup", [];
    Swap = 0x2B, "swap", [];
    PushString = 0x2C, "pushstring", [String];
    PushInt = 0x2D, "pushint", [Int];
    PushUint = 0x2E, "pushuint", [UInt];
    PushDouble = 0x2F, "pushdouble", [Double];
    PushScope = 0x30, "pushscope", [];
    PushNamespace = 0x31, "pushnamespace", [Namespace];
    HasNext2 = 0x32, "hasnext2", [U30, U30];
    Li8 = 0x35, "li8", [];
    Li16 = 0x36, "li16", [];
    Li32 = 0x37, "li32", [];
    Lf32 = 0x38, "lf32", [];
    Lf64 = 0x39, "lf64", [];
    Si8 = 0x3A, "si8", [];
    Si16 = 0x3B, "si16", [];
    Si32 = 0x3C, "si32", [];
    Sf32 = 0x3D, "sf32", [];
    Sf64 = 0x3E, "sf64", [];
    NewFunction = 0x40, "newfunction", [Method];
    Call = 0x41, "call", [U30];
    Construct = 0x42, "construct", [U30];
    CallMethod = 0x43, "callmethod", [U30, U30];
    CallStatic = 0x44, "callstatic", [Method, U30];
    CallSuper = 0x45, "callsuper", [Multiname, U30];
    CallProperty = 0x46, "callproperty", [Multiname, U30];
    ReturnVoid = 0x47, "returnvoid", [];
    ReturnValue = 0x48, "returnvalue", [];
    ConstructSuper = 0x49, "constructsuper", [U30];
    ConstructProp = 0x4A, "constructprop", [Multiname, U30];
    CallPropLex = 0x4C, "callproplex", [Multiname, U30];
    CallSuperVoid = 0x4E, "callsupervoid", [Multiname, U30];
    CallPropVoid = 0x4F, "callpropvoid", [Multiname, U30];
    Sxi1 = 0x50, "sxi1", [];
    Sxi8 = 0x51, "sxi8", [];
    Sxi16 = 0x52, "sxi16", [];
    ApplyType = 0x53, "applytype", [U30];
    NewObject = 0x55, "newobject", [U30];
    NewArray = 0x56, "newarray", [U30];
    NewActivation = 0x57, "newactivation", [];
    NewClass = 0x58, "newclass", [Class];
    GetDescendants = 0x59, "getdescendants", [Multiname];
    NewCatch = 0x5A, "newcatch", [U30];
    FindPropStrict = 0x5D, "findpropstrict", [Multiname];
    FindProperty = 0x5E, "findproperty", [Multiname];
    FindDef = 0x5F, "finddef", [Multiname];
    GetLex = 0x60, "getlex", [Multiname];
    SetProperty = 0x61, "setproperty", [Multiname];
    GetLocal = 0x62, "getlocal", [U30];
    SetLocal = 0x63, "setlocal", [U30];
    GetGlobalScope = 0x64, "getglobalscope", [];
    GetScopeObject = 0x65, "getscopeobject", [U8];
    GetProperty = 0x66, "getproperty", [Multiname];
    GetOuterScope = 0x67, "getouterscope", [U30];
    InitProperty = 0x68, "initproperty", [Multiname];
    DeleteProperty = 0x6A, "deleteproperty", [Multiname];
    GetSlot = 0x6C, "getslot", [U30];
    SetSlot = 0x6D, "setslot", [U30];
    GetGlobalSlot = 0x6E, "getglobalslot", [U30];
    SetGlobalSlot = 0x6F, "setglobalslot", [U30];
    ConvertS = 0x70, "convert_s", [];
    EscXElem = 0x71, "esc_xelem", [];
    EscXAttr = 0x72, "esc_xattr", [];
    ConvertI = 0x73, "convert_i", [];
    ConvertU = 0x74, "convert_u", [];
    ConvertD = 0x75, "convert_d", [];
    ConvertB = 0x76, "convert_b", [];
    ConvertO = 0x77, "convert_o", [];
    CheckFilter = 0x78, "checkfilter", [];
    Coerce = 0x80, "coerce", [Multiname];
    CoerceB = 0x81, "coerce_b", [];
    CoerceA = 0x82, "coerce_a", [];
    CoerceI = 0x83, "coerce_i", [];
    CoerceD = 0x84, "coerce_d", [];
    CoerceS = 0x85, "coerce_s", [];
    AsType = 0x86, "astype", [Multiname];
    AsTypeLate = 0x87, "astypelate", [];
    CoerceU = 0x88, "coerce_u", [];
    CoerceO = 0x89, "coerce_o", [];
    Negate = 0x90, "negate", [];
    Increment = 0x91, "increment", [];
    IncLocal = 0x92, "inclocal", [U30];
    Decrement = 0x93, "decrement", [];
    DecLocal = 0x94, "declocal", [U30];
    TypeOf = 0x95, "typeof", [];
    Not = 0x96, "not", [];
    BitNot = 0x97, "bitnot", [];
    Add = 0xA0, "add", [];
    Subtract = 0xA1, "subtract", [];
    Multiply = 0xA2, "multiply", [];
    Divide = 0xA3, "divide", [];
    Modulo = 0xA4, "modulo", [];
    LShift = 0xA5, "lshift", [];
    RShift = 0xA6, "rshift", [];
    URShift = 0xA7, "urshift", [];
    BitAnd = 0xA8, "bitand", [];
    BitOr = 0xA9, "bitor", [];
    BitXor = 0xAA, "bitxor", [];
    Equals = 0xAB, "equals", [];
    StrictEquals = 0xAC, "strictequals", [];
    LessThan = 0xAD, "lessthan", [];
    LessEquals = 0xAE, "lessequals", [];
    GreaterThan = 0xAF, "greaterthan", [];
    GreaterEquals = 0xB0, "greaterequals", [];
    InstanceOf = 0xB1, "instanceof", [];
    IsType = 0xB2, "istype", [Multiname];
    IsTypeLate = 0xB3, "istypelate", [];
    In = 0xB4, "in", [];
    IncrementI = 0xC0, "increment_i", [];
    DecrementI = 0xC1, "decrement_i", [];
    IncLocalI = 0xC2, "inclocal_i", [U30];
    DecLocalI = 0xC3, "declocal_i", [U30];
    NegateI = 0xC4, "negate_i", [];
    AddI = 0xC5, "add_i", [];
    SubtractI = 0xC6, "subtract_i", [];
    MultiplyI = 0xC7, "multiply_i", [];
    GetLocal0 = 0xD0, "getlocal0", [];
    GetLocal1 = 0xD1, "getlocal1", [];
    GetLocal2 = 0xD2, "getlocal2", [];
    GetLocal3 = 0xD3, "getlocal3", [];
    SetLocal0 = 0xD4, "setlocal0", [];
    SetLocal1 = 0xD5, "setlocal1", [];
    SetLocal2 = 0xD6, "setlocal2", [];
    SetLocal3 = 0xD7, "setlocal3", [];
    Debug = 0xEF, "debug", [U8, String, U8, U30];
    DebugLine = 0xF0, "debugline", [U30];
    DebugFile = 0xF1, "debugfile", [String];
    BkptLine = 0xF2, "bkptline", [U30];
    Timestamp = 0xF3, "timestamp", [];
}

/// Instructions that exist in the AVM2 catalogue but whose operands this
/// codec does not model
pub fn reserved_mnemonic(byte: u8) -> Option<&'static str> {
    match byte {
        0x22 => Some("pushconstant"),
        0x33 => Some("pushdecimal"),
        0x34 => Some("pushdnan"),
        0x4B => Some("callsuperid"),
        0x4D => Some("callinterface"),
        0x5B => Some("findpropglobalstrict"),
        0x5C => Some("findpropglobal"),
        _ => None,
    }
}

impl Opcode {
    /// Look up the descriptor for an instruction byte found at `offset`
    ///
    /// Undefined bytes are a parse error; reserved ones are unimplemented.
    pub fn decode(byte: u8, offset: usize) -> Result<Self> {
        if let Some(op) = Self::from_byte(byte) {
            return Ok(op);
        }
        match reserved_mnemonic(byte) {
            Some(mnemonic) => Err(AbcError::unimplemented(format!(
                "instruction {mnemonic} ({byte:#04x}) at offset {offset}"
            ))),
            None => Err(AbcError::InvalidOpcode { byte, offset }),
        }
    }

    /// Convert to raw byte
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Check whether any operand is a jump offset
    pub fn is_jump(self) -> bool {
        self == Self::LookupSwitch || self.operand_kinds().contains(&OperandKind::Offset)
    }

    /// Check whether the instruction only carries debug information
    pub fn is_debug_marker(self) -> bool {
        matches!(self, Self::Debug | Self::DebugLine | Self::DebugFile)
    }
}

/// Check that `operands` matches the descriptor of `opcode` in count and type
pub fn validate(opcode: Opcode, operands: &[Operand]) -> Result<()> {
    let kinds = opcode.operand_kinds();
    let expected = if opcode == Opcode::LookupSwitch {
        let case_count = operands.get(1).and_then(Operand::as_u30).ok_or_else(|| {
            AbcError::construction("lookupswitch requires a case count as its second operand")
        })?;
        kinds.len() + case_count as usize + 1
    } else {
        kinds.len()
    };

    if operands.len() != expected {
        return Err(AbcError::construction(format!(
            "{} expects {} operands, got {}",
            opcode.mnemonic(),
            expected,
            operands.len()
        )));
    }

    for (i, operand) in operands.iter().enumerate() {
        let kind = kinds.get(i).copied().unwrap_or(OperandKind::Offset);
        if operand.kind() != kind {
            return Err(AbcError::construction(format!(
                "{} operand {} must be {}, got {}",
                opcode.mnemonic(),
                i,
                kind.name(),
                operand.kind().name()
            )));
        }
    }
    Ok(())
}

/// One instruction with typed operands
///
/// Built through [`AbcFile::create_instruction`](crate::AbcFile::create_instruction),
/// which validates operands and hands out the identity used by jump targets
/// and exception ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    id: InstrId,
    opcode: Opcode,
    operands: Vec<Operand>,
}

impl Instruction {
    pub(crate) fn new_unchecked(id: InstrId, opcode: Opcode, operands: Vec<Operand>) -> Self {
        Self {
            id,
            opcode,
            operands,
        }
    }

    /// Identity of this instruction
    #[inline]
    pub fn id(&self) -> InstrId {
        self.id
    }

    /// Opcode
    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Operands, in wire order
    #[inline]
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// Replace one operand, keeping the list valid for the opcode
    pub fn set_operand(&mut self, index: usize, operand: Operand) -> Result<()> {
        let mut operands = self.operands.clone();
        let slot = operands.get_mut(index).ok_or_else(|| {
            AbcError::construction(format!(
                "{} has no operand {}",
                self.opcode.mnemonic(),
                index
            ))
        })?;
        *slot = operand;
        self.set_operands(operands)
    }

    /// Replace every operand
    pub fn set_operands(&mut self, operands: Vec<Operand>) -> Result<()> {
        validate(self.opcode, &operands)?;
        self.operands = operands;
        Ok(())
    }

    pub(crate) fn operands_mut(&mut self) -> &mut [Operand] {
        &mut self.operands
    }

    /// Jump targets carried by this instruction
    pub fn jump_targets(&self) -> impl Iterator<Item = JumpTarget> + '_ {
        self.operands.iter().filter_map(Operand::as_target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_opcode_roundtrip() {
        for &op in Opcode::ALL {
            assert_eq!(Opcode::from_byte(op.to_byte()), Some(op));
        }
        assert_eq!(Opcode::from_byte(0x10), Some(Opcode::Jump));
    }

    #[test]
    fn test_undefined_opcode() {
        assert_eq!(Opcode::from_byte(0xFF), None);
        let err = Opcode::decode(0x0A, 7).unwrap_err();
        assert!(matches!(err, AbcError::InvalidOpcode { byte: 0x0A, offset: 7 }));
    }

    #[test]
    fn test_reserved_opcode_is_unimplemented() {
        let err = Opcode::decode(0x4B, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unimplemented);
        for byte in 0u8..=255 {
            assert!(
                !(Opcode::from_byte(byte).is_some() && reserved_mnemonic(byte).is_some()),
                "{byte:#04x} is both defined and reserved"
            );
        }
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(Opcode::GetLocal0.mnemonic(), "getlocal0");
        assert_eq!(Opcode::CallPropVoid.mnemonic(), "callpropvoid");
        assert_eq!(
            Opcode::CallPropVoid.operand_kinds(),
            &[OperandKind::Multiname, OperandKind::U30]
        );
        assert!(Opcode::IfStrictNe.is_jump());
        assert!(Opcode::LookupSwitch.is_jump());
        assert!(!Opcode::Add.is_jump());
    }

    #[test]
    fn test_validate_counts_and_types() {
        assert!(validate(Opcode::Nop, &[]).is_ok());
        assert!(validate(Opcode::GetLocal, &[Operand::U30(1)]).is_ok());

        let err = validate(Opcode::GetLocal, &[]).unwrap_err();
        assert!(matches!(err, AbcError::Construction(_)));

        let err = validate(Opcode::PushString, &[Operand::U30(1)]).unwrap_err();
        assert!(err.to_string().contains("must be string"));
    }

    #[test]
    fn test_validate_lookupswitch() {
        let t = |o| Operand::Target(JumpTarget::Offset(o));
        // default + count 1 + two cases
        assert!(validate(Opcode::LookupSwitch, &[t(0), Operand::U30(1), t(4), t(8)]).is_ok());
        assert!(validate(Opcode::LookupSwitch, &[t(0), Operand::U30(1), t(4)]).is_err());
        assert!(validate(Opcode::LookupSwitch, &[t(0)]).is_err());
        assert!(
            validate(Opcode::LookupSwitch, &[t(0), Operand::U30(0), Operand::U30(3)]).is_err()
        );
    }

    #[test]
    fn test_set_operand_validates() {
        let mut instr =
            Instruction::new_unchecked(InstrId(0), Opcode::PushByte, vec![Operand::S8(3)]);
        instr.set_operand(0, Operand::S8(-1)).unwrap();
        assert_eq!(instr.operands(), &[Operand::S8(-1)]);
        assert!(instr.set_operand(0, Operand::U8(1)).is_err());
        assert!(instr.set_operand(1, Operand::S8(1)).is_err());
        assert_eq!(instr.operands(), &[Operand::S8(-1)]);
    }
}

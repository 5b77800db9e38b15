//! Method signatures and bodies

use std::sync::Arc;

use serde::Serialize;

use crate::constant::Multiname;
use crate::error::{AbcError, Result};
use crate::instruction::Instruction;
use crate::operand::CodePosition;
use crate::traits::{DefaultValue, Trait};

/// Method flags
///
/// `HAS_OPTIONAL` and `HAS_PARAM_NAMES` are not stored; they follow from
/// the optional values and parameter names present on the method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MethodFlags {
    /// Uses the `arguments` object
    pub need_arguments: bool,
    /// Creates an activation object
    pub need_activation: bool,
    /// Collects extra arguments into a rest array
    pub need_rest: bool,
    /// Ignores extra arguments
    pub ignore_rest: bool,
    /// Implemented by the player
    pub native: bool,
    /// Sets the default XML namespace
    pub set_dxns: bool,
}

impl MethodFlags {
    const NEED_ARGUMENTS: u8 = 0x01;
    const NEED_ACTIVATION: u8 = 0x02;
    const NEED_REST: u8 = 0x04;
    pub(crate) const HAS_OPTIONAL: u8 = 0x08;
    const IGNORE_REST: u8 = 0x10;
    const NATIVE: u8 = 0x20;
    const SET_DXNS: u8 = 0x40;
    pub(crate) const HAS_PARAM_NAMES: u8 = 0x80;

    pub(crate) fn from_byte(byte: u8) -> Self {
        Self {
            need_arguments: byte & Self::NEED_ARGUMENTS != 0,
            need_activation: byte & Self::NEED_ACTIVATION != 0,
            need_rest: byte & Self::NEED_REST != 0,
            ignore_rest: byte & Self::IGNORE_REST != 0,
            native: byte & Self::NATIVE != 0,
            set_dxns: byte & Self::SET_DXNS != 0,
        }
    }

    pub(crate) fn to_byte(self, has_optional: bool, has_param_names: bool) -> u8 {
        [
            (self.need_arguments, Self::NEED_ARGUMENTS),
            (self.need_activation, Self::NEED_ACTIVATION),
            (self.need_rest, Self::NEED_REST),
            (has_optional, Self::HAS_OPTIONAL),
            (self.ignore_rest, Self::IGNORE_REST),
            (self.native, Self::NATIVE),
            (self.set_dxns, Self::SET_DXNS),
            (has_param_names, Self::HAS_PARAM_NAMES),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .fold(0, |bits, (_, bit)| bits | bit)
    }
}

/// One entry of a method body's exception table
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    /// Start of the protected range
    pub from: CodePosition,
    /// End of the protected range (exclusive)
    pub to: CodePosition,
    /// Handler entry point
    pub target: CodePosition,
    /// Caught type; the any multiname catches everything
    pub catch_type: Multiname,
    /// Name of the catch variable; the any multiname when unnamed
    pub var_name: Multiname,
}

impl ExceptionHandler {
    /// Check whether this handler catches every exception
    pub fn is_catch_all(&self) -> bool {
        self.catch_type.is_any()
    }
}

/// Serialized or parsed form of a method's code
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Code {
    /// Bytes as read or last emitted
    Bytes(Vec<u8>),
    /// Editable instruction sequence
    Instructions(Vec<Instruction>),
}

/// Body of a non-native method
///
/// Code and exception ranges are held either as bytes with offset
/// positions, or as instructions with instruction positions. Accessors for
/// the other form fail with [`AbcError::InvalidState`].
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// Maximum operand stack depth
    pub max_stack: u32,
    /// Number of local registers, `this` and parameters included
    pub local_count: u32,
    /// Scope depth on entry
    pub init_scope_depth: u32,
    /// Maximum scope depth
    pub max_scope_depth: u32,
    /// Activation traits
    pub traits: Vec<Trait>,
    pub(crate) code: Code,
    pub(crate) exceptions: Vec<ExceptionHandler>,
}

impl MethodBody {
    pub(crate) fn new(code: Code) -> Self {
        Self {
            max_stack: 0,
            local_count: 0,
            init_scope_depth: 0,
            max_scope_depth: 0,
            traits: Vec::new(),
            code,
            exceptions: Vec::new(),
        }
    }

    /// Check whether the code is in instruction form
    pub fn is_disassembled(&self) -> bool {
        matches!(self.code, Code::Instructions(_))
    }

    /// Serialized code
    pub fn bytes(&self) -> Result<&[u8]> {
        match &self.code {
            Code::Bytes(bytes) => Ok(bytes),
            Code::Instructions(_) => Err(AbcError::invalid_state(
                "method body is disassembled and has no serialized code",
            )),
        }
    }

    /// Instruction sequence
    pub fn instructions(&self) -> Result<&[Instruction]> {
        match &self.code {
            Code::Instructions(instructions) => Ok(instructions),
            Code::Bytes(_) => Err(AbcError::invalid_state(
                "method body has not been disassembled",
            )),
        }
    }

    /// Mutable instruction sequence
    pub fn instructions_mut(&mut self) -> Result<&mut Vec<Instruction>> {
        match &mut self.code {
            Code::Instructions(instructions) => Ok(instructions),
            Code::Bytes(_) => Err(AbcError::invalid_state(
                "method body has not been disassembled",
            )),
        }
    }

    /// Exception table, in the same form as the code
    pub fn exceptions(&self) -> &[ExceptionHandler] {
        &self.exceptions
    }

    /// Mutable exception table; only available in instruction form
    pub fn exceptions_mut(&mut self) -> Result<&mut Vec<ExceptionHandler>> {
        if !self.is_disassembled() {
            return Err(AbcError::invalid_state(
                "exception ranges are byte offsets until the body is disassembled",
            ));
        }
        Ok(&mut self.exceptions)
    }

    /// Check whether the code already carries debug markers
    pub fn has_debug_markers(&self) -> bool {
        match &self.code {
            Code::Instructions(instructions) => {
                instructions.iter().any(|i| i.opcode().is_debug_marker())
            }
            Code::Bytes(_) => false,
        }
    }
}

/// A method: signature plus optional body
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    /// Method name, `None` for anonymous methods
    pub name: Option<Arc<str>>,
    /// Return type; the any multiname when untyped
    pub return_type: Multiname,
    /// Parameter types; the any multiname when untyped
    pub param_types: Vec<Multiname>,
    /// Defaults of the trailing optional parameters
    pub optional: Vec<DefaultValue>,
    /// Parameter names; empty when absent
    pub param_names: Vec<Arc<str>>,
    /// Flags
    pub flags: MethodFlags,
    /// First `debugfile` seen in the body
    pub source_file: Option<Arc<str>>,
    pub(crate) body: Option<MethodBody>,
}

impl Method {
    /// Get the method name or `<anonymous>`
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// Body, absent for native and interface methods
    pub fn body(&self) -> Option<&MethodBody> {
        self.body.as_ref()
    }

    /// Mutable body
    pub fn body_mut(&mut self) -> Option<&mut MethodBody> {
        self.body.as_mut()
    }

    /// Check whether the method must be assembled before it can be emitted
    pub fn is_tampered(&self) -> bool {
        self.body.as_ref().is_some_and(MethodBody::is_disassembled)
    }
}

/// Builder for creating methods
#[derive(Debug, Default)]
pub struct MethodBuilder {
    name: Option<Arc<str>>,
    return_type: Option<Multiname>,
    param_types: Vec<Multiname>,
    optional: Vec<DefaultValue>,
    param_names: Vec<Arc<str>>,
    flags: MethodFlags,
    body: Option<MethodBody>,
}

impl MethodBuilder {
    /// Create a new method builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set method name
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set return type
    pub fn return_type(mut self, ty: Multiname) -> Self {
        self.return_type = Some(ty);
        self
    }

    /// Add a parameter
    pub fn param(mut self, ty: Multiname) -> Self {
        self.param_types.push(ty);
        self
    }

    /// Add a default for the next trailing optional parameter
    pub fn optional(mut self, value: DefaultValue) -> Self {
        self.optional.push(value);
        self
    }

    /// Set parameter names
    pub fn param_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        self.param_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set flags
    pub fn flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the instruction sequence, creating the body
    pub fn code(mut self, instructions: Vec<Instruction>) -> Self {
        let body = self
            .body
            .get_or_insert_with(|| MethodBody::new(Code::Instructions(Vec::new())));
        body.code = Code::Instructions(instructions);
        self
    }

    /// Set stack and register sizes of the body
    pub fn frame(mut self, max_stack: u32, local_count: u32) -> Self {
        if let Some(body) = self.body.as_mut() {
            body.max_stack = max_stack;
            body.local_count = local_count;
        }
        self
    }

    /// Set scope depths of the body
    pub fn scope_depth(mut self, init: u32, max: u32) -> Self {
        if let Some(body) = self.body.as_mut() {
            body.init_scope_depth = init;
            body.max_scope_depth = max;
        }
        self
    }

    /// Add an exception handler to the body
    pub fn exception(mut self, handler: ExceptionHandler) -> Self {
        if let Some(body) = self.body.as_mut() {
            body.exceptions.push(handler);
        }
        self
    }

    pub(crate) fn build(self) -> Result<Method> {
        if self.optional.len() > self.param_types.len() {
            return Err(AbcError::construction(format!(
                "{} optional values for {} parameters",
                self.optional.len(),
                self.param_types.len()
            )));
        }
        if !self.param_names.is_empty() && self.param_names.len() != self.param_types.len() {
            return Err(AbcError::construction(format!(
                "{} parameter names for {} parameters",
                self.param_names.len(),
                self.param_types.len()
            )));
        }
        if let Some(body) = &self.body {
            for handler in &body.exceptions {
                for pos in [handler.from, handler.to, handler.target] {
                    if pos.is_offset() {
                        return Err(AbcError::construction(
                            "exception ranges of built methods must name instructions",
                        ));
                    }
                }
            }
        }
        Ok(Method {
            name: self.name,
            return_type: self.return_type.unwrap_or_else(Multiname::any),
            param_types: self.param_types,
            optional: self.optional,
            param_names: self.param_names,
            flags: self.flags,
            source_file: None,
            body: self.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Opcode;
    use crate::operand::InstrId;

    #[test]
    fn test_flags_roundtrip() {
        let flags = MethodFlags::from_byte(0x01 | 0x04 | 0x08 | 0x40 | 0x80);
        assert!(flags.need_arguments && flags.need_rest && flags.set_dxns);
        assert!(!flags.need_activation);
        assert_eq!(flags.to_byte(true, true), 0xCD);
        assert_eq!(flags.to_byte(false, false), 0x45);
    }

    #[test]
    fn test_body_state_accessors() {
        let mut body = MethodBody::new(Code::Bytes(vec![0x47]));
        assert_eq!(body.bytes().unwrap(), &[0x47]);
        assert!(matches!(body.instructions(), Err(AbcError::InvalidState(_))));
        assert!(body.exceptions_mut().is_err());

        body.code = Code::Instructions(vec![Instruction::new_unchecked(
            InstrId(0),
            Opcode::ReturnVoid,
            Vec::new(),
        )]);
        assert!(body.bytes().is_err());
        assert_eq!(body.instructions().unwrap().len(), 1);
        assert!(body.exceptions_mut().is_ok());
    }

    #[test]
    fn test_builder_validation() {
        let err = MethodBuilder::new()
            .optional(DefaultValue::Null)
            .build()
            .unwrap_err();
        assert!(matches!(err, AbcError::Construction(_)));

        let method = MethodBuilder::new()
            .name("f")
            .param(Multiname::any())
            .param_names(["x"])
            .code(Vec::new())
            .frame(1, 2)
            .build()
            .unwrap();
        assert_eq!(method.display_name(), "f");
        assert!(method.return_type.is_any());
        assert!(method.is_tampered());
        assert_eq!(method.body().unwrap().local_count, 2);
    }
}

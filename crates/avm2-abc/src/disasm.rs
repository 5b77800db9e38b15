//! Bytecode decoder
//!
//! Single forward pass over a method body's code. Constant, namespace,
//! multiname, method and class operands are resolved to the unit's objects
//! right away; jump offsets stay raw until the pass is complete and are then
//! replaced by references to the instruction they land on.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::constant::ConstantPool;
use crate::error::{AbcError, Result};
use crate::instruction::{Instruction, Opcode};
use crate::method::{Code, ExceptionHandler, Method};
use crate::operand::{ClassId, CodePosition, InstrId, JumpTarget, MethodId, Operand, OperandKind};
use crate::packed::AbcReader;

/// Read-only view of the tables operands are resolved against
pub(crate) struct Tables<'a> {
    pub pool: &'a ConstantPool,
    /// Method handles by wire index
    pub methods: &'a [MethodId],
    /// Class handles by wire index
    pub classes: &'a [ClassId],
}

impl Tables<'_> {
    fn out_of_range(offset: usize, what: &str, index: usize) -> AbcError {
        AbcError::parse(offset, format!("{what} index {index} out of range"))
    }

    fn operand(&self, r: &mut AbcReader<'_>, kind: OperandKind) -> Result<Operand> {
        let offset = r.position();
        Ok(match kind {
            OperandKind::U8 => Operand::U8(r.read_u8()?),
            OperandKind::S8 => Operand::S8(r.read_s8()?),
            OperandKind::U30 => Operand::U30(r.read_u30()?),
            OperandKind::Offset => Operand::Target(JumpTarget::Offset(r.read_s24()?)),
            OperandKind::Int => {
                let i = r.read_index()?;
                Operand::Int(self.pool.int(i).ok_or_else(|| Self::out_of_range(offset, "int", i))?)
            }
            OperandKind::UInt => {
                let i = r.read_index()?;
                Operand::UInt(
                    self.pool
                        .uint(i)
                        .ok_or_else(|| Self::out_of_range(offset, "uint", i))?,
                )
            }
            OperandKind::Double => {
                let i = r.read_index()?;
                Operand::Double(
                    self.pool
                        .double(i)
                        .ok_or_else(|| Self::out_of_range(offset, "double", i))?,
                )
            }
            OperandKind::String => {
                let i = r.read_index()?;
                Operand::String(
                    self.pool
                        .string(i)
                        .cloned()
                        .ok_or_else(|| Self::out_of_range(offset, "string", i))?,
                )
            }
            OperandKind::Namespace => {
                let i = r.read_index()?;
                Operand::Namespace(
                    self.pool
                        .namespace(i)
                        .cloned()
                        .ok_or_else(|| Self::out_of_range(offset, "namespace", i))?,
                )
            }
            OperandKind::Multiname => {
                let i = r.read_index()?;
                Operand::Multiname(
                    self.pool
                        .multiname(i)
                        .cloned()
                        .ok_or_else(|| Self::out_of_range(offset, "multiname", i))?,
                )
            }
            OperandKind::Method => {
                let i = r.read_index()?;
                Operand::Method(
                    self.methods
                        .get(i)
                        .copied()
                        .ok_or_else(|| Self::out_of_range(offset, "method", i))?,
                )
            }
            OperandKind::Class => {
                let i = r.read_index()?;
                Operand::Class(
                    self.classes
                        .get(i)
                        .copied()
                        .ok_or_else(|| Self::out_of_range(offset, "class", i))?,
                )
            }
        })
    }
}

/// Decoded code of one method body
#[derive(Debug)]
pub(crate) struct DecodedCode {
    pub instructions: Vec<Instruction>,
    /// Instruction index by start offset
    pub by_offset: FxHashMap<u32, usize>,
    pub code_len: u32,
    /// Operand of the first `debugfile`
    pub source_file: Option<Arc<str>>,
}

impl DecodedCode {
    /// Resolve a byte offset to an instruction or the end marker
    fn position(&self, offset: u32) -> Option<CodePosition> {
        if offset == self.code_len {
            return Some(CodePosition::End);
        }
        self.by_offset
            .get(&offset)
            .map(|&i| CodePosition::Instr(self.instructions[i].id()))
    }
}

/// Decode `code` into instructions with resolved jump targets
pub(crate) fn decode_code(
    code: &[u8],
    tables: &Tables<'_>,
    next_instr: &mut u32,
) -> Result<DecodedCode> {
    let mut r = AbcReader::new(code);
    let mut instructions = Vec::new();
    let mut offsets = Vec::new();
    let mut ends = Vec::new();
    let mut source_file = None;

    while !r.is_empty() {
        let start = r.position();
        let opcode = Opcode::decode(r.read_u8()?, start)?;
        let mut operands = Vec::with_capacity(opcode.operand_kinds().len());
        for &kind in opcode.operand_kinds() {
            operands.push(tables.operand(&mut r, kind)?);
        }
        if opcode == Opcode::LookupSwitch {
            let case_count = operands.get(1).and_then(Operand::as_u30).unwrap_or(0);
            if case_count as usize > r.remaining() / 3 {
                return Err(AbcError::parse(
                    start,
                    format!("lookupswitch case count {case_count} exceeds the code size"),
                ));
            }
            for _ in 0..=case_count {
                operands.push(Operand::Target(JumpTarget::Offset(r.read_s24()?)));
            }
        }
        if opcode == Opcode::DebugFile && source_file.is_none() {
            if let Some(Operand::String(file)) = operands.first() {
                source_file = Some(file.clone());
            }
        }

        let id = InstrId(*next_instr);
        *next_instr += 1;
        instructions.push(Instruction::new_unchecked(id, opcode, operands));
        offsets.push(start as u32);
        ends.push(r.position() as u32);
    }

    let by_offset: FxHashMap<u32, usize> = offsets
        .iter()
        .enumerate()
        .map(|(i, &offset)| (offset, i))
        .collect();

    // Second pass: raw offsets become instruction references
    let ids: Vec<InstrId> = instructions.iter().map(Instruction::id).collect();
    for (i, instr) in instructions.iter_mut().enumerate() {
        if !instr.opcode().is_jump() {
            continue;
        }
        let base = if instr.opcode() == Opcode::LookupSwitch {
            offsets[i]
        } else {
            ends[i]
        };
        for operand in instr.operands_mut() {
            if let Operand::Target(target) = operand {
                let raw = target.offset()?;
                let dest = i64::from(base) + i64::from(raw);
                let index = u32::try_from(dest)
                    .ok()
                    .and_then(|dest| by_offset.get(&dest))
                    .ok_or_else(|| {
                        AbcError::parse(
                            offsets[i] as usize,
                            format!("jump target {dest} is not the start of an instruction"),
                        )
                    })?;
                *target = JumpTarget::Instr(ids[*index]);
            }
        }
    }

    Ok(DecodedCode {
        instructions,
        by_offset,
        code_len: code.len() as u32,
        source_file,
    })
}

/// Resolve offset-form exception ranges against decoded code
pub(crate) fn resolve_exceptions(
    handlers: &[ExceptionHandler],
    code: &DecodedCode,
) -> Result<Vec<ExceptionHandler>> {
    handlers
        .iter()
        .map(|handler| {
            let resolve = |pos: CodePosition| -> Result<CodePosition> {
                let offset = pos.offset()?;
                code.position(offset).ok_or_else(|| {
                    AbcError::parse(
                        offset as usize,
                        "exception range does not fall on an instruction boundary",
                    )
                })
            };
            Ok(ExceptionHandler {
                from: resolve(handler.from)?,
                to: resolve(handler.to)?,
                target: resolve(handler.target)?,
                catch_type: handler.catch_type.clone(),
                var_name: handler.var_name.clone(),
            })
        })
        .collect()
}

/// Bring one method into instruction form
///
/// Returns `false` when there was nothing to do (no body, or already
/// disassembled).
pub(crate) fn disassemble_method(
    method: &mut Method,
    tables: &Tables<'_>,
    next_instr: &mut u32,
) -> Result<bool> {
    let Some(body) = method.body.as_mut() else {
        return Ok(false);
    };
    let Code::Bytes(bytes) = &body.code else {
        return Ok(false);
    };

    let decoded = decode_code(bytes, tables, next_instr)?;
    let exceptions = resolve_exceptions(&body.exceptions, &decoded)?;
    trace!(
        method = method.name.as_deref().unwrap_or("<anonymous>"),
        instructions = decoded.instructions.len(),
        "disassembled method"
    );
    body.exceptions = exceptions;
    body.code = Code::Instructions(decoded.instructions);
    Ok(true)
}

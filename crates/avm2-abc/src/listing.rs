//! Human-readable method listings

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::Result;
use crate::method::Method;
use crate::operand::{CodePosition, InstrId, JumpTarget, Operand};

/// Assembler-style listing of one disassembled method
///
/// Instructions that are jumped to or bound an exception range get an
/// `L<n>:` label, numbered in code order.
pub struct MethodListing<'a> {
    method: &'a Method,
    labels: FxHashMap<InstrId, usize>,
}

impl<'a> MethodListing<'a> {
    /// Build a listing; the body, if any, must be in instruction form
    pub fn new(method: &'a Method) -> Result<Self> {
        let mut labels = FxHashMap::default();
        if let Some(body) = method.body() {
            let instructions = body.instructions()?;
            let mut targeted: FxHashSet<InstrId> = instructions
                .iter()
                .flat_map(|instr| instr.jump_targets())
                .filter_map(|target| match target {
                    JumpTarget::Instr(id) => Some(id),
                    JumpTarget::Offset(_) => None,
                })
                .collect();
            for handler in body.exceptions() {
                for pos in [handler.from, handler.to, handler.target] {
                    if let CodePosition::Instr(id) = pos {
                        targeted.insert(id);
                    }
                }
            }
            for instr in instructions {
                if targeted.contains(&instr.id()) && !labels.contains_key(&instr.id()) {
                    labels.insert(instr.id(), labels.len());
                }
            }
        }
        Ok(Self { method, labels })
    }

    /// Label number of an instruction, if it has one
    pub fn label(&self, id: InstrId) -> Option<usize> {
        self.labels.get(&id).copied()
    }

    fn position(&self, pos: CodePosition) -> String {
        match pos {
            CodePosition::Instr(id) => match self.label(id) {
                Some(n) => format!("L{n}"),
                None => format!("@{}", id.0),
            },
            CodePosition::Offset(offset) => offset.to_string(),
            CodePosition::End => "end".to_string(),
        }
    }

    fn operand(&self, operand: &Operand) -> String {
        match operand {
            Operand::Target(JumpTarget::Instr(id)) => self.position(CodePosition::Instr(*id)),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for MethodListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = self.method;
        let params: Vec<String> = method.param_types.iter().map(ToString::to_string).collect();
        writeln!(
            f,
            "method {}({}): {}",
            method.display_name(),
            params.join(", "),
            method.return_type
        )?;

        let Some(body) = method.body() else {
            return writeln!(f, "  ; no body");
        };
        writeln!(
            f,
            "  ; max_stack={} locals={} scope={}..{}",
            body.max_stack, body.local_count, body.init_scope_depth, body.max_scope_depth
        )?;

        let instructions = body.instructions().map_err(|_| fmt::Error)?;
        for instr in instructions {
            if let Some(n) = self.label(instr.id()) {
                writeln!(f, "L{n}:")?;
            }
            write!(f, "    {}", instr.opcode().mnemonic())?;
            let operands: Vec<String> = instr.operands().iter().map(|op| self.operand(op)).collect();
            if !operands.is_empty() {
                write!(f, " {}", operands.join(", "))?;
            }
            writeln!(f)?;
        }

        for handler in body.exceptions() {
            writeln!(
                f,
                "  try {}..{} -> {} catch {} as {}",
                self.position(handler.from),
                self.position(handler.to),
                self.position(handler.target),
                handler.catch_type,
                handler.var_name
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::AbcFile;
    use crate::constant::Multiname;
    use crate::instruction::Opcode;
    use crate::method::{ExceptionHandler, MethodBuilder};

    #[test]
    fn test_labels_jump_targets() {
        let mut abc = AbcFile::new();
        let ret = abc.create_instruction(Opcode::ReturnVoid, vec![]).unwrap();
        let jump = abc
            .create_instruction(
                Opcode::Jump,
                vec![Operand::Target(JumpTarget::Instr(ret.id()))],
            )
            .unwrap();
        let id = abc
            .create_method(MethodBuilder::new().name("run").code(vec![jump, ret]))
            .unwrap();

        let method = abc.method(id).unwrap();
        let text = MethodListing::new(method).unwrap().to_string();
        assert!(text.starts_with("method run(): "));
        assert!(text.contains("    jump L0\nL0:\n    returnvoid\n"));
    }

    #[test]
    fn test_shared_targets_get_one_label() {
        let mut abc = AbcFile::new();
        let ret = abc.create_instruction(Opcode::ReturnVoid, vec![]).unwrap();
        let handler = abc.create_instruction(Opcode::Pop, vec![]).unwrap();
        let mut code = Vec::new();
        for opcode in [Opcode::Jump, Opcode::IfTrue] {
            code.push(
                abc.create_instruction(opcode, vec![Operand::Target(JumpTarget::Instr(ret.id()))])
                    .unwrap(),
            );
        }
        let first = code[0].id();
        code.push(ret);
        code.push(handler.clone());
        let id = abc
            .create_method(
                MethodBuilder::new()
                    .name("run")
                    .code(code)
                    .exception(ExceptionHandler {
                        from: CodePosition::Instr(first),
                        to: CodePosition::End,
                        target: CodePosition::Instr(handler.id()),
                        catch_type: Multiname::any(),
                        var_name: Multiname::any(),
                    }),
            )
            .unwrap();

        let listing = MethodListing::new(abc.method(id).unwrap()).unwrap();
        assert_eq!(listing.label(first), Some(0));
        assert_eq!(listing.label(handler.id()), Some(2));
        let text = listing.to_string();
        assert_eq!(text.matches("L1:").count(), 1);
        assert!(text.contains("    jump L1\n    iftrue L1\nL1:\n"));
        assert!(text.contains("  try L0..end -> L2 catch"));
    }

    #[test]
    fn test_listing_without_body() {
        let mut abc = AbcFile::new();
        let id = abc.create_method(MethodBuilder::new().name("native")).unwrap();
        let text = MethodListing::new(abc.method(id).unwrap()).unwrap().to_string();
        assert!(text.contains("; no body"));
    }
}

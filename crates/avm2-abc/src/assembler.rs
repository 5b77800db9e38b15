//! ABC unit encoder
//!
//! Encoding runs in two phases over a fully disassembled unit:
//!
//! 1. **Registration.** Classes get their ids first, in wire order with the
//!    main class (if any) moved to the end. Then every class, every script
//!    and finally every remaining method is walked, and each constant,
//!    namespace, multiname and method it touches is registered with a
//!    [`Marshaller`] in first-touch order.
//! 2. **Emission.** Tables are written from the marshallers. Method bodies
//!    are assembled with zero placeholders for jump offsets, which are
//!    patched once every instruction's offset in the body is known.
//!
//! The new tables, wire orders and method bytes replace the unit's state
//! only after the whole unit has been emitted.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::abc::{AbcFile, MAJOR_VERSION, MINOR_VERSION};
use crate::constant::{
    ANY_NAME, ConstantPool, Multiname, MultinameKind, Namespace, NamespaceSet,
};
use crate::error::{AbcError, Result};
use crate::instruction::{self, Instruction, Opcode};
use crate::marshal::Marshaller;
use crate::method::{Code, ExceptionHandler, Method};
use crate::operand::{ClassId, CodePosition, InstrId, JumpTarget, MethodId, Operand};
use crate::packed::AbcWriter;
use crate::traits::{DefaultValue, Trait, TraitKind};

/// Options for [`AbcFile::encode`]
#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    /// Interleave `debugfile`/`debugline` markers into methods that have none
    pub debug_instrumentation: bool,
    /// Dotted name of the class to place last in the class table
    ///
    /// Players have been observed to need the document class registered
    /// after every other class.
    pub main_class: Option<String>,
}

impl EncodeOptions {
    /// Enable debug instrumentation
    pub fn with_debug_instrumentation(mut self, enabled: bool) -> Self {
        self.debug_instrumentation = enabled;
        self
    }

    /// Set the main class
    pub fn with_main_class(mut self, name: impl Into<String>) -> Self {
        self.main_class = Some(name.into());
        self
    }
}

pub(crate) fn encode(abc: &mut AbcFile, options: &EncodeOptions) -> Result<Vec<u8>> {
    if !abc.is_tampered() {
        if let Some(bytes) = &abc.cached {
            debug!(bytes = bytes.len(), "unit untouched, reusing cached bytes");
            return Ok(bytes.clone());
        }
    }

    abc.disassemble()?;
    let output = Assembler::new(abc, options).run()?;
    let bytes = output.bytes.clone();
    commit(abc, output);
    Ok(bytes)
}

/// One item of a method's emission sequence
enum Emit<'a> {
    Instr(&'a Instruction),
    DebugFile(Arc<str>),
    DebugLine(u32),
}

/// A body in offset form, ready to replace the instruction form
struct AssembledBody {
    method: MethodId,
    code: Vec<u8>,
    exceptions: Vec<ExceptionHandler>,
}

struct Output {
    bytes: Vec<u8>,
    pool: ConstantPool,
    method_order: Vec<MethodId>,
    class_order: Vec<ClassId>,
    bodies: Vec<AssembledBody>,
}

/// Key of a string in a name position: `*` and absent share index 0
fn name_key(name: Option<&Arc<str>>) -> Option<Arc<str>> {
    name.filter(|s| &***s != ANY_NAME).cloned()
}

struct Assembler<'a> {
    abc: &'a AbcFile,
    options: &'a EncodeOptions,
    ints: Marshaller<Option<i32>>,
    uints: Marshaller<Option<u32>>,
    doubles: Marshaller<Option<u64>>,
    strings: Marshaller<Option<Arc<str>>>,
    namespaces: Marshaller<Namespace>,
    ns_sets: Marshaller<NamespaceSet>,
    multinames: Marshaller<Multiname>,
    methods: Marshaller<MethodId>,
    classes: Marshaller<ClassId>,
    sequences: FxHashMap<MethodId, Vec<Emit<'a>>>,
}

impl<'a> Assembler<'a> {
    fn new(abc: &'a AbcFile, options: &'a EncodeOptions) -> Self {
        Self {
            abc,
            options,
            ints: Marshaller::with_seeds([None]),
            uints: Marshaller::with_seeds([None]),
            doubles: Marshaller::with_seeds([None]),
            strings: Marshaller::with_seeds([None]),
            namespaces: Marshaller::with_seeds([Namespace::global()]),
            ns_sets: Marshaller::with_seeds([NamespaceSet::empty()]),
            multinames: Marshaller::with_seeds([Multiname::any()]),
            methods: Marshaller::new(),
            classes: Marshaller::new(),
            sequences: FxHashMap::default(),
        }
    }

    fn run(mut self) -> Result<Output> {
        self.register_unit()?;

        let mut w = AbcWriter::with_capacity(self.abc.cached.as_ref().map_or(1024, Vec::len));
        w.write_u16(MINOR_VERSION);
        w.write_u16(MAJOR_VERSION);
        self.write_pool(&mut w)?;
        self.write_method_infos(&mut w)?;
        self.write_metadata(&mut w)?;
        self.write_classes(&mut w)?;
        self.write_scripts(&mut w)?;
        let bodies = self.write_bodies(&mut w)?;
        let bytes = w.into_bytes();

        debug!(
            bytes = bytes.len(),
            strings = self.strings.len(),
            multinames = self.multinames.len(),
            methods = self.methods.len(),
            classes = self.classes.len(),
            "encoded abc unit"
        );

        Ok(Output {
            bytes,
            pool: ConstantPool {
                ints: self.ints.into_values().into_iter().map(|v| v.unwrap_or(0)).collect(),
                uints: self.uints.into_values().into_iter().map(|v| v.unwrap_or(0)).collect(),
                doubles: self
                    .doubles
                    .into_values()
                    .into_iter()
                    .map(|v| v.map_or(f64::NAN, f64::from_bits))
                    .collect(),
                strings: self
                    .strings
                    .into_values()
                    .into_iter()
                    .map(|v| v.unwrap_or_else(|| Arc::from(ANY_NAME)))
                    .collect(),
                namespaces: self.namespaces.into_values(),
                ns_sets: self.ns_sets.into_values(),
                multinames: self.multinames.into_values(),
            },
            method_order: self.methods.into_values(),
            class_order: self.classes.into_values(),
            bodies,
        })
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    fn register_unit(&mut self) -> Result<()> {
        let abc = self.abc;
        let main = match &self.options.main_class {
            Some(name) => Some(abc.class_by_name(name).ok_or_else(|| {
                AbcError::construction(format!("main class {name} is not defined in this unit"))
            })?),
            None => None,
        };
        for &id in &abc.class_order {
            if Some(id) != main {
                self.classes.register(id);
            }
        }
        if let Some(id) = main {
            self.classes.register(id);
        }

        let class_ids = self.classes.values_in_order().to_vec();
        for id in class_ids {
            self.register_class(id)?;
        }
        for script in &abc.scripts {
            self.register_method(script.init)?;
            self.register_traits(&script.traits)?;
        }
        for &id in &abc.method_order {
            self.register_method(id)?;
        }

        for entry in &abc.metadata {
            self.register_name(Some(&entry.name));
            for (key, value) in &entry.items {
                self.register_name(key.as_ref());
                self.register_name(Some(value));
            }
        }
        Ok(())
    }

    fn register_class(&mut self, id: ClassId) -> Result<()> {
        let abc = self.abc;
        let class = abc
            .class(id)
            .ok_or_else(|| AbcError::construction(format!("unknown class {}", id.0)))?;
        self.register_multiname(&class.name);
        self.register_multiname(&class.super_name);
        if let Some(ns) = &class.protected_ns {
            self.register_namespace(ns);
        }
        for interface in &class.interfaces {
            self.register_multiname(interface);
        }
        self.register_method(class.constructor)?;
        self.register_traits(&class.instance_traits)?;
        self.register_method(class.static_init)?;
        self.register_traits(&class.static_traits)
    }

    fn register_method(&mut self, id: MethodId) -> Result<()> {
        if self.methods.contains(&id) {
            return Ok(());
        }
        self.methods.register(id);

        let abc = self.abc;
        let method = abc
            .method(id)
            .ok_or_else(|| AbcError::construction(format!("unknown method {}", id.0)))?;
        self.register_multiname(&method.return_type);
        for ty in &method.param_types {
            self.register_multiname(ty);
        }
        self.register_name(method.name.as_ref());
        for value in &method.optional {
            self.register_value(value);
        }
        for name in &method.param_names {
            self.register_name(Some(name));
        }

        let Some(body) = method.body() else {
            return Ok(());
        };
        let sequence = self.emit_sequence(method)?;
        for item in &sequence {
            match item {
                Emit::Instr(instr) => {
                    for operand in instr.operands() {
                        self.register_operand(operand)?;
                    }
                }
                Emit::DebugFile(file) => {
                    self.strings.register(Some(file.clone()));
                }
                Emit::DebugLine(_) => {}
            }
        }
        self.sequences.insert(id, sequence);

        for handler in body.exceptions() {
            self.register_multiname(&handler.catch_type);
            self.register_multiname(&handler.var_name);
        }
        self.register_traits(&body.traits)
    }

    /// Instructions to emit, with synthetic debug markers when requested
    fn emit_sequence(&self, method: &'a Method) -> Result<Vec<Emit<'a>>> {
        let Some(body) = method.body() else {
            return Ok(Vec::new());
        };
        let instructions = body.instructions()?;
        if !self.options.debug_instrumentation || body.has_debug_markers() {
            return Ok(instructions.iter().map(Emit::Instr).collect());
        }

        let file = method
            .source_file
            .clone()
            .or_else(|| method.name.clone())
            .unwrap_or_else(|| Arc::from(method.display_name()));
        let mut sequence = Vec::with_capacity(instructions.len() * 2 + 1);
        sequence.push(Emit::DebugFile(file));
        for (line, instr) in (1u32..).zip(instructions) {
            sequence.push(Emit::DebugLine(line));
            sequence.push(Emit::Instr(instr));
        }
        Ok(sequence)
    }

    fn register_operand(&mut self, operand: &Operand) -> Result<()> {
        match operand {
            Operand::Int(v) => {
                self.ints.register(Some(*v));
            }
            Operand::UInt(v) => {
                self.uints.register(Some(*v));
            }
            Operand::Double(v) => {
                self.doubles.register(Some(v.to_bits()));
            }
            Operand::String(s) => {
                self.strings.register(Some(s.clone()));
            }
            Operand::Namespace(ns) => self.register_namespace(ns),
            Operand::Multiname(name) => self.register_multiname(name),
            Operand::Method(id) => self.register_method(*id)?,
            Operand::Class(id) => {
                if !self.classes.contains(id) {
                    return Err(AbcError::construction(format!(
                        "instruction refers to unknown class {}",
                        id.0
                    )));
                }
            }
            Operand::U8(_) | Operand::S8(_) | Operand::U30(_) | Operand::Target(_) => {}
        }
        Ok(())
    }

    fn register_traits(&mut self, traits: &[Trait]) -> Result<()> {
        for t in traits {
            self.register_multiname(&t.name);
            match &t.kind {
                TraitKind::Slot {
                    type_name, value, ..
                }
                | TraitKind::Const {
                    type_name, value, ..
                } => {
                    self.register_multiname(type_name);
                    if let Some(value) = value {
                        self.register_value(value);
                    }
                }
                TraitKind::Method { method, .. }
                | TraitKind::Getter { method, .. }
                | TraitKind::Setter { method, .. }
                | TraitKind::Function { method, .. } => self.register_method(*method)?,
                TraitKind::Class { class, .. } => {
                    if !self.classes.contains(class) {
                        return Err(AbcError::construction(format!(
                            "trait refers to unknown class {}",
                            class.0
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn register_value(&mut self, value: &DefaultValue) {
        match value {
            DefaultValue::Int(v) => {
                self.ints.register(Some(*v));
            }
            DefaultValue::UInt(v) => {
                self.uints.register(Some(*v));
            }
            DefaultValue::Double(v) => {
                self.doubles.register(Some(v.to_bits()));
            }
            DefaultValue::Utf8(s) => {
                self.strings.register(Some(s.clone()));
            }
            DefaultValue::Namespace(ns) => self.register_namespace(ns),
            DefaultValue::True
            | DefaultValue::False
            | DefaultValue::Null
            | DefaultValue::Undefined => {}
        }
    }

    fn register_name(&mut self, name: Option<&Arc<str>>) {
        self.strings.register(name_key(name));
    }

    fn register_namespace(&mut self, ns: &Namespace) {
        if self.namespaces.contains(ns) {
            return;
        }
        self.register_name(Some(ns.name_arc()));
        self.namespaces.register(ns.clone());
    }

    fn register_namespace_set(&mut self, set: &NamespaceSet) {
        if self.ns_sets.contains(set) {
            return;
        }
        for ns in set.namespaces() {
            self.register_namespace(ns);
        }
        self.ns_sets.register(set.clone());
    }

    fn register_multiname(&mut self, name: &Multiname) {
        if self.multinames.contains(name) {
            return;
        }
        if name.kind().has_name() {
            self.register_name(name.name_arc());
        }
        if let Some(ns) = name.namespace() {
            self.register_namespace(ns);
        }
        if let Some(set) = name.namespace_set() {
            self.register_namespace_set(set);
        }
        if let Some(app) = name.type_application() {
            self.register_multiname(&app.base);
            for param in &app.params {
                self.register_multiname(param);
            }
        }
        self.multinames.register(name.clone());
    }

    // ---------------------------------------------------------------------
    // Emission
    // ---------------------------------------------------------------------

    fn name_index(&self, name: Option<&Arc<str>>) -> Result<u32> {
        self.strings.id_for_existing(&name_key(name))
    }

    fn multiname_index(&self, name: &Multiname) -> Result<u32> {
        self.multinames.id_for_existing(name)
    }

    fn method_index(&self, id: MethodId) -> Result<u32> {
        self.methods.id_for_existing(&id)
    }

    fn class_index(&self, id: ClassId) -> Result<u32> {
        self.classes.id_for_existing(&id)
    }

    fn value_index(&self, value: &DefaultValue) -> Result<u32> {
        if let Some(index) = value.valueless_index() {
            return Ok(index);
        }
        match value {
            DefaultValue::Int(v) => self.ints.id_for_existing(&Some(*v)),
            DefaultValue::UInt(v) => self.uints.id_for_existing(&Some(*v)),
            DefaultValue::Double(v) => self.doubles.id_for_existing(&Some(v.to_bits())),
            DefaultValue::Utf8(s) => self.strings.id_for_existing(&Some(s.clone())),
            DefaultValue::Namespace(ns) => self.namespaces.id_for_existing(ns),
            DefaultValue::True
            | DefaultValue::False
            | DefaultValue::Null
            | DefaultValue::Undefined => Ok(0),
        }
    }

    /// Entry count of a table whose index 0 is implicit
    fn table_count<K>(table: &Marshaller<K>) -> usize
    where
        K: Eq + std::hash::Hash + Clone,
    {
        if table.len() > 1 { table.len() } else { 0 }
    }

    fn write_pool(&self, w: &mut AbcWriter) -> Result<()> {
        w.write_index(Self::table_count(&self.ints))?;
        for v in self.ints.values_in_order().iter().skip(1).flatten() {
            w.write_s32(*v);
        }
        w.write_index(Self::table_count(&self.uints))?;
        for v in self.uints.values_in_order().iter().skip(1).flatten() {
            w.write_u32(*v);
        }
        w.write_index(Self::table_count(&self.doubles))?;
        for v in self.doubles.values_in_order().iter().skip(1).flatten() {
            w.write_d64(f64::from_bits(*v));
        }
        w.write_index(Self::table_count(&self.strings))?;
        for s in self.strings.values_in_order().iter().skip(1).flatten() {
            w.write_string(s)?;
        }

        w.write_index(Self::table_count(&self.namespaces))?;
        for ns in self.namespaces.values_in_order().iter().skip(1) {
            w.write_u8(ns.kind().to_byte());
            w.write_u30(self.name_index(Some(ns.name_arc()))?);
        }

        w.write_index(Self::table_count(&self.ns_sets))?;
        for set in self.ns_sets.values_in_order().iter().skip(1) {
            w.write_index(set.len())?;
            for ns in set.namespaces() {
                w.write_u30(self.namespaces.id_for_existing(ns)?);
            }
        }

        w.write_index(Self::table_count(&self.multinames))?;
        for name in self.multinames.values_in_order().iter().skip(1) {
            self.write_multiname(w, name)?;
        }
        Ok(())
    }

    fn write_multiname(&self, w: &mut AbcWriter, name: &Multiname) -> Result<()> {
        let kind = name.kind();
        w.write_u8(kind.to_byte());
        if kind == MultinameKind::TypeName {
            let app = name.type_application().ok_or_else(|| {
                AbcError::construction("TypeName multiname without a type application")
            })?;
            w.write_u30(self.multiname_index(&app.base)?);
            w.write_index(app.params.len())?;
            for param in &app.params {
                w.write_u30(self.multiname_index(param)?);
            }
            return Ok(());
        }
        if let Some(ns) = name.namespace() {
            w.write_u30(self.namespaces.id_for_existing(ns)?);
        }
        if kind.has_name() {
            w.write_u30(self.name_index(name.name_arc())?);
        }
        if let Some(set) = name.namespace_set() {
            w.write_u30(self.ns_sets.id_for_existing(set)?);
        }
        Ok(())
    }

    fn write_method_infos(&self, w: &mut AbcWriter) -> Result<()> {
        w.write_index(self.methods.len())?;
        for &id in self.methods.values_in_order() {
            let method = self.method(id)?;
            w.write_index(method.param_types.len())?;
            w.write_u30(self.multiname_index(&method.return_type)?);
            for ty in &method.param_types {
                w.write_u30(self.multiname_index(ty)?);
            }
            w.write_u30(self.name_index(method.name.as_ref())?);
            w.write_u8(
                method
                    .flags
                    .to_byte(!method.optional.is_empty(), !method.param_names.is_empty()),
            );
            if !method.optional.is_empty() {
                w.write_index(method.optional.len())?;
                for value in &method.optional {
                    w.write_u30(self.value_index(value)?);
                    w.write_u8(value.kind_byte());
                }
            }
            if !method.param_names.is_empty() {
                if method.param_names.len() != method.param_types.len() {
                    return Err(AbcError::construction(format!(
                        "method {} has {} parameter names for {} parameters",
                        method.display_name(),
                        method.param_names.len(),
                        method.param_types.len()
                    )));
                }
                for name in &method.param_names {
                    w.write_u30(self.name_index(Some(name))?);
                }
            }
        }
        Ok(())
    }

    fn write_metadata(&self, w: &mut AbcWriter) -> Result<()> {
        w.write_index(self.abc.metadata.len())?;
        for entry in &self.abc.metadata {
            w.write_u30(self.name_index(Some(&entry.name))?);
            w.write_index(entry.items.len())?;
            for (key, value) in &entry.items {
                w.write_u30(self.name_index(key.as_ref())?);
                w.write_u30(self.name_index(Some(value))?);
            }
        }
        Ok(())
    }

    fn write_classes(&self, w: &mut AbcWriter) -> Result<()> {
        let ids = self.classes.values_in_order();
        w.write_index(ids.len())?;
        for &id in ids {
            let class = self.class(id)?;
            w.write_u30(self.multiname_index(&class.name)?);
            w.write_u30(self.multiname_index(&class.super_name)?);
            w.write_u8(class.flags.to_byte(class.protected_ns.is_some()));
            if let Some(ns) = &class.protected_ns {
                w.write_u30(self.namespaces.id_for_existing(ns)?);
            }
            w.write_index(class.interfaces.len())?;
            for interface in &class.interfaces {
                w.write_u30(self.multiname_index(interface)?);
            }
            w.write_u30(self.method_index(class.constructor)?);
            self.write_traits(w, &class.instance_traits)?;
        }
        for &id in ids {
            let class = self.class(id)?;
            w.write_u30(self.method_index(class.static_init)?);
            self.write_traits(w, &class.static_traits)?;
        }
        Ok(())
    }

    fn write_scripts(&self, w: &mut AbcWriter) -> Result<()> {
        w.write_index(self.abc.scripts.len())?;
        for script in &self.abc.scripts {
            w.write_u30(self.method_index(script.init)?);
            self.write_traits(w, &script.traits)?;
        }
        Ok(())
    }

    fn write_traits(&self, w: &mut AbcWriter, traits: &[Trait]) -> Result<()> {
        w.write_index(traits.len())?;
        for t in traits {
            w.write_u30(self.multiname_index(&t.name)?);
            let attrs = t.attrs.to_bits(!t.metadata.is_empty());
            w.write_u8(t.kind.tag() | (attrs << 4));
            match &t.kind {
                TraitKind::Slot {
                    slot_id,
                    type_name,
                    value,
                }
                | TraitKind::Const {
                    slot_id,
                    type_name,
                    value,
                } => {
                    w.write_u30(*slot_id);
                    w.write_u30(self.multiname_index(type_name)?);
                    match value {
                        Some(value) => {
                            w.write_u30(self.value_index(value)?);
                            w.write_u8(value.kind_byte());
                        }
                        None => w.write_u30(0),
                    }
                }
                TraitKind::Method { disp_id, method }
                | TraitKind::Getter { disp_id, method }
                | TraitKind::Setter { disp_id, method } => {
                    w.write_u30(*disp_id);
                    w.write_u30(self.method_index(*method)?);
                }
                TraitKind::Class { slot_id, class } => {
                    w.write_u30(*slot_id);
                    w.write_u30(self.class_index(*class)?);
                }
                TraitKind::Function { slot_id, method } => {
                    w.write_u30(*slot_id);
                    w.write_u30(self.method_index(*method)?);
                }
            }
            if !t.metadata.is_empty() {
                w.write_index(t.metadata.len())?;
                for &index in &t.metadata {
                    if index as usize >= self.abc.metadata.len() {
                        return Err(AbcError::construction(format!(
                            "trait refers to unknown metadata entry {index}"
                        )));
                    }
                    w.write_u30(index);
                }
            }
        }
        Ok(())
    }

    fn write_bodies(&self, w: &mut AbcWriter) -> Result<Vec<AssembledBody>> {
        let mut bodies = Vec::new();
        for &id in self.methods.values_in_order() {
            let method = self.method(id)?;
            if let Some(body) = method.body() {
                let sequence = self.sequences.get(&id).ok_or_else(|| {
                    AbcError::construction(format!("method {} was never registered", id.0))
                })?;
                let assembled = self.assemble(sequence)?;
                let exceptions = body
                    .exceptions()
                    .iter()
                    .map(|handler| assembled.exception(handler))
                    .collect::<Result<Vec<_>>>()?;
                trace!(
                    method = method.display_name(),
                    code_len = assembled.code.len(),
                    "assembled method"
                );
                bodies.push(AssembledBody {
                    method: id,
                    code: assembled.code,
                    exceptions,
                });
            }
        }

        w.write_index(bodies.len())?;
        for assembled in &bodies {
            let method = self.method(assembled.method)?;
            let Some(body) = method.body() else {
                continue;
            };
            w.write_u30(self.method_index(assembled.method)?);
            w.write_u30(body.max_stack);
            w.write_u30(body.local_count);
            w.write_u30(body.init_scope_depth);
            w.write_u30(body.max_scope_depth);
            w.write_index(assembled.code.len())?;
            w.write_bytes(&assembled.code);
            w.write_index(assembled.exceptions.len())?;
            for (handler, resolved) in body.exceptions().iter().zip(&assembled.exceptions) {
                w.write_u30(resolved.from.offset()?);
                w.write_u30(resolved.to.offset()?);
                w.write_u30(resolved.target.offset()?);
                w.write_u30(self.multiname_index(&handler.catch_type)?);
                w.write_u30(self.multiname_index(&handler.var_name)?);
            }
            self.write_traits(w, &body.traits)?;
        }
        Ok(bodies)
    }

    /// Emit one body, then patch jump placeholders
    fn assemble(&self, sequence: &[Emit<'_>]) -> Result<AssembledCode> {
        let mut w = AbcWriter::new();
        let mut positions: FxHashMap<InstrId, u32> = FxHashMap::default();
        let mut fixups: Vec<Fixup> = Vec::new();

        for item in sequence {
            let start = w.len();
            match item {
                Emit::DebugFile(file) => {
                    w.write_u8(Opcode::DebugFile.to_byte());
                    w.write_u30(self.strings.id_for_existing(&Some(file.clone()))?);
                }
                Emit::DebugLine(line) => {
                    w.write_u8(Opcode::DebugLine.to_byte());
                    w.write_u30(*line);
                }
                Emit::Instr(instr) => {
                    instruction::validate(instr.opcode(), instr.operands())?;
                    if positions.insert(instr.id(), start as u32).is_some() {
                        return Err(AbcError::construction(format!(
                            "instruction {} appears twice in one method",
                            instr.id().0
                        )));
                    }
                    w.write_u8(instr.opcode().to_byte());
                    let first = fixups.len();
                    for operand in instr.operands() {
                        if let Operand::Target(JumpTarget::Instr(target)) = operand {
                            fixups.push(Fixup {
                                at: w.len(),
                                base: 0,
                                target: *target,
                                source: start,
                            });
                        }
                        self.write_operand(&mut w, operand)?;
                    }
                    let base = if instr.opcode() == Opcode::LookupSwitch {
                        start
                    } else {
                        w.len()
                    };
                    for fixup in &mut fixups[first..] {
                        fixup.base = base;
                    }
                }
            }
        }

        for fixup in &fixups {
            let target = positions.get(&fixup.target).ok_or_else(|| {
                AbcError::construction(format!(
                    "jump at offset {} targets instruction {} outside its method",
                    fixup.source, fixup.target.0
                ))
            })?;
            let offset = i64::from(*target) - fixup.base as i64;
            let offset = i32::try_from(offset).map_err(|_| {
                AbcError::construction(format!("jump offset {offset} does not fit in 24 bits"))
            })?;
            w.patch_s24(fixup.at, offset)?;
        }

        Ok(AssembledCode {
            code: w.into_bytes(),
            positions,
        })
    }

    fn write_operand(&self, w: &mut AbcWriter, operand: &Operand) -> Result<()> {
        match operand {
            Operand::U8(v) => w.write_u8(*v),
            Operand::S8(v) => w.write_s8(*v),
            Operand::U30(v) => w.write_u30(*v),
            Operand::Int(v) => w.write_u30(self.ints.id_for_existing(&Some(*v))?),
            Operand::UInt(v) => w.write_u30(self.uints.id_for_existing(&Some(*v))?),
            Operand::Double(v) => w.write_u30(self.doubles.id_for_existing(&Some(v.to_bits()))?),
            Operand::String(s) => w.write_u30(self.strings.id_for_existing(&Some(s.clone()))?),
            Operand::Namespace(ns) => w.write_u30(self.namespaces.id_for_existing(ns)?),
            Operand::Multiname(name) => w.write_u30(self.multiname_index(name)?),
            Operand::Method(id) => w.write_u30(self.method_index(*id)?),
            Operand::Class(id) => w.write_u30(self.class_index(*id)?),
            // Placeholder, patched once every offset is known
            Operand::Target(JumpTarget::Instr(_)) => w.write_s24(0)?,
            Operand::Target(JumpTarget::Offset(raw)) => w.write_s24(*raw)?,
        }
        Ok(())
    }

    fn method(&self, id: MethodId) -> Result<&'a Method> {
        self.abc
            .method(id)
            .ok_or_else(|| AbcError::construction(format!("unknown method {}", id.0)))
    }

    fn class(&self, id: ClassId) -> Result<&'a crate::class::ClassDef> {
        self.abc
            .class(id)
            .ok_or_else(|| AbcError::construction(format!("unknown class {}", id.0)))
    }
}

/// Placeholder awaiting the target's final offset
struct Fixup {
    /// Position of the s24 placeholder
    at: usize,
    /// Offset the jump is relative to
    base: usize,
    target: InstrId,
    /// Start of the jumping instruction
    source: usize,
}

#[derive(Debug)]
struct AssembledCode {
    code: Vec<u8>,
    positions: FxHashMap<InstrId, u32>,
}

impl AssembledCode {
    fn position(&self, pos: CodePosition) -> Result<u32> {
        match pos {
            CodePosition::Instr(id) => self.positions.get(&id).copied().ok_or_else(|| {
                AbcError::construction(format!(
                    "exception range names instruction {} outside its method",
                    id.0
                ))
            }),
            CodePosition::End => Ok(self.code.len() as u32),
            CodePosition::Offset(offset) => Err(AbcError::invalid_state(format!(
                "exception range still holds raw offset {offset}"
            ))),
        }
    }

    fn exception(&self, handler: &ExceptionHandler) -> Result<ExceptionHandler> {
        Ok(ExceptionHandler {
            from: CodePosition::Offset(self.position(handler.from)?),
            to: CodePosition::Offset(self.position(handler.to)?),
            target: CodePosition::Offset(self.position(handler.target)?),
            catch_type: handler.catch_type.clone(),
            var_name: handler.var_name.clone(),
        })
    }
}

/// Swap the emitted state into the unit
fn commit(abc: &mut AbcFile, output: Output) {
    abc.pool = output.pool;
    abc.method_order = output.method_order;
    abc.class_order = output.class_order;
    for assembled in output.bodies {
        if let Some(body) = abc.methods[assembled.method.index()].body.as_mut() {
            body.code = Code::Bytes(assembled.code);
            body.exceptions = assembled.exceptions;
        }
    }
    abc.cached = Some(output.bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::NamespaceKind;
    use crate::method::MethodBuilder;

    fn instr(abc: &mut AbcFile, op: Opcode, operands: Vec<Operand>) -> Instruction {
        abc.create_instruction(op, operands).unwrap()
    }

    #[test]
    fn test_name_key() {
        assert_eq!(name_key(None), None);
        assert_eq!(name_key(Some(&Arc::from("*"))), None);
        assert_eq!(name_key(Some(&Arc::from("x"))), Some(Arc::from("x")));
    }

    #[test]
    fn test_jump_to_next_instruction_is_zero() {
        let mut abc = AbcFile::new();
        let label = instr(&mut abc, Opcode::Label, vec![]);
        let jump = instr(
            &mut abc,
            Opcode::Jump,
            vec![Operand::Target(JumpTarget::Instr(label.id()))],
        );
        let ret = instr(&mut abc, Opcode::ReturnVoid, vec![]);
        let options = EncodeOptions::default();
        let assembler = Assembler::new(&abc, &options);
        let code = assembler
            .assemble(&[Emit::Instr(&jump), Emit::Instr(&label), Emit::Instr(&ret)])
            .unwrap();
        assert_eq!(code.code, vec![0x10, 0x00, 0x00, 0x00, 0x09, 0x47]);
    }

    #[test]
    fn test_backward_jump_offset() {
        let mut abc = AbcFile::new();
        let first = instr(&mut abc, Opcode::Label, vec![]);
        let nop = instr(&mut abc, Opcode::Nop, vec![]);
        let jump = instr(
            &mut abc,
            Opcode::Jump,
            vec![Operand::Target(JumpTarget::Instr(first.id()))],
        );
        let options = EncodeOptions::default();
        let assembler = Assembler::new(&abc, &options);
        let code = assembler
            .assemble(&[Emit::Instr(&first), Emit::Instr(&nop), Emit::Instr(&jump)])
            .unwrap();
        // Three instructions, six bytes: target 0 - end 6
        assert_eq!(code.code, vec![0x09, 0x02, 0x10, 0xFA, 0xFF, 0xFF]);
    }

    #[test]
    fn test_lookupswitch_offsets_from_start() {
        let mut abc = AbcFile::new();
        let a = instr(&mut abc, Opcode::PushNull, vec![]);
        let b = instr(&mut abc, Opcode::ReturnVoid, vec![]);
        let switch = instr(
            &mut abc,
            Opcode::LookupSwitch,
            vec![
                Operand::Target(JumpTarget::Instr(a.id())),
                Operand::U30(0),
                Operand::Target(JumpTarget::Instr(b.id())),
            ],
        );
        let options = EncodeOptions::default();
        let assembler = Assembler::new(&abc, &options);
        let code = assembler
            .assemble(&[Emit::Instr(&switch), Emit::Instr(&a), Emit::Instr(&b)])
            .unwrap();
        assert_eq!(&code.code[1..4], &[8, 0, 0]);
        assert_eq!(&code.code[5..8], &[9, 0, 0]);
    }

    #[test]
    fn test_jump_outside_method_fails() {
        let mut abc = AbcFile::new();
        let elsewhere = instr(&mut abc, Opcode::Nop, vec![]);
        let jump = instr(
            &mut abc,
            Opcode::Jump,
            vec![Operand::Target(JumpTarget::Instr(elsewhere.id()))],
        );
        let options = EncodeOptions::default();
        let err = Assembler::new(&abc, &options)
            .assemble(&[Emit::Instr(&jump)])
            .unwrap_err();
        assert!(matches!(err, AbcError::Construction(_)));
    }

    #[test]
    fn test_literal_and_name_strings_are_distinct() {
        let mut abc = AbcFile::new();
        let push = instr(&mut abc, Opcode::PushString, vec![Operand::string("*")]);
        let ret = instr(&mut abc, Opcode::ReturnValue, vec![]);
        let init = abc
            .create_method(MethodBuilder::new().code(vec![push, ret]).frame(1, 1))
            .unwrap();
        abc.create_script(init, Vec::new()).unwrap();

        let bytes = abc.encode(&EncodeOptions::default()).unwrap();
        // The literal "*" gets a real entry after the sentinel
        assert_eq!(abc.pool().strings().len(), 2);
        assert!(!abc.is_tampered());

        let decoded = AbcFile::decode(&bytes).unwrap();
        assert_eq!(decoded.pool().strings().len(), 2);
    }

    #[test]
    fn test_main_class_is_registered_last() {
        let mut abc = AbcFile::new();
        let object = abc.create_adobe_class("Object").unwrap();
        let ns = abc.create_namespace(NamespaceKind::Package, "");
        let mut ids = Vec::new();
        for name in ["Main", "Helper"] {
            let ret = instr(&mut abc, Opcode::ReturnVoid, vec![]);
            let iinit = abc.create_method(MethodBuilder::new().code(vec![ret])).unwrap();
            let ret = instr(&mut abc, Opcode::ReturnVoid, vec![]);
            let cinit = abc.create_method(MethodBuilder::new().code(vec![ret])).unwrap();
            let qname = abc.create_qname(ns.clone(), name).unwrap();
            ids.push(
                abc.create_class(qname, &crate::class::As3Class::Adobe(object.clone()), iinit, cinit)
                    .unwrap(),
            );
        }

        abc.encode(&EncodeOptions::default().with_main_class("Main"))
            .unwrap();
        assert_eq!(abc.class_at(0), Some(ids[1]));
        assert_eq!(abc.class_at(1), Some(ids[0]));

        abc.mark_tampered().unwrap();
        let err = abc
            .encode(&EncodeOptions::default().with_main_class("Missing"))
            .unwrap_err();
        assert!(matches!(err, AbcError::Construction(_)));
    }
}

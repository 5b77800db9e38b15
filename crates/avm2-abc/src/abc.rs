//! Code container for one ABC unit
//!
//! [`AbcFile`] owns every table of a unit. Namespaces, multinames, classes,
//! methods and instructions are created through it so that anything the
//! graph refers to is registered in the right table.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::assembler::{self, EncodeOptions};
use crate::class::{AdobeClass, As3Class, ClassDef, ClassFlags, Metadata, Script};
use crate::constant::{
    ConstantPool, Multiname, MultinameKind, Namespace, NamespaceKind, NamespaceSet,
    TypeApplication,
};
use crate::disasm::{self, Tables};
use crate::error::{AbcError, Result};
use crate::instruction::{self, Instruction, Opcode};
use crate::listing::MethodListing;
use crate::method::{Method, MethodBuilder};
use crate::operand::{ClassId, InstrId, MethodId, Operand};
use crate::reader;
use crate::summary::UnitSummary;
use crate::traits::Trait;

/// Minor version written to and expected from every unit
pub const MINOR_VERSION: u16 = 16;
/// Major version written to and expected from every unit
pub const MAJOR_VERSION: u16 = 46;

/// One ABC unit: constant tables, methods, classes, scripts and metadata
///
/// Methods and classes live in arenas addressed by [`MethodId`] and
/// [`ClassId`]; their order in the wire tables is kept separately and may
/// change when the unit is re-encoded.
#[derive(Debug, Clone)]
pub struct AbcFile {
    pub(crate) pool: ConstantPool,
    pub(crate) methods: Vec<Method>,
    pub(crate) method_order: Vec<MethodId>,
    pub(crate) classes: Vec<ClassDef>,
    pub(crate) class_order: Vec<ClassId>,
    pub(crate) scripts: Vec<Script>,
    pub(crate) metadata: Vec<Metadata>,
    pub(crate) next_instr: u32,
    pub(crate) next_private: u32,
    pub(crate) cached: Option<Vec<u8>>,
}

impl Default for AbcFile {
    fn default() -> Self {
        Self::new()
    }
}

impl AbcFile {
    /// Create an empty unit
    pub fn new() -> Self {
        Self {
            pool: ConstantPool::new(),
            methods: Vec::new(),
            method_order: Vec::new(),
            classes: Vec::new(),
            class_order: Vec::new(),
            scripts: Vec::new(),
            metadata: Vec::new(),
            next_instr: 0,
            next_private: 1,
            cached: None,
        }
    }

    /// Decode a unit from the bytes of a `DoABC` payload
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        reader::decode(bytes)
    }

    /// Serialize the unit
    ///
    /// Returns the last emitted bytes unchanged unless the unit is tampered.
    pub fn encode(&mut self, options: &EncodeOptions) -> Result<Vec<u8>> {
        assembler::encode(self, options)
    }

    /// Constant tables
    pub fn pool(&self) -> &ConstantPool {
        &self.pool
    }

    // ---------------------------------------------------------------------
    // Creation
    // ---------------------------------------------------------------------

    /// Create and register a namespace
    ///
    /// Every private namespace created this way is distinct from all others.
    pub fn create_namespace(&mut self, kind: NamespaceKind, name: &str) -> Namespace {
        let private_id = if kind == NamespaceKind::Private {
            let id = self.next_private;
            self.next_private += 1;
            id
        } else {
            0
        };
        let ns = Namespace::new(kind, Arc::from(name), private_id);
        register_namespace(&mut self.pool, &ns);
        ns
    }

    /// Create and register a namespace set
    pub fn create_namespace_set(&mut self, namespaces: Vec<Namespace>) -> NamespaceSet {
        let set = NamespaceSet::new(namespaces);
        register_namespace_set(&mut self.pool, &set);
        set
    }

    /// Create and register a multiname, validating its fields against `kind`
    pub fn create_multiname(
        &mut self,
        kind: MultinameKind,
        name: Option<&str>,
        namespace: Option<Namespace>,
        ns_set: Option<NamespaceSet>,
    ) -> Result<Multiname> {
        if kind == MultinameKind::TypeName {
            return Err(AbcError::construction(
                "TypeName multinames are created with create_type_name",
            ));
        }
        let name = Multiname::new(kind, name.map(Arc::from), namespace, ns_set, None)?;
        register_multiname(&mut self.pool, &name);
        Ok(name)
    }

    /// Create and register `namespace::name`
    pub fn create_qname(&mut self, namespace: Namespace, name: &str) -> Result<Multiname> {
        self.create_multiname(MultinameKind::QName, Some(name), Some(namespace), None)
    }

    /// Create and register a generic type application such as `Vector.<int>`
    pub fn create_type_name(&mut self, base: Multiname, params: Vec<Multiname>) -> Result<Multiname> {
        if base.kind() == MultinameKind::TypeName {
            return Err(AbcError::construction("TypeName base cannot itself be a TypeName"));
        }
        let name = Multiname::new(
            MultinameKind::TypeName,
            None,
            None,
            None,
            Some(TypeApplication { base, params }),
        )?;
        register_multiname(&mut self.pool, &name);
        Ok(name)
    }

    /// Create an instruction, validating its operands and registering the
    /// constants they refer to
    pub fn create_instruction(&mut self, opcode: Opcode, operands: Vec<Operand>) -> Result<Instruction> {
        instruction::validate(opcode, &operands)?;
        for operand in &operands {
            match operand {
                Operand::Int(v) => {
                    intern(&mut self.pool.ints, *v);
                }
                Operand::UInt(v) => {
                    intern(&mut self.pool.uints, *v);
                }
                Operand::Double(v) => intern_double(&mut self.pool.doubles, *v),
                Operand::String(s) => {
                    intern(&mut self.pool.strings, s.clone());
                }
                Operand::Namespace(ns) => register_namespace(&mut self.pool, ns),
                Operand::Multiname(name) => register_multiname(&mut self.pool, name),
                Operand::Method(id) => {
                    self.check_method(*id)?;
                }
                Operand::Class(id) => {
                    self.check_class(*id)?;
                }
                Operand::U8(_) | Operand::S8(_) | Operand::U30(_) | Operand::Target(_) => {}
            }
        }
        let id = self.alloc_instr_id();
        Ok(Instruction::new_unchecked(id, opcode, operands))
    }

    /// Create and register a method
    pub fn create_method(&mut self, builder: MethodBuilder) -> Result<MethodId> {
        let method = builder.build()?;
        register_multiname(&mut self.pool, &method.return_type);
        for ty in &method.param_types {
            register_multiname(&mut self.pool, ty);
        }
        if let Some(name) = &method.name {
            intern(&mut self.pool.strings, name.clone());
        }
        let id = MethodId(self.methods.len() as u32);
        self.methods.push(method);
        self.method_order.push(id);
        self.cached = None;
        Ok(id)
    }

    /// Create and register a class extending `super_class`
    pub fn create_class(
        &mut self,
        name: Multiname,
        super_class: &As3Class,
        constructor: MethodId,
        static_init: MethodId,
    ) -> Result<ClassId> {
        self.check_method(constructor)?;
        self.check_method(static_init)?;
        let super_name = match super_class {
            As3Class::Defined(id) => self.check_class(*id)?.name.clone(),
            As3Class::Adobe(class) => class.name().clone(),
        };
        register_multiname(&mut self.pool, &name);
        register_multiname(&mut self.pool, &super_name);

        let id = ClassId(self.classes.len() as u32);
        self.classes.push(ClassDef {
            name,
            super_name,
            flags: ClassFlags::default(),
            protected_ns: None,
            interfaces: Vec::new(),
            constructor,
            instance_traits: Vec::new(),
            static_init,
            static_traits: Vec::new(),
        });
        self.class_order.push(id);
        self.cached = None;
        Ok(id)
    }

    /// Register a platform class by dotted name (`flash.display.Sprite`)
    pub fn create_adobe_class(&mut self, qualified_name: &str) -> Result<AdobeClass> {
        let (package, name) = qualified_name.rsplit_once('.').unwrap_or(("", qualified_name));
        let ns = self.create_namespace(NamespaceKind::Package, package);
        let name = self.create_qname(ns, name)?;
        Ok(AdobeClass::new(name))
    }

    /// Create a script entry; returns its index
    pub fn create_script(&mut self, init: MethodId, traits: Vec<Trait>) -> Result<usize> {
        self.check_method(init)?;
        for t in &traits {
            register_multiname(&mut self.pool, &t.name);
        }
        self.scripts.push(Script { init, traits });
        self.cached = None;
        Ok(self.scripts.len() - 1)
    }

    /// Append a metadata entry; returns the index traits refer to it by
    pub fn create_metadata(&mut self, name: &str, items: &[(Option<&str>, &str)]) -> u32 {
        let name: Arc<str> = Arc::from(name);
        intern(&mut self.pool.strings, name.clone());
        let items = items
            .iter()
            .map(|&(key, value)| {
                let key = key.map(Arc::<str>::from);
                let value: Arc<str> = Arc::from(value);
                if let Some(key) = &key {
                    intern(&mut self.pool.strings, key.clone());
                }
                intern(&mut self.pool.strings, value.clone());
                (key, value)
            })
            .collect();
        self.metadata.push(Metadata { name, items });
        self.cached = None;
        (self.metadata.len() - 1) as u32
    }

    pub(crate) fn alloc_instr_id(&mut self) -> InstrId {
        let id = InstrId(self.next_instr);
        self.next_instr += 1;
        id
    }

    fn check_method(&self, id: MethodId) -> Result<&Method> {
        self.methods
            .get(id.index())
            .ok_or_else(|| AbcError::construction(format!("unknown method {}", id.0)))
    }

    fn check_class(&self, id: ClassId) -> Result<&ClassDef> {
        self.classes
            .get(id.index())
            .ok_or_else(|| AbcError::construction(format!("unknown class {}", id.0)))
    }

    // ---------------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------------

    /// Method by handle
    pub fn method(&self, id: MethodId) -> Option<&Method> {
        self.methods.get(id.index())
    }

    /// Mutable method by handle; drops the cached unit bytes
    pub fn method_mut(&mut self, id: MethodId) -> Option<&mut Method> {
        self.cached = None;
        self.methods.get_mut(id.index())
    }

    /// Handle of the method at a wire index
    pub fn method_at(&self, index: usize) -> Option<MethodId> {
        self.method_order.get(index).copied()
    }

    /// Methods in wire order
    pub fn methods(&self) -> impl Iterator<Item = (MethodId, &Method)> + '_ {
        self.method_order
            .iter()
            .map(|&id| (id, &self.methods[id.index()]))
    }

    /// Number of methods
    pub fn method_count(&self) -> usize {
        self.method_order.len()
    }

    /// First method with the given name
    pub fn method_by_name(&self, name: &str) -> Option<MethodId> {
        self.methods()
            .find(|(_, m)| m.name.as_deref() == Some(name))
            .map(|(id, _)| id)
    }

    /// Class by handle
    pub fn class(&self, id: ClassId) -> Option<&ClassDef> {
        self.classes.get(id.index())
    }

    /// Mutable class by handle; drops the cached unit bytes
    pub fn class_mut(&mut self, id: ClassId) -> Option<&mut ClassDef> {
        self.cached = None;
        self.classes.get_mut(id.index())
    }

    /// Handle of the class at a wire index
    pub fn class_at(&self, index: usize) -> Option<ClassId> {
        self.class_order.get(index).copied()
    }

    /// Classes in wire order
    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &ClassDef)> + '_ {
        self.class_order
            .iter()
            .map(|&id| (id, &self.classes[id.index()]))
    }

    /// Number of classes
    pub fn class_count(&self) -> usize {
        self.class_order.len()
    }

    /// Class by dotted qualified name
    pub fn class_by_name(&self, qualified_name: &str) -> Option<ClassId> {
        self.classes()
            .find(|(_, c)| c.qualified_name().as_deref() == Some(qualified_name))
            .map(|(id, _)| id)
    }

    /// Resolve a class name to a local definition or a platform class
    pub fn resolve_class(&self, name: &Multiname) -> As3Class {
        self.classes()
            .find(|(_, c)| c.name == *name)
            .map(|(id, _)| As3Class::Defined(id))
            .unwrap_or_else(|| As3Class::Adobe(AdobeClass::new(name.clone())))
    }

    /// Scripts in wire order
    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    /// Mutable scripts; drops the cached unit bytes
    pub fn scripts_mut(&mut self) -> &mut Vec<Script> {
        self.cached = None;
        &mut self.scripts
    }

    /// Metadata table
    pub fn metadata(&self) -> &[Metadata] {
        &self.metadata
    }

    /// Metadata as group, key, value; keyless items use an empty key
    pub fn metadata_map(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        let mut map: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for entry in &self.metadata {
            let group = map.entry(entry.name.to_string()).or_default();
            for (key, value) in &entry.items {
                group.insert(
                    key.as_deref().unwrap_or_default().to_string(),
                    value.to_string(),
                );
            }
        }
        map
    }

    /// Every trait of the unit: class traits, script traits, then
    /// activation traits of method bodies
    pub fn all_traits(&self) -> impl Iterator<Item = &Trait> + '_ {
        let class_traits = self
            .classes()
            .flat_map(|(_, c)| c.instance_traits.iter().chain(&c.static_traits));
        let script_traits = self.scripts.iter().flat_map(|s| &s.traits);
        let body_traits = self
            .methods()
            .filter_map(|(_, m)| m.body())
            .flat_map(|b| &b.traits);
        class_traits.chain(script_traits).chain(body_traits)
    }

    /// Size and content overview
    pub fn summary(&self) -> UnitSummary {
        UnitSummary::from_unit(self)
    }

    /// Listing of one method
    ///
    /// The method is disassembled first, which marks the unit tampered.
    pub fn listing(&mut self, id: MethodId) -> Result<MethodListing<'_>> {
        self.disassemble_method(id)?;
        let method = self
            .method(id)
            .ok_or_else(|| AbcError::construction(format!("unknown method {}", id.0)))?;
        MethodListing::new(method)
    }

    // ---------------------------------------------------------------------
    // Dirty tracking
    // ---------------------------------------------------------------------

    /// Disassemble one method body in place
    pub fn disassemble_method(&mut self, id: MethodId) -> Result<()> {
        let Self {
            pool,
            methods,
            method_order,
            class_order,
            next_instr,
            cached,
            ..
        } = self;
        let method = methods
            .get_mut(id.index())
            .ok_or_else(|| AbcError::construction(format!("unknown method {}", id.0)))?;
        let tables = Tables {
            pool,
            methods: method_order,
            classes: class_order,
        };
        if disasm::disassemble_method(method, &tables, next_instr)? {
            *cached = None;
        }
        Ok(())
    }

    /// Bring every method body into instruction form
    pub fn disassemble(&mut self) -> Result<()> {
        let Self {
            pool,
            methods,
            method_order,
            class_order,
            next_instr,
            cached,
            ..
        } = self;
        let tables = Tables {
            pool,
            methods: method_order,
            classes: class_order,
        };
        let mut count = 0usize;
        for method in methods.iter_mut() {
            if disasm::disassemble_method(method, &tables, next_instr)? {
                count += 1;
            }
        }
        if count > 0 {
            *cached = None;
        }
        debug!(methods = count, "disassembled unit");
        Ok(())
    }

    /// Force a full rebuild on the next encode
    pub fn mark_tampered(&mut self) -> Result<()> {
        self.disassemble()?;
        self.cached = None;
        Ok(())
    }

    /// Check whether the unit must be re-encoded before it can be emitted
    pub fn is_tampered(&self) -> bool {
        self.cached.is_none() || self.methods.iter().any(Method::is_tampered)
    }
}

fn intern<T: PartialEq>(table: &mut Vec<T>, value: T) -> usize {
    match table.iter().position(|v| *v == value) {
        Some(index) => index,
        None => {
            table.push(value);
            table.len() - 1
        }
    }
}

fn intern_double(table: &mut Vec<f64>, value: f64) {
    if !table.iter().any(|v| v.to_bits() == value.to_bits()) {
        table.push(value);
    }
}

fn register_namespace(pool: &mut ConstantPool, ns: &Namespace) {
    intern(&mut pool.strings, ns.name_arc().clone());
    intern(&mut pool.namespaces, ns.clone());
}

fn register_namespace_set(pool: &mut ConstantPool, set: &NamespaceSet) {
    for ns in set.namespaces() {
        register_namespace(pool, ns);
    }
    intern(&mut pool.ns_sets, set.clone());
}

fn register_multiname(pool: &mut ConstantPool, name: &Multiname) {
    if let Some(s) = name.name_arc() {
        intern(&mut pool.strings, s.clone());
    }
    if let Some(ns) = name.namespace() {
        register_namespace(pool, ns);
    }
    if let Some(set) = name.namespace_set() {
        register_namespace_set(pool, set);
    }
    if let Some(app) = name.type_application() {
        register_multiname(pool, &app.base);
        for param in &app.params {
            register_multiname(pool, param);
        }
    }
    intern(&mut pool.multinames, name.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::JumpTarget;

    #[test]
    fn test_new_unit_is_tampered() {
        let abc = AbcFile::new();
        assert!(abc.is_tampered());
        assert_eq!(abc.method_count(), 0);
    }

    #[test]
    fn test_create_registers_constants() {
        let mut abc = AbcFile::new();
        let ns = abc.create_namespace(NamespaceKind::Package, "flash.display");
        let name = abc.create_qname(ns.clone(), "Sprite").unwrap();

        assert!(abc.pool().namespaces().contains(&ns));
        assert!(abc.pool().multinames().contains(&name));
        assert!(abc.pool().strings().iter().any(|s| &**s == "Sprite"));

        // Creating the same name twice does not grow the table
        let len = abc.pool().multinames().len();
        abc.create_qname(ns, "Sprite").unwrap();
        assert_eq!(abc.pool().multinames().len(), len);
    }

    #[test]
    fn test_private_namespaces_are_unique() {
        let mut abc = AbcFile::new();
        let a = abc.create_namespace(NamespaceKind::Private, "");
        let b = abc.create_namespace(NamespaceKind::Private, "");
        assert_ne!(a, b);
        assert_eq!(
            abc.create_namespace(NamespaceKind::Package, ""),
            abc.create_namespace(NamespaceKind::Package, "")
        );
    }

    #[test]
    fn test_create_multiname_validates() {
        let mut abc = AbcFile::new();
        let err = abc
            .create_multiname(MultinameKind::QName, Some("x"), None, None)
            .unwrap_err();
        assert!(matches!(err, AbcError::Construction(_)));

        let set = abc.create_namespace_set(Vec::new());
        let any = abc
            .create_multiname(MultinameKind::Multiname, None, None, Some(set))
            .unwrap();
        assert!(any.is_any());
    }

    #[test]
    fn test_create_type_name() {
        let mut abc = AbcFile::new();
        let vec_ns = abc.create_namespace(NamespaceKind::Package, "__AS3__.vec");
        let vector = abc.create_qname(vec_ns, "Vector").unwrap();
        let public = abc.create_namespace(NamespaceKind::Package, "");
        let int = abc.create_qname(public, "int").unwrap();
        let applied = abc.create_type_name(vector.clone(), vec![int.clone()]).unwrap();

        let app = applied.type_application().unwrap();
        assert_eq!(app.base, vector);
        assert_eq!(app.params, vec![int]);
        assert!(abc.create_type_name(applied, Vec::new()).is_err());
    }

    #[test]
    fn test_create_instruction_checks_operands() {
        let mut abc = AbcFile::new();
        let a = abc.create_instruction(Opcode::PushString, vec![Operand::string("hi")]).unwrap();
        let b = abc
            .create_instruction(Opcode::Jump, vec![Operand::Target(JumpTarget::Instr(a.id()))])
            .unwrap();
        assert_ne!(a.id(), b.id());
        assert!(abc.pool().strings().iter().any(|s| &**s == "hi"));

        let err = abc
            .create_instruction(Opcode::NewFunction, vec![Operand::Method(MethodId(9))])
            .unwrap_err();
        assert!(matches!(err, AbcError::Construction(_)));
        assert!(abc.create_instruction(Opcode::GetLocal, vec![]).is_err());
    }

    #[test]
    fn test_classes_and_resolution() {
        let mut abc = AbcFile::new();
        let sprite = abc.create_adobe_class("flash.display.Sprite").unwrap();
        assert_eq!(sprite.qualified_name().as_deref(), Some("flash.display.Sprite"));

        let ret = abc.create_instruction(Opcode::ReturnVoid, vec![]).unwrap();
        let iinit = abc.create_method(MethodBuilder::new().code(vec![ret])).unwrap();
        let cinit = abc.create_method(MethodBuilder::new()).unwrap();
        let ns = abc.create_namespace(NamespaceKind::Package, "game");
        let name = abc.create_qname(ns, "Main").unwrap();
        let id = abc
            .create_class(name.clone(), &As3Class::Adobe(sprite.clone()), iinit, cinit)
            .unwrap();

        assert_eq!(abc.class_by_name("game.Main"), Some(id));
        assert_eq!(abc.resolve_class(&name), As3Class::Defined(id));
        assert_eq!(abc.resolve_class(sprite.name()), As3Class::Adobe(sprite.clone()));
        assert_eq!(abc.class(id).unwrap().super_name, *sprite.name());
        assert!(
            abc.create_class(name, &As3Class::Defined(ClassId(5)), iinit, cinit)
                .is_err()
        );
    }

    #[test]
    fn test_metadata_map() {
        let mut abc = AbcFile::new();
        let index = abc.create_metadata("Event", &[(Some("name"), "change"), (None, "flag")]);
        assert_eq!(index, 0);
        assert_eq!(abc.metadata()[0].items[1].0, None);
        let map = abc.metadata_map();
        assert_eq!(map["Event"]["name"], "change");
        assert_eq!(map["Event"][""], "flag");
    }
}

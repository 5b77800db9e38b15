//! ABC unit decoder
//!
//! Reads the tables in file order: constant pool, method signatures,
//! metadata, instance and class declarations, scripts, method bodies. Method
//! bodies keep their bytes; each one is decoded once up front so that a unit
//! which decodes successfully can always be disassembled later.

use std::sync::Arc;

use tracing::debug;

use crate::abc::{AbcFile, MAJOR_VERSION, MINOR_VERSION};
use crate::class::{ClassDef, ClassFlags, Metadata, Script};
use crate::constant::{
    ConstantPool, Multiname, MultinameKind, Namespace, NamespaceKind, NamespaceSet,
    TypeApplication,
};
use crate::disasm::{self, Tables};
use crate::error::{AbcError, Result};
use crate::method::{Code, ExceptionHandler, Method, MethodBody, MethodFlags};
use crate::operand::{ClassId, CodePosition, MethodId};
use crate::packed::AbcReader;
use crate::traits::{DefaultValue, Trait, TraitAttributes, TraitKind};

/// Decode one unit
pub(crate) fn decode(bytes: &[u8]) -> Result<AbcFile> {
    let mut r = AbcReader::new(bytes);
    let minor = r.read_u16()?;
    let major = r.read_u16()?;
    if (major, minor) != (MAJOR_VERSION, MINOR_VERSION) {
        return Err(AbcError::UnsupportedVersion { major, minor });
    }

    let pool = read_pool(&mut r)?;
    let mut unit = UnitReader {
        r,
        pool,
        method_count: 0,
        class_count: 0,
        metadata_count: 0,
    };

    let mut abc = AbcFile::new();

    unit.method_count = unit.r.read_index()?;
    for i in 0..unit.method_count {
        abc.methods.push(unit.method_info()?);
        abc.method_order.push(MethodId(i as u32));
    }

    unit.metadata_count = unit.r.read_index()?;
    for _ in 0..unit.metadata_count {
        abc.metadata.push(unit.metadata()?);
    }

    unit.class_count = unit.r.read_index()?;
    for i in 0..unit.class_count {
        abc.classes.push(unit.instance_info()?);
        abc.class_order.push(ClassId(i as u32));
    }
    for class in &mut abc.classes {
        class.static_init = unit.method_ref()?;
        class.static_traits = unit.traits()?;
    }

    let script_count = unit.r.read_index()?;
    for _ in 0..script_count {
        let init = unit.method_ref()?;
        let traits = unit.traits()?;
        abc.scripts.push(Script { init, traits });
    }

    let body_count = unit.r.read_index()?;
    for _ in 0..body_count {
        let offset = unit.r.position();
        let id = unit.method_ref()?;
        let body = unit.method_body()?;
        let method = &mut abc.methods[id.index()];
        if method.body.is_some() {
            return Err(AbcError::parse(
                offset,
                format!("method {} has more than one body", id.0),
            ));
        }
        method.body = Some(body);
    }

    if !unit.r.is_empty() {
        return Err(AbcError::parse(
            unit.r.position(),
            format!("{} trailing bytes after method bodies", unit.r.remaining()),
        ));
    }

    abc.next_private = unit.pool.namespaces.len() as u32;
    abc.pool = unit.pool;
    verify_bodies(&mut abc)?;
    abc.cached = Some(bytes.to_vec());

    debug!(
        bytes = bytes.len(),
        strings = abc.pool.strings.len(),
        multinames = abc.pool.multinames.len(),
        methods = abc.methods.len(),
        classes = abc.classes.len(),
        scripts = abc.scripts.len(),
        "decoded abc unit"
    );
    Ok(abc)
}

/// Decode every body once, discarding the instructions, and record each
/// method's source file
fn verify_bodies(abc: &mut AbcFile) -> Result<()> {
    let tables = Tables {
        pool: &abc.pool,
        methods: &abc.method_order,
        classes: &abc.class_order,
    };
    let mut scratch_ids = 0;
    for method in &mut abc.methods {
        let Some(body) = &method.body else {
            continue;
        };
        let Code::Bytes(bytes) = &body.code else {
            continue;
        };
        let decoded = disasm::decode_code(bytes, &tables, &mut scratch_ids)?;
        disasm::resolve_exceptions(&body.exceptions, &decoded)?;
        method.source_file = decoded.source_file;
    }
    Ok(())
}

fn read_pool(r: &mut AbcReader<'_>) -> Result<ConstantPool> {
    let mut pool = ConstantPool::new();

    for _ in 1..r.read_index()?.max(1) {
        pool.ints.push(r.read_s32()?);
    }
    for _ in 1..r.read_index()?.max(1) {
        pool.uints.push(r.read_u32()?);
    }
    for _ in 1..r.read_index()?.max(1) {
        pool.doubles.push(r.read_d64()?);
    }
    for _ in 1..r.read_index()?.max(1) {
        pool.strings.push(Arc::from(r.read_string()?));
    }

    for i in 1..r.read_index()?.max(1) {
        let offset = r.position();
        let tag = r.read_u8()?;
        let kind = NamespaceKind::from_byte(tag)
            .ok_or_else(|| AbcError::parse(offset, format!("unknown namespace kind {tag:#04x}")))?;
        let name = string_at(&pool, r)?;
        // Private namespaces are told apart by their table index
        pool.namespaces.push(Namespace::new(kind, name, i as u32));
    }

    for _ in 1..r.read_index()?.max(1) {
        let count = r.read_index()?;
        let mut members = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            let offset = r.position();
            let index = r.read_index()?;
            let ns = pool
                .namespace(index)
                .cloned()
                .ok_or_else(|| AbcError::parse(offset, format!("namespace index {index} out of range")))?;
            members.push(ns);
        }
        pool.ns_sets.push(NamespaceSet::new(members));
    }

    read_multinames(r, &mut pool)?;
    Ok(pool)
}

fn string_at(pool: &ConstantPool, r: &mut AbcReader<'_>) -> Result<Arc<str>> {
    let offset = r.position();
    let index = r.read_index()?;
    pool.string(index)
        .cloned()
        .ok_or_else(|| AbcError::parse(offset, format!("string index {index} out of range")))
}

const MAX_TYPE_NESTING: usize = 64;

/// Multiname entry before `TypeName` references are resolved
enum RawMultiname {
    Plain(Multiname),
    TypeName {
        offset: usize,
        base: usize,
        params: Vec<usize>,
    },
}

fn read_multinames(r: &mut AbcReader<'_>, pool: &mut ConstantPool) -> Result<()> {
    let count = r.read_index()?;
    let mut raw = Vec::with_capacity(count.min(r.remaining()));
    raw.push(RawMultiname::Plain(Multiname::any()));

    for _ in 1..count.max(1) {
        let offset = r.position();
        let tag = r.read_u8()?;
        let kind = MultinameKind::from_byte(tag)
            .ok_or_else(|| AbcError::parse(offset, format!("unknown multiname kind {tag:#04x}")))?;

        let entry = if kind == MultinameKind::TypeName {
            let base = r.read_index()?;
            let param_count = r.read_index()?;
            let mut params = Vec::with_capacity(param_count.min(r.remaining()));
            for _ in 0..param_count {
                params.push(r.read_index()?);
            }
            RawMultiname::TypeName {
                offset,
                base,
                params,
            }
        } else {
            let namespace = if kind.has_namespace() {
                let index = r.read_index()?;
                Some(pool.namespace(index).cloned().ok_or_else(|| {
                    AbcError::parse(offset, format!("namespace index {index} out of range"))
                })?)
            } else {
                None
            };
            let name = if kind.has_name() {
                Some(string_at(pool, r)?)
            } else {
                None
            };
            let ns_set = if kind.has_namespace_set() {
                let index = r.read_index()?;
                Some(pool.namespace_set(index).cloned().ok_or_else(|| {
                    AbcError::parse(offset, format!("namespace set index {index} out of range"))
                })?)
            } else {
                None
            };
            let name = Multiname::new(kind, name, namespace, ns_set, None)
                .map_err(|e| AbcError::parse(offset, e.to_string()))?;
            RawMultiname::Plain(name)
        };
        raw.push(entry);
    }

    // TypeName entries may refer to entries further down the table
    let mut resolved: Vec<Option<Multiname>> = vec![None; raw.len()];
    for i in 1..raw.len() {
        let name = resolve_multiname(i, &raw, &mut resolved, 0)?;
        pool.multinames.push(name);
    }
    Ok(())
}

fn resolve_multiname(
    index: usize,
    raw: &[RawMultiname],
    resolved: &mut [Option<Multiname>],
    depth: usize,
) -> Result<Multiname> {
    if let Some(name) = &resolved[index] {
        return Ok(name.clone());
    }
    let name = match &raw[index] {
        RawMultiname::Plain(name) => name.clone(),
        RawMultiname::TypeName {
            offset,
            base,
            params,
        } => {
            if depth > MAX_TYPE_NESTING {
                return Err(AbcError::parse(*offset, "TypeName nesting too deep or cyclic"));
            }
            let lookup = |i: usize, resolved: &mut [Option<Multiname>]| -> Result<Multiname> {
                if i >= raw.len() {
                    return Err(AbcError::parse(*offset, format!("multiname index {i} out of range")));
                }
                resolve_multiname(i, raw, resolved, depth + 1)
            };
            let base = lookup(*base, resolved)?;
            let params = params
                .iter()
                .map(|&p| lookup(p, resolved))
                .collect::<Result<Vec<_>>>()?;
            Multiname::new(
                MultinameKind::TypeName,
                None,
                None,
                None,
                Some(TypeApplication { base, params }),
            )
            .map_err(|e| AbcError::parse(*offset, e.to_string()))?
        }
    };
    resolved[index] = Some(name.clone());
    Ok(name)
}

/// Cursor plus the tables needed to resolve indices after the pool
struct UnitReader<'a> {
    r: AbcReader<'a>,
    pool: ConstantPool,
    method_count: usize,
    class_count: usize,
    metadata_count: usize,
}

impl UnitReader<'_> {
    fn string(&mut self) -> Result<Arc<str>> {
        string_at(&self.pool, &mut self.r)
    }

    /// String in a name position: index 0 means no name
    fn name(&mut self) -> Result<Option<Arc<str>>> {
        let offset = self.r.position();
        match self.r.read_index()? {
            0 => Ok(None),
            index => self.pool.string(index).cloned().map(Some).ok_or_else(|| {
                AbcError::parse(offset, format!("string index {index} out of range"))
            }),
        }
    }

    fn multiname(&mut self) -> Result<Multiname> {
        let offset = self.r.position();
        let index = self.r.read_index()?;
        self.pool
            .multiname(index)
            .cloned()
            .ok_or_else(|| AbcError::parse(offset, format!("multiname index {index} out of range")))
    }

    fn namespace(&mut self) -> Result<Namespace> {
        let offset = self.r.position();
        let index = self.r.read_index()?;
        self.pool
            .namespace(index)
            .cloned()
            .ok_or_else(|| AbcError::parse(offset, format!("namespace index {index} out of range")))
    }

    fn method_ref(&mut self) -> Result<MethodId> {
        let offset = self.r.position();
        let index = self.r.read_index()?;
        if index >= self.method_count {
            return Err(AbcError::parse(offset, format!("method index {index} out of range")));
        }
        Ok(MethodId(index as u32))
    }

    /// Class indices are checked against the declared count, so traits may
    /// name classes that are read later
    fn class_ref(&mut self) -> Result<ClassId> {
        let offset = self.r.position();
        let index = self.r.read_index()?;
        if index >= self.class_count {
            return Err(AbcError::parse(offset, format!("class index {index} out of range")));
        }
        Ok(ClassId(index as u32))
    }

    fn default_value(&self, offset: usize, index: usize, kind: u8) -> Result<DefaultValue> {
        let missing = || AbcError::parse(offset, format!("value index {index} out of range"));
        Ok(match kind {
            DefaultValue::INT => DefaultValue::Int(self.pool.int(index).ok_or_else(missing)?),
            DefaultValue::UINT => DefaultValue::UInt(self.pool.uint(index).ok_or_else(missing)?),
            DefaultValue::DOUBLE => {
                DefaultValue::Double(self.pool.double(index).ok_or_else(missing)?)
            }
            DefaultValue::UTF8 => {
                DefaultValue::Utf8(self.pool.string(index).cloned().ok_or_else(missing)?)
            }
            DefaultValue::TRUE => DefaultValue::True,
            DefaultValue::FALSE => DefaultValue::False,
            DefaultValue::NULL => DefaultValue::Null,
            DefaultValue::UNDEFINED => DefaultValue::Undefined,
            other => match NamespaceKind::from_byte(other) {
                Some(_) => {
                    DefaultValue::Namespace(self.pool.namespace(index).cloned().ok_or_else(missing)?)
                }
                None => {
                    return Err(AbcError::parse(
                        offset,
                        format!("unknown value kind {other:#04x}"),
                    ));
                }
            },
        })
    }

    fn method_info(&mut self) -> Result<Method> {
        let param_count = self.r.read_index()?;
        let return_type = self.multiname()?;
        let mut param_types = Vec::with_capacity(param_count.min(self.r.remaining()));
        for _ in 0..param_count {
            param_types.push(self.multiname()?);
        }
        let name = self.name()?;
        let flag_byte = self.r.read_u8()?;

        let mut optional = Vec::new();
        if flag_byte & MethodFlags::HAS_OPTIONAL != 0 {
            let offset = self.r.position();
            let count = self.r.read_index()?;
            if count > param_count {
                return Err(AbcError::parse(
                    offset,
                    format!("{count} optional values for {param_count} parameters"),
                ));
            }
            for _ in 0..count {
                let offset = self.r.position();
                let index = self.r.read_index()?;
                let kind = self.r.read_u8()?;
                optional.push(self.default_value(offset, index, kind)?);
            }
        }

        let mut param_names = Vec::new();
        if flag_byte & MethodFlags::HAS_PARAM_NAMES != 0 {
            for _ in 0..param_count {
                param_names.push(self.string()?);
            }
        }

        Ok(Method {
            name,
            return_type,
            param_types,
            optional,
            param_names,
            flags: MethodFlags::from_byte(flag_byte),
            source_file: None,
            body: None,
        })
    }

    fn metadata(&mut self) -> Result<Metadata> {
        let name = self.string()?;
        let count = self.r.read_index()?;
        let mut items = Vec::with_capacity(count.min(self.r.remaining()));
        for _ in 0..count {
            let key = self.name()?;
            let value = self.string()?;
            items.push((key, value));
        }
        Ok(Metadata { name, items })
    }

    fn instance_info(&mut self) -> Result<ClassDef> {
        let name = self.multiname()?;
        let super_name = self.multiname()?;
        let flag_byte = self.r.read_u8()?;
        let protected_ns = if flag_byte & ClassFlags::PROTECTED_NS != 0 {
            Some(self.namespace()?)
        } else {
            None
        };
        let count = self.r.read_index()?;
        let mut interfaces = Vec::with_capacity(count.min(self.r.remaining()));
        for _ in 0..count {
            interfaces.push(self.multiname()?);
        }
        let constructor = self.method_ref()?;
        let instance_traits = self.traits()?;
        Ok(ClassDef {
            name,
            super_name,
            flags: ClassFlags::from_byte(flag_byte),
            protected_ns,
            interfaces,
            constructor,
            instance_traits,
            // Filled in by the static-side pass
            static_init: constructor,
            static_traits: Vec::new(),
        })
    }

    fn traits(&mut self) -> Result<Vec<Trait>> {
        let count = self.r.read_index()?;
        let mut traits = Vec::with_capacity(count.min(self.r.remaining()));
        for _ in 0..count {
            traits.push(self.trait_info()?);
        }
        Ok(traits)
    }

    fn trait_info(&mut self) -> Result<Trait> {
        let name = self.multiname()?;
        let offset = self.r.position();
        let kind_byte = self.r.read_u8()?;
        let attr_bits = kind_byte >> 4;

        let kind = match kind_byte & 0x0F {
            tag @ (TraitKind::SLOT | TraitKind::CONST) => {
                let slot_id = self.r.read_u30()?;
                let type_name = self.multiname()?;
                let value_offset = self.r.position();
                let index = self.r.read_index()?;
                let value = if index == 0 {
                    None
                } else {
                    let kind = self.r.read_u8()?;
                    Some(self.default_value(value_offset, index, kind)?)
                };
                if tag == TraitKind::SLOT {
                    TraitKind::Slot {
                        slot_id,
                        type_name,
                        value,
                    }
                } else {
                    TraitKind::Const {
                        slot_id,
                        type_name,
                        value,
                    }
                }
            }
            tag @ (TraitKind::METHOD | TraitKind::GETTER | TraitKind::SETTER) => {
                let disp_id = self.r.read_u30()?;
                let method = self.method_ref()?;
                match tag {
                    TraitKind::METHOD => TraitKind::Method { disp_id, method },
                    TraitKind::GETTER => TraitKind::Getter { disp_id, method },
                    _ => TraitKind::Setter { disp_id, method },
                }
            }
            TraitKind::CLASS => {
                let slot_id = self.r.read_u30()?;
                let class = self.class_ref()?;
                TraitKind::Class { slot_id, class }
            }
            TraitKind::FUNCTION => {
                let slot_id = self.r.read_u30()?;
                let method = self.method_ref()?;
                TraitKind::Function { slot_id, method }
            }
            tag => {
                return Err(AbcError::parse(offset, format!("unknown trait kind {tag}")));
            }
        };

        let mut metadata = Vec::new();
        if attr_bits & TraitAttributes::METADATA != 0 {
            let count = self.r.read_index()?;
            for _ in 0..count {
                let offset = self.r.position();
                let index = self.r.read_index()?;
                if index >= self.metadata_count {
                    return Err(AbcError::parse(
                        offset,
                        format!("metadata index {index} out of range"),
                    ));
                }
                metadata.push(index as u32);
            }
        }

        Ok(Trait {
            name,
            kind,
            attrs: TraitAttributes::from_bits(attr_bits),
            metadata,
        })
    }

    fn method_body(&mut self) -> Result<MethodBody> {
        let max_stack = self.r.read_u30()?;
        let local_count = self.r.read_u30()?;
        let init_scope_depth = self.r.read_u30()?;
        let max_scope_depth = self.r.read_u30()?;
        let code_len = self.r.read_index()?;
        let code = self.r.read_bytes(code_len)?.to_vec();

        let count = self.r.read_index()?;
        let mut exceptions = Vec::with_capacity(count.min(self.r.remaining()));
        for _ in 0..count {
            let from = CodePosition::Offset(self.r.read_u30()?);
            let to = CodePosition::Offset(self.r.read_u30()?);
            let target = CodePosition::Offset(self.r.read_u30()?);
            let catch_type = self.multiname()?;
            let var_name = self.multiname()?;
            exceptions.push(ExceptionHandler {
                from,
                to,
                target,
                catch_type,
                var_name,
            });
        }
        let traits = self.traits()?;

        Ok(MethodBody {
            max_stack,
            local_count,
            init_scope_depth,
            max_scope_depth,
            traits,
            code: Code::Bytes(code),
            exceptions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn header() -> Vec<u8> {
        vec![16, 0, 46, 0]
    }

    /// Empty pool, no methods, metadata, classes, scripts or bodies
    fn empty_unit() -> Vec<u8> {
        let mut bytes = header();
        bytes.extend_from_slice(&[0; 7]);
        bytes.extend_from_slice(&[0; 5]);
        bytes
    }

    #[test]
    fn test_decode_empty_unit() {
        let abc = decode(&empty_unit()).unwrap();
        assert!(!abc.is_tampered());
        assert_eq!(abc.method_count(), 0);
        assert!(abc.pool().multiname(0).unwrap().is_any());
        assert!(abc.pool().string(0).is_some());
    }

    #[test]
    fn test_bad_version() {
        let mut bytes = empty_unit();
        bytes[2] = 47;
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, AbcError::UnsupportedVersion { major: 47, minor: 16 }));
    }

    #[test]
    fn test_truncated_unit() {
        let bytes = empty_unit();
        let err = decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = empty_unit();
        bytes.push(0);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_pool_tables() {
        let mut bytes = header();
        bytes.extend_from_slice(&[2, 0x05]); // ints: 5
        bytes.extend_from_slice(&[0]); // uints
        bytes.extend_from_slice(&[0]); // doubles
        bytes.extend_from_slice(&[3, 1, b'a', 0]); // strings: "a", ""
        bytes.extend_from_slice(&[3, 0x16, 2, 0x05, 2]); // package "", private ""
        bytes.extend_from_slice(&[2, 2, 1, 2]); // set {package "", private ""}
        // QName(package "", "a"), then TypeName(#1<#1>)
        bytes.extend_from_slice(&[3, 0x07, 1, 1, 0x1D, 1, 1, 1]);
        bytes.extend_from_slice(&[0; 5]);

        let abc = decode(&bytes).unwrap();
        let pool = abc.pool();
        assert_eq!(pool.ints(), &[0, 5]);
        assert_eq!(&*pool.strings()[2], "");
        assert_eq!(pool.namespace(2).unwrap().kind(), NamespaceKind::Private);
        assert_eq!(pool.namespace(2).unwrap().private_id(), 2);
        assert_eq!(pool.namespace_set(1).unwrap().len(), 2);
        let qname = pool.multiname(1).unwrap();
        assert_eq!(qname.qualified_name().as_deref(), Some("a"));
        let app = pool.multiname(2).unwrap().type_application().unwrap();
        assert_eq!(app.base, *qname);
    }

    #[test]
    fn test_unknown_multiname_kind() {
        let mut bytes = header();
        bytes.extend_from_slice(&[0, 0, 0, 0, 0, 0, 2, 0x42]);
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("unknown multiname kind 0x42"));
    }
}

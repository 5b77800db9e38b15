//! Classes, scripts and metadata

use std::sync::Arc;

use serde::Serialize;

use crate::constant::{Multiname, Namespace};
use crate::operand::{ClassId, MethodId};
use crate::traits::Trait;

/// Instance flags of a class
///
/// The protected-namespace bit is not stored; it follows from
/// [`ClassDef::protected_ns`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassFlags {
    /// Instances cannot gain dynamic properties
    pub sealed: bool,
    /// Cannot be subclassed
    pub is_final: bool,
    /// Interface declaration
    pub interface: bool,
}

impl ClassFlags {
    const SEALED: u8 = 0x01;
    const FINAL: u8 = 0x02;
    const INTERFACE: u8 = 0x04;
    pub(crate) const PROTECTED_NS: u8 = 0x08;

    pub(crate) fn from_byte(byte: u8) -> Self {
        Self {
            sealed: byte & Self::SEALED != 0,
            is_final: byte & Self::FINAL != 0,
            interface: byte & Self::INTERFACE != 0,
        }
    }

    pub(crate) fn to_byte(self, has_protected_ns: bool) -> u8 {
        let mut byte = 0;
        if self.sealed {
            byte |= Self::SEALED;
        }
        if self.is_final {
            byte |= Self::FINAL;
        }
        if self.interface {
            byte |= Self::INTERFACE;
        }
        if has_protected_ns {
            byte |= Self::PROTECTED_NS;
        }
        byte
    }
}

/// A class defined in this unit: instance side plus static side
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    /// Qualified class name
    pub name: Multiname,
    /// Superclass name; the any multiname for root classes
    pub super_name: Multiname,
    /// Flags
    pub flags: ClassFlags,
    /// Namespace of protected members
    pub protected_ns: Option<Namespace>,
    /// Implemented interfaces
    pub interfaces: Vec<Multiname>,
    /// Instance initializer
    pub constructor: MethodId,
    /// Instance traits
    pub instance_traits: Vec<Trait>,
    /// Static initializer
    pub static_init: MethodId,
    /// Static traits
    pub static_traits: Vec<Trait>,
}

impl ClassDef {
    /// Dotted qualified name
    pub fn qualified_name(&self) -> Option<String> {
        self.name.qualified_name()
    }

    /// Methods owned by this class declaration: initializers first, then
    /// trait methods in declaration order
    pub fn methods(&self) -> impl Iterator<Item = MethodId> + '_ {
        [self.constructor, self.static_init].into_iter().chain(
            self.instance_traits
                .iter()
                .chain(&self.static_traits)
                .filter_map(|t| t.kind.method()),
        )
    }
}

/// A platform class referenced by name but not defined in this unit
/// (e.g. `flash.display.MovieClip`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdobeClass {
    name: Multiname,
}

impl AdobeClass {
    pub(crate) fn new(name: Multiname) -> Self {
        Self { name }
    }

    /// Class name
    pub fn name(&self) -> &Multiname {
        &self.name
    }

    /// Dotted qualified name
    pub fn qualified_name(&self) -> Option<String> {
        self.name.qualified_name()
    }
}

/// Any class a unit can refer to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum As3Class {
    /// Defined in this unit
    Defined(ClassId),
    /// Provided by the player
    Adobe(AdobeClass),
}

/// A script: entry method plus its global traits
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    /// Script initializer
    pub init: MethodId,
    /// Global traits
    pub traits: Vec<Trait>,
}

/// One metadata entry (`[Event(name="change")]`)
///
/// Informational only; traits refer to entries by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Tag name
    pub name: Arc<str>,
    /// Items as key/value pairs; keyless items have no key
    pub items: Vec<(Option<Arc<str>>, Arc<str>)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::TraitKind;

    #[test]
    fn test_class_flags() {
        let flags = ClassFlags::from_byte(0x0B);
        assert!(flags.sealed && flags.is_final && !flags.interface);
        assert_eq!(flags.to_byte(true), 0x0B);
        assert_eq!(flags.to_byte(false), 0x03);
    }

    #[test]
    fn test_class_methods() {
        let class = ClassDef {
            name: Multiname::any(),
            super_name: Multiname::any(),
            flags: ClassFlags::default(),
            protected_ns: None,
            interfaces: Vec::new(),
            constructor: MethodId(1),
            instance_traits: vec![Trait::method(Multiname::any(), MethodId(3))],
            static_init: MethodId(2),
            static_traits: vec![
                Trait::slot(Multiname::any(), 1),
                Trait::new(
                    Multiname::any(),
                    TraitKind::Getter {
                        disp_id: 0,
                        method: MethodId(4),
                    },
                ),
            ],
        };
        let ids: Vec<_> = class.methods().collect();
        assert_eq!(ids, vec![MethodId(1), MethodId(2), MethodId(3), MethodId(4)]);
    }
}

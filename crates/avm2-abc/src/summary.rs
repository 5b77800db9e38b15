//! Serializable overview of a unit

use std::fmt;

use serde::Serialize;

use crate::abc::{AbcFile, MAJOR_VERSION, MINOR_VERSION};
use crate::class::ClassFlags;
use crate::error::{AbcError, Result};

/// Table sizes and class list of one unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitSummary {
    /// `major.minor`
    pub version: String,
    /// Integer constants, sentinel included
    pub ints: usize,
    /// Unsigned constants, sentinel included
    pub uints: usize,
    /// Double constants, sentinel included
    pub doubles: usize,
    /// Strings, sentinel included
    pub strings: usize,
    /// Namespaces, sentinel included
    pub namespaces: usize,
    /// Namespace sets, sentinel included
    pub namespace_sets: usize,
    /// Multinames, sentinel included
    pub multinames: usize,
    /// Method signatures
    pub methods: usize,
    /// Methods with a body
    pub bodies: usize,
    /// Script entries
    pub scripts: usize,
    /// Metadata entries
    pub metadata: usize,
    /// Classes in wire order
    pub classes: Vec<ClassSummary>,
    /// Whether the next encode rebuilds the unit
    pub tampered: bool,
}

/// One class line of a [`UnitSummary`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassSummary {
    /// Dotted name
    pub name: String,
    /// Dotted superclass name; absent for root classes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub super_name: Option<String>,
    /// Flags
    pub flags: ClassFlags,
    /// Number of instance traits
    pub instance_traits: usize,
    /// Number of static traits
    pub static_traits: usize,
}

impl UnitSummary {
    pub(crate) fn from_unit(abc: &AbcFile) -> Self {
        let pool = abc.pool();
        let classes = abc
            .classes()
            .map(|(_, class)| ClassSummary {
                name: class
                    .qualified_name()
                    .unwrap_or_else(|| class.name.to_string()),
                super_name: if class.super_name.is_any() {
                    None
                } else {
                    class.super_name.qualified_name()
                },
                flags: class.flags,
                instance_traits: class.instance_traits.len(),
                static_traits: class.static_traits.len(),
            })
            .collect();

        Self {
            version: format!("{MAJOR_VERSION}.{MINOR_VERSION}"),
            ints: pool.ints().len(),
            uints: pool.uints().len(),
            doubles: pool.doubles().len(),
            strings: pool.strings().len(),
            namespaces: pool.namespaces().len(),
            namespace_sets: pool.namespace_sets().len(),
            multinames: pool.multinames().len(),
            methods: abc.method_count(),
            bodies: abc.methods().filter(|(_, m)| m.body().is_some()).count(),
            scripts: abc.scripts().len(),
            metadata: abc.metadata().len(),
            classes,
            tampered: abc.is_tampered(),
        }
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AbcError::invalid_state(format!("cannot serialize summary: {e}")))
    }
}

impl fmt::Display for UnitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "abc {}", self.version)?;
        writeln!(
            f,
            "  pool: {} ints, {} uints, {} doubles, {} strings",
            self.ints, self.uints, self.doubles, self.strings
        )?;
        writeln!(
            f,
            "        {} namespaces, {} namespace sets, {} multinames",
            self.namespaces, self.namespace_sets, self.multinames
        )?;
        writeln!(
            f,
            "  {} methods ({} with bodies), {} scripts, {} metadata",
            self.methods, self.bodies, self.scripts, self.metadata
        )?;
        writeln!(f, "  {} classes", self.classes.len())?;
        for class in &self.classes {
            write!(f, "    {}", class.name)?;
            if let Some(super_name) = &class.super_name {
                write!(f, " extends {super_name}")?;
            }
            if class.flags.interface {
                f.write_str(" [interface]")?;
            }
            writeln!(
                f,
                " ({} instance, {} static traits)",
                class.instance_traits, class.static_traits
            )?;
        }
        Ok(())
    }
}

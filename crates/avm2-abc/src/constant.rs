//! Constant model and constant pool
//!
//! [`Namespace`], [`NamespaceSet`] and [`Multiname`] are immutable value
//! types: two instances with the same fields are interchangeable, and
//! equality and hashing are structural. New values are only minted through
//! [`AbcFile`](crate::AbcFile) so that every one of them is registered in its
//! table.

use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::error::{AbcError, Result};

/// Name used for the wildcard namespace, the wildcard multiname and the
/// string at index 0.
pub const ANY_NAME: &str = "*";

/// Namespace kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NamespaceKind {
    /// Ordinary user namespace
    Namespace,
    /// Public namespace of a package
    Package,
    /// Internal namespace of a package
    PackageInternal,
    /// Protected namespace of a class
    Protected,
    /// Explicit namespace
    Explicit,
    /// Static protected namespace of a class
    StaticProtected,
    /// Private namespace
    Private,
}

impl NamespaceKind {
    /// Decode the wire tag
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x08 => Some(Self::Namespace),
            0x16 => Some(Self::Package),
            0x17 => Some(Self::PackageInternal),
            0x18 => Some(Self::Protected),
            0x19 => Some(Self::Explicit),
            0x1A => Some(Self::StaticProtected),
            0x05 => Some(Self::Private),
            _ => None,
        }
    }

    /// Wire tag
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Namespace => 0x08,
            Self::Package => 0x16,
            Self::PackageInternal => 0x17,
            Self::Protected => 0x18,
            Self::Explicit => 0x19,
            Self::StaticProtected => 0x1A,
            Self::Private => 0x05,
        }
    }

    /// Name used in listings
    pub const fn name(self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::Package => "PackageNamespace",
            Self::PackageInternal => "PackageInternalNs",
            Self::Protected => "ProtectedNamespace",
            Self::Explicit => "ExplicitNamespace",
            Self::StaticProtected => "StaticProtectedNs",
            Self::Private => "PrivateNamespace",
        }
    }
}

/// A namespace: kind plus name
///
/// Private namespaces are unique per declaration, so they also carry a
/// disambiguating id. The id is zero for every other kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    kind: NamespaceKind,
    name: Arc<str>,
    private_id: u32,
}

static GLOBAL_NAMESPACE: LazyLock<Namespace> = LazyLock::new(|| Namespace {
    kind: NamespaceKind::Namespace,
    name: Arc::from(ANY_NAME),
    private_id: 0,
});

impl Namespace {
    pub(crate) fn new(kind: NamespaceKind, name: Arc<str>, private_id: u32) -> Self {
        let private_id = if kind == NamespaceKind::Private {
            private_id
        } else {
            0
        };
        Self {
            kind,
            name,
            private_id,
        }
    }

    /// The wildcard namespace (`Namespace "*"`), stored at index 0
    pub fn global() -> Self {
        GLOBAL_NAMESPACE.clone()
    }

    /// Namespace kind
    #[inline]
    pub fn kind(&self) -> NamespaceKind {
        self.kind
    }

    /// Namespace name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to the name
    pub fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    /// Disambiguator of a private namespace (zero for other kinds)
    #[inline]
    pub fn private_id(&self) -> u32 {
        self.private_id
    }

    /// Check if this is the wildcard namespace
    pub fn is_global(&self) -> bool {
        *self == *GLOBAL_NAMESPACE
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == NamespaceKind::Private {
            write!(f, "{}({:?}#{})", self.kind.name(), self.name, self.private_id)
        } else {
            write!(f, "{}({:?})", self.kind.name(), self.name)
        }
    }
}

/// An unordered set of namespaces
///
/// Members are kept sorted and deduplicated, so equality is set equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceSet {
    members: Arc<[Namespace]>,
}

static EMPTY_NAMESPACE_SET: LazyLock<NamespaceSet> = LazyLock::new(|| NamespaceSet {
    members: Arc::from(Vec::new()),
});

impl NamespaceSet {
    pub(crate) fn new(mut members: Vec<Namespace>) -> Self {
        members.sort();
        members.dedup();
        Self {
            members: Arc::from(members),
        }
    }

    /// The empty set, stored at index 0
    pub fn empty() -> Self {
        EMPTY_NAMESPACE_SET.clone()
    }

    /// Members of the set
    pub fn namespaces(&self) -> &[Namespace] {
        &self.members
    }

    /// Number of distinct namespaces
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check membership
    pub fn contains(&self, ns: &Namespace) -> bool {
        self.members.binary_search(ns).is_ok()
    }
}

impl fmt::Display for NamespaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, ns) in self.members.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ns}")?;
        }
        f.write_str("]")
    }
}

/// Multiname kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MultinameKind {
    /// Qualified name
    QName,
    /// Qualified attribute name
    QNameA,
    /// Name with runtime namespace
    RTQName,
    /// Attribute name with runtime namespace
    RTQNameA,
    /// Runtime namespace and name
    RTQNameL,
    /// Runtime namespace and attribute name
    RTQNameLA,
    /// Name looked up in a namespace set
    Multiname,
    /// Attribute name looked up in a namespace set
    MultinameA,
    /// Runtime name looked up in a namespace set
    MultinameL,
    /// Runtime attribute name looked up in a namespace set
    MultinameLA,
    /// Generic type application such as `Vector.<int>`
    TypeName,
}

impl MultinameKind {
    /// Decode the wire tag
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x07 => Some(Self::QName),
            0x0D => Some(Self::QNameA),
            0x0F => Some(Self::RTQName),
            0x10 => Some(Self::RTQNameA),
            0x11 => Some(Self::RTQNameL),
            0x12 => Some(Self::RTQNameLA),
            0x09 => Some(Self::Multiname),
            0x0E => Some(Self::MultinameA),
            0x1B => Some(Self::MultinameL),
            0x1C => Some(Self::MultinameLA),
            0x1D => Some(Self::TypeName),
            _ => None,
        }
    }

    /// Wire tag
    pub fn to_byte(self) -> u8 {
        match self {
            Self::QName => 0x07,
            Self::QNameA => 0x0D,
            Self::RTQName => 0x0F,
            Self::RTQNameA => 0x10,
            Self::RTQNameL => 0x11,
            Self::RTQNameLA => 0x12,
            Self::Multiname => 0x09,
            Self::MultinameA => 0x0E,
            Self::MultinameL => 0x1B,
            Self::MultinameLA => 0x1C,
            Self::TypeName => 0x1D,
        }
    }

    /// Kinds that carry a namespace
    pub fn has_namespace(self) -> bool {
        matches!(self, Self::QName | Self::QNameA)
    }

    /// Kinds that carry a namespace set
    pub fn has_namespace_set(self) -> bool {
        matches!(
            self,
            Self::Multiname | Self::MultinameA | Self::MultinameL | Self::MultinameLA
        )
    }

    /// Kinds that carry a name
    pub fn has_name(self) -> bool {
        matches!(
            self,
            Self::QName | Self::QNameA | Self::RTQName | Self::RTQNameA | Self::Multiname | Self::MultinameA
        )
    }

    /// Name used in listings
    pub const fn name(self) -> &'static str {
        match self {
            Self::QName => "QName",
            Self::QNameA => "QNameA",
            Self::RTQName => "RTQName",
            Self::RTQNameA => "RTQNameA",
            Self::RTQNameL => "RTQNameL",
            Self::RTQNameLA => "RTQNameLA",
            Self::Multiname => "Multiname",
            Self::MultinameA => "MultinameA",
            Self::MultinameL => "MultinameL",
            Self::MultinameLA => "MultinameLA",
            Self::TypeName => "TypeName",
        }
    }
}

/// Base name and parameters of a `TypeName` multiname
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeApplication {
    /// Generic type being applied (e.g. `__AS3__.vec::Vector`)
    pub base: Multiname,
    /// Type arguments
    pub params: Vec<Multiname>,
}

/// A possibly ambiguous name reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Multiname {
    kind: MultinameKind,
    name: Option<Arc<str>>,
    namespace: Option<Namespace>,
    ns_set: Option<NamespaceSet>,
    application: Option<Arc<TypeApplication>>,
}

static ANY_MULTINAME: LazyLock<Multiname> = LazyLock::new(|| Multiname {
    kind: MultinameKind::Multiname,
    name: Some(Arc::from(ANY_NAME)),
    namespace: None,
    ns_set: Some(NamespaceSet::empty()),
    application: None,
});

impl Multiname {
    /// Validate the field combination for `kind` and build the multiname
    ///
    /// Fields the kind does not use are dropped so that equality only looks
    /// at meaningful data. A missing name on a named kind means `*`.
    pub(crate) fn new(
        kind: MultinameKind,
        name: Option<Arc<str>>,
        namespace: Option<Namespace>,
        ns_set: Option<NamespaceSet>,
        application: Option<TypeApplication>,
    ) -> Result<Self> {
        if kind.has_namespace() && namespace.is_none() {
            return Err(AbcError::construction(format!(
                "{} requires a namespace",
                kind.name()
            )));
        }
        if kind.has_namespace_set() && ns_set.is_none() {
            return Err(AbcError::construction(format!(
                "{} requires a namespace set",
                kind.name()
            )));
        }
        if kind == MultinameKind::TypeName && application.is_none() {
            return Err(AbcError::construction(
                "TypeName requires a base type and parameters",
            ));
        }

        let name = if kind.has_name() {
            Some(name.unwrap_or_else(|| Arc::from(ANY_NAME)))
        } else {
            None
        };

        Ok(Self {
            kind,
            name,
            namespace: namespace.filter(|_| kind.has_namespace()),
            ns_set: ns_set.filter(|_| kind.has_namespace_set()),
            application: application
                .filter(|_| kind == MultinameKind::TypeName)
                .map(Arc::new),
        })
    }

    /// The wildcard multiname (`Multiname "*"` over the empty set), stored at index 0
    pub fn any() -> Self {
        ANY_MULTINAME.clone()
    }

    /// Multiname kind
    #[inline]
    pub fn kind(&self) -> MultinameKind {
        self.kind
    }

    /// Name, for kinds that carry one
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Shared handle to the name
    pub fn name_arc(&self) -> Option<&Arc<str>> {
        self.name.as_ref()
    }

    /// Namespace, for `QName` kinds
    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }

    /// Namespace set, for `Multiname` kinds
    pub fn namespace_set(&self) -> Option<&NamespaceSet> {
        self.ns_set.as_ref()
    }

    /// Base type and parameters, for `TypeName`
    pub fn type_application(&self) -> Option<&TypeApplication> {
        self.application.as_deref()
    }

    /// Check if this is the wildcard multiname
    pub fn is_any(&self) -> bool {
        *self == *ANY_MULTINAME
    }

    /// Dotted qualified name (`flash.display.MovieClip`) for `QName` kinds
    pub fn qualified_name(&self) -> Option<String> {
        let ns = self.namespace.as_ref()?;
        let name = self.name.as_deref()?;
        if ns.name().is_empty() || ns.is_global() {
            Some(name.to_string())
        } else {
            Some(format!("{}.{}", ns.name(), name))
        }
    }
}

impl fmt::Display for Multiname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind.name();
        match self.kind {
            MultinameKind::QName | MultinameKind::QNameA => write!(
                f,
                "{kind}({}, {:?})",
                self.namespace.as_ref().map(ToString::to_string).unwrap_or_default(),
                self.name.as_deref().unwrap_or(ANY_NAME)
            ),
            MultinameKind::RTQName | MultinameKind::RTQNameA => {
                write!(f, "{kind}({:?})", self.name.as_deref().unwrap_or(ANY_NAME))
            }
            MultinameKind::RTQNameL | MultinameKind::RTQNameLA => write!(f, "{kind}()"),
            MultinameKind::Multiname | MultinameKind::MultinameA => write!(
                f,
                "{kind}({:?}, {})",
                self.name.as_deref().unwrap_or(ANY_NAME),
                self.ns_set.as_ref().map(ToString::to_string).unwrap_or_default()
            ),
            MultinameKind::MultinameL | MultinameKind::MultinameLA => write!(
                f,
                "{kind}({})",
                self.ns_set.as_ref().map(ToString::to_string).unwrap_or_default()
            ),
            MultinameKind::TypeName => match &self.application {
                Some(app) => {
                    write!(f, "{kind}({}<", app.base)?;
                    for (i, param) in app.params.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{param}")?;
                    }
                    f.write_str(">)")
                }
                None => write!(f, "{kind}()"),
            },
        }
    }
}

/// Per-unit constant tables
///
/// Index 0 of every table holds its sentinel: `0`, `0`, `NaN`, `"*"`, the
/// global namespace, the empty namespace set and the wildcard multiname.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    pub(crate) ints: Vec<i32>,
    pub(crate) uints: Vec<u32>,
    pub(crate) doubles: Vec<f64>,
    pub(crate) strings: Vec<Arc<str>>,
    pub(crate) namespaces: Vec<Namespace>,
    pub(crate) ns_sets: Vec<NamespaceSet>,
    pub(crate) multinames: Vec<Multiname>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    /// Create a pool holding only the sentinels
    pub fn new() -> Self {
        Self {
            ints: vec![0],
            uints: vec![0],
            doubles: vec![f64::NAN],
            strings: vec![Arc::from(ANY_NAME)],
            namespaces: vec![Namespace::global()],
            ns_sets: vec![NamespaceSet::empty()],
            multinames: vec![Multiname::any()],
        }
    }

    /// Integer constant by index
    pub fn int(&self, index: usize) -> Option<i32> {
        self.ints.get(index).copied()
    }

    /// Unsigned integer constant by index
    pub fn uint(&self, index: usize) -> Option<u32> {
        self.uints.get(index).copied()
    }

    /// Double constant by index
    pub fn double(&self, index: usize) -> Option<f64> {
        self.doubles.get(index).copied()
    }

    /// String constant by index
    pub fn string(&self, index: usize) -> Option<&Arc<str>> {
        self.strings.get(index)
    }

    /// Namespace by index
    pub fn namespace(&self, index: usize) -> Option<&Namespace> {
        self.namespaces.get(index)
    }

    /// Namespace set by index
    pub fn namespace_set(&self, index: usize) -> Option<&NamespaceSet> {
        self.ns_sets.get(index)
    }

    /// Multiname by index
    pub fn multiname(&self, index: usize) -> Option<&Multiname> {
        self.multinames.get(index)
    }

    /// All integer constants, sentinel included
    pub fn ints(&self) -> &[i32] {
        &self.ints
    }

    /// All unsigned integer constants, sentinel included
    pub fn uints(&self) -> &[u32] {
        &self.uints
    }

    /// All double constants, sentinel included
    pub fn doubles(&self) -> &[f64] {
        &self.doubles
    }

    /// All strings, sentinel included
    pub fn strings(&self) -> &[Arc<str>] {
        &self.strings
    }

    /// All namespaces, sentinel included
    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    /// All namespace sets, sentinel included
    pub fn namespace_sets(&self) -> &[NamespaceSet] {
        &self.ns_sets
    }

    /// All multinames, sentinel included
    pub fn multinames(&self) -> &[Multiname] {
        &self.multinames
    }
}

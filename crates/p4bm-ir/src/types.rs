//! The type system consumed by the back end.
//!
//! Covers exactly what survives the front end: fixed-width bit types with
//! signedness, booleans, the `error` type, variable-length bit strings,
//! arbitrary-precision integer literals, struct-like aggregates (headers,
//! structs, header unions, metadata), header stacks, externs, and enums.
//!
//! Struct-like aggregates use nominal identity via [`StructId`]; all other
//! types are structural and carried by value.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::IrError;
use crate::id::StructId;

/// Width used when packing a boolean into the scalars header.
pub const BOOL_WIDTH: u32 = 1;

/// Width used when packing an `error` value into the scalars header.
pub const ERROR_WIDTH: u32 = 32;

/// A type as seen by the back end. Aggregates refer into the [`TypeRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    /// Fixed-width integer: `bit<W>` or `int<W>`.
    Bits { width: u32, signed: bool },

    /// Boolean.
    Boolean,

    /// The `error` type; values are members of the program's error declaration.
    Error,

    /// Variable-length bit string with a maximum width.
    Varbits { width: u32 },

    /// Arbitrary-precision compile-time integer.
    InfInt,

    /// Struct-like aggregate (header, struct, header union, metadata).
    Struct(StructId),

    /// Header stack: fixed-size array of headers.
    Stack { element: StructId, size: u32 },

    /// Extern object type, named after its architecture declaration.
    Extern(String),

    /// Enum type, named. Members are resolved through the program's enum map.
    Enum(String),

    /// No value (method call statements, `$valid$` writes).
    Void,
}

impl Type {
    /// Unsigned `bit<W>`.
    pub fn bits(width: u32) -> Type {
        Type::Bits {
            width,
            signed: false,
        }
    }

    /// Signed `int<W>`.
    pub fn signed_bits(width: u32) -> Type {
        Type::Bits {
            width,
            signed: true,
        }
    }

    pub fn is_struct_like(&self) -> bool {
        matches!(self, Type::Struct(_))
    }

    /// Bit width of the type, following the packing rules the back end uses:
    /// booleans occupy [`BOOL_WIDTH`] bits, errors [`ERROR_WIDTH`], aggregates
    /// the sum of their field widths. Types with no width return 0.
    pub fn width_bits(&self, registry: &TypeRegistry) -> u32 {
        match self {
            Type::Bits { width, .. } | Type::Varbits { width } => *width,
            Type::Boolean => BOOL_WIDTH,
            Type::Error => ERROR_WIDTH,
            Type::Struct(id) => registry.get(*id).width_bits(registry),
            Type::Stack { element, size } => {
                registry.get(*element).width_bits(registry) * size
            }
            Type::InfInt | Type::Extern(_) | Type::Enum(_) | Type::Void => 0,
        }
    }
}

/// Flavor of a struct-like definition. Only headers may be extracted,
/// emitted, and carry validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructKind {
    Header,
    Struct,
    HeaderUnion,
    Metadata,
}

/// A single field of a struct-like definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
}

/// Named struct-like definition with ordered fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    pub kind: StructKind,
    pub fields: Vec<StructField>,
}

impl StructDef {
    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Sum of the field widths.
    pub fn width_bits(&self, registry: &TypeRegistry) -> u32 {
        self.fields.iter().map(|f| f.ty.width_bits(registry)).sum()
    }
}

/// Registry of all struct-like definitions in a program, providing nominal
/// identity via [`StructId`] and lookup by declared name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeRegistry {
    defs: Vec<StructDef>,
    names: IndexMap<String, StructId>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry::default()
    }

    /// Registers a definition, returning its [`StructId`].
    ///
    /// Returns [`IrError::DuplicateTypeName`] if the name is already taken.
    pub fn register(&mut self, def: StructDef) -> Result<StructId, IrError> {
        if self.names.contains_key(&def.name) {
            return Err(IrError::DuplicateTypeName {
                name: def.name.clone(),
            });
        }
        let id = StructId(self.defs.len() as u32);
        self.names.insert(def.name.clone(), id);
        self.defs.push(def);
        Ok(id)
    }

    /// Looks up a definition. A dangling [`StructId`] is a bug in the producer.
    pub fn get(&self, id: StructId) -> &StructDef {
        &self.defs[id.0 as usize]
    }

    pub fn get_by_name(&self, name: &str) -> Option<StructId> {
        self.names.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StructId, &StructDef)> {
        self.defs
            .iter()
            .enumerate()
            .map(|(i, d)| (StructId(i as u32), d))
    }
}

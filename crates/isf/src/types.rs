//! Type definitions for parsed ISF (Intermediate Symbol Format) data.

use crate::error::{IsfError, IsfResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;

/// Top-level ISF file structure.
#[derive(Debug, Deserialize)]
pub struct IsfFile {
    pub metadata: Metadata,
    #[serde(default)]
    pub base_types: HashMap<String, BaseType>,
    #[serde(default)]
    pub user_types: HashMap<String, UserType>,
    #[serde(default)]
    pub symbols: HashMap<String, Symbol>,
    #[serde(default)]
    pub enums: HashMap<String, EnumType>,
}

/// ISF metadata block.
#[derive(Debug, Deserialize)]
pub struct Metadata {
    pub format: String,
    #[serde(default)]
    pub producer: Option<Producer>,
    #[serde(default)]
    pub windows: Option<WindowsMetadata>,
    #[serde(default)]
    pub linux: Option<LinuxMetadata>,
    #[serde(default)]
    pub mac: Option<MacMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct Producer {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub datetime: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WindowsMetadata {
    #[serde(default)]
    pub major: Option<u32>,
    #[serde(default)]
    pub minor: Option<u32>,
    #[serde(default)]
    pub revision: Option<u32>,
    #[serde(default)]
    pub build: Option<u32>,
    #[serde(default)]
    pub pe_file: Option<String>,
    #[serde(default)]
    pub pdb_file: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LinuxMetadata {
    #[serde(default)]
    pub banner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MacMetadata {
    #[serde(default)]
    pub banner: Option<String>,
}

impl Metadata {
    /// The `major.minor.patch` format version.
    pub fn version(&self) -> IsfResult<(u32, u32, u32)> {
        let parts: Vec<u32> = self
            .format
            .split('.')
            .map(|p| p.parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|_| IsfError::UnsupportedVersion(self.format.clone()))?;
        match parts.as_slice() {
            [major, minor, patch] => Ok((*major, *minor, *patch)),
            _ => Err(IsfError::UnsupportedVersion(self.format.clone())),
        }
    }
}

/// A base (primitive) type definition.
#[derive(Debug, Clone, Deserialize)]
pub struct BaseType {
    /// Format 1 documents call this `length`.
    #[serde(alias = "length")]
    pub size: usize,
    pub signed: bool,
    pub kind: String,
    #[serde(default = "default_endian")]
    pub endian: String,
}

fn default_endian() -> String {
    "little".to_string()
}

/// A user-defined (struct) type.
#[derive(Debug, Clone, Deserialize)]
pub struct UserType {
    #[serde(alias = "length")]
    pub size: usize,
    #[serde(default)]
    pub fields: HashMap<String, FieldDef>,
    /// `struct`, `union` or `class`.
    #[serde(default)]
    pub kind: Option<String>,
}

impl UserType {
    pub fn is_union(&self) -> bool {
        self.kind.as_deref() == Some("union")
    }
}

/// A field within a user type.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldDef {
    pub offset: usize,
    #[serde(rename = "type")]
    pub type_info: TypeInfo,
}

/// Type information for a field, nested for pointers, arrays and bitfields.
#[derive(Debug, Clone, Deserialize)]
pub struct TypeInfo {
    pub kind: String,

    /// For kind="struct", "base" or "enum": the type name.
    #[serde(default)]
    pub name: Option<String>,

    /// For kind="pointer": the subtype being pointed to.
    #[serde(default)]
    pub subtype: Option<Box<TypeInfo>>,

    /// For kind="array": element count.
    #[serde(default)]
    pub count: Option<usize>,

    /// For kind="bitfield": bit position and bit length.
    #[serde(default)]
    pub bit_position: Option<usize>,
    #[serde(default)]
    pub bit_length: Option<usize>,

    /// For kind="bitfield": the underlying integer type.
    #[serde(default, rename = "type")]
    pub element_type: Option<Box<TypeInfo>>,

    /// Size override (some ISF files specify size at the type level).
    #[serde(default)]
    pub size: Option<usize>,
}

/// A symbol (named address).
#[derive(Debug, Clone, Deserialize)]
pub struct Symbol {
    pub address: u64,
    /// Some symbols have associated type information.
    #[serde(default, rename = "type")]
    pub type_info: Option<TypeInfo>,
    /// Base64-encoded constant data (rare).
    #[serde(default)]
    pub constant_data: Option<String>,
}

impl Symbol {
    /// Decode `constant_data`, if present.
    pub fn decoded_constant_data(&self) -> IsfResult<Option<Vec<u8>>> {
        self.constant_data
            .as_deref()
            .map(|data| {
                STANDARD
                    .decode(data)
                    .map_err(|e| IsfError::InvalidConstantData(e.to_string()))
            })
            .transpose()
    }
}

/// An enumeration type.
#[derive(Debug, Clone, Deserialize)]
pub struct EnumType {
    /// The size of the underlying integer type.
    pub size: usize,
    /// The base type name.
    pub base: String,
    /// Mapping from enum constant name to value.
    pub constants: HashMap<String, i64>,
}

// ============================================================================
// Resolved/processed types for runtime use
// ============================================================================

/// Fully resolved symbol table ready for use.
#[derive(Debug)]
pub struct IsfSymbols {
    /// Base (primitive) types.
    pub base_types: HashMap<String, BaseType>,
    /// User-defined struct types.
    pub user_types: HashMap<String, UserType>,
    /// Named symbols (addresses).
    pub symbols: HashMap<String, Symbol>,
    /// Enumerations.
    pub enums: HashMap<String, EnumType>,
    /// Metadata.
    pub metadata: Metadata,
    /// Pointer size in bytes (4 or 8).
    pub pointer_size: usize,
}

impl IsfSymbols {
    /// Look up a struct definition by name.
    pub fn get_type(&self, name: &str) -> Option<&UserType> {
        self.user_types.get(name)
    }

    /// Look up a symbol address by name.
    pub fn get_symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).map(|s| s.address)
    }

    /// Look up a field offset within a struct.
    pub fn field_offset(&self, type_name: &str, field_name: &str) -> Option<usize> {
        self.user_types
            .get(type_name)
            .and_then(|t| t.fields.get(field_name))
            .map(|f| f.offset)
    }

    /// Get the size of a type (user type or base type).
    pub fn type_size(&self, type_name: &str) -> Option<usize> {
        if let Some(ut) = self.user_types.get(type_name) {
            Some(ut.size)
        } else if let Some(bt) = self.base_types.get(type_name) {
            Some(bt.size)
        } else {
            None
        }
    }

    /// Look up an enum value by name.
    pub fn enum_value(&self, enum_name: &str, constant_name: &str) -> Option<i64> {
        self.enums
            .get(enum_name)
            .and_then(|e| e.constants.get(constant_name))
            .copied()
    }
}

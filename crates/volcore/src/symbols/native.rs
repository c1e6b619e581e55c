//! Architecture primitive types.

use super::{Symbol, SymbolTable, TABLE_SEPARATOR};
use crate::error::{CoreError, CoreResult};
use crate::objects::{Choices, Encoding, EncodingErrors, FormatCode, NativeFormat, Template, TemplateKind};
use isf::BaseType;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Structural keywords every native table resolves.
pub const KEYWORDS: [&str; 8] = ["void", "function", "array", "enum", "bitfield", "string", "bytes", "pointer"];

/// How a native type name is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeClass {
    Integer,
    Float,
    Char,
    Bytes,
    Pointer,
}

const STD_CTYPES: [(&str, NativeClass, &str); 16] = [
    ("int", NativeClass::Integer, "<i"),
    ("long", NativeClass::Integer, "<i"),
    ("unsigned long", NativeClass::Integer, "<I"),
    ("unsigned int", NativeClass::Integer, "<I"),
    ("char", NativeClass::Integer, "<b"),
    ("byte", NativeClass::Bytes, "<c"),
    ("unsigned char", NativeClass::Integer, "<B"),
    ("unsigned short int", NativeClass::Integer, "<H"),
    ("unsigned short", NativeClass::Integer, "<H"),
    ("unsigned be short", NativeClass::Integer, ">H"),
    ("short", NativeClass::Integer, "<h"),
    ("long long", NativeClass::Integer, "<q"),
    ("unsigned long long", NativeClass::Integer, "<Q"),
    ("float", NativeClass::Float, "<d"),
    ("double", NativeClass::Float, "<d"),
    ("wchar", NativeClass::Integer, "<H"),
];

/// A symbol table of primitive types plus the structural keywords.
///
/// One struct layout can be read on both 32-bit and 64-bit targets by
/// pairing it with [`NativeTable::x86`] or [`NativeTable::x64`].
#[derive(Debug, Clone)]
pub struct NativeTable {
    name: String,
    natives: BTreeMap<String, (NativeClass, NativeFormat)>,
}

impl NativeTable {
    pub fn new(name: impl Into<String>, natives: BTreeMap<String, (NativeClass, NativeFormat)>) -> Self {
        NativeTable {
            name: name.into(),
            natives,
        }
    }

    fn std_ctypes(pointer: &str) -> CoreResult<Self> {
        let mut natives = BTreeMap::new();
        for (name, class, format) in STD_CTYPES {
            natives.insert(name.to_owned(), (class, format.parse()?));
        }
        natives.insert("pointer".to_owned(), (NativeClass::Pointer, pointer.parse()?));
        Ok(Self::new("native", natives))
    }

    /// Standard C types with 4-byte pointers.
    pub fn x86() -> CoreResult<Self> {
        Self::std_ctypes("<I")
    }

    /// Standard C types with 8-byte pointers.
    pub fn x64() -> CoreResult<Self> {
        Self::std_ctypes("<Q")
    }

    /// Natives described by a symbol file's `base_types` section.
    pub fn from_base_types(base_types: &HashMap<String, BaseType>) -> CoreResult<Self> {
        let mut natives = BTreeMap::new();
        for (name, base) in base_types {
            if name == "void" {
                continue;
            }
            let (code, mut class) = match (base.kind.as_str(), base.size) {
                ("int", 1) => ('b', NativeClass::Integer),
                ("int", 2) => ('h', NativeClass::Integer),
                ("int", 4) => ('i', NativeClass::Integer),
                ("int", 8) => ('q', NativeClass::Integer),
                ("float", 2) => ('e', NativeClass::Float),
                ("float", 4) => ('f', NativeClass::Float),
                ("float", 8) => ('d', NativeClass::Float),
                ("void", 4) => ('i', NativeClass::Integer),
                ("bool", 1) => ('?', NativeClass::Integer),
                ("char", 1) => ('c', NativeClass::Char),
                _ => {
                    return Err(CoreError::symbol(format!(
                        "Unsupported kind/size combination in base_type {}",
                        name
                    )))
                }
            };
            let code = if base.kind == "int" && !base.signed {
                code.to_ascii_uppercase()
            } else {
                code
            };
            let endian = if base.endian == "little" { '<' } else { '>' };
            if name == "pointer" {
                class = NativeClass::Pointer;
            }
            natives.insert(name.clone(), (class, format!("{}{}", endian, code).parse()?));
        }
        Ok(Self::new("native", natives))
    }

    /// Format of a primitive, if this table defines it.
    pub fn format(&self, name: &str) -> Option<NativeFormat> {
        self.natives.get(name).map(|(_, format)| *format)
    }

    pub fn pointer_size(&self) -> Option<usize> {
        self.format("pointer").map(|f| f.size())
    }

    /// Resolve `name`, optionally qualified as `table!name`. The returned
    /// template carries the qualified name.
    pub fn resolve(&self, type_name: &str) -> CoreResult<Template> {
        let (prefix, name) = match type_name.split(TABLE_SEPARATOR).collect::<Vec<_>>().as_slice() {
            [name] => (String::new(), *name),
            [table, name] => (format!("{}{}", table, TABLE_SEPARATOR), *name),
            _ => {
                return Err(CoreError::symbol(format!(
                    "Symbol name cannot contain multiple {} separators: {}",
                    TABLE_SEPARATOR, type_name
                )))
            }
        };
        let qualified = format!("{}{}", prefix, name);
        let void = || Arc::new(Template::new(format!("{}void", prefix), TemplateKind::Void));
        let int = || -> CoreResult<Arc<Template>> {
            match self.resolve(&format!("{}int", prefix)) {
                Err(CoreError::SymbolNotFound(_)) => Ok(Arc::new(Template::new(
                    format!("{}int", prefix),
                    TemplateKind::Integer {
                        format: NativeFormat::little(FormatCode::I32),
                    },
                ))),
                resolved => Ok(Arc::new(resolved?)),
            }
        };

        let kind = match name {
            "void" => TemplateKind::Void,
            "function" => TemplateKind::Function,
            "array" => TemplateKind::Array {
                count: 0,
                subtype: void(),
            },
            "enum" => TemplateKind::Enumeration {
                base_type: int()?,
                choices: Arc::new(Choices::new()),
                allow_duplicates: false,
            },
            "bitfield" => TemplateKind::BitField {
                base_type: int()?,
                start_bit: 0,
                end_bit: 0,
            },
            "string" => TemplateKind::String {
                max_length: 0,
                encoding: Encoding::Utf8,
                errors: EncodingErrors::Strict,
            },
            "bytes" => TemplateKind::Bytes { length: 0 },
            _ => {
                let (class, format) = self
                    .natives
                    .get(name)
                    .ok_or_else(|| CoreError::SymbolNotFound(qualified.clone()))?;
                match class {
                    NativeClass::Integer => TemplateKind::Integer { format: *format },
                    NativeClass::Float => TemplateKind::Float { format: *format },
                    NativeClass::Char => TemplateKind::Char { format: *format },
                    NativeClass::Bytes => TemplateKind::Bytes {
                        length: format.size() as u64,
                    },
                    NativeClass::Pointer => TemplateKind::Pointer {
                        format: *format,
                        subtype: void(),
                    },
                }
            }
        };
        Ok(Template::new(qualified, kind))
    }
}

impl SymbolTable for NativeTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.natives.keys().cloned().collect();
        types.extend(
            KEYWORDS
                .iter()
                .filter(|k| !self.natives.contains_key(**k))
                .map(|k| k.to_string()),
        );
        types
    }

    fn symbols(&self) -> Vec<String> {
        Vec::new()
    }

    fn enumerations(&self) -> Vec<String> {
        Vec::new()
    }

    fn get_type(&self, type_name: &str) -> CoreResult<Arc<Template>> {
        Ok(Arc::new(self.resolve(&format!("{}{}{}", self.name, TABLE_SEPARATOR, type_name))?))
    }

    fn get_symbol(&self, name: &str) -> CoreResult<Symbol> {
        Err(CoreError::SymbolNotFound(format!("{}{}{}", self.name, TABLE_SEPARATOR, name)))
    }

    fn get_enumeration(&self, name: &str) -> CoreResult<Arc<Template>> {
        Err(CoreError::SymbolNotFound(format!("{}{}{}", self.name, TABLE_SEPARATOR, name)))
    }

    fn natives(&self) -> Option<&NativeTable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

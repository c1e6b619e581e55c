//! Symbol tables backed by Intermediate Symbol Format documents.

use super::extensions::{ExtensionKind, ExtensionRegistry};
use super::native::NativeTable;
use super::{Symbol, SymbolTable, TABLE_SEPARATOR};
use crate::error::{CoreError, CoreResult};
use crate::objects::{Choices, Members, Template, TemplateArgs, TemplateKind};
use isf::{IsfSymbols, Metadata, TypeInfo};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A symbol table loaded from an ISF document.
///
/// Primitive types come from the document's `base_types` when present,
/// otherwise from the standard table matching its pointer width.
pub struct IsfTable {
    name: String,
    data: IsfSymbols,
    natives: NativeTable,
    type_classes: RwLock<HashMap<String, ExtensionKind>>,
}

impl std::fmt::Debug for IsfTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsfTable")
            .field("name", &self.name)
            .field("user_types", &self.data.user_types.len())
            .field("symbols", &self.data.symbols.len())
            .field("enums", &self.data.enums.len())
            .finish()
    }
}

impl IsfTable {
    pub fn new(name: impl Into<String>, data: IsfSymbols, extensions: &ExtensionRegistry) -> CoreResult<Self> {
        let name = name.into();
        let natives = if data.base_types.is_empty() {
            if data.pointer_size == 4 {
                NativeTable::x86()?
            } else {
                NativeTable::x64()?
            }
        } else {
            NativeTable::from_base_types(&data.base_types)?
        };
        let type_classes = extensions
            .iter()
            .filter(|(type_name, _)| data.user_types.contains_key(*type_name))
            .map(|(type_name, kind)| (type_name.clone(), *kind))
            .collect();
        debug!(
            table = %name,
            types = data.user_types.len(),
            symbols = data.symbols.len(),
            "loaded symbol table"
        );
        Ok(IsfTable {
            name,
            data,
            natives,
            type_classes: RwLock::new(type_classes),
        })
    }

    pub fn from_json(name: impl Into<String>, json: &str, extensions: &ExtensionRegistry) -> CoreResult<Self> {
        Self::new(name, isf::parse_isf_str(json)?, extensions)
    }

    /// Load a `.json` or `.json.xz` symbol file.
    pub fn from_file(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        extensions: &ExtensionRegistry,
    ) -> CoreResult<Self> {
        Self::new(name, isf::parse_isf_file(path)?, extensions)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.data.metadata
    }

    /// Attach an extension to a type of this table.
    pub fn set_type_class(&self, type_name: &str, kind: ExtensionKind) -> CoreResult<()> {
        if !self.data.user_types.contains_key(type_name) && self.natives.format(type_name).is_none() {
            return Err(CoreError::symbol(format!(
                "Symbol type not in {} SymbolTable: {}",
                self.name, type_name
            )));
        }
        self.type_classes.write().insert(type_name.to_owned(), kind);
        Ok(())
    }

    pub fn get_type_class(&self, type_name: &str) -> Option<ExtensionKind> {
        self.type_classes.read().get(type_name).copied()
    }

    pub fn del_type_class(&self, type_name: &str) {
        self.type_classes.write().remove(type_name);
    }

    fn qualify(&self, name: &str) -> String {
        if name.contains(TABLE_SEPARATOR) {
            name.to_owned()
        } else {
            format!("{}{}{}", self.name, TABLE_SEPARATOR, name)
        }
    }

    fn native(&self, name: &str) -> CoreResult<Template> {
        self.natives.resolve(&self.qualify(name))
    }

    fn enumeration(&self, name: &str) -> CoreResult<Template> {
        let definition = self
            .data
            .enums
            .get(name)
            .ok_or_else(|| CoreError::SymbolNotFound(self.qualify(name)))?;
        let choices: Choices = definition
            .constants
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        let base_type = Arc::new(self.native(&definition.base)?);
        Ok(Template::new(
            self.qualify(name),
            TemplateKind::Enumeration {
                base_type,
                choices: Arc::new(choices),
                allow_duplicates: false,
            },
        ))
    }

    /// Convert a type description into a template.
    fn interdict(&self, info: &TypeInfo) -> CoreResult<Arc<Template>> {
        let invalid = || CoreError::symbol(format!("Invalid intermediate dictionary: {:?}", info));
        let subtype = || -> CoreResult<Arc<Template>> { self.interdict(info.subtype.as_deref().ok_or_else(invalid)?) };

        let template = match info.kind.as_str() {
            "base" => self.native(info.name.as_deref().ok_or_else(invalid)?)?,
            "pointer" => self
                .native("pointer")?
                .updated(&TemplateArgs::new().with_subtype(subtype()?))?,
            "array" => self.native("array")?.updated(
                &TemplateArgs::new()
                    .with_count(info.count.ok_or_else(invalid)? as u64)
                    .with_subtype(subtype()?),
            )?,
            "enum" => self.enumeration(info.name.as_deref().ok_or_else(invalid)?)?,
            "bitfield" => {
                let start = info.bit_position.ok_or_else(invalid)? as u32;
                let length = info.bit_length.ok_or_else(invalid)? as u32;
                let base = self.interdict(info.element_type.as_deref().ok_or_else(invalid)?)?;
                self.native("bitfield")?.updated(
                    &TemplateArgs::new()
                        .with_bits(start, start + length)
                        .with_base_type(base),
                )?
            }
            "struct" | "union" | "class" => Template::reference(self.qualify(info.name.as_deref().ok_or_else(invalid)?)),
            "function" => self.native("function")?,
            other if self.natives.format(other).is_some() || super::native::KEYWORDS.contains(&other) => {
                self.native(other)?
            }
            _ => {
                return Err(CoreError::symbol(format!(
                    "Unknown Intermediate format: {:?}",
                    info
                )))
            }
        };
        Ok(Arc::new(template))
    }
}

impl SymbolTable for IsfTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.data.user_types.keys().cloned().collect();
        types.extend(self.natives.types());
        types
    }

    fn symbols(&self) -> Vec<String> {
        self.data.symbols.keys().cloned().collect()
    }

    fn enumerations(&self) -> Vec<String> {
        self.data.enums.keys().cloned().collect()
    }

    fn get_type(&self, type_name: &str) -> CoreResult<Arc<Template>> {
        if type_name.contains(TABLE_SEPARATOR) {
            return Err(CoreError::symbol(format!(
                "Symbol for a different table requested: {}",
                type_name
            )));
        }
        let Some(definition) = self.data.user_types.get(type_name) else {
            return Ok(Arc::new(self.native(type_name)?));
        };

        let mut members = Members::new();
        for (member_name, field) in &definition.fields {
            members.insert(
                member_name.clone(),
                (field.offset as u64, self.interdict(&field.type_info)?),
            );
        }
        let template = Template::new(
            self.qualify(type_name),
            TemplateKind::Struct {
                size: definition.size as u64,
                members: Arc::new(members),
                union: definition.is_union(),
            },
        )
        .with_extension(self.get_type_class(type_name));
        Ok(Arc::new(template))
    }

    fn get_symbol(&self, name: &str) -> CoreResult<Symbol> {
        let symbol = self
            .data
            .symbols
            .get(name)
            .ok_or_else(|| CoreError::SymbolNotFound(self.qualify(name)))?;
        Ok(Symbol {
            name: name.to_owned(),
            address: symbol.address,
            type_template: symbol
                .type_info
                .as_ref()
                .map(|info| self.interdict(info))
                .transpose()?,
            constant_data: symbol.decoded_constant_data()?,
        })
    }

    fn get_enumeration(&self, name: &str) -> CoreResult<Arc<Template>> {
        if name.contains(TABLE_SEPARATOR) {
            return Err(CoreError::symbol(format!(
                "Enumeration for a different table requested: {}",
                name
            )));
        }
        Ok(Arc::new(self.enumeration(name)?))
    }

    fn natives(&self) -> Option<&NativeTable> {
        Some(&self.natives)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

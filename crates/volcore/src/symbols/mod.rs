//! Symbol tables and the session-wide symbol space.
//!
//! A qualified name is `table!type`. The [`SymbolSpace`] resolves qualified
//! names against its tables and inlines embedded references, so that a
//! template returned by [`SymbolSpace::get_type`] only contains references
//! behind pointers. Those resolve lazily when the pointer is dereferenced,
//! which is what lets self-referential structures work.

pub mod extensions;
pub mod intermed;
pub mod native;

pub use extensions::{ExtensionKind, ExtensionRegistry};
pub use intermed::IsfTable;
pub use native::{NativeClass, NativeTable};

use crate::error::{CoreError, CoreResult};
use crate::objects::Template;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Separates a table name from a type or symbol name.
pub const TABLE_SEPARATOR: char = '!';

/// A named address within a table.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    /// Relative to the base of the module the table describes.
    pub address: u64,
    pub type_template: Option<Arc<Template>>,
    pub constant_data: Option<Vec<u8>>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, address: u64) -> Self {
        Symbol {
            name: name.into(),
            address,
            type_template: None,
            constant_data: None,
        }
    }

    /// Qualified name of the symbol's type, if it has one.
    pub fn type_name(&self) -> Option<&str> {
        self.type_template.as_ref().map(|t| t.type_name())
    }
}

/// A named collection of types, symbols and enumerations.
///
/// Lookups take unqualified names; the table qualifies the templates it returns.
pub trait SymbolTable: Send + Sync {
    fn name(&self) -> &str;

    fn types(&self) -> Vec<String>;

    fn symbols(&self) -> Vec<String>;

    fn enumerations(&self) -> Vec<String>;

    fn get_type(&self, type_name: &str) -> CoreResult<Arc<Template>>;

    fn get_symbol(&self, name: &str) -> CoreResult<Symbol>;

    fn get_enumeration(&self, name: &str) -> CoreResult<Arc<Template>>;

    /// The primitive types this table uses.
    fn natives(&self) -> Option<&NativeTable> {
        None
    }

    /// Names of the symbols whose type is `type_name` (qualified).
    fn get_symbols_by_type(&self, type_name: &str) -> Vec<String> {
        self.symbols()
            .into_iter()
            .filter(|name| {
                self.get_symbol(name)
                    .map(|symbol| symbol.type_name() == Some(type_name))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Names of the symbols at relative address `offset`.
    fn get_symbols_by_location(&self, offset: u64) -> Vec<String> {
        self.symbols()
            .into_iter()
            .filter(|name| {
                self.get_symbol(name)
                    .map(|symbol| symbol.address == offset)
                    .unwrap_or(false)
            })
            .collect()
    }

    fn as_any(&self) -> &dyn Any;
}

/// Split `table!name`, rejecting anything else.
pub fn split_name(name: &str) -> CoreResult<(&str, &str)> {
    let mut parts = name.split(TABLE_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(table), Some(component), None) => Ok((table, component)),
        _ => Err(CoreError::symbol(format!("Malformed name: {}", name))),
    }
}

/// The ordered set of symbol tables for a session.
#[derive(Default)]
pub struct SymbolSpace {
    tables: Vec<Arc<dyn SymbolTable>>,
    resolved: RwLock<HashMap<String, Arc<Template>>>,
}

impl SymbolSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table, replacing any table of the same name.
    pub fn append(&mut self, table: Arc<dyn SymbolTable>) {
        if self.contains(table.name()) {
            let name = table.name().to_owned();
            self.remove(&name);
        }
        debug!(table = %table.name(), "appending symbol table");
        self.tables.push(table);
    }

    /// Remove a table. Cached resolutions are discarded.
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn SymbolTable>> {
        self.resolved.write().clear();
        let index = self.tables.iter().position(|t| t.name() == name)?;
        Some(self.tables.remove(index))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t.name() == name)
    }

    pub fn table(&self, name: &str) -> CoreResult<&Arc<dyn SymbolTable>> {
        self.tables
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| CoreError::SymbolNotFound(name.to_owned()))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name().to_owned()).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// `prefix` followed by the first positive integer not already used as a table name.
    pub fn free_table_name(&self, prefix: &str) -> String {
        let mut count = 1;
        loop {
            let candidate = format!("{}{}", prefix, count);
            if !self.contains(&candidate) {
                return candidate;
            }
            count += 1;
        }
    }

    /// Resolve a qualified type name with embedded references inlined.
    pub fn get_type(&self, type_name: &str) -> CoreResult<Arc<Template>> {
        if let Some(template) = self.resolved.read().get(type_name) {
            return Ok(template.clone());
        }
        let mut stack = Vec::new();
        self.resolve(type_name, &mut stack)
    }

    fn resolve(&self, type_name: &str, stack: &mut Vec<String>) -> CoreResult<Arc<Template>> {
        if let Some(template) = self.resolved.read().get(type_name) {
            return Ok(template.clone());
        }
        if stack.iter().any(|name| name == type_name) {
            return Err(CoreError::symbol(format!(
                "Circular embedded reference: {} -> {}",
                stack.join(" -> "),
                type_name
            )));
        }
        let (table_name, component) = split_name(type_name)?;
        let template = self.table(table_name)?.get_type(component)?;

        stack.push(type_name.to_owned());
        let inlined = self.inline(&template, stack);
        stack.pop();
        let inlined = inlined?;

        self.resolved
            .write()
            .insert(type_name.to_owned(), inlined.clone());
        Ok(inlined)
    }

    /// Replace every embedded reference below `template`. Pointer subtypes are left alone.
    fn inline(&self, template: &Arc<Template>, stack: &mut Vec<String>) -> CoreResult<Arc<Template>> {
        if template.children().is_empty() {
            return Ok(template.clone());
        }
        let mut replace = |child: &Arc<Template>| -> CoreResult<Arc<Template>> {
            if !child.is_reference() {
                return self.inline(child, stack);
            }
            match self.resolve(child.type_name(), stack) {
                Ok(resolved) => Ok(resolved),
                Err(CoreError::SymbolNotFound(_)) => {
                    debug!(reference = %child.type_name(), "Unresolved reference");
                    Ok(child.clone())
                }
                Err(e) => Err(e),
            }
        };
        Ok(Arc::new(template.replace_embedded(&mut replace)?))
    }

    pub fn get_symbol(&self, symbol_name: &str) -> CoreResult<Symbol> {
        let (table, name) = split_name(symbol_name)?;
        self.table(table)?.get_symbol(name)
    }

    pub fn get_enumeration(&self, enum_name: &str) -> CoreResult<Arc<Template>> {
        let (table, name) = split_name(enum_name)?;
        self.table(table)?.get_enumeration(name)
    }

    fn membership(&self, name: &str, list: impl Fn(&dyn SymbolTable) -> Vec<String>) -> bool {
        let Ok((table, component)) = split_name(name) else {
            return false;
        };
        self.table(table)
            .map(|t| list(t.as_ref()).iter().any(|n| n == component))
            .unwrap_or(false)
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.membership(name, |t| t.types())
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.membership(name, |t| t.symbols())
    }

    pub fn has_enumeration(&self, name: &str) -> bool {
        self.membership(name, |t| t.enumerations())
    }

    /// Qualified names of all symbols whose type is `type_name`.
    pub fn get_symbols_by_type(&self, type_name: &str) -> Vec<String> {
        self.tables
            .iter()
            .flat_map(|table| {
                table
                    .get_symbols_by_type(type_name)
                    .into_iter()
                    .map(move |name| format!("{}{}{}", table.name(), TABLE_SEPARATOR, name))
            })
            .collect()
    }

    /// Qualified names of all symbols at relative `address`, optionally in one table.
    pub fn get_symbols_by_location(&self, address: u64, table_name: Option<&str>) -> Vec<String> {
        self.tables
            .iter()
            .filter(|table| table_name.map_or(true, |name| table.name() == name))
            .flat_map(|table| {
                table
                    .get_symbols_by_location(address)
                    .into_iter()
                    .map(move |name| format!("{}{}{}", table.name(), TABLE_SEPARATOR, name))
            })
            .collect()
    }
}

//! The session context: layers, symbol tables and configuration.
//!
//! Everything a layer or object needs is reached through a [`Context`]
//! passed explicitly; nothing is read from global state.

use crate::config::ConfigMap;
use crate::error::{CoreError, CoreResult};
use crate::memory::layers::{BufferLayer, FileLayer, VmwareLayer};
use crate::memory::translators::{IntelLayer, PageValidity, PagingStructure, INTEL, INTEL_32E, INTEL_PAE};
use crate::memory::{Layer, LayerCollection};
use crate::objects::{Object, ObjectInfo, Template, TemplateArgs};
use crate::registry::RegistryHive;
use crate::symbols::{Symbol, SymbolSpace, TABLE_SEPARATOR};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Owns the layers, symbol space and configuration of one analysis session.
#[derive(Default)]
pub struct Context {
    config: ConfigMap,
    layers: LayerCollection,
    symbol_space: SymbolSpace,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("layers", &self.layers.names())
            .field("symbol_tables", &self.symbol_space.table_names())
            .field("config_keys", &self.config.len())
            .finish()
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ConfigMap) -> Self {
        Context {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &ConfigMap {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigMap {
        &mut self.config
    }

    pub fn layers(&self) -> &LayerCollection {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut LayerCollection {
        &mut self.layers
    }

    pub fn symbol_space(&self) -> &SymbolSpace {
        &self.symbol_space
    }

    pub fn symbol_space_mut(&mut self) -> &mut SymbolSpace {
        &mut self.symbol_space
    }

    pub fn add_layer(&mut self, layer: Arc<dyn Layer>) -> CoreResult<()> {
        self.layers.add_layer(layer)
    }

    /// Construct a `type_name` object at `offset` of `layer_name`.
    pub fn object(&self, type_name: &str, layer_name: &str, offset: u64) -> CoreResult<Object<'_>> {
        self.object_from_template(self.symbol_space.get_type(type_name)?, layer_name, offset)
    }

    /// As [`Context::object`], with template parameters overridden by `args`.
    pub fn object_with(
        &self,
        type_name: &str,
        layer_name: &str,
        offset: u64,
        args: &TemplateArgs,
    ) -> CoreResult<Object<'_>> {
        let template = self.symbol_space.get_type(type_name)?;
        self.object_from_template(Arc::new(template.updated(args)?), layer_name, offset)
    }

    pub fn object_from_template(
        &self,
        template: Arc<Template>,
        layer_name: &str,
        offset: u64,
    ) -> CoreResult<Object<'_>> {
        Object::new(self, template, ObjectInfo::new(layer_name, offset))
    }

    /// A view of the `table_name` symbols loaded at `offset` in `layer_name`.
    pub fn module(&self, table_name: &str, layer_name: &str, offset: u64) -> Module<'_> {
        Module {
            context: self,
            name: table_name.to_owned(),
            layer_name: layer_name.to_owned(),
            offset,
        }
    }

    /// Construct the layer described under `config_path` and register it as `name`.
    pub fn build_layer(&mut self, class: LayerClass, config_path: &str, name: &str) -> CoreResult<Arc<dyn Layer>> {
        let layer = class.construct(self, config_path, name)?;
        self.add_layer(layer.clone())?;
        info!(layer = %name, class = %class, "added layer");
        Ok(layer)
    }

    /// Build every layer configured under `prefix`, one child key per layer,
    /// each naming its `class`. Layers are built once their dependencies exist.
    pub fn build_layers(&mut self, prefix: &str) -> CoreResult<Vec<String>> {
        let mut pending = self.config.children(prefix);
        let mut built = Vec::new();
        while !pending.is_empty() {
            let built_before = built.len();
            let mut deferred = Vec::new();
            let mut last_error = None;
            for name in pending {
                let path = ConfigMap::path_join([prefix, name.as_str()]);
                let class: LayerClass = self
                    .config
                    .get_str(&ConfigMap::path_join([path.as_str(), "class"]))?
                    .parse()?;
                match self.build_layer(class, &path, &name) {
                    Ok(_) => built.push(name),
                    Err(e @ CoreError::LayerNotFound(_)) => {
                        debug!(layer = %name, error = %e, "deferring layer until its dependencies exist");
                        last_error = Some(e);
                        deferred.push(name);
                    }
                    Err(e) => return Err(e),
                }
            }
            // a pass that built nothing cannot make progress
            if built.len() == built_before {
                if let Some(e) = last_error {
                    return Err(e);
                }
            }
            pending = deferred;
        }
        Ok(built)
    }
}

/// The layer classes a configuration tree can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerClass {
    File,
    Buffer,
    Vmware,
    Intel,
    IntelPae,
    Intel32e,
    WindowsIntel,
    WindowsIntelPae,
    WindowsIntel32e,
    RegistryHive,
}

impl LayerClass {
    pub const ALL: [LayerClass; 10] = [
        LayerClass::File,
        LayerClass::Buffer,
        LayerClass::Vmware,
        LayerClass::Intel,
        LayerClass::IntelPae,
        LayerClass::Intel32e,
        LayerClass::WindowsIntel,
        LayerClass::WindowsIntelPae,
        LayerClass::WindowsIntel32e,
        LayerClass::RegistryHive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LayerClass::File => "file",
            LayerClass::Buffer => "buffer",
            LayerClass::Vmware => "vmware",
            LayerClass::Intel => "intel",
            LayerClass::IntelPae => "intel_pae",
            LayerClass::Intel32e => "intel32e",
            LayerClass::WindowsIntel => "windows_intel",
            LayerClass::WindowsIntelPae => "windows_intel_pae",
            LayerClass::WindowsIntel32e => "windows_intel32e",
            LayerClass::RegistryHive => "registry_hive",
        }
    }

    /// Build a layer of this class from the keys under `config_path`.
    pub fn construct(self, context: &Context, config_path: &str, name: &str) -> CoreResult<Arc<dyn Layer>> {
        let paged = |structure: &'static PagingStructure, validity| -> CoreResult<Arc<dyn Layer>> {
            Ok(Arc::new(IntelLayer::from_config(
                context,
                config_path,
                name,
                structure,
                validity,
            )?))
        };
        let layer: Arc<dyn Layer> = match self {
            LayerClass::File => Arc::new(FileLayer::from_config(context, config_path, name)?),
            LayerClass::Buffer => Arc::new(BufferLayer::from_config(context, config_path, name)?),
            LayerClass::Vmware => Arc::new(VmwareLayer::from_config(context, config_path, name)?),
            LayerClass::RegistryHive => Arc::new(RegistryHive::from_config(context, config_path, name)?),
            LayerClass::Intel => paged(&INTEL, PageValidity::Standard)?,
            LayerClass::IntelPae => paged(&INTEL_PAE, PageValidity::Standard)?,
            LayerClass::Intel32e => paged(&INTEL_32E, PageValidity::Standard)?,
            LayerClass::WindowsIntel => paged(&INTEL, PageValidity::Windows)?,
            LayerClass::WindowsIntelPae => paged(&INTEL_PAE, PageValidity::Windows)?,
            LayerClass::WindowsIntel32e => paged(&INTEL_32E, PageValidity::Windows)?,
        };
        Ok(layer)
    }
}

impl fmt::Display for LayerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerClass {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LayerClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| CoreError::InvalidParameter(format!("Unknown layer class: {}", s)))
    }
}

/// A symbol table bound to the layer and base address it describes.
#[derive(Debug, Clone)]
pub struct Module<'ctx> {
    context: &'ctx Context,
    name: String,
    layer_name: String,
    offset: u64,
}

impl<'ctx> Module<'ctx> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layer_name(&self) -> &str {
        &self.layer_name
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn qualify(&self, name: &str) -> CoreResult<String> {
        if name.contains(TABLE_SEPARATOR) {
            return Err(CoreError::InvalidParameter(format!(
                "{} cannot reference another module",
                name
            )));
        }
        Ok(format!("{}{}{}", self.name, TABLE_SEPARATOR, name))
    }

    /// The object a symbol describes, at its address relative to the module base.
    pub fn object_from_symbol(&self, symbol_name: &str) -> CoreResult<Object<'ctx>> {
        let symbol = self.get_symbol(symbol_name)?;
        let template = symbol.type_template.ok_or_else(|| {
            CoreError::type_error(format!("Symbol {} has no associated type information", symbol.name))
        })?;
        self.context
            .object_from_template(template, &self.layer_name, symbol.address.wrapping_add(self.offset))
    }

    /// A `type_name` object of this module at absolute `offset`.
    pub fn object(&self, type_name: &str, offset: u64) -> CoreResult<Object<'ctx>> {
        self.context.object(&self.qualify(type_name)?, &self.layer_name, offset)
    }

    pub fn get_type(&self, name: &str) -> CoreResult<Arc<Template>> {
        self.context.symbol_space().get_type(&self.qualify(name)?)
    }

    pub fn get_symbol(&self, name: &str) -> CoreResult<Symbol> {
        self.context.symbol_space().get_symbol(&self.qualify(name)?)
    }

    pub fn get_enumeration(&self, name: &str) -> CoreResult<Arc<Template>> {
        self.context.symbol_space().get_enumeration(&self.qualify(name)?)
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.qualify(name)
            .map(|n| self.context.symbol_space().has_type(&n))
            .unwrap_or(false)
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.qualify(name)
            .map(|n| self.context.symbol_space().has_symbol(&n))
            .unwrap_or(false)
    }

    pub fn has_enumeration(&self, name: &str) -> bool {
        self.qualify(name)
            .map(|n| self.context.symbol_space().has_enumeration(&n))
            .unwrap_or(false)
    }
}

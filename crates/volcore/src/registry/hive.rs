//! Translation layer over an in-memory registry hive.
//!
//! A hive addresses its data by cell index. The top bit selects the stable
//! or volatile storage, and the remaining bits index a two-level map
//! (directory, table) of 4 KiB blocks:
//!
//! ```text
//!  31 | 30 ........ 21 | 20 ..... 12 | 11 ....... 0
//!  V  |   directory    |    table    |  block offset
//! ```
//!
//! The storage maps are read from the base layer; the blocks themselves may
//! live in a separate process layer when the kernel maps hives that way.

use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::memory::traits::{is_valid_mapped, read_mapped, write_mapped};
use crate::memory::translators::intel::mask;
use crate::memory::{address_mask_for, Layer, MappedRange, TranslationLayer};
use crate::objects::{Encoding, NativeFormat, Object, TemplateArgs, TemplateKind};
use crate::symbols::extensions::registry::{cmhive_name, hmap_block_offset, VOLATILE_BIT};
use crate::symbols::extensions::{CellNode, KeyNode};
use crate::symbols::TABLE_SEPARATOR;
use std::any::Any;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

/// `_HHIVE.Signature` of a live hive.
pub const HIVE_SIGNATURE: u64 = 0xbee0_bee0;

/// Root cell used when the base block is unreadable or not a `regf` block.
pub const DEFAULT_ROOT_CELL: u64 = 0x20;

/// Storage length assumed when the hive's own lengths cannot be read.
const DEFAULT_MAX_ADDRESS: u64 = 0x7fff_ffff;

/// Where the storage map fields sit, taken from the symbol table.
#[derive(Debug, Clone)]
struct MapLayout {
    pointer: NativeFormat,
    /// `_HMAP_DIRECTORY.Directory`
    directory_offset: u64,
    /// `_HMAP_TABLE.Table`
    table_offset: u64,
    entry_size: u64,
    /// `_HMAP_ENTRY.PermanentBinAddress` or `.BlockAddress`
    block_offset: u64,
    block_format: NativeFormat,
    permanent: bool,
}

impl MapLayout {
    fn from_symbols(context: &Context, table_name: &str) -> CoreResult<Self> {
        let space = context.symbol_space();
        let get = |name: &str| space.get_type(&format!("{}{}{}", table_name, TABLE_SEPARATOR, name));

        let pointer = match get("pointer")?.kind() {
            TemplateKind::Pointer { format, .. } => *format,
            other => return Err(CoreError::type_error(format!("pointer is a {}", other.class_name()))),
        };
        let entry = get("_HMAP_ENTRY")?;
        let permanent = entry.has_member("PermanentBinAddress");
        let field = if permanent { "PermanentBinAddress" } else { "BlockAddress" };
        let (block_offset, block) = entry.member(field).ok_or_else(|| CoreError::MemberNotFound {
            type_name: entry.type_name().to_owned(),
            member: field.to_owned(),
        })?;
        let block_format = match block.kind() {
            TemplateKind::Integer { format } | TemplateKind::Pointer { format, .. } => *format,
            other => {
                return Err(CoreError::type_error(format!(
                    "{}.{} is a {}",
                    entry.type_name(),
                    field,
                    other.class_name()
                )))
            }
        };

        Ok(MapLayout {
            pointer,
            directory_offset: get("_HMAP_DIRECTORY")?.relative_child_offset("Directory")?,
            table_offset: get("_HMAP_TABLE")?.relative_child_offset("Table")?,
            entry_size: entry.size()?,
            block_offset,
            block_format,
            permanent,
        })
    }
}

/// A registry hive exposed as a layer of cell indices.
pub struct RegistryHive {
    name: String,
    table_name: String,
    hive_offset: u64,
    /// Holds the `_CMHIVE` and its storage maps.
    base: Arc<dyn Layer>,
    /// Holds the hive blocks.
    target: Arc<dyn Layer>,
    maps: [Option<u64>; 2],
    max_addresses: [u64; 2],
    layout: MapLayout,
    root_cell_offset: u64,
    version: Option<u64>,
    hive_name: Option<String>,
}

impl std::fmt::Debug for RegistryHive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryHive")
            .field("name", &self.name)
            .field("hive_offset", &self.hive_offset)
            .field("base", &self.base.name())
            .field("target", &self.target.name())
            .field("max_addresses", &self.max_addresses)
            .finish()
    }
}

impl RegistryHive {
    /// Read the `_CMHIVE` at `hive_offset` of `base_layer`, using the types
    /// of the `table_name` symbol table.
    pub fn new(
        context: &Context,
        name: impl Into<String>,
        base_layer: &str,
        hive_offset: u64,
        table_name: &str,
    ) -> CoreResult<Self> {
        let name = name.into();
        let base = context.layers().get(base_layer)?;
        let cmhive = context.object(
            &format!("{}{}_CMHIVE", table_name, TABLE_SEPARATOR),
            base_layer,
            hive_offset,
        )?;
        let hive = cmhive.get_member("Hive")?;

        let signature = hive.get_member("Signature")?.as_u64()?;
        if signature != HIVE_SIGNATURE {
            return Err(CoreError::RegistryFormat {
                layer_name: name,
                message: format!("Registry hive at {:#x} does not have a valid signature", hive_offset),
            });
        }

        let mut maps = [None; 2];
        let mut max_addresses = [DEFAULT_MAX_ADDRESS; 2];
        for index in 0..2usize {
            match Self::read_storage(&hive, index) {
                Ok((length, map)) => {
                    max_addresses[index] = length;
                    maps[index] = Some(map);
                }
                Err(e) if e.is_address_error() => {
                    debug!(layer = %name, storage = index, error = %e, "unreadable storage, using default bounds");
                }
                Err(e) => return Err(e),
            }
        }
        trace!(layer = %name, max_addresses = ?max_addresses, "hive storage bounds");

        let root_cell_offset = match Self::read_root_cell(&hive) {
            Ok(Some(cell)) => cell,
            Ok(None) => DEFAULT_ROOT_CELL,
            Err(e) if e.is_address_error() => {
                debug!(layer = %name, error = %e, "unreadable base block");
                DEFAULT_ROOT_CELL
            }
            Err(e) => return Err(e),
        };

        let version = hive
            .has_member("Version")
            .then(|| hive.get_member("Version").and_then(|v| v.as_u64()))
            .transpose()?;

        Ok(RegistryHive {
            table_name: table_name.to_owned(),
            hive_offset,
            target: base.clone(),
            base,
            maps,
            max_addresses,
            layout: MapLayout::from_symbols(context, table_name)?,
            root_cell_offset,
            version,
            hive_name: cmhive_name(&cmhive),
            name,
        })
    }

    /// Read hive blocks from `layer` instead of the base layer.
    pub fn with_process_layer(mut self, layer: Arc<dyn Layer>) -> Self {
        self.target = layer;
        self
    }

    /// Build from `base_layer`, `hive_offset`, `nt_symbols` and the optional
    /// `registry_process_layer` keys under `config_path`.
    pub fn from_config(context: &Context, config_path: &str, name: &str) -> CoreResult<Self> {
        let config = context.config().branch(config_path);
        let hive = Self::new(
            context,
            name,
            config.get_str("base_layer")?,
            config.get_int("hive_offset")?,
            config.get_str("nt_symbols")?,
        )?;
        match config.get_str_opt("registry_process_layer")? {
            Some(process) => Ok(hive.with_process_layer(context.layers().get(process)?)),
            None => Ok(hive),
        }
    }

    fn read_storage(hive: &Object, index: usize) -> CoreResult<(u64, u64)> {
        let dual = hive.get_member("Storage")?.index(index as i64)?;
        Ok((dual.get_member("Length")?.as_u64()?, dual.get_member("Map")?.as_u64()?))
    }

    fn read_root_cell(hive: &Object) -> CoreResult<Option<u64>> {
        let base_block = hive.get_member("BaseBlock")?.dereference(None)?;
        let signature = base_block.get_member("Signature")?.cast_with(
            "string",
            &TemplateArgs::new().with_max_length(4).with_encoding(Encoding::Latin1),
        )?;
        if signature.as_str()? == "regf" {
            Ok(Some(base_block.get_member("RootCell")?.as_u64()?))
        } else {
            Ok(None)
        }
    }

    pub fn hive_offset(&self) -> u64 {
        self.hive_offset
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// `_HHIVE.Version`, when the symbol table declares it.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// The path the kernel recorded for this hive.
    pub fn hive_name(&self) -> &str {
        self.hive_name.as_deref().unwrap_or("[NONAME]")
    }

    pub fn root_cell_offset(&self) -> u64 {
        self.root_cell_offset
    }

    /// Largest cell index of the stable or volatile storage.
    pub fn max_address(&self, volatile: bool) -> u64 {
        self.max_addresses[volatile as usize]
    }

    /// Whether `cell` falls within the hive, ignoring the volatile bit.
    pub fn contains_cell(&self, cell: u64) -> bool {
        (cell & !VOLATILE_BIT) < self.maximum_address()
    }

    fn qualify(&self, type_name: &str) -> String {
        format!("{}{}{}", self.table_name, TABLE_SEPARATOR, type_name)
    }

    fn read_field(&self, offset: u64, format: NativeFormat) -> CoreResult<u64> {
        let data = self.base.read(offset, format.size(), false)?;
        Ok(format.decode_int(&data)? as u64)
    }

    /// Translate a cell index to an offset in the block layer.
    pub fn translate(&self, offset: u64) -> CoreResult<(u64, String)> {
        let volatile = (mask(offset, 31, 31) >> 31) as usize;
        if offset & !VOLATILE_BIT > self.max_addresses[volatile] {
            return Err(CoreError::RegistryInvalidIndex {
                layer_name: self.name.clone(),
                offset,
                message: "Mapping request for value greater than maxaddr".into(),
            });
        }
        let map = self.maps[volatile].ok_or_else(|| CoreError::RegistryInvalidIndex {
            layer_name: self.name.clone(),
            offset,
            message: "Storage map is unavailable".into(),
        })?;

        let dir_index = mask(offset, 30, 21) >> 21;
        let table_index = mask(offset, 20, 12) >> 12;
        let suboffset = mask(offset, 11, 0);

        let layout = &self.layout;
        let base_mask = self.base.address_mask();
        let directory_entry = map + layout.directory_offset + dir_index * layout.pointer.size() as u64;
        let table = self.read_field(directory_entry & base_mask, layout.pointer)? & base_mask;
        let entry = table + layout.table_offset + table_index * layout.entry_size;
        let raw = self.read_field((entry + layout.block_offset) & base_mask, layout.block_format)?;
        let block = hmap_block_offset(raw, layout.permanent);
        Ok((block + suboffset, self.target.name().to_owned()))
    }

    /// The `_CELL_DATA` of a cell, past its size header.
    pub fn get_cell<'ctx>(&self, context: &'ctx Context, cell_offset: u64) -> CoreResult<Object<'ctx>> {
        context.object(&self.qualify("_CELL_DATA"), &self.name, cell_offset.wrapping_add(4))
    }

    /// The cell interpreted according to its signature.
    pub fn get_node<'ctx>(&self, context: &'ctx Context, cell_offset: u64) -> CoreResult<CellNode<'ctx>> {
        let cell = self.get_cell(context, cell_offset)?;
        let signature = self.read(cell.offset(), 2, false)?;
        let (member, wrap): (&str, fn(Rc<Object<'ctx>>) -> CellNode<'ctx>) = match signature.as_slice() {
            b"nk" => ("KeyNode", CellNode::Key),
            b"sk" => ("KeySecurity", CellNode::Security),
            b"vk" => ("KeyValue", CellNode::Value),
            b"db" => ("ValueData", CellNode::BigData),
            b"lf" | b"lh" | b"li" | b"ri" => ("KeyIndex", CellNode::Index),
            _ => {
                debug!(
                    layer = %self.name,
                    cell = cell_offset,
                    signature = ?signature,
                    "Unknown cell signature"
                );
                return Ok(CellNode::Unknown(Rc::new(cell)));
            }
        };
        Ok(wrap(cell.get_member("u")?.get_member(member)?))
    }

    pub fn root_node<'ctx>(&self, context: &'ctx Context) -> CoreResult<KeyNode<'ctx>> {
        self.get_node(context, self.root_cell_offset)?.into_key()
    }

    /// The key at a backslash separated path below the root, matched case-insensitively.
    pub fn get_key<'ctx>(&self, context: &'ctx Context, key: &str) -> CoreResult<KeyNode<'ctx>> {
        let mut nodes = self.get_key_path_nodes(context, key)?;
        nodes.pop().ok_or_else(|| CoreError::KeyNotFound {
            key: key.to_owned(),
            found: String::new(),
        })
    }

    /// Every node from the root down to the key at `key`.
    pub fn get_key_path_nodes<'ctx>(&self, context: &'ctx Context, key: &str) -> CoreResult<Vec<KeyNode<'ctx>>> {
        let mut nodes = vec![self.root_node(context)?];
        let mut found: Vec<&str> = Vec::new();

        for segment in key.split('\\').filter(|s| !s.is_empty()) {
            let wanted = segment.to_lowercase();
            let current = nodes.last().ok_or_else(|| CoreError::KeyNotFound {
                key: segment.to_owned(),
                found: found.join("\\"),
            })?;
            let next = current
                .subkeys()?
                .into_iter()
                .find(|subkey| subkey.name().map(|n| n.to_lowercase() == wanted).unwrap_or(false));
            match next {
                Some(subkey) => {
                    found.push(segment);
                    nodes.push(subkey);
                }
                None => {
                    return Err(CoreError::KeyNotFound {
                        key: segment.to_owned(),
                        found: found.join("\\"),
                    })
                }
            }
        }
        Ok(nodes)
    }

    /// Depth-first walk over every key below `node` (default: the root),
    /// visiting each key once.
    pub fn visit_nodes<'ctx>(
        &self,
        context: &'ctx Context,
        node: Option<KeyNode<'ctx>>,
        visitor: &mut dyn FnMut(&KeyNode<'ctx>),
    ) -> CoreResult<()> {
        let start = match node {
            Some(node) => node,
            None => self.root_node(context)?,
        };
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if !seen.insert(node.offset()) {
                continue;
            }
            visitor(&node);
            let mut subkeys = node.subkeys()?;
            subkeys.reverse();
            stack.extend(subkeys);
        }
        Ok(())
    }
}

impl Layer for RegistryHive {
    fn name(&self) -> &str {
        &self.name
    }

    fn maximum_address(&self) -> u64 {
        self.max_addresses[0].max(self.max_addresses[1])
    }

    /// Keeps the volatile bit.
    fn address_mask(&self) -> u64 {
        address_mask_for(self.maximum_address()) | VOLATILE_BIT
    }

    fn is_valid(&self, offset: u64, length: u64) -> bool {
        is_valid_mapped(self, offset, length)
    }

    fn read(&self, offset: u64, length: usize, pad: bool) -> CoreResult<Vec<u8>> {
        read_mapped(self, offset, length, pad)
    }

    fn write(&self, offset: u64, data: &[u8]) -> CoreResult<()> {
        write_mapped(self, offset, data)
    }

    fn dependencies(&self) -> Vec<String> {
        let mut deps = vec![self.base.name().to_owned()];
        if self.target.name() != self.base.name() {
            deps.push(self.target.name().to_owned());
        }
        deps
    }

    fn as_translation(&self) -> Option<&dyn TranslationLayer> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TranslationLayer for RegistryHive {
    /// A single piece per request; bin boundaries are not checked.
    fn mapping(&self, offset: u64, length: u64, ignore_errors: bool) -> CoreResult<Vec<MappedRange>> {
        match self.translate(offset) {
            Ok((mapped, layer)) => Ok(vec![MappedRange::new(offset, mapped, length, layer)]),
            Err(e) if ignore_errors && e.is_address_error() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn dependency(&self, name: &str) -> CoreResult<Arc<dyn Layer>> {
        [&self.base, &self.target]
            .into_iter()
            .find(|l| l.name() == name)
            .cloned()
            .ok_or_else(|| CoreError::LayerNotFound(name.to_owned()))
    }
}

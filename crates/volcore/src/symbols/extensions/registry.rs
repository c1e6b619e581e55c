//! Registry structures: hive maps, key nodes and values.
//!
//! Key and value objects must live on a [`RegistryHive`] layer; their cell
//! references are resolved through it.

use super::{extension_wrapper, UnicodeString};
use crate::error::{CoreError, CoreResult};
use crate::memory::Layer;
use crate::objects::{Encoding, EncodingErrors, Object, TemplateArgs};
use crate::registry::RegistryHive;
use std::collections::HashSet;
use std::rc::Rc;
use tracing::{debug, trace};

/// Largest chunk of a big-data value.
pub const BIG_DATA_MAXLEN: u64 = 0x3fd8;

/// Top bit of a cell index: the cell lives in volatile storage.
pub const VOLATILE_BIT: u64 = 0x8000_0000;

const KEY_COMP_NAME: u64 = 0x0020;
const VALUE_COMP_NAME: u64 = 0x0001;
const DATA_INLINE: u64 = 0x8000_0000;

/// The address of a hive bin from a raw map entry field.
pub(crate) fn hmap_block_offset(raw: u64, permanent: bool) -> u64 {
    if permanent {
        raw ^ (raw & 0xf)
    } else {
        raw
    }
}

/// First non-empty name among the path fields of a `_CMHIVE`.
pub(crate) fn cmhive_name(cmhive: &Object) -> Option<String> {
    ["FileFullPath", "FileUserName", "HiveRootPath"]
        .into_iter()
        .filter(|field| cmhive.has_member(field))
        .find_map(|field| {
            let text = cmhive
                .get_member(field)
                .and_then(UnicodeString::new)
                .and_then(|s| s.string());
            match text {
                Ok(text) if !text.is_empty() => Some(text),
                Ok(_) => None,
                Err(e) => {
                    debug!(field, error = %e, "unreadable hive name");
                    None
                }
            }
        })
}

/// Run `f` against the hive layer `object` was read from.
fn with_hive<T>(object: &Object, f: impl FnOnce(&RegistryHive) -> CoreResult<T>) -> CoreResult<T> {
    let layer = object.context().layers().get(object.layer_name())?;
    let hive = layer.as_any().downcast_ref::<RegistryHive>().ok_or_else(|| {
        CoreError::type_error(format!(
            "{} was not instantiated on a RegistryHive layer",
            object.type_name()
        ))
    })?;
    f(hive)
}

/// Cast a character array member to text of `length` bytes.
fn member_text(object: &Object, member: &str, length: u64, encoding: Encoding) -> CoreResult<String> {
    let text = object.get_member(member)?.cast_with(
        "string",
        &TemplateArgs::new()
            .with_max_length(length)
            .with_encoding(encoding)
            .with_errors(EncodingErrors::Replace),
    )?;
    Ok(text.as_str()?.to_owned())
}

/// A hive cell interpreted by its two-byte signature.
#[derive(Debug, Clone)]
pub enum CellNode<'ctx> {
    /// `nk`
    Key(Rc<Object<'ctx>>),
    /// `sk`
    Security(Rc<Object<'ctx>>),
    /// `vk`
    Value(Rc<Object<'ctx>>),
    /// `db`
    BigData(Rc<Object<'ctx>>),
    /// `lf`, `lh`, `li` and `ri`
    Index(Rc<Object<'ctx>>),
    /// Anything else, as the raw cell.
    Unknown(Rc<Object<'ctx>>),
}

impl<'ctx> CellNode<'ctx> {
    pub fn object(&self) -> &Rc<Object<'ctx>> {
        match self {
            CellNode::Key(o)
            | CellNode::Security(o)
            | CellNode::Value(o)
            | CellNode::BigData(o)
            | CellNode::Index(o)
            | CellNode::Unknown(o) => o,
        }
    }

    pub fn into_key(self) -> CoreResult<KeyNode<'ctx>> {
        match self {
            CellNode::Key(object) => KeyNode::new(object),
            other => Err(CoreError::type_error(format!(
                "Cell at {:#x} is not a key node",
                other.object().offset()
            ))),
        }
    }

    pub fn into_value(self) -> CoreResult<KeyValue<'ctx>> {
        match self {
            CellNode::Value(object) => KeyValue::new(object),
            other => Err(CoreError::type_error(format!(
                "Cell at {:#x} is not a key value",
                other.object().offset()
            ))),
        }
    }
}

extension_wrapper!(
    /// `_HMAP_ENTRY`: one 4 KiB block of a hive storage map.
    HmapEntry
);

impl HmapEntry<'_> {
    /// Address of the block this entry maps.
    pub fn block_offset(&self) -> CoreResult<u64> {
        if self.has_member("PermanentBinAddress") {
            Ok(hmap_block_offset(self.get_member("PermanentBinAddress")?.as_u64()?, true))
        } else {
            self.get_member("BlockAddress")?.as_u64()
        }
    }
}

extension_wrapper!(
    /// `_CMHIVE`: the kernel's control block for a loaded hive.
    CmHive
);

impl CmHive<'_> {
    /// The first populated path naming this hive.
    pub fn name(&self) -> Option<String> {
        cmhive_name(self)
    }
}

extension_wrapper!(
    /// `_CM_KEY_NODE`: a registry key.
    KeyNode
);

impl<'ctx> KeyNode<'ctx> {
    pub fn is_volatile(&self) -> CoreResult<bool> {
        with_hive(self, |_| Ok(self.offset() & VOLATILE_BIT != 0))
    }

    pub fn name(&self) -> CoreResult<String> {
        let length = self.get_member("NameLength")?.as_u64()?;
        let encoding = if self.get_member("Flags")?.as_u64()? & KEY_COMP_NAME != 0 {
            Encoding::Latin1
        } else {
            Encoding::Utf16Le
        };
        member_text(self, "Name", length, encoding)
    }

    /// Backslash-joined names from the hive root down to this key.
    pub fn key_path(&self) -> CoreResult<String> {
        with_hive(self, |hive| {
            let root = (hive.root_cell_offset() + 4) & hive.address_mask();
            let mut names = vec![self.name()?];
            let mut seen = HashSet::from([self.offset()]);
            let mut parent = (self.offset() != root)
                .then(|| self.get_member("Parent").and_then(|p| p.as_u64()))
                .transpose()?;

            while let Some(cell) = parent {
                let node = hive.get_node(self.context(), cell)?.into_key()?;
                if !seen.insert(node.offset()) {
                    return Err(CoreError::RegistryFormat {
                        layer_name: hive.name().to_owned(),
                        message: format!("Key parents loop at cell {:#x}", cell),
                    });
                }
                names.push(node.name()?);
                parent = (node.offset() != root)
                    .then(|| node.get_member("Parent").and_then(|p| p.as_u64()))
                    .transpose()?;
            }
            names.reverse();
            Ok(names.join("\\"))
        })
    }

    /// Stable and volatile subkeys, in list order.
    pub fn subkeys(&self) -> CoreResult<Vec<KeyNode<'ctx>>> {
        with_hive(self, |hive| {
            let counts = self.get_member("SubKeyCounts")?;
            let lists = self.get_member("SubKeyLists")?;
            let mut keys = Vec::new();
            for index in 0..2 {
                if counts.index(index)?.as_u64()? == 0 {
                    continue;
                }
                let list = lists.index(index)?.as_u64()?;
                self.collect_subkeys(hive, list, &mut keys, true)?;
            }
            Ok(keys)
        })
    }

    /// Gather the keys of one subkey list. An `ri` root holds further lists,
    /// which are not themselves allowed to be roots.
    fn collect_subkeys(
        &self,
        hive: &RegistryHive,
        list_cell: u64,
        keys: &mut Vec<KeyNode<'ctx>>,
        allow_root: bool,
    ) -> CoreResult<()> {
        if !hive.contains_cell(list_cell) {
            trace!(cell = list_cell, "Node found with address outside the valid Hive size");
            return Ok(());
        }
        let index = match hive.get_node(self.context(), list_cell)? {
            CellNode::Index(index) => index,
            other => {
                debug!(
                    cell = list_cell,
                    type_name = other.object().type_name(),
                    "Unexpected node type encountered when traversing subkeys"
                );
                return Ok(());
            }
        };

        let signature = hive.read(index.offset(), 2, false)?;
        let (step, is_root) = match signature.as_slice() {
            b"lf" | b"lh" => (2, false),
            b"li" => (1, false),
            b"ri" if allow_root => (1, true),
            _ => return Ok(()),
        };
        let count = index.get_member("Count")?.as_u64()?;
        let entries = index.get_member("List")?.resized(count * step as u64)?;

        for entry in entries.elements()?.into_iter().step_by(step) {
            let offset = entry.as_u64()?;
            if !hive.contains_cell(offset) {
                trace!(cell = offset, "Node found with address outside the valid Hive size");
                continue;
            }
            if is_root {
                self.collect_subkeys(hive, offset, keys, false)?;
                continue;
            }
            match hive.get_node(self.context(), offset) {
                Ok(CellNode::Key(node)) => keys.push(KeyNode::new(node)?),
                Ok(other) => debug!(
                    cell = offset,
                    type_name = other.object().type_name(),
                    "Unexpected node type encountered when traversing subkeys"
                ),
                Err(e) if e.is_address_error() => debug!(cell = offset, error = %e, "skipping bad subkey"),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// The values of this key, skipping empty and non-value slots.
    pub fn values(&self) -> CoreResult<Vec<KeyValue<'ctx>>> {
        with_hive(self, |hive| {
            let value_list = self.get_member("ValueList")?;
            let count = value_list.get_member("Count")?.as_u64()?;
            if count == 0 {
                return Ok(Vec::new());
            }
            let list = value_list.get_member("List")?.as_u64()?;
            let slots = hive
                .get_cell(self.context(), list)?
                .get_member("u")?
                .get_member("KeyList")?
                .resized(count)?;

            let mut values = Vec::new();
            for slot in slots.elements()? {
                let cell = slot.as_u64()?;
                if cell == 0 {
                    continue;
                }
                match hive.get_node(self.context(), cell) {
                    Ok(CellNode::Value(value)) => values.push(KeyValue::new(value)?),
                    Ok(_) => {}
                    Err(e) if e.is_address_error() => debug!(cell, error = %e, "skipping bad value"),
                    Err(e) => return Err(e),
                }
            }
            Ok(values)
        })
    }
}

/// Registry value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegValueType {
    None,
    Sz,
    ExpandSz,
    Binary,
    Dword,
    DwordBigEndian,
    Link,
    MultiSz,
    ResourceList,
    FullResourceDescriptor,
    ResourceRequirementsList,
    Qword,
    Unknown(u32),
}

impl From<u32> for RegValueType {
    fn from(value: u32) -> Self {
        match value {
            0 => RegValueType::None,
            1 => RegValueType::Sz,
            2 => RegValueType::ExpandSz,
            3 => RegValueType::Binary,
            4 => RegValueType::Dword,
            5 => RegValueType::DwordBigEndian,
            6 => RegValueType::Link,
            7 => RegValueType::MultiSz,
            8 => RegValueType::ResourceList,
            9 => RegValueType::FullResourceDescriptor,
            10 => RegValueType::ResourceRequirementsList,
            11 => RegValueType::Qword,
            other => RegValueType::Unknown(other),
        }
    }
}

/// Decoded value data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegValue {
    Empty,
    Text(String),
    MultiText(Vec<String>),
    Dword(u32),
    Qword(u64),
    Binary(Vec<u8>),
}

extension_wrapper!(
    /// `_CM_KEY_VALUE`: a named value of a key.
    KeyValue
);

impl<'ctx> KeyValue<'ctx> {
    pub fn name(&self) -> CoreResult<String> {
        let length = self.get_member("NameLength")?.as_u64()?;
        let encoding = if self.get_member("Flags")?.as_u64()? & VALUE_COMP_NAME != 0 {
            Encoding::Latin1
        } else {
            Encoding::Utf16Le
        };
        member_text(self, "Name", length, encoding)
    }

    pub fn value_type(&self) -> CoreResult<RegValueType> {
        Ok(RegValueType::from(self.get_member("Type")?.as_u64()? as u32))
    }

    /// The raw data bytes, wherever the hive stores them.
    pub fn raw_data(&self) -> CoreResult<Vec<u8>> {
        with_hive(self, |hive| {
            let raw_length = self.get_member("DataLength")?.as_u64()?;
            let length = raw_length & !DATA_INLINE;
            let data = self.get_member("Data")?;

            if raw_length & DATA_INLINE != 0 {
                if length > 4 {
                    return Err(CoreError::InvalidData(format!(
                        "Unable to read inline registry value with excessive length: {}",
                        length
                    )));
                }
                hive.read(data.offset(), length as usize, false)
            } else if hive.version() == Some(5) && length > 0x4000 {
                self.big_data(hive, data.as_u64()?, length)
            } else {
                hive.read(data.as_u64()?.wrapping_add(4), length as usize, false)
            }
        })
    }

    /// Reassemble a value stored as a list of big-data blocks.
    fn big_data(&self, hive: &RegistryHive, cell: u64, length: u64) -> CoreResult<Vec<u8>> {
        let context = self.context();
        let big_data = match hive.get_node(context, cell)? {
            CellNode::BigData(node) => node,
            other => {
                return Err(CoreError::RegistryFormat {
                    layer_name: hive.name().to_owned(),
                    message: format!("Cell {:#x} is not big data ({})", cell, other.object().type_name()),
                })
            }
        };
        let count = big_data.get_member("Count")?.as_u64()?;
        let list = big_data.get_member("List")?.as_u64()?;

        let mut remaining = length;
        let mut data = Vec::with_capacity(length as usize);
        for i in 0..count {
            let block = hive.get_cell(context, list + i * 4)?.cast("unsigned int")?.as_u64()?;
            if block < hive.maximum_address() {
                let amount = BIG_DATA_MAXLEN.min(remaining);
                let block_cell = hive.get_cell(context, block)?;
                data.extend(hive.read(block_cell.offset(), amount as usize, false)?);
                remaining -= amount;
            }
        }
        Ok(data)
    }

    /// Decode the data according to the value type.
    pub fn decode_data(&self) -> CoreResult<RegValue> {
        let data = self.raw_data()?;
        let mismatch = || {
            CoreError::InvalidData(format!(
                "Size of data does not match the type of registry value {}",
                self.name().unwrap_or_default()
            ))
        };
        Ok(match self.value_type()? {
            RegValueType::Dword => RegValue::Dword(u32::from_le_bytes(data.try_into().map_err(|_| mismatch())?)),
            RegValueType::DwordBigEndian => {
                RegValue::Dword(u32::from_be_bytes(data.try_into().map_err(|_| mismatch())?))
            }
            RegValueType::Qword => RegValue::Qword(u64::from_le_bytes(data.try_into().map_err(|_| mismatch())?)),
            RegValueType::Sz | RegValueType::ExpandSz | RegValueType::Link => {
                let mut text = Encoding::Utf16Le.decode(&data, EncodingErrors::Replace)?;
                if let Some(end) = text.find('\0') {
                    text.truncate(end);
                }
                RegValue::Text(text)
            }
            RegValueType::MultiSz => {
                let text = Encoding::Utf16Le.decode(&data, EncodingErrors::Replace)?;
                RegValue::MultiText(
                    text.split('\0')
                        .take_while(|s| !s.is_empty())
                        .map(str::to_owned)
                        .collect(),
                )
            }
            RegValueType::Binary => RegValue::Binary(data),
            RegValueType::None => RegValue::Empty,
            other => {
                debug!(value_type = ?other, "Unknown registry value type encountered");
                let length = self.get_member("DataLength")?.as_u64()? & !DATA_INLINE;
                RegValue::Text(member_text(self, "Data", length, Encoding::Latin1)?)
            }
        })
    }
}

//! Typed views over bytes at a layer offset.
//!
//! An [`Object`] is built from a [`Template`] plus a layer name and offset.
//! Scalar values are decoded when the object is constructed; struct members
//! are built lazily on first access and cached per instance.

pub mod format;
pub mod template;
pub mod utility;

pub use format::{Encoding, EncodingErrors, Endian, FormatCode, NativeFormat};
pub use template::{Choices, Members, Template, TemplateArgs, TemplateKind};

use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::symbols::extensions::ExtensionKind;
use crate::symbols::TABLE_SEPARATOR;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::trace;

/// A non-owning description of the object a member was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub type_name: String,
    pub layer_name: String,
    pub offset: u64,
    pub member_name: Option<String>,
}

/// Where an object lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub layer_name: String,
    /// Masked by the layer's address mask at construction.
    pub offset: u64,
    pub member_name: Option<String>,
    pub parent: Option<ParentRef>,
    /// Layer used for pointer-sized values that must be read canonically.
    pub native_layer_name: String,
}

impl ObjectInfo {
    pub fn new(layer_name: impl Into<String>, offset: u64) -> Self {
        let layer_name = layer_name.into();
        ObjectInfo {
            native_layer_name: layer_name.clone(),
            layer_name,
            offset,
            member_name: None,
            parent: None,
        }
    }

    pub fn with_native_layer(mut self, native_layer_name: impl Into<String>) -> Self {
        self.native_layer_name = native_layer_name.into();
        self
    }

    pub fn with_member_name(mut self, member_name: impl Into<String>) -> Self {
        self.member_name = Some(member_name.into());
        self
    }

    pub fn with_parent(mut self, parent: ParentRef) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// A decoded object value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    None,
    Int(i128),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "-"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bytes(v) => {
                for b in v {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

/// A plain copy of an object's identity and value, detached from any layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub type_name: String,
    pub layer_name: String,
    pub offset: u64,
    pub member_name: Option<String>,
    pub value: Value,
}

/// A materialized, typed view of layer data.
pub struct Object<'ctx> {
    context: &'ctx Context,
    template: Arc<Template>,
    info: ObjectInfo,
    value: Value,
    members: RefCell<HashMap<String, Rc<Object<'ctx>>>>,
}

impl fmt::Debug for Object<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("type_name", &self.template.type_name())
            .field("class", &self.template.kind().class_name())
            .field("layer_name", &self.info.layer_name)
            .field("offset", &format_args!("{:#x}", self.info.offset))
            .field("value", &self.value)
            .finish()
    }
}

/// Follow a reference template through the symbol space.
pub(crate) fn resolve_template(context: &Context, template: &Arc<Template>) -> CoreResult<Arc<Template>> {
    if template.is_reference() {
        context.symbol_space().get_type(template.type_name())
    } else {
        Ok(template.clone())
    }
}

fn read_integer(context: &Context, base_type: &Template, layer_name: &str, offset: u64) -> CoreResult<i128> {
    match base_type.kind() {
        TemplateKind::Integer { format } => {
            let data = context.layers().read(layer_name, offset, format.size(), false)?;
            format.decode_int(&data)
        }
        other => Err(CoreError::type_error(format!(
            "{} base type must be an Integer, not {}",
            base_type.type_name(),
            other.class_name()
        ))),
    }
}

/// Python-style slice resolution over a sequence of `len` items.
fn slice_indices(len: i64, start: Option<i64>, stop: Option<i64>, step: i64) -> CoreResult<Vec<i64>> {
    if step == 0 {
        return Err(CoreError::InvalidParameter("slice step cannot be zero".into()));
    }
    let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
    let clamp = |index: i64| {
        if index < 0 {
            (index + len).max(lower)
        } else {
            index.min(upper)
        }
    };
    let start = start.map(clamp).unwrap_or(if step > 0 { lower } else { upper });
    let stop = stop.map(clamp).unwrap_or(if step > 0 { upper } else { lower });

    let mut indices = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        indices.push(i);
        i += step;
    }
    Ok(indices)
}

impl<'ctx> Object<'ctx> {
    /// Construct an object, reading and decoding its value.
    pub fn new(context: &'ctx Context, template: Arc<Template>, mut info: ObjectInfo) -> CoreResult<Self> {
        let mut template = resolve_template(context, &template)?;
        let layer = context.layers().get(&info.layer_name)?;
        info.offset &= layer.address_mask();

        let array_subtype = match template.kind() {
            TemplateKind::Array { subtype, .. } if subtype.is_reference() => Some(resolve_template(context, subtype)?),
            _ => None,
        };
        if let Some(subtype) = array_subtype {
            template = Arc::new(template.updated(&TemplateArgs::new().with_subtype(subtype))?);
        }

        let value = Self::decode(context, &template, &info)?;
        trace!(type_name = %template.type_name(), layer = %info.layer_name, offset = info.offset, "constructed object");
        Ok(Object {
            context,
            template,
            info,
            value,
            members: RefCell::new(HashMap::new()),
        })
    }

    fn decode(context: &Context, template: &Template, info: &ObjectInfo) -> CoreResult<Value> {
        let read = |length: u64| context.layers().read(&info.layer_name, info.offset, length as usize, false);
        Ok(match template.kind() {
            TemplateKind::Integer { format } => Value::Int(format.decode_int(&read(format.size() as u64)?)?),
            TemplateKind::Float { format } => Value::Float(format.decode_float(&read(format.size() as u64)?)?),
            TemplateKind::Char { format } => Value::Bytes(read(format.size() as u64)?),
            TemplateKind::Bytes { length } => Value::Bytes(read(*length)?),
            TemplateKind::String {
                max_length,
                encoding,
                errors,
            } => {
                let mut text = encoding.decode(&read(*max_length)?, *errors)?;
                if let Some(end) = text.find('\0') {
                    text.truncate(end);
                }
                Value::Str(text)
            }
            TemplateKind::Pointer { format, .. } => {
                let raw = format.decode_int(&read(format.size() as u64)?)?;
                let mask = context.layers().get(&info.layer_name)?.address_mask();
                Value::Int(((raw as u64) & mask) as i128)
            }
            TemplateKind::BitField {
                base_type,
                start_bit,
                end_bit,
            } => {
                let raw = read_integer(context, base_type, &info.layer_name, info.offset)?;
                let start = (*start_bit).min(126);
                let width = end_bit.saturating_sub(start).min(126);
                Value::Int((raw >> start) & ((1i128 << width) - 1))
            }
            TemplateKind::Enumeration {
                base_type,
                choices,
                allow_duplicates,
            } => {
                if !allow_duplicates {
                    let mut inverse: HashMap<i64, &str> = HashMap::new();
                    for (name, value) in choices.iter() {
                        if let Some(previous) = inverse.insert(*value, name) {
                            return Err(CoreError::AmbiguousConfiguration(format!(
                                "Enumeration value {} duplicated as {} and {}",
                                value, name, previous
                            )));
                        }
                    }
                }
                Value::Int(read_integer(context, base_type, &info.layer_name, info.offset)?)
            }
            TemplateKind::Void
            | TemplateKind::Function
            | TemplateKind::Array { .. }
            | TemplateKind::Struct { .. }
            | TemplateKind::Reference => Value::None,
        })
    }

    pub fn context(&self) -> &'ctx Context {
        self.context
    }

    pub fn template(&self) -> &Arc<Template> {
        &self.template
    }

    pub fn info(&self) -> &ObjectInfo {
        &self.info
    }

    pub fn type_name(&self) -> &str {
        self.template.type_name()
    }

    pub fn offset(&self) -> u64 {
        self.info.offset
    }

    pub fn layer_name(&self) -> &str {
        &self.info.layer_name
    }

    pub fn member_name(&self) -> Option<&str> {
        self.info.member_name.as_deref()
    }

    pub fn parent(&self) -> Option<&ParentRef> {
        self.info.parent.as_ref()
    }

    pub fn extension(&self) -> Option<ExtensionKind> {
        self.template.extension()
    }

    /// The table part of a qualified type name.
    pub fn symbol_table_name(&self) -> Option<&str> {
        self.type_name()
            .split_once(TABLE_SEPARATOR)
            .map(|(table, _)| table)
    }

    pub fn size(&self) -> CoreResult<u64> {
        self.template.size()
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn as_int(&self) -> CoreResult<i128> {
        match &self.value {
            Value::Int(v) => Ok(*v),
            _ => Err(CoreError::type_error(format!("{} is not an integer", self.type_name()))),
        }
    }

    /// The integer value as an address or unsigned quantity.
    pub fn as_u64(&self) -> CoreResult<u64> {
        Ok(self.as_int()? as u64)
    }

    pub fn as_float(&self) -> CoreResult<f64> {
        match &self.value {
            Value::Float(v) => Ok(*v),
            _ => Err(CoreError::type_error(format!("{} is not a float", self.type_name()))),
        }
    }

    pub fn as_bytes(&self) -> CoreResult<&[u8]> {
        match &self.value {
            Value::Bytes(v) => Ok(v),
            _ => Err(CoreError::type_error(format!("{} is not a byte sequence", self.type_name()))),
        }
    }

    pub fn as_str(&self) -> CoreResult<&str> {
        match &self.value {
            Value::Str(v) => Ok(v),
            _ => Err(CoreError::type_error(format!("{} is not a string", self.type_name()))),
        }
    }

    fn kind(&self) -> &TemplateKind {
        self.template.kind()
    }

    fn parent_ref(&self) -> ParentRef {
        ParentRef {
            type_name: self.type_name().to_owned(),
            layer_name: self.info.layer_name.clone(),
            offset: self.info.offset,
            member_name: self.info.member_name.clone(),
        }
    }

    /// Rebuild this object from the layer's current contents.
    pub fn reload(&self) -> CoreResult<Object<'ctx>> {
        Object::new(self.context, self.template.clone(), self.info.clone())
    }

    /// Write `value` in place and return the re-read object.
    ///
    /// Only scalars, pointers and raw byte spans can be written. Byte and
    /// string values are zero-padded or truncated to the object's length.
    pub fn write(&self, value: &Value) -> CoreResult<Object<'ctx>> {
        let mismatch = || {
            CoreError::type_error(format!(
                "Object {} requires a valid {} value to be written: {:?}",
                self.type_name(),
                self.kind().class_name(),
                value
            ))
        };
        let data = match (self.kind(), value) {
            (TemplateKind::Integer { format }, Value::Int(v)) | (TemplateKind::Pointer { format, .. }, Value::Int(v)) => {
                format.encode_int(*v)?
            }
            (TemplateKind::Float { format }, Value::Float(v)) => format.encode_float(*v)?,
            (TemplateKind::Char { format }, Value::Bytes(v)) => {
                if v.len() != format.size() {
                    return Err(mismatch());
                }
                v.clone()
            }
            (TemplateKind::Bytes { length }, Value::Bytes(v)) => {
                let mut data = v.clone();
                data.resize(*length as usize, 0);
                data
            }
            (
                TemplateKind::String {
                    max_length,
                    encoding,
                    errors,
                },
                Value::Str(v),
            ) => {
                let mut data = encoding.encode(v, *errors)?;
                data.resize(*max_length as usize, 0);
                data
            }
            (TemplateKind::Integer { .. }, _)
            | (TemplateKind::Pointer { .. }, _)
            | (TemplateKind::Float { .. }, _)
            | (TemplateKind::Char { .. }, _)
            | (TemplateKind::Bytes { .. }, _)
            | (TemplateKind::String { .. }, _) => return Err(mismatch()),
            (kind, _) => {
                return Err(CoreError::type_error(format!(
                    "{} objects cannot be written to directly",
                    kind.class_name()
                )))
            }
        };
        self.context.layers().write(&self.info.layer_name, self.info.offset, &data)?;
        self.reload()
    }

    // ------------------------------------------------------------------
    // Structs
    // ------------------------------------------------------------------

    pub fn has_member(&self, name: &str) -> bool {
        self.template.has_member(name)
    }

    pub fn member_names(&self) -> Vec<String> {
        self.template.member_names()
    }

    /// A struct member, built on first access and cached.
    ///
    /// Pointers forward member access to the object they point to.
    pub fn get_member(&self, name: &str) -> CoreResult<Rc<Object<'ctx>>> {
        if let Some(member) = self.members.borrow().get(name) {
            return Ok(member.clone());
        }

        match self.kind() {
            TemplateKind::Struct { .. } => {
                let (relative_offset, member_template) =
                    self.template.member(name).ok_or_else(|| CoreError::MemberNotFound {
                        type_name: self.type_name().to_owned(),
                        member: name.to_owned(),
                    })?;
                let info = ObjectInfo::new(&self.info.layer_name, self.info.offset.wrapping_add(relative_offset))
                    .with_native_layer(&self.info.native_layer_name)
                    .with_member_name(name)
                    .with_parent(self.parent_ref());
                let member = Rc::new(Object::new(self.context, member_template, info)?);
                self.members.borrow_mut().insert(name.to_owned(), member.clone());
                Ok(member)
            }
            TemplateKind::Pointer { .. } => self.dereference(None)?.get_member(name),
            _ => Err(CoreError::MemberNotFound {
                type_name: self.type_name().to_owned(),
                member: name.to_owned(),
            }),
        }
    }

    /// Reinterpret the same bytes as another type.
    ///
    /// A name without a table qualifier inherits this object's table.
    pub fn cast(&self, type_name: &str) -> CoreResult<Object<'ctx>> {
        self.cast_with(type_name, &TemplateArgs::new())
    }

    pub fn cast_with(&self, type_name: &str, args: &TemplateArgs) -> CoreResult<Object<'ctx>> {
        let qualified = match self.symbol_table_name() {
            Some(table) if !type_name.contains(TABLE_SEPARATOR) => format!("{}{}{}", table, TABLE_SEPARATOR, type_name),
            _ => type_name.to_owned(),
        };
        let mut template = self.context.symbol_space().get_type(&qualified)?;
        if !args.is_empty() {
            template = Arc::new(template.updated(args)?);
        }
        Object::new(self.context, template, self.info.clone())
    }

    // ------------------------------------------------------------------
    // Pointers
    // ------------------------------------------------------------------

    fn pointer_subtype(&self) -> CoreResult<Arc<Template>> {
        match self.kind() {
            TemplateKind::Pointer { subtype, .. } => resolve_template(self.context, subtype),
            kind => Err(CoreError::type_error(format!(
                "{} is a {}, not a Pointer",
                self.type_name(),
                kind.class_name()
            ))),
        }
    }

    /// The object this pointer points to, in `layer_name` or this pointer's layer.
    pub fn dereference(&self, layer_name: Option<&str>) -> CoreResult<Object<'ctx>> {
        let subtype = self.pointer_subtype()?;
        let layer_name = layer_name.unwrap_or(self.info.layer_name.as_str());
        let mask = self.context.layers().get(layer_name)?.address_mask();
        let info = ObjectInfo::new(layer_name, self.as_u64()? & mask)
            .with_native_layer(&self.info.native_layer_name)
            .with_parent(self.parent_ref());
        Object::new(self.context, subtype, info)
    }

    /// Whether the pointed-to bytes are mapped in `layer_name` or this pointer's layer.
    pub fn is_readable(&self, layer_name: Option<&str>) -> bool {
        let Ok(subtype) = self.pointer_subtype() else {
            return false;
        };
        let Ok(layer) = self.context.layers().get(layer_name.unwrap_or(self.info.layer_name.as_str())) else {
            return false;
        };
        let Ok(target) = self.as_u64() else {
            return false;
        };
        layer.is_valid(target, subtype.size().unwrap_or(1).max(1))
    }

    // ------------------------------------------------------------------
    // Arrays
    // ------------------------------------------------------------------

    fn array_parts(&self) -> CoreResult<(u64, &Arc<Template>)> {
        match self.kind() {
            TemplateKind::Array { count, subtype } => Ok((*count, subtype)),
            kind => Err(CoreError::type_error(format!(
                "{} is a {}, not an Array",
                self.type_name(),
                kind.class_name()
            ))),
        }
    }

    pub fn len(&self) -> CoreResult<u64> {
        Ok(self.array_parts()?.0)
    }

    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn element(&self, index: u64) -> CoreResult<Object<'ctx>> {
        let (_, subtype) = self.array_parts()?;
        let mask = self.context.layers().get(&self.info.layer_name)?.address_mask();
        let offset = self.info.offset.wrapping_add(subtype.size()?.wrapping_mul(index)) & mask;
        let info = ObjectInfo::new(&self.info.layer_name, offset)
            .with_native_layer(&self.info.native_layer_name)
            .with_parent(self.parent_ref());
        Object::new(self.context, subtype.clone(), info)
    }

    fn element_count(&self) -> CoreResult<i64> {
        let count = self.len()?;
        i64::try_from(count)
            .map_err(|_| CoreError::InvalidParameter(format!("Array of {} elements is too large to index", count)))
    }

    /// Element `index`; negative indices count from the end.
    pub fn index(&self, index: i64) -> CoreResult<Object<'ctx>> {
        let count = self.element_count()?;
        let resolved = if index < 0 { index + count } else { index };
        if resolved < 0 || resolved >= count {
            return Err(CoreError::InvalidParameter(format!(
                "Array index {} out of range for {} elements",
                index, count
            )));
        }
        self.element(resolved as u64)
    }

    /// Elements selected with sequence slicing semantics.
    pub fn slice(&self, start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> CoreResult<Vec<Object<'ctx>>> {
        let count = self.element_count()?;
        slice_indices(count, start, stop, step.unwrap_or(1))?
            .into_iter()
            .map(|i| self.element(i as u64))
            .collect()
    }

    pub fn elements(&self) -> CoreResult<Vec<Object<'ctx>>> {
        (0..self.len()?).map(|i| self.element(i)).collect()
    }

    /// The same array with a different element count.
    pub fn resized(&self, count: u64) -> CoreResult<Object<'ctx>> {
        self.array_parts()?;
        let template = Arc::new(self.template.updated(&TemplateArgs::new().with_count(count))?);
        Object::new(self.context, template, self.info.clone())
    }

    // ------------------------------------------------------------------
    // Enumerations
    // ------------------------------------------------------------------

    pub fn choices(&self) -> CoreResult<&Choices> {
        match self.kind() {
            TemplateKind::Enumeration { choices, .. } => Ok(choices.as_ref()),
            kind => Err(CoreError::type_error(format!(
                "{} is a {}, not an Enumeration",
                self.type_name(),
                kind.class_name()
            ))),
        }
    }

    /// The name of `value`, or of this enumeration's own value.
    ///
    /// When duplicate values are permitted the last name in sorted order wins.
    pub fn lookup(&self, value: Option<i128>) -> CoreResult<String> {
        let value = match value {
            Some(v) => v,
            None => self.as_int()?,
        };
        self.choices()?
            .iter()
            .filter(|(_, v)| i128::from(**v) == value)
            .map(|(name, _)| name.clone())
            .last()
            .ok_or_else(|| CoreError::EnumValueNotFound {
                type_name: self.type_name().to_owned(),
                value,
            })
    }

    /// The name of the value this enumeration holds.
    pub fn description(&self) -> CoreResult<String> {
        self.lookup(None)
    }

    /// The value declared for `name`.
    pub fn choice(&self, name: &str) -> CoreResult<i64> {
        self.choices()?
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::MemberNotFound {
                type_name: self.type_name().to_owned(),
                member: name.to_owned(),
            })
    }

    pub fn snapshot(&self) -> ObjectSnapshot {
        ObjectSnapshot {
            type_name: self.type_name().to_owned(),
            layer_name: self.info.layer_name.clone(),
            offset: self.info.offset,
            member_name: self.info.member_name.clone(),
            value: self.value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::layers::BufferLayer;
    use crate::test_support::{put_u32, put_u64, sample_context};

    fn context_with(data: Vec<u8>) -> Context {
        let mut context = sample_context();
        context
            .add_layer(Arc::new(BufferLayer::new("data", data)))
            .unwrap();
        context
    }

    #[test]
    fn test_integer_and_write_round_trip() {
        let mut data = vec![0u8; 0x40];
        put_u32(&mut data, 0x10, 0xFFFF_FFFE);
        let context = context_with(data);
        let obj = context.object("sample!int", "data", 0x10).unwrap();
        assert_eq!(obj.as_int().unwrap(), -2);
        assert_eq!(obj.size().unwrap(), 4);

        let written = obj.write(&Value::Int(0x1234)).unwrap();
        assert_eq!(written.as_int().unwrap(), 0x1234);
        assert_eq!(context.layers().read("data", 0x10, 4, false).unwrap(), vec![0x34, 0x12, 0, 0]);
        assert!(obj.write(&Value::Str("x".into())).is_err());
    }

    #[test]
    fn test_struct_members_cached() {
        let mut data = vec![0u8; 0x40];
        put_u32(&mut data, 0x08, 7);
        let context = context_with(data);
        let obj = context.object("sample!_NODE", "data", 0).unwrap();
        let first = obj.get_member("Value").unwrap();
        let second = obj.get_member("Value").unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(first.as_int().unwrap(), 7);
        assert_eq!(first.member_name(), Some("Value"));
        assert_eq!(first.parent().unwrap().type_name, "sample!_NODE");

        let err = obj.get_member("Bogus").unwrap_err();
        assert_eq!(err.to_string(), "Struct has no attribute: sample!_NODE.Bogus");
        assert!(obj.write(&Value::Int(1)).is_err());
    }

    #[test]
    fn test_pointer_dereference_and_forwarding() {
        let mut data = vec![0u8; 0x80];
        put_u64(&mut data, 0x00, 0x40);
        put_u32(&mut data, 0x48, 99);
        let context = context_with(data);
        let node = context.object("sample!_NODE", "data", 0).unwrap();
        let next = node.get_member("Next").unwrap();
        assert_eq!(next.as_u64().unwrap(), 0x40);
        assert!(next.is_readable(None));
        let target = next.dereference(None).unwrap();
        assert_eq!(target.offset(), 0x40);
        assert_eq!(target.type_name(), "sample!_NODE");
        assert_eq!(next.get_member("Value").unwrap().as_int().unwrap(), 99);
    }

    #[test]
    fn test_pointer_value_is_masked() {
        let mut data = vec![0u8; 0x100];
        put_u64(&mut data, 0, 0xFFFF_FFFF_FFFF_FF10);
        let context = context_with(data);
        let ptr = context.object("sample!pointer", "data", 0).unwrap();
        let mask = context.layers().get("data").unwrap().address_mask();
        assert_eq!(ptr.as_u64().unwrap(), 0xFFFF_FFFF_FFFF_FF10 & mask);
        assert!(ptr.as_u64().unwrap() <= mask);
    }

    #[test]
    fn test_array_indexing_and_slicing() {
        let mut data = vec![0u8; 0x40];
        for i in 0..4u32 {
            put_u32(&mut data, 0x10 + i as usize * 4, i * 10);
        }
        let context = context_with(data);
        let array = context
            .object_with(
                "sample!array",
                "data",
                0x10,
                &TemplateArgs::new()
                    .with_count(4)
                    .with_subtype(context.symbol_space().get_type("sample!unsigned int").unwrap()),
            )
            .unwrap();
        assert_eq!(array.len().unwrap(), 4);
        assert_eq!(array.size().unwrap(), 16);
        assert_eq!(array.index(2).unwrap().offset(), 0x18);
        assert_eq!(array.index(-1).unwrap().as_int().unwrap(), 30);
        assert!(array.index(4).is_err());

        let values = |objs: Vec<Object>| objs.iter().map(|o| o.as_int().unwrap()).collect::<Vec<_>>();
        assert_eq!(values(array.slice(Some(1), Some(3), None).unwrap()), vec![10, 20]);
        assert_eq!(values(array.slice(None, None, Some(-1)).unwrap()), vec![30, 20, 10, 0]);
        assert_eq!(values(array.slice(Some(-2), None, None).unwrap()), vec![20, 30]);
        assert_eq!(array.resized(2).unwrap().elements().unwrap().len(), 2);
    }

    #[test]
    fn test_oversized_array_indexing_is_rejected() {
        let context = context_with(vec![0u8; 0x40]);
        let array = context
            .object_with(
                "sample!array",
                "data",
                0,
                &TemplateArgs::new()
                    .with_count(i64::MAX as u64 + 1)
                    .with_subtype(context.symbol_space().get_type("sample!char").unwrap()),
            )
            .unwrap();
        let err = array.index(0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidParameter(_)));
        assert!(err.to_string().contains("too large"));
        assert!(matches!(array.slice(None, Some(1), None), Err(CoreError::InvalidParameter(_))));
    }

    #[test]
    fn test_slice_indices_matches_sequence_semantics() {
        assert_eq!(slice_indices(5, None, None, 2).unwrap(), vec![0, 2, 4]);
        assert_eq!(slice_indices(5, Some(10), None, 1).unwrap(), Vec::<i64>::new());
        assert_eq!(slice_indices(5, Some(-10), Some(2), 1).unwrap(), vec![0, 1]);
        assert_eq!(slice_indices(5, Some(3), Some(0), -1).unwrap(), vec![3, 2, 1]);
        assert!(slice_indices(5, None, None, 0).is_err());
    }

    #[test]
    fn test_enumeration_lookup() {
        let mut data = vec![0u8; 0x10];
        put_u32(&mut data, 0, 2);
        let context = context_with(data);
        let template = context.symbol_space().get_enumeration("sample!_STATE").unwrap();
        let state = context.object_from_template(template, "data", 0).unwrap();
        assert_eq!(state.description().unwrap(), "Running");
        assert_eq!(state.lookup(Some(0)).unwrap(), "Idle");
        assert_eq!(state.choice("Stopped").unwrap(), 3);
        assert!(matches!(
            state.lookup(Some(9)),
            Err(CoreError::EnumValueNotFound { value: 9, .. })
        ));
        assert!(state.choice("Nope").is_err());
    }

    #[test]
    fn test_enumeration_duplicates() {
        let context = context_with(vec![1, 0, 0, 0]);
        let mut choices = Choices::new();
        choices.insert("A".into(), 1);
        choices.insert("B".into(), 1);
        let base = context.symbol_space().get_type("sample!unsigned int").unwrap();
        let template = Arc::new(Template::new(
            "sample!dup",
            TemplateKind::Enumeration {
                base_type: base,
                choices: Arc::new(choices),
                allow_duplicates: false,
            },
        ));
        let err = context
            .object_from_template(template.clone(), "data", 0)
            .unwrap_err();
        assert!(matches!(err, CoreError::AmbiguousConfiguration(_)));

        let permissive = Arc::new(
            template
                .updated(&TemplateArgs::new().allow_duplicate_choices(true))
                .unwrap(),
        );
        let obj = context.object_from_template(permissive, "data", 0).unwrap();
        assert_eq!(obj.description().unwrap(), "B");
    }

    #[test]
    fn test_bitfield_and_cast() {
        let mut data = vec![0u8; 0x10];
        put_u32(&mut data, 0x0C, 0b1011_0000);
        let context = context_with(data);
        let node = context.object("sample!_NODE", "data", 0).unwrap();
        let flags = node.get_member("Flags").unwrap();
        assert_eq!(flags.as_int().unwrap(), 0b1011);
        assert!(flags.write(&Value::Int(1)).is_err());

        let raw = flags.cast("unsigned int").unwrap();
        assert_eq!(raw.type_name(), "sample!unsigned int");
        assert_eq!(raw.offset(), flags.offset());
        assert_eq!(raw.as_int().unwrap(), 0b1011_0000);
        assert_eq!(raw.member_name(), Some("Flags"));
    }

    #[test]
    fn test_string_truncates_and_snapshot() {
        let mut data = b"hello\0world".to_vec();
        data.resize(0x20, 0);
        let context = context_with(data);
        let text = context
            .object_with("sample!string", "data", 0, &TemplateArgs::new().with_max_length(11))
            .unwrap();
        assert_eq!(text.as_str().unwrap(), "hello");

        let snap = text.snapshot();
        assert_eq!(snap.value, Value::Str("hello".into()));
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"value\":\"hello\""));
        let back: ObjectSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);

        let rewritten = text.write(&Value::Str("bye".into())).unwrap();
        assert_eq!(rewritten.as_str().unwrap(), "bye");
    }

    #[test]
    fn test_void_has_no_size() {
        let context = context_with(vec![0; 4]);
        let void = context.object("sample!void", "data", 0).unwrap();
        assert!(matches!(void.size(), Err(CoreError::Type(_))));
        assert!(void.write(&Value::Int(0)).is_err());
    }

    #[test]
    fn test_offset_masked_at_construction() {
        let context = context_with(vec![0; 0x100]);
        let obj = context.object("sample!unsigned char", "data", 0x1_0000_0010).unwrap();
        assert_eq!(obj.offset(), 0x10);
        assert!(matches!(
            context.object("sample!int", "missing", 0),
            Err(CoreError::LayerNotFound(_))
        ));
    }
}

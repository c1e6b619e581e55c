//! Object templates: how to build a typed object once a layer and offset are known.

use crate::error::{CoreError, CoreResult};
use crate::objects::format::{Encoding, EncodingErrors, NativeFormat};
use crate::symbols::extensions::ExtensionKind;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Struct members: name to `(relative offset, template)`.
pub type Members = BTreeMap<String, (u64, Arc<Template>)>;

/// Enumeration choices: name to value.
pub type Choices = BTreeMap<String, i64>;

/// Construction parameters per object variant.
#[derive(Debug, Clone)]
pub enum TemplateKind {
    Void,
    Function,
    Integer {
        format: NativeFormat,
    },
    Float {
        format: NativeFormat,
    },
    Char {
        format: NativeFormat,
    },
    Bytes {
        length: u64,
    },
    String {
        max_length: u64,
        encoding: Encoding,
        errors: EncodingErrors,
    },
    Pointer {
        format: NativeFormat,
        subtype: Arc<Template>,
    },
    /// Bits `[start_bit, end_bit)` of an integer base.
    BitField {
        base_type: Arc<Template>,
        start_bit: u32,
        end_bit: u32,
    },
    Enumeration {
        base_type: Arc<Template>,
        choices: Arc<Choices>,
        allow_duplicates: bool,
    },
    Array {
        count: u64,
        subtype: Arc<Template>,
    },
    Struct {
        size: u64,
        members: Arc<Members>,
        union: bool,
    },
    /// A named type resolved through the symbol space on use.
    Reference,
}

impl TemplateKind {
    /// Variant name used in diagnostics.
    pub fn class_name(&self) -> &'static str {
        match self {
            TemplateKind::Void => "Void",
            TemplateKind::Function => "Function",
            TemplateKind::Integer { .. } => "Integer",
            TemplateKind::Float { .. } => "Float",
            TemplateKind::Char { .. } => "Char",
            TemplateKind::Bytes { .. } => "Bytes",
            TemplateKind::String { .. } => "String",
            TemplateKind::Pointer { .. } => "Pointer",
            TemplateKind::BitField { .. } => "BitField",
            TemplateKind::Enumeration { .. } => "Enumeration",
            TemplateKind::Array { .. } => "Array",
            TemplateKind::Struct { union: false, .. } => "Struct",
            TemplateKind::Struct { union: true, .. } => "Union",
            TemplateKind::Reference => "Reference",
        }
    }

    /// Whether objects of this kind carry an integer value.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            TemplateKind::Integer { .. }
                | TemplateKind::Pointer { .. }
                | TemplateKind::BitField { .. }
                | TemplateKind::Enumeration { .. }
        )
    }
}

/// Ad-hoc parameter overrides applied on top of a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateArgs {
    pub count: Option<u64>,
    pub subtype: Option<Arc<Template>>,
    pub length: Option<u64>,
    pub max_length: Option<u64>,
    pub encoding: Option<Encoding>,
    pub errors: Option<EncodingErrors>,
    pub start_bit: Option<u32>,
    pub end_bit: Option<u32>,
    pub base_type: Option<Arc<Template>>,
    pub choices: Option<Choices>,
    pub allow_duplicate_choices: Option<bool>,
    pub size: Option<u64>,
    pub members: Option<Members>,
}

impl TemplateArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_subtype(mut self, subtype: Arc<Template>) -> Self {
        self.subtype = Some(subtype);
        self
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_max_length(mut self, max_length: u64) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_errors(mut self, errors: EncodingErrors) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_bits(mut self, start_bit: u32, end_bit: u32) -> Self {
        self.start_bit = Some(start_bit);
        self.end_bit = Some(end_bit);
        self
    }

    pub fn with_base_type(mut self, base_type: Arc<Template>) -> Self {
        self.base_type = Some(base_type);
        self
    }

    pub fn with_choices(mut self, choices: Choices) -> Self {
        self.choices = Some(choices);
        self
    }

    pub fn allow_duplicate_choices(mut self, allow: bool) -> Self {
        self.allow_duplicate_choices = Some(allow);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_members(mut self, members: Members) -> Self {
        self.members = Some(members);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.count.is_none()
            && self.subtype.is_none()
            && self.length.is_none()
            && self.max_length.is_none()
            && self.encoding.is_none()
            && self.errors.is_none()
            && self.start_bit.is_none()
            && self.end_bit.is_none()
            && self.base_type.is_none()
            && self.choices.is_none()
            && self.allow_duplicate_choices.is_none()
            && self.size.is_none()
            && self.members.is_none()
    }
}

/// A factory for one object variant.
///
/// Templates are immutable and shared. [`Template::updated`] derives a copy
/// with extra parameters; [`Template::clone_pristine`] goes back to the
/// construction-time parameters so per-use overrides never leak into the
/// shared cached template.
#[derive(Debug, Clone)]
pub struct Template {
    type_name: String,
    pristine: TemplateKind,
    kind: TemplateKind,
    extension: Option<ExtensionKind>,
}

impl Template {
    pub fn new(type_name: impl Into<String>, kind: TemplateKind) -> Self {
        Template {
            type_name: type_name.into(),
            pristine: kind.clone(),
            kind,
            extension: None,
        }
    }

    /// A delayed reference to a named type.
    pub fn reference(type_name: impl Into<String>) -> Self {
        Self::new(type_name, TemplateKind::Reference)
    }

    pub fn with_extension(mut self, extension: Option<ExtensionKind>) -> Self {
        self.extension = extension;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn kind(&self) -> &TemplateKind {
        &self.kind
    }

    pub fn extension(&self) -> Option<ExtensionKind> {
        self.extension
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, TemplateKind::Reference)
    }

    /// Copy under another type name.
    pub fn renamed(&self, type_name: impl Into<String>) -> Self {
        Template {
            type_name: type_name.into(),
            ..self.clone()
        }
    }

    /// Copy with the construction-time parameters only.
    pub fn clone_pristine(&self) -> Self {
        Template {
            type_name: self.type_name.clone(),
            pristine: self.pristine.clone(),
            kind: self.pristine.clone(),
            extension: self.extension,
        }
    }

    /// Copy with `args` applied. Parameters the variant does not take are a type error.
    pub fn updated(&self, args: &TemplateArgs) -> CoreResult<Self> {
        let mut kind = self.kind.clone();
        let reject = |param: &str| -> CoreResult<()> {
            Err(CoreError::type_error(format!(
                "{} template {} does not accept parameter '{}'",
                self.kind.class_name(),
                self.type_name,
                param
            )))
        };

        match &mut kind {
            TemplateKind::Array { count, subtype } => {
                if let Some(c) = args.count {
                    *count = c;
                }
                if let Some(s) = &args.subtype {
                    *subtype = s.clone();
                }
            }
            TemplateKind::Pointer { subtype, .. } => {
                if let Some(s) = &args.subtype {
                    *subtype = s.clone();
                }
            }
            TemplateKind::Bytes { length } => {
                if let Some(l) = args.length {
                    *length = l;
                }
            }
            TemplateKind::String {
                max_length,
                encoding,
                errors,
            } => {
                if let Some(l) = args.max_length {
                    *max_length = l;
                }
                if let Some(e) = args.encoding {
                    *encoding = e;
                }
                if let Some(e) = args.errors {
                    *errors = e;
                }
            }
            TemplateKind::BitField {
                base_type,
                start_bit,
                end_bit,
            } => {
                if let Some(b) = &args.base_type {
                    *base_type = b.clone();
                }
                if let Some(s) = args.start_bit {
                    *start_bit = s;
                }
                if let Some(e) = args.end_bit {
                    *end_bit = e;
                }
            }
            TemplateKind::Enumeration {
                base_type,
                choices,
                allow_duplicates,
            } => {
                if let Some(b) = &args.base_type {
                    *base_type = b.clone();
                }
                if let Some(c) = &args.choices {
                    *choices = Arc::new(c.clone());
                }
                if let Some(a) = args.allow_duplicate_choices {
                    *allow_duplicates = a;
                }
            }
            TemplateKind::Struct { size, members, .. } => {
                if let Some(s) = args.size {
                    *size = s;
                }
                if let Some(m) = &args.members {
                    *members = Arc::new(m.clone());
                }
            }
            _ => {}
        }

        let accepted: &[&str] = match &self.kind {
            TemplateKind::Array { .. } => &["count", "subtype"],
            TemplateKind::Pointer { .. } => &["subtype"],
            TemplateKind::Bytes { .. } => &["length"],
            TemplateKind::String { .. } => &["max_length", "encoding", "errors"],
            TemplateKind::BitField { .. } => &["base_type", "start_bit", "end_bit"],
            TemplateKind::Enumeration { .. } => &["base_type", "choices", "allow_duplicate_choices"],
            TemplateKind::Struct { .. } => &["size", "members"],
            _ => &[],
        };
        let supplied = [
            ("count", args.count.is_some()),
            ("subtype", args.subtype.is_some()),
            ("length", args.length.is_some()),
            ("max_length", args.max_length.is_some()),
            ("encoding", args.encoding.is_some()),
            ("errors", args.errors.is_some()),
            ("start_bit", args.start_bit.is_some()),
            ("end_bit", args.end_bit.is_some()),
            ("base_type", args.base_type.is_some()),
            ("choices", args.choices.is_some()),
            ("allow_duplicate_choices", args.allow_duplicate_choices.is_some()),
            ("size", args.size.is_some()),
            ("members", args.members.is_some()),
        ];
        for (param, present) in supplied {
            if present && !accepted.contains(&param) {
                reject(param)?;
            }
        }

        Ok(Template {
            type_name: self.type_name.clone(),
            pristine: self.pristine.clone(),
            kind,
            extension: self.extension,
        })
    }

    /// Size in bytes of objects built from this template.
    pub fn size(&self) -> CoreResult<u64> {
        match &self.kind {
            TemplateKind::Void | TemplateKind::Function => Err(CoreError::type_error(
                "Void types are incomplete, cannot contain data and do not have a size",
            )),
            TemplateKind::Integer { format } | TemplateKind::Float { format } | TemplateKind::Char { format } => {
                Ok(format.size() as u64)
            }
            TemplateKind::Pointer { format, .. } => Ok(format.size() as u64),
            TemplateKind::Bytes { length } => Ok(*length),
            TemplateKind::String { max_length, .. } => Ok(*max_length),
            TemplateKind::BitField { base_type, .. } | TemplateKind::Enumeration { base_type, .. } => {
                base_type.size()
            }
            TemplateKind::Array { count, subtype } => subtype.size()?.checked_mul(*count).ok_or_else(|| {
                CoreError::type_error(format!("Array of {} {} elements exceeds the address space", count, subtype.type_name))
            }),
            TemplateKind::Struct { size, .. } => Ok(*size),
            TemplateKind::Reference => Err(CoreError::symbol(format!(
                "Template contains no information about its structure: {}",
                self.type_name
            ))),
        }
    }

    /// Templates nested inside this one.
    pub fn children(&self) -> Vec<Arc<Template>> {
        match &self.kind {
            TemplateKind::Pointer { subtype, .. } | TemplateKind::Array { subtype, .. } => vec![subtype.clone()],
            TemplateKind::BitField { base_type, .. } | TemplateKind::Enumeration { base_type, .. } => {
                vec![base_type.clone()]
            }
            TemplateKind::Struct { members, .. } => members.values().map(|(_, t)| t.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// Copy with every embedded child passed through `replace`. Pointer
    /// subtypes are not embedded and stay untouched.
    pub(crate) fn replace_embedded(
        &self,
        replace: &mut dyn FnMut(&Arc<Template>) -> CoreResult<Arc<Template>>,
    ) -> CoreResult<Template> {
        fn in_kind(
            kind: &TemplateKind,
            replace: &mut dyn FnMut(&Arc<Template>) -> CoreResult<Arc<Template>>,
        ) -> CoreResult<TemplateKind> {
            Ok(match kind {
                TemplateKind::Array { count, subtype } => TemplateKind::Array {
                    count: *count,
                    subtype: replace(subtype)?,
                },
                TemplateKind::BitField {
                    base_type,
                    start_bit,
                    end_bit,
                } => TemplateKind::BitField {
                    base_type: replace(base_type)?,
                    start_bit: *start_bit,
                    end_bit: *end_bit,
                },
                TemplateKind::Enumeration {
                    base_type,
                    choices,
                    allow_duplicates,
                } => TemplateKind::Enumeration {
                    base_type: replace(base_type)?,
                    choices: choices.clone(),
                    allow_duplicates: *allow_duplicates,
                },
                TemplateKind::Struct { size, members, union } => {
                    let mut replaced = Members::new();
                    for (name, (offset, member)) in members.iter() {
                        replaced.insert(name.clone(), (*offset, replace(member)?));
                    }
                    TemplateKind::Struct {
                        size: *size,
                        members: Arc::new(replaced),
                        union: *union,
                    }
                }
                other => other.clone(),
            })
        }

        let kind = in_kind(&self.kind, replace)?;
        Ok(Template {
            type_name: self.type_name.clone(),
            pristine: in_kind(&self.pristine, replace)?,
            kind,
            extension: self.extension,
        })
    }

    /// Offset of a named child relative to the start of this template.
    pub fn relative_child_offset(&self, child: &str) -> CoreResult<u64> {
        match &self.kind {
            TemplateKind::Struct { members, .. } => members.get(child).map(|(offset, _)| *offset).ok_or_else(|| {
                CoreError::MemberNotFound {
                    type_name: self.type_name.clone(),
                    member: child.to_owned(),
                }
            }),
            TemplateKind::Array { .. } if child == "subtype" => Ok(0),
            _ => Err(CoreError::MemberNotFound {
                type_name: self.type_name.clone(),
                member: child.to_owned(),
            }),
        }
    }

    /// Member template and offset of a struct or union.
    pub fn member(&self, name: &str) -> Option<(u64, Arc<Template>)> {
        match &self.kind {
            TemplateKind::Struct { members, .. } => members.get(name).cloned(),
            _ => None,
        }
    }

    pub fn has_member(&self, name: &str) -> bool {
        self.member(name).is_some()
    }

    /// Member names of a struct or union, sorted.
    pub fn member_names(&self) -> Vec<String> {
        match &self.kind {
            TemplateKind::Struct { members, .. } => members.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

//! Operating-system specific helpers layered over generic struct objects.
//!
//! A symbol table tags some of its struct templates with an [`ExtensionKind`]
//! (chosen from an [`ExtensionRegistry`] when the table is loaded). The
//! wrappers in [`windows`] and [`registry`] own an [`Object`] of the matching
//! kind and expose derived accessors next to, not instead of, its members.

pub mod registry;
pub mod windows;

pub use registry::{CellNode, CmHive, HmapEntry, KeyNode, KeyValue, RegValue, RegValueType};
pub use windows::{FastRef, ListEntry, ListIter, UnicodeString};

use crate::error::{CoreError, CoreResult};
use crate::objects::Object;
use std::collections::BTreeMap;
use std::rc::Rc;

/// The helper set attached to a struct type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionKind {
    FastRef,
    UnicodeString,
    ListEntry,
    HmapEntry,
    CmHive,
    KeyNode,
    KeyValue,
}

/// Type name to extension kind, consulted when a table is built.
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    kinds: BTreeMap<String, ExtensionKind>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extensions for Windows kernel symbol tables.
    pub fn windows() -> Self {
        let mut registry = Self::new();
        registry.insert("_EX_FAST_REF", ExtensionKind::FastRef);
        registry.insert("_UNICODE_STRING", ExtensionKind::UnicodeString);
        registry.insert("_LIST_ENTRY", ExtensionKind::ListEntry);
        registry.insert("_HMAP_ENTRY", ExtensionKind::HmapEntry);
        registry.insert("_CMHIVE", ExtensionKind::CmHive);
        registry.insert("_CM_KEY_NODE", ExtensionKind::KeyNode);
        registry.insert("_CM_KEY_VALUE", ExtensionKind::KeyValue);
        registry
    }

    /// Extensions for Linux kernel symbol tables.
    pub fn linux() -> Self {
        let mut registry = Self::new();
        registry.insert("list_head", ExtensionKind::ListEntry);
        registry
    }

    pub fn insert(&mut self, type_name: impl Into<String>, kind: ExtensionKind) -> Option<ExtensionKind> {
        self.kinds.insert(type_name.into(), kind)
    }

    /// Add every entry of `other`, replacing duplicates.
    pub fn merge(mut self, other: &ExtensionRegistry) -> Self {
        self.kinds.extend(other.iter().map(|(k, v)| (k.clone(), *v)));
        self
    }

    pub fn get(&self, type_name: &str) -> Option<ExtensionKind> {
        self.kinds.get(type_name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExtensionKind)> {
        self.kinds.iter()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Check that `object` carries `kind` before wrapping it.
pub(crate) fn require_kind<'ctx>(
    object: impl Into<Rc<Object<'ctx>>>,
    kind: ExtensionKind,
) -> CoreResult<Rc<Object<'ctx>>> {
    let object = object.into();
    if object.extension() != Some(kind) {
        return Err(CoreError::type_error(format!(
            "{} does not carry the {:?} extension",
            object.type_name(),
            kind
        )));
    }
    Ok(object)
}

/// Declares a wrapper type over an object of one extension kind.
macro_rules! extension_wrapper {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name<'ctx>(::std::rc::Rc<$crate::objects::Object<'ctx>>);

        impl<'ctx> $name<'ctx> {
            pub fn new(object: impl Into<::std::rc::Rc<$crate::objects::Object<'ctx>>>) -> $crate::error::CoreResult<Self> {
                $crate::symbols::extensions::require_kind(object, $crate::symbols::extensions::ExtensionKind::$name).map($name)
            }

            /// The wrapped struct object.
            pub fn object(&self) -> &::std::rc::Rc<$crate::objects::Object<'ctx>> {
                &self.0
            }
        }

        impl<'ctx> ::std::ops::Deref for $name<'ctx> {
            type Target = $crate::objects::Object<'ctx>;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
    };
}

pub(crate) use extension_wrapper;

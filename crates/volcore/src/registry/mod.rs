//! Windows registry hives read from memory.
//!
//! [`RegistryHive`] turns a kernel `_CMHIVE` into a layer addressed by cell
//! index. Keys and values on that layer are walked with the
//! [`KeyNode`](crate::symbols::extensions::KeyNode) and
//! [`KeyValue`](crate::symbols::extensions::KeyValue) extensions.

pub mod hive;

pub use hive::{RegistryHive, DEFAULT_ROOT_CELL, HIVE_SIGNATURE};

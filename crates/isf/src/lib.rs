//! ISF (Intermediate Symbol Format) loader for memory forensics symbol tables.
//!
//! ISF documents are JSON (optionally `.json.xz` compressed) descriptions of
//! a target's base types, struct layouts, enumerations and symbols. This
//! crate only loads and validates them into plain data ([`IsfSymbols`]);
//! turning that data into object templates is left to the consumer.
//!
//! # Example
//!
//! ```rust,ignore
//! use isf::parse_isf_file;
//!
//! let symbols = parse_isf_file("ntkrnlmp.pdb/GUID/ntkrnlmp.json.xz")?;
//! let eprocess_size = symbols.type_size("_EPROCESS");
//! let pid_offset = symbols.field_offset("_EPROCESS", "UniqueProcessId");
//! ```

pub mod error;
pub mod parser;
pub mod types;

// Re-export key types at crate root.
pub use error::{IsfError, IsfResult};
pub use parser::{parse_isf_bytes, parse_isf_file, parse_isf_str, SUPPORTED_MAJOR_VERSIONS};
pub use types::{BaseType, EnumType, FieldDef, IsfSymbols, Metadata, Symbol, TypeInfo, UserType};

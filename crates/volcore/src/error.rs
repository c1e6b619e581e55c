//! Error types for layer, symbol and object operations.

use thiserror::Error;

/// Errors raised by the layer, symbol and object machinery.
#[derive(Error, Debug)]
pub enum CoreError {
    /// An address could not be mapped through a layer.
    #[error("Invalid address {invalid_address:#x} in layer '{layer_name}': {message}")]
    InvalidAddress {
        layer_name: String,
        invalid_address: u64,
        message: String,
    },

    /// A paged address is not valid (with page table entry information).
    #[error("Paged invalid address {invalid_address:#x} in layer '{layer_name}' (entry={entry:#x}, invalid_bits={invalid_bits}): {message}")]
    PagedInvalidAddress {
        layer_name: String,
        invalid_address: u64,
        invalid_bits: u32,
        entry: u64,
        message: String,
    },

    /// A swapped address - page is in a swap file that is not available.
    #[error("Swapped address {invalid_address:#x} in layer '{layer_name}' (swap_offset={swap_offset:#x}, swap_index={swap_index}): {message}")]
    SwappedInvalidAddress {
        layer_name: String,
        invalid_address: u64,
        invalid_bits: u32,
        entry: u64,
        swap_offset: u64,
        swap_index: u8,
        message: String,
    },

    /// A hive cell index beyond the storage bounds.
    #[error("Invalid registry index {offset:#x} in layer '{layer_name}': {message}")]
    RegistryInvalidIndex {
        layer_name: String,
        offset: u64,
        message: String,
    },

    /// A read outside the bounds of a physical byte source.
    #[error("Offset {offset:#x} (length {length:#x}) outside of the boundaries of layer '{layer_name}'")]
    OutOfBounds {
        layer_name: String,
        offset: u64,
        length: u64,
    },

    /// A binary format failed structural validation.
    #[error("Invalid {format} format in layer '{layer_name}': {message}")]
    FormatValidation {
        layer_name: String,
        format: &'static str,
        message: String,
    },

    /// The hive control block failed validation.
    #[error("Registry format error in layer '{layer_name}': {message}")]
    RegistryFormat { layer_name: String, message: String },

    /// An operation not supported by the type of object or template.
    #[error("Type error: {0}")]
    Type(String),

    /// A struct member that the type does not declare.
    #[error("Struct has no attribute: {type_name}.{member}")]
    MemberNotFound { type_name: String, member: String },

    /// A symbol or type that the symbol space cannot find.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// A layer name absent from the collection.
    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    /// A registry key path segment that does not exist.
    #[error("Key {key} not found under {found}")]
    KeyNotFound { key: String, found: String },

    /// An enumeration value without a declared name.
    #[error("Value {value} not present in enumeration {type_name}")]
    EnumValueNotFound { type_name: String, value: i128 },

    /// Construction parameters that make a lookup ambiguous.
    #[error("Ambiguous configuration: {0}")]
    AmbiguousConfiguration(String),

    /// Malformed names and unresolvable references in the symbol space.
    #[error("Symbol error: {0}")]
    Symbol(String),

    /// Layer collection invariants (duplicates, dependencies, overlaps).
    #[error("Layer error in '{layer_name}': {message}")]
    Layer { layer_name: String, message: String },

    /// The layer does not accept writes.
    #[error("Layer '{0}' is not writable")]
    NotWritable(String),

    /// The layer has been destroyed and cannot be used.
    #[error("Layer '{0}' has been destroyed")]
    LayerDestroyed(String),

    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Data read from the image could not be decoded.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Symbol file loading failed.
    #[error("Symbol file error: {0}")]
    Isf(#[from] isf::IsfError),

    /// Configuration documents that are not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Create an InvalidAddress error.
    pub fn invalid_address(layer_name: impl Into<String>, addr: u64, msg: impl Into<String>) -> Self {
        CoreError::InvalidAddress {
            layer_name: layer_name.into(),
            invalid_address: addr,
            message: msg.into(),
        }
    }

    /// Create a PagedInvalidAddress error.
    pub fn paged_invalid_address(
        layer_name: impl Into<String>,
        addr: u64,
        invalid_bits: u32,
        entry: u64,
        msg: impl Into<String>,
    ) -> Self {
        CoreError::PagedInvalidAddress {
            layer_name: layer_name.into(),
            invalid_address: addr,
            invalid_bits,
            entry,
            message: msg.into(),
        }
    }

    /// Create a SwappedInvalidAddress error.
    pub fn swapped_invalid_address(
        layer_name: impl Into<String>,
        addr: u64,
        invalid_bits: u32,
        entry: u64,
        swap_offset: u64,
        swap_index: u8,
        msg: impl Into<String>,
    ) -> Self {
        CoreError::SwappedInvalidAddress {
            layer_name: layer_name.into(),
            invalid_address: addr,
            invalid_bits,
            entry,
            swap_offset,
            swap_index,
            message: msg.into(),
        }
    }

    /// Create a FormatValidation error.
    pub fn format(layer_name: impl Into<String>, format: &'static str, msg: impl Into<String>) -> Self {
        CoreError::FormatValidation {
            layer_name: layer_name.into(),
            format,
            message: msg.into(),
        }
    }

    /// Create a Layer error.
    pub fn layer(layer_name: impl Into<String>, msg: impl Into<String>) -> Self {
        CoreError::Layer {
            layer_name: layer_name.into(),
            message: msg.into(),
        }
    }

    /// Create a Type error.
    pub fn type_error(msg: impl Into<String>) -> Self {
        CoreError::Type(msg.into())
    }

    /// Create a Symbol error.
    pub fn symbol(msg: impl Into<String>) -> Self {
        CoreError::Symbol(msg.into())
    }

    /// Create a LayerDestroyed error.
    pub fn layer_destroyed(name: impl Into<String>) -> Self {
        CoreError::LayerDestroyed(name.into())
    }

    /// Whether this error is an address translation failure that a scan may skip.
    pub fn is_address_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidAddress { .. }
                | CoreError::PagedInvalidAddress { .. }
                | CoreError::SwappedInvalidAddress { .. }
                | CoreError::RegistryInvalidIndex { .. }
                | CoreError::OutOfBounds { .. }
        )
    }

    /// The number of low address bits a paged translation failure covers.
    pub fn invalid_bits(&self) -> Option<u32> {
        match self {
            CoreError::PagedInvalidAddress { invalid_bits, .. }
            | CoreError::SwappedInvalidAddress { invalid_bits, .. } => Some(*invalid_bits),
            _ => None,
        }
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_address_error() {
        let err = CoreError::invalid_address("test_layer", 0x1000, "test message");
        assert!(err.to_string().contains("test_layer"));
        assert!(err.to_string().contains("0x1000"));
        assert!(err.is_address_error());
    }

    #[test]
    fn test_paged_invalid_address_error() {
        let err = CoreError::paged_invalid_address("test_layer", 0x1000, 12, 0xDEAD, "page fault");
        assert!(err.to_string().contains("invalid_bits=12"));
        assert_eq!(err.invalid_bits(), Some(12));
    }

    #[test]
    fn test_lookup_errors_are_not_address_errors() {
        let err = CoreError::MemberNotFound {
            type_name: "nt!_EPROCESS".into(),
            member: "Bogus".into(),
        };
        assert_eq!(err.to_string(), "Struct has no attribute: nt!_EPROCESS.Bogus");
        assert!(!err.is_address_error());
        assert_eq!(err.invalid_bits(), None);
    }
}

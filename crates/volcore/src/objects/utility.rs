//! Helpers for common object conversions.

use crate::error::{CoreError, CoreResult};
use crate::objects::{Encoding, EncodingErrors, Object, Template, TemplateArgs, TemplateKind};
use std::sync::Arc;

/// Recast an array of characters as a string of `count` bytes (default: the array length).
pub fn array_to_string<'ctx>(
    array: &Object<'ctx>,
    count: Option<u64>,
    errors: EncodingErrors,
) -> CoreResult<Object<'ctx>> {
    if !matches!(array.template().kind(), TemplateKind::Array { .. }) {
        return Err(CoreError::type_error("array_to_string takes an Array of char"));
    }
    let count = match count {
        Some(c) => c,
        None => array.len()?,
    };
    array.cast_with(
        "string",
        &TemplateArgs::new()
            .with_max_length(count)
            .with_encoding(Encoding::Utf8)
            .with_errors(errors),
    )
}

/// Read up to `count` bytes of text at the target of a pointer.
pub fn pointer_to_string<'ctx>(
    pointer: &Object<'ctx>,
    count: u64,
    errors: EncodingErrors,
) -> CoreResult<Object<'ctx>> {
    if !matches!(pointer.template().kind(), TemplateKind::Pointer { .. }) {
        return Err(CoreError::type_error("pointer_to_string takes a Pointer"));
    }
    if count < 1 {
        return Err(CoreError::InvalidParameter(
            "pointer_to_string requires a positive count".into(),
        ));
    }
    pointer.dereference(None)?.cast_with(
        "string",
        &TemplateArgs::new()
            .with_max_length(count)
            .with_encoding(Encoding::Utf8)
            .with_errors(errors),
    )
}

/// Recast an object as an array of `count` pointers to `subtype`.
pub fn array_of_pointers<'ctx>(object: &Object<'ctx>, count: u64, subtype: &str) -> CoreResult<Object<'ctx>> {
    let context = object.context();
    let subtype = context.symbol_space().get_type(subtype)?;
    let table = object
        .symbol_table_name()
        .ok_or_else(|| CoreError::symbol(format!("{} has no symbol table", object.type_name())))?;
    let pointer = context.symbol_space().get_type(&format!("{}!pointer", table))?;
    let pointer: Arc<Template> = Arc::new(pointer.updated(&TemplateArgs::new().with_subtype(subtype))?);
    object.cast_with("array", &TemplateArgs::new().with_count(count).with_subtype(pointer))
}

/// Round `addr` to a multiple of `align`, downwards unless `up` is set.
pub fn round_address(addr: u64, align: u64, up: bool) -> u64 {
    if align == 0 || addr % align == 0 {
        addr
    } else if up {
        addr + (align - addr % align)
    } else {
        addr - addr % align
    }
}

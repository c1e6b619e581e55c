//! Helpers for generic Windows kernel structures.

use super::extension_wrapper;
use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::objects::{Encoding, EncodingErrors, Object, Template, TemplateArgs};
use crate::symbols::TABLE_SEPARATOR;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

/// Qualify `type_name` with the table `object` was read from.
fn qualified(object: &Object, type_name: &str) -> String {
    match object.symbol_table_name() {
        Some(table) if !type_name.contains(TABLE_SEPARATOR) => format!("{}{}{}", table, TABLE_SEPARATOR, type_name),
        _ => type_name.to_owned(),
    }
}

extension_wrapper!(
    /// `_EX_FAST_REF`: a pointer whose low bits hold a reference count.
    FastRef
);

impl<'ctx> FastRef<'ctx> {
    /// Tag bits: three on 32-bit targets, four on 64-bit ones.
    fn max_fast_ref(&self) -> CoreResult<u64> {
        let pointer = self
            .context()
            .symbol_space()
            .get_type(&qualified(self, "pointer"))?;
        Ok(if pointer.size()? == 4 { 7 } else { 15 })
    }

    fn raw(&self) -> CoreResult<u64> {
        self.get_member("Object")?.as_u64()
    }

    /// The referenced address with the tag bits stripped.
    pub fn value(&self) -> CoreResult<u64> {
        Ok(self.raw()? & !self.max_fast_ref()?)
    }

    pub fn reference_count(&self) -> CoreResult<u64> {
        Ok(self.raw()? & self.max_fast_ref()?)
    }

    /// Build a `type_name` object at the referenced address.
    pub fn dereference(&self, type_name: &str) -> CoreResult<Object<'ctx>> {
        self.context()
            .object(&qualified(self, type_name), self.layer_name(), self.value()?)
    }
}

extension_wrapper!(
    /// `_UNICODE_STRING`: a counted UTF-16 buffer.
    UnicodeString
);

impl<'ctx> UnicodeString<'ctx> {
    /// Decode `Length` bytes at `Buffer`.
    ///
    /// Undecodable sequences are replaced, but an unreadable buffer is an error.
    pub fn string(&self) -> CoreResult<String> {
        let length = self.get_member("Length")?.as_u64()?;
        let text = self.get_member("Buffer")?.dereference(None)?.cast_with(
            "string",
            &TemplateArgs::new()
                .with_max_length(length)
                .with_encoding(Encoding::Utf16Le)
                .with_errors(EncodingErrors::Replace),
        )?;
        Ok(text.as_str()?.to_owned())
    }
}

extension_wrapper!(
    /// `_LIST_ENTRY` or `list_head`: a link embedded in a larger structure.
    ListEntry
);

impl<'ctx> ListEntry<'ctx> {
    fn direction(&self, forward: bool) -> &'static str {
        match (self.has_member("Flink"), forward) {
            (true, true) => "Flink",
            (true, false) => "Blink",
            (false, true) => "next",
            (false, false) => "prev",
        }
    }

    /// Walk the list, yielding the `symbol_type` structures that embed each
    /// link as `member`.
    ///
    /// With `sentinel` unset, the structure containing this entry is yielded
    /// first. Traversal stops at a null link or when a link repeats.
    pub fn to_list(
        &self,
        symbol_type: &str,
        member: &str,
        forward: bool,
        sentinel: bool,
        layer: Option<&str>,
    ) -> CoreResult<ListIter<'ctx>> {
        let context = self.context();
        let container = context.symbol_space().get_type(&qualified(self, symbol_type))?;
        let relative_offset = container.relative_child_offset(member)?;
        let anchor = self.offset();
        Ok(ListIter {
            context,
            container,
            layer_name: layer.unwrap_or(self.layer_name()).to_owned(),
            relative_offset,
            direction: self.direction(forward),
            head: (!sentinel).then_some(anchor),
            current: Some(self.0.clone()),
            seen: HashSet::from([anchor]),
        })
    }

    /// Walk the list this entry is a member of, using the parent's type.
    pub fn iter(&self) -> CoreResult<ListIter<'ctx>> {
        let parent = self
            .parent()
            .ok_or_else(|| CoreError::type_error(format!("{} has no parent structure", self.type_name())))?;
        let member = self
            .member_name()
            .ok_or_else(|| CoreError::type_error(format!("{} is not a struct member", self.type_name())))?;
        self.to_list(&parent.type_name, member, true, true, None)
    }
}

/// Lazy traversal of an intrusive linked list.
pub struct ListIter<'ctx> {
    context: &'ctx Context,
    container: Arc<Template>,
    layer_name: String,
    relative_offset: u64,
    direction: &'static str,
    head: Option<u64>,
    current: Option<Rc<Object<'ctx>>>,
    seen: HashSet<u64>,
}

impl<'ctx> ListIter<'ctx> {
    fn container_at(&self, link_offset: u64) -> CoreResult<Object<'ctx>> {
        self.context.object_from_template(
            self.container.clone(),
            &self.layer_name,
            link_offset.wrapping_sub(self.relative_offset),
        )
    }

    fn advance(&mut self, current: &Object<'ctx>) -> CoreResult<Option<Object<'ctx>>> {
        let pointer = current.get_member(self.direction)?;
        if pointer.as_u64()? == 0 {
            return Ok(None);
        }
        let link = pointer.dereference(None)?;
        if !self.seen.insert(link.offset()) {
            return Ok(None);
        }
        Ok(Some(link))
    }
}

impl<'ctx> Iterator for ListIter<'ctx> {
    type Item = CoreResult<Object<'ctx>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(anchor) = self.head.take() {
            return Some(self.container_at(anchor));
        }
        let current = self.current.take()?;
        match self.advance(&current) {
            Ok(Some(link)) => {
                let offset = link.offset();
                self.current = Some(Rc::new(link));
                Some(self.container_at(offset))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::layers::BufferLayer;
    use crate::test_support::{put_u16, put_u64, sample_context};

    fn context_with(data: Vec<u8>) -> Context {
        let mut context = sample_context();
        context.add_layer(Arc::new(BufferLayer::new("data", data))).unwrap();
        context
    }

    /// `_ITEM` records at 0x100, 0x200, 0x300 linked through `Links` at +8.
    fn linked_items(last_next: u64) -> Vec<u8> {
        let mut data = vec![0u8; 0x400];
        // head list entry at 0x10
        put_u64(&mut data, 0x10, 0x108);
        put_u64(&mut data, 0x18, 0x308);
        put_u64(&mut data, 0x108, 0x208);
        put_u64(&mut data, 0x110, 0x10);
        put_u64(&mut data, 0x208, 0x308);
        put_u64(&mut data, 0x210, 0x108);
        put_u64(&mut data, 0x308, last_next);
        put_u64(&mut data, 0x310, 0x208);
        for (i, base) in [0x100usize, 0x200, 0x300].into_iter().enumerate() {
            put_u64(&mut data, base, i as u64 + 1);
        }
        data
    }

    fn ids(iter: ListIter) -> Vec<u64> {
        iter.map(|item| item.unwrap().get_member("Id").unwrap().as_u64().unwrap())
            .collect()
    }

    #[test]
    fn test_list_walk_terminates_at_sentinel() {
        let context = context_with(linked_items(0x10));
        let head = ListEntry::new(context.object("sample!_LIST_ENTRY", "data", 0x10).unwrap()).unwrap();
        let forward = head.to_list("_ITEM", "Links", true, true, None).unwrap();
        assert_eq!(ids(forward), vec![1, 2, 3]);
        let backward = head.to_list("_ITEM", "Links", false, true, None).unwrap();
        assert_eq!(ids(backward), vec![3, 2, 1]);
    }

    #[test]
    fn test_list_walk_survives_cycles_and_nulls() {
        // last entry points back into the middle of the list
        let context = context_with(linked_items(0x208));
        let head = ListEntry::new(context.object("sample!_LIST_ENTRY", "data", 0x10).unwrap()).unwrap();
        assert_eq!(ids(head.to_list("_ITEM", "Links", true, true, None).unwrap()), vec![1, 2, 3]);

        let context = context_with(linked_items(0));
        let head = ListEntry::new(context.object("sample!_LIST_ENTRY", "data", 0x10).unwrap()).unwrap();
        assert_eq!(ids(head.to_list("_ITEM", "Links", true, true, None).unwrap()), vec![1, 2, 3]);
    }

    #[test]
    fn test_list_iter_from_member() {
        let context = context_with(linked_items(0x10));
        let item = context.object("sample!_ITEM", "data", 0x100).unwrap();
        let links = ListEntry::new(item.get_member("Links").unwrap()).unwrap();
        // starting inside the list: the anchor itself is not yielded, the head is
        let walked: Vec<u64> = links.iter().unwrap().map(|o| o.unwrap().offset()).collect();
        assert_eq!(walked, vec![0x200, 0x300, 0x10u64.wrapping_sub(8) & 0x3ff]);

        let with_anchor = links.to_list("_ITEM", "Links", true, false, None).unwrap();
        assert_eq!(with_anchor.map(|o| o.unwrap().offset()).next(), Some(0x100));
    }

    #[test]
    fn test_fast_ref_strips_tag_bits() {
        let mut data = vec![0u8; 0x100];
        put_u64(&mut data, 0, 0x83);
        put_u64(&mut data, 0x88, 42);
        let context = context_with(data);
        let fast = FastRef::new(context.object("sample!_EX_FAST_REF", "data", 0).unwrap()).unwrap();
        assert_eq!(fast.value().unwrap(), 0x80);
        assert_eq!(fast.reference_count().unwrap(), 3);
        let item = fast.dereference("_ITEM").unwrap();
        assert_eq!(item.offset(), 0x80);
        assert_eq!(item.get_member("Links").unwrap().get_member("Flink").unwrap().as_u64().unwrap(), 42);

        let plain = context.object("sample!_ITEM", "data", 0).unwrap();
        assert!(matches!(FastRef::new(plain), Err(CoreError::Type(_))));
    }

    #[test]
    fn test_unicode_string() {
        let mut data = vec![0u8; 0x100];
        put_u16(&mut data, 0, 10);
        put_u16(&mut data, 2, 12);
        put_u64(&mut data, 8, 0x40);
        for (i, unit) in "lsass.exe".encode_utf16().enumerate() {
            put_u16(&mut data, 0x40 + i * 2, unit);
        }
        let context = context_with(data);
        let text = UnicodeString::new(context.object("sample!_UNICODE_STRING", "data", 0).unwrap()).unwrap();
        assert_eq!(text.string().unwrap(), "lsass");
    }
}

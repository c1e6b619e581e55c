//! VMware snapshot layer.
//!
//! A suspended VMware guest stores its RAM in a `.vmem` file and the layout
//! of that RAM in the tagged metadata of a companion `.vmss`/`.vmsn` file.
//! The metadata names a "memory" group whose tags describe each region as
//! page numbers; every region becomes one segment of a [`SegmentedLayer`].

use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::memory::layers::segmented::{Segment, SegmentedLayer};
use crate::memory::traits::{Layer, MappedRange, TranslationLayer};
use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Expected header magic.
pub const VMWARE_MAGIC: [u8; 4] = [0xD2, 0xBE, 0xD2, 0xBE];

const HEADER_SIZE: u64 = 12;
/// 64-byte name, 8-byte tag offset, 8-byte reserved field.
const GROUP_SIZE: u64 = 80;
const GROUP_NAME_SIZE: usize = 64;
/// Width of tag indices and data (native "unsigned int").
const INDEX_SIZE: u64 = 4;
const PAGE_SIZE: u64 = 0x1000;
const FORMAT: &str = "VMware";

type TagKey = (String, Vec<u32>);

/// Region segments parsed from VMware metadata, layered over the raw memory file.
pub struct VmwareLayer {
    segmented: SegmentedLayer,
    meta: Arc<dyn Layer>,
}

impl VmwareLayer {
    /// Parse the metadata in `meta` and remap `base` accordingly.
    pub fn new(name: impl Into<String>, base: Arc<dyn Layer>, meta: Arc<dyn Layer>) -> CoreResult<Self> {
        let name = name.into();
        let segments = read_segments(&name, meta.as_ref())?;
        debug!(layer = %name, count = segments.len(), "loaded VMware regions");
        Ok(VmwareLayer {
            segmented: SegmentedLayer::new(name, base, segments)?,
            meta,
        })
    }

    /// Build from the `base_layer` and `meta_layer` keys under `config_path`.
    pub fn from_config(context: &Context, config_path: &str, name: &str) -> CoreResult<Self> {
        let config = context.config().branch(config_path);
        let base = context.layers().get(config.get_str("base_layer")?)?;
        let meta = context.layers().get(config.get_str("meta_layer")?)?;
        Self::new(name, base, meta)
    }

    pub fn segments(&self) -> &[Segment] {
        self.segmented.segments()
    }
}

/// Locate the `.vmss` (suspended) or `.vmsn` (snapshot) file belonging to a `.vmem` image.
pub fn metadata_companion(vmem: &Path) -> Option<PathBuf> {
    let is_vmem = vmem
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("vmem"))
        .unwrap_or(false);
    if !is_vmem {
        return None;
    }
    ["vmss", "vmsn"]
        .iter()
        .map(|ext| vmem.with_extension(ext))
        .find(|candidate| candidate.exists())
}

fn read_u32(meta: &dyn Layer, offset: u64) -> CoreResult<u32> {
    let data = meta.read(offset, 4, false)?;
    Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}

fn read_u64(meta: &dyn Layer, offset: u64) -> CoreResult<u64> {
    let data = meta.read(offset, 8, false)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data);
    Ok(u64::from_le_bytes(raw))
}

fn truncated(layer_name: &str, err: CoreError) -> CoreError {
    CoreError::format(layer_name, FORMAT, format!("metadata is truncated: {}", err))
}

fn read_groups(layer_name: &str, meta: &dyn Layer) -> CoreResult<HashMap<String, u64>> {
    let header = meta
        .read(0, HEADER_SIZE as usize, false)
        .map_err(|e| truncated(layer_name, e))?;
    if header[..4] != VMWARE_MAGIC {
        return Err(CoreError::format(
            layer_name,
            FORMAT,
            format!("Wrong magic bytes for Vmware layer: {:02x?}", &header[..4]),
        ));
    }
    let group_count = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as u64;

    let mut groups = HashMap::new();
    for index in 0..group_count {
        let at = HEADER_SIZE + index * GROUP_SIZE;
        let raw_name = meta
            .read(at, GROUP_NAME_SIZE, false)
            .map_err(|e| truncated(layer_name, e))?;
        let end = raw_name.iter().position(|b| *b == 0).unwrap_or(raw_name.len());
        let name = String::from_utf8_lossy(&raw_name[..end]).into_owned();
        let tag_location = read_u64(meta, at + GROUP_NAME_SIZE as u64).map_err(|e| truncated(layer_name, e))?;
        groups.insert(name, tag_location);
    }
    Ok(groups)
}

fn read_tags(layer_name: &str, meta: &dyn Layer, mut offset: u64) -> CoreResult<HashMap<TagKey, u32>> {
    let mut tags = HashMap::new();
    loop {
        let head = meta.read(offset, 2, false).map_err(|e| truncated(layer_name, e))?;
        let (flags, name_len) = (head[0], head[1] as u64);
        if flags == 0 && name_len == 0 {
            break;
        }
        let raw_name = meta
            .read(offset + 2, name_len as usize, false)
            .map_err(|e| truncated(layer_name, e))?;
        let end = raw_name.iter().position(|b| *b == 0).unwrap_or(raw_name.len());
        let name = String::from_utf8_lossy(&raw_name[..end]).into_owned();

        let index_count = ((flags >> 6) & 3) as u64;
        let indices_at = offset + 2 + name_len;
        let indices = (0..index_count)
            .map(|i| read_u32(meta, indices_at + i * INDEX_SIZE))
            .collect::<CoreResult<Vec<u32>>>()
            .map_err(|e| truncated(layer_name, e))?;
        let data_at = indices_at + index_count * INDEX_SIZE;
        let data = read_u32(meta, data_at).map_err(|e| truncated(layer_name, e))?;

        tags.insert((name, indices), data);
        offset = data_at + INDEX_SIZE;
    }
    Ok(tags)
}

fn read_segments(layer_name: &str, meta: &dyn Layer) -> CoreResult<Vec<Segment>> {
    let groups = read_groups(layer_name, meta)?;
    let memory = *groups
        .get("memory")
        .ok_or_else(|| CoreError::format(layer_name, FORMAT, "no memory group in metadata"))?;
    let tags = read_tags(layer_name, meta, memory)?;

    let tag = |name: &str, indices: Vec<u32>| -> CoreResult<u64> {
        tags.get(&(name.to_owned(), indices.clone()))
            .map(|v| *v as u64)
            .ok_or_else(|| CoreError::format(layer_name, FORMAT, format!("missing tag {}{:?}", name, indices)))
    };

    let regions = tag("regionsCount", Vec::new())?;
    if regions == 0 {
        return Err(CoreError::format(layer_name, FORMAT, "VMware VMEM is not split into regions"));
    }
    (0..regions as u32)
        .map(|region| {
            Ok(Segment::new(
                tag("regionPPN", vec![region])? * PAGE_SIZE,
                tag("regionPageNum", vec![region])? * PAGE_SIZE,
                tag("regionSize", vec![region])? * PAGE_SIZE,
            ))
        })
        .collect()
}

impl Layer for VmwareLayer {
    fn name(&self) -> &str {
        self.segmented.name()
    }

    fn minimum_address(&self) -> u64 {
        self.segmented.minimum_address()
    }

    fn maximum_address(&self) -> u64 {
        self.segmented.maximum_address()
    }

    fn is_valid(&self, offset: u64, length: u64) -> bool {
        self.segmented.is_valid(offset, length)
    }

    fn read(&self, offset: u64, length: usize, pad: bool) -> CoreResult<Vec<u8>> {
        self.segmented.read(offset, length, pad)
    }

    fn write(&self, offset: u64, data: &[u8]) -> CoreResult<()> {
        self.segmented.write(offset, data)
    }

    fn dependencies(&self) -> Vec<String> {
        vec![
            self.segmented.base_layer().name().to_owned(),
            self.meta.name().to_owned(),
        ]
    }

    fn as_translation(&self) -> Option<&dyn TranslationLayer> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TranslationLayer for VmwareLayer {
    fn mapping(&self, offset: u64, length: u64, ignore_errors: bool) -> CoreResult<Vec<MappedRange>> {
        self.segmented.mapping(offset, length, ignore_errors)
    }

    fn dependency(&self, name: &str) -> CoreResult<Arc<dyn Layer>> {
        if name == self.meta.name() {
            return Ok(self.meta.clone());
        }
        self.segmented.dependency(name)
    }
}

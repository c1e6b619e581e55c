//! Physical layers backed by a finite byte source.
//!
//! [`FileLayer`] memory-maps a capture read-only; [`BufferLayer`] holds its
//! bytes in memory and accepts writes. Both report `maximum_address` as the
//! source length and only ever check pure bounds.

use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::memory::traits::Layer;
use memmap2::{Mmap, MmapOptions};
use parking_lot::RwLock;
use std::any::Any;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Bounds check shared by the physical layers.
fn in_bounds(size: u64, offset: u64, length: u64) -> bool {
    match offset.checked_add(length.max(1)) {
        Some(end) => end <= size,
        None => false,
    }
}

/// Slice `[offset, offset+length)` out of `data`, zero-padding when allowed.
fn read_slice(layer_name: &str, data: &[u8], offset: u64, length: usize, pad: bool) -> CoreResult<Vec<u8>> {
    let size = data.len() as u64;
    let available = size.saturating_sub(offset).min(length as u64) as usize;
    if available < length && !pad {
        return Err(CoreError::OutOfBounds {
            layer_name: layer_name.to_owned(),
            offset,
            length: length as u64,
        });
    }
    let mut result = Vec::with_capacity(length);
    if available > 0 {
        let start = offset as usize;
        result.extend_from_slice(&data[start..start + available]);
    }
    result.resize(length, 0);
    Ok(result)
}

/// Internal state for the memory-mapped layer.
struct MmapState {
    /// `None` for an empty file, which cannot be mapped.
    mmap: Option<Mmap>,
    size: u64,
}

impl MmapState {
    fn as_slice(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

/// A read-only layer over a memory-mapped capture file.
///
/// # Example
///
/// ```rust,ignore
/// use volcore::memory::layers::FileLayer;
/// use volcore::memory::traits::Layer;
///
/// let layer = FileLayer::open("base", "file:///cases/win10.vmem")?;
/// let header = layer.read(0, 0x1000, false)?;
/// ```
pub struct FileLayer {
    name: String,
    /// File location as configured (file:// URL or path).
    location: String,
    path: PathBuf,
    /// `None` once the layer has been destroyed.
    state: RwLock<Option<MmapState>>,
}

// ---------------------------------------------------------------------------
// Always-available helpers
// ---------------------------------------------------------------------------
impl FileLayer {
    /// Parse a file:// URL to a path.
    pub fn parse_location(location: &str) -> PathBuf {
        let path_str = match location.strip_prefix("file://") {
            // file:///C:/path on Windows keeps the drive letter
            Some(url_path)
                if url_path.starts_with('/') && url_path.len() > 2 && url_path.chars().nth(2) == Some(':') =>
            {
                &url_path[1..]
            }
            Some(url_path) => url_path,
            None => location,
        };
        PathBuf::from(percent_decode(path_str))
    }

    fn map_file(path: &Path) -> CoreResult<MmapState> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        if size == 0 {
            return Ok(MmapState { mmap: None, size: 0 });
        }
        // SAFETY: the mapping is read-only and the capture is not expected to
        // change underneath the analysis.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(MmapState {
            mmap: Some(mmap),
            size,
        })
    }

    fn size(&self) -> u64 {
        self.state.read().as_ref().map(|s| s.size).unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------
impl FileLayer {
    /// Open a capture file.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the layer
    /// * `location` - File location (file:// URL or plain filesystem path)
    pub fn open(name: impl Into<String>, location: impl Into<String>) -> CoreResult<Self> {
        let location = location.into();
        let path = Self::parse_location(&location);
        let state = Self::map_file(&path)?;
        Ok(FileLayer {
            name: name.into(),
            location,
            path,
            state: RwLock::new(Some(state)),
        })
    }

    /// Open the file named by `location` under `config_path`.
    pub fn from_config(context: &Context, config_path: &str, name: &str) -> CoreResult<Self> {
        let config = context.config().branch(config_path);
        Self::open(name, config.get_str("location")?)
    }

    /// The file location as configured.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The resolved filesystem path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// Layer trait implementation
// ---------------------------------------------------------------------------
impl Layer for FileLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn maximum_address(&self) -> u64 {
        self.size()
    }

    fn is_valid(&self, offset: u64, length: u64) -> bool {
        in_bounds(self.size(), offset, length)
    }

    fn read(&self, offset: u64, length: usize, pad: bool) -> CoreResult<Vec<u8>> {
        let guard = self.state.read();
        let state = guard
            .as_ref()
            .ok_or_else(|| CoreError::layer_destroyed(&self.name))?;
        read_slice(&self.name, state.as_slice(), offset, length, pad)
    }

    fn destroy(&self) {
        *self.state.write() = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A writable physical layer over an in-memory buffer.
pub struct BufferLayer {
    name: String,
    data: RwLock<Vec<u8>>,
}

impl BufferLayer {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        BufferLayer {
            name: name.into(),
            data: RwLock::new(data),
        }
    }

    /// Load the file named by `location` under `config_path` into memory.
    pub fn from_config(context: &Context, config_path: &str, name: &str) -> CoreResult<Self> {
        let config = context.config().branch(config_path);
        let path = FileLayer::parse_location(config.get_str("location")?);
        Ok(Self::new(name, std::fs::read(path)?))
    }

    /// A copy of the current contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl Layer for BufferLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn maximum_address(&self) -> u64 {
        self.data.read().len() as u64
    }

    fn is_valid(&self, offset: u64, length: u64) -> bool {
        in_bounds(self.data.read().len() as u64, offset, length)
    }

    fn read(&self, offset: u64, length: usize, pad: bool) -> CoreResult<Vec<u8>> {
        read_slice(&self.name, &self.data.read(), offset, length, pad)
    }

    fn write(&self, offset: u64, data: &[u8]) -> CoreResult<()> {
        let mut buffer = self.data.write();
        if !in_bounds(buffer.len() as u64, offset, data.len() as u64) {
            return Err(CoreError::OutOfBounds {
                layer_name: self.name.clone(),
                offset,
                length: data.len() as u64,
            });
        }
        let start = offset as usize;
        buffer[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Simple percent decoding for file paths.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = decoded {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

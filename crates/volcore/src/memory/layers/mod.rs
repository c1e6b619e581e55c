//! Layer implementations.
//!
//! Physical layers ([`FileLayer`], [`BufferLayer`]) sit at the bottom of a
//! stack; [`SegmentedLayer`] and [`VmwareLayer`] remap sparse ranges onto them.

pub mod physical;
pub mod segmented;
pub mod vmware;

pub use physical::{BufferLayer, FileLayer};
pub use segmented::{Segment, SegmentedLayer};
pub use vmware::{metadata_companion, VmwareLayer};

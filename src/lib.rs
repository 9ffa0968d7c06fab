//! Decoder for the region file format used to persist a voxel world as
//! a 32x32 grid of chunks.
//!
//! A chunk is located through the region's fixed-size location table,
//! its zlib payload decompressed, the tag stream walked for the section
//! records it carries, and the sections reassembled into one contiguous
//! 256x16x16 block-id volume.
//!
//! ```no_run
//! use region_volume::{read_chunk_volume, RegionChunkPosition};
//!
//! let position = RegionChunkPosition::new(15, 3);
//! let volume = read_chunk_volume("r.0.0.mca", position).unwrap();
//!
//! if let Some(block_id) = volume.block_id(64, 5, 9) {
//!     println!("block {} at level 64", block_id);
//! }
//! ```

pub mod error;
pub mod position;
pub mod region;
pub mod tag;
pub mod volume;

pub use crate::error::ChunkDecodeError;
pub use crate::position::RegionChunkPosition;
pub use crate::region::{ChunkLocation, Region};
pub use crate::tag::{ChunkTags, FieldValue, Section};
pub use crate::volume::Volume;

use std::fs::File;
use std::path::Path;

/// Decodes one chunk of a region file into its block volume.
///
/// The file handle is scoped to this call: opened read-only, read and
/// dropped before returning. Concurrent decodes of different chunks are
/// safe because every call owns its own handle.
pub fn read_chunk_volume<P: AsRef<Path>>(
    path: P,
    position: RegionChunkPosition,
) -> Result<Volume, ChunkDecodeError> {
    let file = File::open(path)?;
    let mut region = Region::load(file)?;

    region.read_chunk_volume(position)
}

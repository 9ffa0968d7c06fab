use crate::error::ChunkDecodeError;
use crate::position::RegionChunkPosition;
use crate::tag::{self, ChunkTags};
use crate::volume::Volume;
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use flate2::read::ZlibDecoder;
use log::debug;
use std::io;
use std::io::{Read, Seek, SeekFrom};

/// Amount of chunks in region.
const REGION_CHUNKS: usize = 1024;
/// Region header length in bytes: location table plus timestamp table.
const REGION_HEADER_BYTES_LENGTH: u64 = 8 * REGION_CHUNKS as u64;
/// Region sector length in bytes.
const REGION_SECTOR_BYTES_LENGTH: u32 = 4096;

/// Zlib compression type value. Gzip (type 1) exists in the format but
/// is out of scope and is rejected without a decompression attempt.
const ZLIB_COMPRESSION_TYPE: u8 = 2;

/// Region represents a 32x32 group of chunks.
///
/// The source is owned for the duration of the decode calls made on it;
/// nothing is cached between calls. Concurrent decodes are safe when
/// every call uses its own source.
pub struct Region<S> {
    /// Source in which region are stored.
    source: S,
    /// Array of chunks metadata.
    chunks_metadata: [ChunkMetadata; REGION_CHUNKS],
}

/// Chunk metadata are stored in the location table.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
struct ChunkMetadata {
    /// Sector index from which starts chunk data.
    start_sector_index: u32,
    /// Amount of sectors used to store chunk.
    sectors: u8,
}

impl ChunkMetadata {
    fn is_empty(&self) -> bool {
        self.sectors == 0
    }
}

/// Resolved byte range of one chunk's framed payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChunkLocation {
    pub byte_offset: u64,
    pub byte_length: u32,
}

impl<S: Read + Seek> Region<S> {
    pub fn load(mut source: S) -> Result<Self, io::Error> {
        let chunks_metadata = Self::read_location_table(&mut source)?;

        let region = Region {
            source,
            chunks_metadata,
        };

        Ok(region)
    }

    /// First 8KB of source are header of 1024 locations and 1024
    /// timestamps; only the location table is consumed. A source shorter
    /// than the header yields an all-empty table.
    fn read_location_table(source: &mut S) -> Result<[ChunkMetadata; REGION_CHUNKS], io::Error> {
        let mut chunks_metadata = [ChunkMetadata::default(); REGION_CHUNKS];

        if REGION_HEADER_BYTES_LENGTH > source.len()? {
            return Ok(chunks_metadata);
        }

        source.seek(SeekFrom::Start(0))?;

        for metadata in chunks_metadata.iter_mut() {
            let offset = source.read_u32::<BigEndian>()?;

            metadata.start_sector_index = offset >> 8;
            metadata.sectors = (offset & 0xFF) as u8;
        }

        Ok(chunks_metadata)
    }

    /// Resolves a chunk position to its payload byte range, or
    /// [`ChunkDecodeError::ChunkNotFound`] for a zero location entry.
    pub fn locate(&self, position: RegionChunkPosition) -> Result<ChunkLocation, ChunkDecodeError> {
        let metadata = self.chunks_metadata[position.metadata_index()];

        if metadata.is_empty() {
            return Err(ChunkDecodeError::ChunkNotFound { position });
        }

        Ok(ChunkLocation {
            byte_offset: metadata.start_sector_index as u64 * REGION_SECTOR_BYTES_LENGTH as u64,
            byte_length: metadata.sectors as u32 * REGION_SECTOR_BYTES_LENGTH,
        })
    }

    /// Reads the framed chunk payload at `location` and decompresses it
    /// into the raw tag stream.
    pub fn read_chunk_payload(
        &mut self,
        location: ChunkLocation,
    ) -> Result<Vec<u8>, ChunkDecodeError> {
        let source_len = self.source.len()?;
        let expected_end = location.byte_offset + location.byte_length as u64;

        if expected_end > source_len {
            return Err(ChunkDecodeError::Truncated {
                expected: expected_end as usize,
                actual: source_len as usize,
            });
        }

        self.source.seek(SeekFrom::Start(location.byte_offset))?;

        let mut framed = vec![0u8; location.byte_length as usize];
        self.source.read_exact(&mut framed)?;

        // Frame: 4 bytes length covering the compression byte and the
        // compressed data, then the compression byte itself.
        let length = BigEndian::read_u32(&framed[0..4]);
        let maximum_length = location.byte_length - 4;

        if length > maximum_length {
            return Err(ChunkDecodeError::LengthExceedsMaximum {
                length,
                maximum_length,
            });
        }

        if length < 1 {
            return Err(ChunkDecodeError::corrupt(0, "chunk frame declares zero length"));
        }

        let compression_scheme = framed[4];
        let compressed = &framed[5..4 + length as usize];

        if compression_scheme != ZLIB_COMPRESSION_TYPE {
            return Err(ChunkDecodeError::UnsupportedCompressionScheme { compression_scheme });
        }

        let mut stream = Vec::new();

        ZlibDecoder::new(compressed)
            .read_to_end(&mut stream)
            .map_err(|io_error| {
                ChunkDecodeError::corrupt(0, format!("zlib stream: {}", io_error))
            })?;

        debug!(
            target: "region-volume",
            "Decompressed {} payload bytes into {} stream bytes", length, stream.len()
        );

        Ok(stream)
    }

    /// Decodes one chunk into its section records and named fields.
    pub fn decode_chunk(
        &mut self,
        position: RegionChunkPosition,
    ) -> Result<ChunkTags, ChunkDecodeError> {
        let location = self.locate(position)?;

        debug!(
            target: "region-volume",
            "Chunk x: {}, z: {} located at offset {} length {}",
            position.x, position.z, location.byte_offset, location.byte_length
        );

        let stream = self.read_chunk_payload(location)?;

        tag::read_chunk_tags(&stream)
    }

    /// Decodes one chunk and assembles its 256x16x16 block volume.
    pub fn read_chunk_volume(
        &mut self,
        position: RegionChunkPosition,
    ) -> Result<Volume, ChunkDecodeError> {
        let tags = self.decode_chunk(position)?;

        Ok(Volume::assemble(&tags.sections))
    }
}

/// Trait adds additional helper methods for `Seek`.
trait SeekExt {
    fn len(&mut self) -> Result<u64, io::Error>;
}

impl<S: Seek> SeekExt for S {
    fn len(&mut self) -> Result<u64, io::Error> {
        let old_pos = self.seek(SeekFrom::Current(0))?;
        self.seek(SeekFrom::Start(0))?;
        let len = self.seek(SeekFrom::End(0))?;

        if old_pos != len {
            self.seek(SeekFrom::Start(old_pos))?;
        }

        Ok(len)
    }
}

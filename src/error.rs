use crate::position::RegionChunkPosition;
use std::{error::Error, fmt::Display, io};

/// Possible errors while decoding a chunk.
#[derive(Debug)]
pub enum ChunkDecodeError {
    /// Chunk at specified coordinates inside region not found.
    ///
    /// The location table entry is all zero, meaning the chunk was
    /// never generated.
    ChunkNotFound { position: RegionChunkPosition },
    /// Region file ends before the header or chunk payload it promises.
    ///
    /// Region file are corrupted.
    Truncated {
        /// Amount of bytes the location table implies.
        expected: usize,
        /// Amount of bytes actually available.
        actual: usize,
    },
    /// Chunk length overlaps declared maximum.
    ///
    /// This should not occur under normal conditions.
    ///
    /// Region file are corrupted.
    LengthExceedsMaximum {
        /// Chunk length.
        length: u32,
        /// Chunk maximum expected length.
        maximum_length: u32,
    },
    /// Only Zlib compressed chunks are supported.
    ///
    /// Gzip (type 1) chunks exist in the format but are out of scope:
    /// encountering one fails before any decompression attempt.
    UnsupportedCompressionScheme {
        /// Compression scheme type id.
        compression_scheme: u8,
    },
    /// Decompressed tag stream cannot be decoded.
    ///
    /// Covers zlib failures, tag reads running past the end of the
    /// stream, oversized tag names, unknown tag kinds and byte arrays
    /// whose length cannot be derived from their name.
    CorruptStream {
        /// Byte offset inside the decompressed stream, or 0 when the
        /// stream itself failed to decompress.
        offset: usize,
        reason: String,
    },
    /// Section accumulator finalized without all required fields.
    IncompleteSection {
        /// Name of the first missing field.
        missing_field: &'static str,
    },
    /// I/O Error which happened while were reading chunk data from region file.
    IOError { io_error: io::Error },
}

impl ChunkDecodeError {
    pub(crate) fn corrupt(offset: usize, reason: impl Into<String>) -> Self {
        ChunkDecodeError::CorruptStream {
            offset,
            reason: reason.into(),
        }
    }
}

impl From<io::Error> for ChunkDecodeError {
    fn from(io_error: io::Error) -> Self {
        ChunkDecodeError::IOError { io_error }
    }
}

impl Error for ChunkDecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ChunkDecodeError::IOError { io_error } => Some(io_error),
            _ => None,
        }
    }
}

impl Display for ChunkDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ChunkDecodeError::*;
        match self {
            ChunkNotFound { position } => {
                write!(f, "Chunk {}, {} not found", position.x, position.z)
            }
            Truncated { expected, actual } => write!(
                f,
                "Region file truncated: expected {} bytes but only {} available",
                expected, actual
            ),
            LengthExceedsMaximum {
                length,
                maximum_length,
            } => write!(
                f,
                "Chunk length of {} exceeds maximum ({})",
                length, maximum_length
            ),
            UnsupportedCompressionScheme { compression_scheme } => {
                write!(f, "Unsupported compression scheme: {}", compression_scheme)
            }
            CorruptStream { offset, reason } => {
                write!(f, "Corrupt tag stream at offset {}: {}", offset, reason)
            }
            IncompleteSection { missing_field } => {
                write!(f, "Section is missing required field `{}`", missing_field)
            }
            IOError { .. } => write!(f, "IO Error"),
        }
    }
}

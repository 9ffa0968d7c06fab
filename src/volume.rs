use crate::tag::{Section, SECTION_BLOCKS_LENGTH, SECTION_NIBBLES_LENGTH};
use bitvec::prelude::*;
use log::debug;

/// Vertical levels in a chunk volume.
pub const VOLUME_LEVELS: usize = 256;
/// Rows (z axis) per level.
pub const VOLUME_ROWS: usize = 16;
/// Columns (x axis) per row.
pub const VOLUME_COLUMNS: usize = 16;

/// Levels covered by one section.
const LEVELS_PER_SECTION: usize = 16;
/// Vertical bands a volume can hold.
const VOLUME_BANDS: usize = VOLUME_LEVELS / LEVELS_PER_SECTION;
/// Total voxels in a volume.
const VOLUME_VOXELS: usize = VOLUME_LEVELS * VOLUME_ROWS * VOLUME_COLUMNS;

/// A chunk's 256x16x16 block-id volume, assembled from its sections.
///
/// Levels without a backing section stay unpopulated, which is distinct
/// from a populated level full of air (block id 0).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Volume {
    /// Block ids, one byte per voxel.
    block_ids: Vec<u8>,
    /// Secondary block metadata, packed two voxels per byte.
    data_nibbles: Vec<u8>,
    /// One bit per global level.
    populated: BitVec,
}

impl Volume {
    /// Expands section records into one contiguous volume.
    ///
    /// Sections are independent bands: each writes its 16 levels at
    /// `y * 16` and marks them populated. Sections with a vertical index
    /// outside the volume or arrays of the wrong length are skipped.
    pub fn assemble(sections: &[Section]) -> Volume {
        let mut volume = Volume {
            block_ids: vec![0; VOLUME_VOXELS],
            data_nibbles: vec![0; VOLUME_VOXELS / 2],
            populated: bitvec![0; VOLUME_LEVELS],
        };

        for section in sections {
            if section.y < 0 || section.y as usize >= VOLUME_BANDS {
                debug!(
                    target: "region-volume",
                    "Skipping section with vertical index {} outside volume", section.y
                );
                continue;
            }

            if section.blocks.len() != SECTION_BLOCKS_LENGTH
                || section.data.len() != SECTION_NIBBLES_LENGTH
            {
                debug!(
                    target: "region-volume",
                    "Skipping section {} with malformed array lengths", section.y
                );
                continue;
            }

            let band = section.y as usize;
            let blocks_start = band * SECTION_BLOCKS_LENGTH;
            let nibbles_start = band * SECTION_NIBBLES_LENGTH;

            volume.block_ids[blocks_start..blocks_start + SECTION_BLOCKS_LENGTH]
                .copy_from_slice(&section.blocks);
            volume.data_nibbles[nibbles_start..nibbles_start + SECTION_NIBBLES_LENGTH]
                .copy_from_slice(&section.data);

            for level in band * LEVELS_PER_SECTION..(band + 1) * LEVELS_PER_SECTION {
                volume.populated.set(level, true);
            }
        }

        volume
    }

    /// Whether a section covered this global level.
    pub fn is_populated(&self, level: usize) -> bool {
        assert!(VOLUME_LEVELS > level, "Volume level out of bounds");

        self.populated[level]
    }

    /// Block id at the given coordinates, `None` for unpopulated levels.
    pub fn block_id(&self, level: usize, row: usize, column: usize) -> Option<u8> {
        let index = voxel_index(level, row, column);

        if !self.populated[level] {
            return None;
        }

        Some(self.block_ids[index])
    }

    /// Secondary metadata nibble at the given coordinates. Two voxels
    /// share a byte: the even column sits in the low nibble, the odd
    /// column in the high nibble.
    pub fn block_data(&self, level: usize, row: usize, column: usize) -> Option<u8> {
        let index = voxel_index(level, row, column);

        if !self.populated[level] {
            return None;
        }

        let packed = self.data_nibbles[index >> 1];

        if index & 1 == 0 {
            Some(packed & 0x0F)
        } else {
            Some(packed >> 4)
        }
    }
}

fn voxel_index(level: usize, row: usize, column: usize) -> usize {
    assert!(VOLUME_LEVELS > level, "Volume level out of bounds");
    assert!(VOLUME_ROWS > row, "Volume row out of bounds");
    assert!(VOLUME_COLUMNS > column, "Volume column out of bounds");

    (level << 8) | (row << 4) | column
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(y: i8) -> Section {
        Section {
            y,
            blocks: vec![0; SECTION_BLOCKS_LENGTH],
            block_light: vec![0; SECTION_NIBBLES_LENGTH],
            data: vec![0; SECTION_NIBBLES_LENGTH],
            sky_light: vec![0; SECTION_NIBBLES_LENGTH],
        }
    }

    #[test]
    fn test_indexing_round_trip() {
        // Voxel (y=3, z=5, x=9) inside band 2: index (3 << 8) + (5 << 4) + 9.
        let mut filled = section(2);
        filled.blocks[857] = 0x07;

        let volume = Volume::assemble(&[filled]);

        assert_eq!(volume.block_id(35, 5, 9), Some(7));

        for level in 32..48 {
            for row in 0..VOLUME_ROWS {
                for column in 0..VOLUME_COLUMNS {
                    if (level, row, column) != (35, 5, 9) {
                        assert_eq!(volume.block_id(level, row, column), Some(0));
                    }
                }
            }
        }
    }

    #[test]
    fn test_unpopulated_is_distinct_from_air() {
        let volume = Volume::assemble(&[section(2)]);

        assert!(volume.is_populated(32));
        assert!(!volume.is_populated(0));
        // Air inside the loaded band, no data below it.
        assert_eq!(volume.block_id(32, 0, 0), Some(0));
        assert_eq!(volume.block_id(0, 0, 0), None);
        assert_eq!(volume.block_data(0, 0, 0), None);
    }

    #[test]
    fn test_data_nibble_parity() {
        let mut filled = section(2);
        filled.data[0] = 0x21;

        let volume = Volume::assemble(&[filled]);

        // Low nibble belongs to column 0, high nibble to column 1.
        assert_eq!(volume.block_data(32, 0, 0), Some(1));
        assert_eq!(volume.block_data(32, 0, 1), Some(2));
        assert_eq!(volume.block_data(32, 0, 2), Some(0));
    }

    #[test]
    fn test_section_outside_volume_is_skipped() {
        let volume = Volume::assemble(&[section(16), section(-1)]);

        for level in 0..VOLUME_LEVELS {
            assert!(!volume.is_populated(level));
        }
    }

    #[test]
    #[should_panic]
    fn test_out_of_bounds_coordinate_panics() {
        let volume = Volume::assemble(&[]);
        volume.block_id(256, 0, 0);
    }
}

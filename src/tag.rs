use crate::error::ChunkDecodeError;
use byteorder::{BigEndian, ByteOrder};
use log::debug;
use std::collections::HashMap;
use std::mem;

const TAG_END: u8 = 0;
const TAG_BYTE: u8 = 1;
const TAG_SHORT: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_LONG: u8 = 4;
const TAG_FLOAT: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_BYTE_ARRAY: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_LIST: u8 = 9;
const TAG_COMPOUND: u8 = 10;
const TAG_INT_ARRAY: u8 = 11;
const TAG_LONG_ARRAY: u8 = 12;

/// Maximum tag name length accepted by the walker.
const TAG_NAME_MAXIMUM_LENGTH: usize = 32;

/// Section blocks array length in bytes (16 * 16 * 16 voxels).
pub const SECTION_BLOCKS_LENGTH: usize = 4096;
/// Section nibble array length in bytes (two voxels per byte).
pub const SECTION_NIBBLES_LENGTH: usize = 2048;
/// Biomes array length in bytes (16 * 16 columns).
const BIOMES_LENGTH: usize = 256;
/// Height map wire length: 4 count bytes plus 256 4-byte slots.
const HEIGHT_MAP_LENGTH: usize = 1028;

/// One 16x16x16 sub-volume of a chunk.
///
/// Immutable once emitted; only complete sections (vertical index plus
/// all four voxel arrays) are ever produced by the walker.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Section {
    /// Which 16-level vertical band of the chunk this section covers.
    pub y: i8,
    /// Block ids, one byte per voxel.
    pub blocks: Vec<u8>,
    /// Block light levels, 4 bits per voxel.
    pub block_light: Vec<u8>,
    /// Secondary block metadata, 4 bits per voxel.
    pub data: Vec<u8>,
    /// Sky light levels, 4 bits per voxel.
    pub sky_light: Vec<u8>,
}

/// Materialized payload of a named tag outside the section arrays.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FieldValue {
    Byte(u8),
    Short(u16),
    Int(i32),
    Long(i64),
    Bytes(Vec<u8>),
    /// Decoded `HeightMap` entries.
    Heights(Vec<i32>),
}

/// Everything extracted from one chunk's decompressed tag stream.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChunkTags {
    /// Section records in stream order.
    pub sections: Vec<Section>,
    /// Named scalar and array fields, last write wins per name.
    pub fields: HashMap<String, FieldValue>,
}

impl ChunkTags {
    /// Last time the chunk was saved, if the stream carried a `LastUpdate` tag.
    pub fn last_update(&self) -> Option<i64> {
        match self.fields.get("LastUpdate") {
            Some(FieldValue::Long(value)) => Some(*value),
            _ => None,
        }
    }

    /// Decoded `HeightMap` entries, one per column.
    pub fn height_map(&self) -> Option<&[i32]> {
        match self.fields.get("HeightMap") {
            Some(FieldValue::Heights(heights)) => Some(heights),
            _ => None,
        }
    }
}

/// Decodes a decompressed tag stream into section records and named fields.
///
/// Single pass, no backtracking: the walk ends when the cursor reaches
/// the end of the stream. Malformed streams surface as
/// [`ChunkDecodeError::CorruptStream`] instead of reading out of range.
pub fn read_chunk_tags(stream: &[u8]) -> Result<ChunkTags, ChunkDecodeError> {
    TagWalker::new(stream).run()
}

/// Open compound or list context.
enum Scope {
    Compound,
    /// Compound-element list with `remaining` entries still to walk.
    /// Entries carry no opening tag byte, so each end tag closes one.
    List { remaining: usize },
}

/// In-progress section fields, filled while walking a Sections entry.
#[derive(Default)]
struct SectionAccumulator {
    y: Option<i8>,
    blocks: Option<Vec<u8>>,
    block_light: Option<Vec<u8>>,
    data: Option<Vec<u8>>,
    sky_light: Option<Vec<u8>>,
}

impl SectionAccumulator {
    fn is_empty(&self) -> bool {
        self.y.is_none()
            && self.blocks.is_none()
            && self.block_light.is_none()
            && self.data.is_none()
            && self.sky_light.is_none()
    }

    fn store(&mut self, name: &str, value: FieldValue) {
        match (name, value) {
            ("Y", FieldValue::Byte(value)) => self.y = Some(value as i8),
            ("Blocks", FieldValue::Bytes(bytes)) => self.blocks = Some(bytes),
            ("BlockLight", FieldValue::Bytes(bytes)) => self.block_light = Some(bytes),
            ("Data", FieldValue::Bytes(bytes)) => self.data = Some(bytes),
            ("SkyLight", FieldValue::Bytes(bytes)) => self.sky_light = Some(bytes),
            _ => {}
        }
    }

    /// Finalizes the accumulator, resetting it for the next entry.
    fn finish(&mut self) -> Result<Section, ChunkDecodeError> {
        let missing =
            |missing_field: &'static str| ChunkDecodeError::IncompleteSection { missing_field };
        let accumulator = mem::take(self);

        Ok(Section {
            y: accumulator.y.ok_or(missing("Y"))?,
            blocks: accumulator.blocks.ok_or(missing("Blocks"))?,
            block_light: accumulator.block_light.ok_or(missing("BlockLight"))?,
            data: accumulator.data.ok_or(missing("Data"))?,
            sky_light: accumulator.sky_light.ok_or(missing("SkyLight"))?,
        })
    }
}

struct TagWalker<'a> {
    stream: &'a [u8],
    pos: usize,
    scopes: Vec<Scope>,
    /// Set on a tag named `Sections`, cleared on `LastUpdate`. Grouping of
    /// section fields keys off this flag, not off nesting depth.
    in_sections: bool,
    accumulator: SectionAccumulator,
    sections: Vec<Section>,
    fields: HashMap<String, FieldValue>,
}

impl<'a> TagWalker<'a> {
    fn new(stream: &'a [u8]) -> Self {
        TagWalker {
            stream,
            pos: 0,
            scopes: Vec::new(),
            in_sections: false,
            accumulator: SectionAccumulator::default(),
            sections: Vec::new(),
            fields: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<ChunkTags, ChunkDecodeError> {
        while self.pos < self.stream.len() {
            self.step()?;
        }

        Ok(ChunkTags {
            sections: self.sections,
            fields: self.fields,
        })
    }

    /// Decodes exactly one tag at the cursor.
    fn step(&mut self) -> Result<(), ChunkDecodeError> {
        let kind = self.read_u8()?;

        if kind == TAG_END {
            self.close_scope();
            return Ok(());
        }

        let name = self.read_name()?;

        match kind {
            TAG_BYTE => {
                let value = self.read_u8()?;
                self.record(name, Some(FieldValue::Byte(value)));
            }
            TAG_SHORT => {
                let value = BigEndian::read_u16(self.take(2)?);
                self.record(name, Some(FieldValue::Short(value)));
            }
            TAG_INT => {
                let value = self.read_i32()?;
                self.record(name, Some(FieldValue::Int(value)));
            }
            TAG_LONG => {
                let value = BigEndian::read_i64(self.take(8)?);
                self.record(name, Some(FieldValue::Long(value)));
            }
            // Floats, doubles and strings are not consumed downstream.
            TAG_FLOAT => self.skip(4)?,
            TAG_DOUBLE => self.skip(8)?,
            TAG_STRING => {
                let length = BigEndian::read_u16(self.take(2)?) as usize;
                self.skip(length)?;
            }
            TAG_BYTE_ARRAY => {
                // The declared count is not trusted: lengths of the consumed
                // arrays are fixed by the format and keyed off the tag name.
                self.skip(4)?;
                let length = byte_array_length(&name, self.pos)?;
                let bytes = self.take(length)?.to_vec();
                self.record(name, Some(FieldValue::Bytes(bytes)));
            }
            TAG_LIST => {
                let element_kind = self.read_u8()?;
                let count = self.read_array_count()?;
                self.record(name, None);

                if count > 0 {
                    if element_kind == TAG_COMPOUND {
                        self.scopes.push(Scope::List { remaining: count });
                    } else {
                        self.skip_list_payload(element_kind, count)?;
                    }
                }
            }
            TAG_COMPOUND => {
                self.record(name, None);
                self.scopes.push(Scope::Compound);
            }
            TAG_INT_ARRAY => {
                if name == "HeightMap" {
                    let window_bytes = self.take(HEIGHT_MAP_LENGTH)?;
                    let heights = window_bytes[4..]
                        .chunks_exact(4)
                        .map(height_from_window)
                        .collect();
                    self.record(name, Some(FieldValue::Heights(heights)));
                } else {
                    let length = self.read_array_count()?;
                    self.skip(length * 4)?;
                }
            }
            TAG_LONG_ARRAY => {
                let length = self.read_array_count()?;
                self.skip(length * 8)?;
            }
            _ => {
                return Err(ChunkDecodeError::corrupt(
                    self.pos,
                    format!("unknown tag kind {}", kind),
                ));
            }
        }

        Ok(())
    }

    /// Handles an end tag: closes the innermost scope and, while inside
    /// the Sections list, finalizes a non-empty section accumulator.
    fn close_scope(&mut self) {
        let finished = match self.scopes.last_mut() {
            Some(Scope::List { remaining }) => {
                *remaining -= 1;
                *remaining == 0
            }
            Some(Scope::Compound) => true,
            None => false,
        };

        if finished {
            self.scopes.pop();
        }

        if self.in_sections && !self.accumulator.is_empty() {
            match self.accumulator.finish() {
                Ok(section) => self.sections.push(section),
                Err(error) => {
                    debug!(target: "region-volume", "Dropping section: {}", error);
                }
            }
        }
    }

    /// Routes a decoded tag by name. Section field names always feed the
    /// accumulator; everything else with a materialized value lands in
    /// the chunk field map.
    fn record(&mut self, name: String, value: Option<FieldValue>) {
        match name.as_str() {
            "Sections" => {
                self.in_sections = true;
                self.accumulator = SectionAccumulator::default();
            }
            "Y" | "Blocks" | "BlockLight" | "Data" | "SkyLight" => {
                if let Some(value) = value {
                    self.accumulator.store(&name, value);
                }
            }
            "LastUpdate" => {
                self.in_sections = false;

                if let Some(value) = value {
                    self.fields.insert(name, value);
                }
            }
            _ => {
                if let Some(value) = value {
                    self.fields.insert(name, value);
                }
            }
        }
    }

    /// Skips the payload of a list with primitive or nested-list elements.
    /// Compound-element lists are walked through the scope stack instead.
    fn skip_list_payload(
        &mut self,
        element_kind: u8,
        count: usize,
    ) -> Result<(), ChunkDecodeError> {
        match element_kind {
            TAG_BYTE => self.skip(count),
            TAG_SHORT => self.skip(count * 2),
            TAG_INT | TAG_FLOAT => self.skip(count * 4),
            TAG_LONG | TAG_DOUBLE => self.skip(count * 8),
            TAG_STRING => {
                for _ in 0..count {
                    let length = BigEndian::read_u16(self.take(2)?) as usize;
                    self.skip(length)?;
                }
                Ok(())
            }
            TAG_BYTE_ARRAY => {
                for _ in 0..count {
                    let length = self.read_array_count()?;
                    self.skip(length)?;
                }
                Ok(())
            }
            TAG_INT_ARRAY => {
                for _ in 0..count {
                    let length = self.read_array_count()?;
                    self.skip(length * 4)?;
                }
                Ok(())
            }
            TAG_LONG_ARRAY => {
                for _ in 0..count {
                    let length = self.read_array_count()?;
                    self.skip(length * 8)?;
                }
                Ok(())
            }
            TAG_LIST => {
                for _ in 0..count {
                    let inner_kind = self.read_u8()?;
                    let inner_count = self.read_array_count()?;
                    self.skip_list_payload(inner_kind, inner_count)?;
                }
                Ok(())
            }
            _ => Err(ChunkDecodeError::corrupt(
                self.pos,
                format!("cannot skip list with element kind {}", element_kind),
            )),
        }
    }

    fn read_name(&mut self) -> Result<String, ChunkDecodeError> {
        let offset = self.pos;
        let length = BigEndian::read_u16(self.take(2)?) as usize;

        if length >= TAG_NAME_MAXIMUM_LENGTH {
            return Err(ChunkDecodeError::corrupt(
                offset,
                format!("tag name length {} out of range", length),
            ));
        }

        let bytes = self.take(length)?;

        String::from_utf8(bytes.to_vec())
            .map_err(|_| ChunkDecodeError::corrupt(offset, "tag name is not valid UTF-8"))
    }

    fn read_array_count(&mut self) -> Result<usize, ChunkDecodeError> {
        let offset = self.pos;
        let count = self.read_i32()?;

        if count < 0 {
            return Err(ChunkDecodeError::corrupt(
                offset,
                format!("negative array count {}", count),
            ));
        }

        Ok(count as usize)
    }

    fn read_u8(&mut self) -> Result<u8, ChunkDecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32, ChunkDecodeError> {
        Ok(BigEndian::read_i32(self.take(4)?))
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8], ChunkDecodeError> {
        let end = self.pos.checked_add(length).ok_or_else(|| {
            ChunkDecodeError::corrupt(self.pos, "tag length overflows stream cursor")
        })?;

        if end > self.stream.len() {
            return Err(ChunkDecodeError::corrupt(
                self.pos,
                format!(
                    "tag needs {} bytes but only {} remain",
                    length,
                    self.stream.len() - self.pos
                ),
            ));
        }

        let bytes = &self.stream[self.pos..end];
        self.pos = end;

        Ok(bytes)
    }

    fn skip(&mut self, length: usize) -> Result<(), ChunkDecodeError> {
        self.take(length).map(|_| ())
    }
}

/// Lengths of the consumed byte arrays are fixed by the format and keyed
/// off the tag name. Any other byte array is a decode failure: guessing a
/// length would desynchronize the cursor.
fn byte_array_length(name: &str, offset: usize) -> Result<usize, ChunkDecodeError> {
    match name {
        "Biomes" => Ok(BIOMES_LENGTH),
        "Add" | "Data" | "BlockLight" | "SkyLight" => Ok(SECTION_NIBBLES_LENGTH),
        "Blocks" => Ok(SECTION_BLOCKS_LENGTH),
        _ => Err(ChunkDecodeError::corrupt(
            offset,
            format!("byte array `{}` has no known length", name),
        )),
    }
}

/// Height map entries encode a height in the low byte and a range marker
/// in the byte above it: marker 0 is the base range, 1 adds 100, 2 adds
/// 200 and anything else decodes to 0.
fn height_from_window(window: &[u8]) -> i32 {
    match window[2] {
        0 => i32::from(window[3]),
        1 => i32::from(window[3]) + 100,
        2 => i32::from(window[3]) + 200,
        _ => 0,
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use byteorder::WriteBytesExt;

    #[test]
    fn test_height_window_conversion() {
        assert_eq!(height_from_window(&[0x00, 0x00, 0x00, 0x05]), 5);
        assert_eq!(height_from_window(&[0x00, 0x00, 0x01, 0x05]), 105);
        assert_eq!(height_from_window(&[0x00, 0x00, 0x02, 0x05]), 205);
        assert_eq!(height_from_window(&[0x00, 0x00, 0x03, 0x05]), 0);
    }

    #[test]
    fn test_sections_decode() {
        let stream = chunk_stream(&[section_entry(0, &[(0, 7)]), section_entry(1, &[(857, 3)])]);
        let tags = read_chunk_tags(&stream).unwrap();

        assert_eq!(tags.sections.len(), 2);
        assert_eq!(tags.sections[0].y, 0);
        assert_eq!(tags.sections[0].blocks[0], 7);
        assert_eq!(tags.sections[1].y, 1);
        assert_eq!(tags.sections[1].blocks[857], 3);
        assert_eq!(tags.sections[1].block_light.len(), SECTION_NIBBLES_LENGTH);
        assert_eq!(tags.last_update(), Some(1_570_215_508));
    }

    #[test]
    fn test_incomplete_section_is_dropped() {
        // Entry carrying only Y and Blocks: all-or-nothing assembly
        // must not emit a section for it.
        let mut stream = named_tag(TAG_COMPOUND, "");
        stream.extend(list_tag("Sections", TAG_COMPOUND, 1));
        stream.extend(named_tag(TAG_BYTE, "Y"));
        stream.push(2);
        stream.extend(byte_array_tag("Blocks", &vec![0u8; SECTION_BLOCKS_LENGTH]));
        stream.push(TAG_END);
        stream.push(TAG_END);

        let tags = read_chunk_tags(&stream).unwrap();

        assert!(tags.sections.is_empty());
    }

    #[test]
    fn test_last_update_clears_sections_grouping() {
        // Section field names appearing after LastUpdate must not be
        // grouped into a section anymore.
        let mut stream = chunk_stream(&[section_entry(0, &[])]);
        stream.extend(named_tag(TAG_BYTE, "Y"));
        stream.push(5);
        stream.extend(byte_array_tag("Blocks", &vec![0u8; SECTION_BLOCKS_LENGTH]));
        stream.extend(byte_array_tag(
            "BlockLight",
            &vec![0u8; SECTION_NIBBLES_LENGTH],
        ));
        stream.extend(byte_array_tag("Data", &vec![0u8; SECTION_NIBBLES_LENGTH]));
        stream.extend(byte_array_tag(
            "SkyLight",
            &vec![0u8; SECTION_NIBBLES_LENGTH],
        ));
        stream.push(TAG_END);

        let tags = read_chunk_tags(&stream).unwrap();

        assert_eq!(tags.sections.len(), 1);
        assert_eq!(tags.sections[0].y, 0);
    }

    #[test]
    fn test_height_map_extraction() {
        let mut stream = named_tag(TAG_INT_ARRAY, "HeightMap");
        stream.write_i32::<BigEndian>(256).unwrap();
        stream.extend_from_slice(&[0x00, 0x00, 0x01, 0x05]);
        stream.extend(vec![0u8; HEIGHT_MAP_LENGTH - 8]);

        let tags = read_chunk_tags(&stream).unwrap();
        let heights = tags.height_map().unwrap();

        assert_eq!(heights.len(), 256);
        assert_eq!(heights[0], 105);
        assert_eq!(heights[1], 0);
    }

    #[test]
    fn test_biomes_recorded_in_fields() {
        let stream = byte_array_tag("Biomes", &[1u8; 256]);
        let tags = read_chunk_tags(&stream).unwrap();

        assert_eq!(
            tags.fields.get("Biomes"),
            Some(&FieldValue::Bytes(vec![1u8; 256]))
        );
    }

    #[test]
    fn test_unknown_byte_array_name_is_corrupt() {
        let stream = byte_array_tag("Unknown", &[0u8; 16]);
        let error = read_chunk_tags(&stream).err().unwrap();

        match error {
            ChunkDecodeError::CorruptStream { .. } => {}
            _ => panic!("Expected `CorruptStream` but got `{:?}`", error),
        }
    }

    #[test]
    fn test_long_tag_name_is_corrupt() {
        let stream = named_tag(TAG_BYTE, "ThisTagNameIsFarTooLongToBeDecoded");
        let error = read_chunk_tags(&stream).err().unwrap();

        match error {
            ChunkDecodeError::CorruptStream { .. } => {}
            _ => panic!("Expected `CorruptStream` but got `{:?}`", error),
        }
    }

    #[test]
    fn test_truncated_stream_is_corrupt() {
        // Long tag with only 3 payload bytes left.
        let mut stream = named_tag(TAG_LONG, "LastUpdate");
        stream.extend_from_slice(&[0, 0, 0]);

        let error = read_chunk_tags(&stream).err().unwrap();

        match error {
            ChunkDecodeError::CorruptStream { .. } => {}
            _ => panic!("Expected `CorruptStream` but got `{:?}`", error),
        }
    }

    #[test]
    fn test_unknown_tag_kind_is_corrupt() {
        let stream = named_tag(13, "Future");
        let error = read_chunk_tags(&stream).err().unwrap();

        match error {
            ChunkDecodeError::CorruptStream { .. } => {}
            _ => panic!("Expected `CorruptStream` but got `{:?}`", error),
        }
    }

    #[test]
    fn test_primitive_list_is_skipped() {
        let mut stream = list_tag("Pos", TAG_DOUBLE, 3);
        stream.extend(vec![0u8; 24]);
        stream.extend(named_tag(TAG_INT, "xPos"));
        stream.write_i32::<BigEndian>(15).unwrap();

        let tags = read_chunk_tags(&stream).unwrap();

        assert!(!tags.fields.contains_key("Pos"));
        assert_eq!(tags.fields.get("xPos"), Some(&FieldValue::Int(15)));
    }

    #[test]
    fn test_unconsumed_scalar_kinds_are_skipped() {
        let mut stream = named_tag(TAG_FLOAT, "FallDistance");
        stream.extend_from_slice(&[0x3f, 0x80, 0x00, 0x00]);
        stream.extend(named_tag(TAG_DOUBLE, "Speed"));
        stream.extend(vec![0u8; 8]);
        stream.extend(named_tag(TAG_STRING, "id"));
        stream.write_u16::<BigEndian>(3).unwrap();
        stream.extend_from_slice(b"Pig");
        stream.extend(named_tag(TAG_SHORT, "Air"));
        stream.extend_from_slice(&[0x01, 0x2c]);

        let tags = read_chunk_tags(&stream).unwrap();

        assert!(!tags.fields.contains_key("FallDistance"));
        assert!(!tags.fields.contains_key("Speed"));
        assert!(!tags.fields.contains_key("id"));
        assert_eq!(tags.fields.get("Air"), Some(&FieldValue::Short(300)));
    }

    #[test]
    fn test_accumulator_reports_first_missing_field() {
        let mut accumulator = SectionAccumulator::default();
        accumulator.store("Y", FieldValue::Byte(4));

        let error = accumulator.finish().err().unwrap();

        match error {
            ChunkDecodeError::IncompleteSection { missing_field } => {
                assert_eq!(missing_field, "Blocks");
            }
            _ => panic!("Expected `IncompleteSection` but got `{:?}`", error),
        }

        // The failed finish still resets the accumulator.
        assert!(accumulator.is_empty());
    }
}

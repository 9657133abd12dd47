//! Attribute tags
//!
//! A tag is the (group, element) pair that keys every attribute in a DICOM
//! stream. Constants are provided for the tags the toolkit itself consults;
//! everything else goes through the dictionary.

use std::fmt;

/// A (group, element) attribute tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub group: u16,
    pub element: u16,
}

impl Tag {
    pub const fn new(group: u16, element: u16) -> Self {
        Tag { group, element }
    }

    /// Combined form with the group in the high half word.
    pub const fn as_u32(self) -> u32 {
        ((self.group as u32) << 16) | self.element as u32
    }

    pub const fn from_u32(combined: u32) -> Self {
        Tag {
            group: (combined >> 16) as u16,
            element: combined as u16,
        }
    }

    /// Group length elements (element 0000) hold the byte length of the
    /// rest of their group.
    pub const fn is_group_length(self) -> bool {
        self.element == 0
    }

    pub const fn is_file_meta(self) -> bool {
        self.group == 0x0002
    }

    pub const fn is_command(self) -> bool {
        self.group == 0x0000
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.group, self.element)
    }
}

// Command set (group 0000)
pub const AFFECTED_SOP_CLASS_UID: Tag = Tag::new(0x0000, 0x0002);
pub const REQUESTED_SOP_CLASS_UID: Tag = Tag::new(0x0000, 0x0003);
pub const COMMAND_FIELD: Tag = Tag::new(0x0000, 0x0100);
pub const MESSAGE_ID: Tag = Tag::new(0x0000, 0x0110);
pub const MESSAGE_ID_REPLIED_TO: Tag = Tag::new(0x0000, 0x0120);
pub const MOVE_DESTINATION: Tag = Tag::new(0x0000, 0x0600);
pub const PRIORITY: Tag = Tag::new(0x0000, 0x0700);
pub const DATA_SET_TYPE: Tag = Tag::new(0x0000, 0x0800);
pub const STATUS: Tag = Tag::new(0x0000, 0x0900);
pub const ATTRIBUTE_IDENTIFIER_LIST: Tag = Tag::new(0x0000, 0x1005);
pub const AFFECTED_SOP_INSTANCE_UID: Tag = Tag::new(0x0000, 0x1000);
pub const REQUESTED_SOP_INSTANCE_UID: Tag = Tag::new(0x0000, 0x1001);
pub const EVENT_TYPE_ID: Tag = Tag::new(0x0000, 0x1002);
pub const ACTION_TYPE_ID: Tag = Tag::new(0x0000, 0x1008);
pub const NUMBER_OF_REMAINING_SUBOPERATIONS: Tag = Tag::new(0x0000, 0x1020);
pub const NUMBER_OF_COMPLETED_SUBOPERATIONS: Tag = Tag::new(0x0000, 0x1021);
pub const NUMBER_OF_FAILED_SUBOPERATIONS: Tag = Tag::new(0x0000, 0x1022);
pub const NUMBER_OF_WARNING_SUBOPERATIONS: Tag = Tag::new(0x0000, 0x1023);
pub const MOVE_ORIGINATOR_AE_TITLE: Tag = Tag::new(0x0000, 0x1030);
pub const MOVE_ORIGINATOR_MESSAGE_ID: Tag = Tag::new(0x0000, 0x1031);

// File meta (group 0002)
pub const FILE_META_GROUP_LENGTH: Tag = Tag::new(0x0002, 0x0000);
pub const MEDIA_STORAGE_SOP_CLASS_UID: Tag = Tag::new(0x0002, 0x0002);
pub const MEDIA_STORAGE_SOP_INSTANCE_UID: Tag = Tag::new(0x0002, 0x0003);
pub const TRANSFER_SYNTAX_UID: Tag = Tag::new(0x0002, 0x0010);
pub const IMPLEMENTATION_CLASS_UID: Tag = Tag::new(0x0002, 0x0012);
pub const IMPLEMENTATION_VERSION_NAME: Tag = Tag::new(0x0002, 0x0013);

// Identity and query attributes
pub const SPECIFIC_CHARACTER_SET: Tag = Tag::new(0x0008, 0x0005);
pub const SOP_CLASS_UID: Tag = Tag::new(0x0008, 0x0016);
pub const SOP_INSTANCE_UID: Tag = Tag::new(0x0008, 0x0018);
pub const STUDY_DATE: Tag = Tag::new(0x0008, 0x0020);
pub const STUDY_TIME: Tag = Tag::new(0x0008, 0x0030);
pub const ACCESSION_NUMBER: Tag = Tag::new(0x0008, 0x0050);
pub const QUERY_RETRIEVE_LEVEL: Tag = Tag::new(0x0008, 0x0052);
pub const MODALITY: Tag = Tag::new(0x0008, 0x0060);
pub const PATIENT_NAME: Tag = Tag::new(0x0010, 0x0010);
pub const PATIENT_ID: Tag = Tag::new(0x0010, 0x0020);
pub const PATIENT_BIRTH_DATE: Tag = Tag::new(0x0010, 0x0030);
pub const STUDY_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000D);
pub const SERIES_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000E);
pub const STUDY_ID: Tag = Tag::new(0x0020, 0x0010);
pub const INSTANCE_NUMBER: Tag = Tag::new(0x0020, 0x0013);

// Image pixel module
pub const SAMPLES_PER_PIXEL: Tag = Tag::new(0x0028, 0x0002);
pub const ROWS: Tag = Tag::new(0x0028, 0x0010);
pub const COLUMNS: Tag = Tag::new(0x0028, 0x0011);
pub const BITS_ALLOCATED: Tag = Tag::new(0x0028, 0x0100);
pub const BITS_STORED: Tag = Tag::new(0x0028, 0x0101);
pub const PIXEL_REPRESENTATION: Tag = Tag::new(0x0028, 0x0103);

// Pixel data and structural delimiters
pub const PIXEL_DATA: Tag = Tag::new(0x7FE0, 0x0010);
pub const ITEM: Tag = Tag::new(0xFFFE, 0xE000);
pub const ITEM_DELIMITATION_END: Tag = Tag::new(0xFFFE, 0xE00D);
pub const SEQUENCE_DELIMITATION_END: Tag = Tag::new(0xFFFE, 0xE0DD);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_u32_round_trip() {
        let tag = Tag::new(0x7FE0, 0x0010);
        assert_eq!(tag.as_u32(), 0x7FE0_0010);
        assert_eq!(Tag::from_u32(0x7FE0_0010), tag);
    }

    #[test]
    fn test_tag_display() {
        assert_eq!(Tag::new(0x0008, 0x0018).to_string(), "(0008,0018)");
    }

    #[test]
    fn test_tag_ordering_by_group_then_element() {
        assert!(Tag::new(0x0008, 0xFFFF) < Tag::new(0x0010, 0x0000));
        assert!(Tag::new(0x0010, 0x0010) < Tag::new(0x0010, 0x0020));
    }
}

//! Data dictionary
//!
//! A built-in table covering the attributes the toolkit itself consults:
//! the command set, file meta, common query/identity attributes, and the
//! image pixel module. Implicit-VR decoding and the US/SS cardinality rule
//! both key off this table; tags it does not know decode as OB.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::tags::{self, Tag};
use crate::vr::Vr;

/// One dictionary row. `vm_max` is `u32::MAX` for unbounded multiplicity.
#[derive(Debug, Clone, Copy)]
pub struct DictEntry {
    pub vr: Vr,
    pub vm_min: u32,
    pub vm_max: u32,
    pub description: &'static str,
}

const VM_N: u32 = u32::MAX;

macro_rules! entries {
    ($($tag:expr => ($vr:ident, $min:expr, $max:expr, $desc:expr)),* $(,)?) => {
        [$(($tag, DictEntry {
            vr: Vr::$vr,
            vm_min: $min,
            vm_max: $max,
            description: $desc,
        })),*]
    };
}

static TABLE: Lazy<HashMap<Tag, DictEntry>> = Lazy::new(|| {
    entries![
        tags::AFFECTED_SOP_CLASS_UID => (UI, 1, 1, "Affected SOP Class UID"),
        tags::REQUESTED_SOP_CLASS_UID => (UI, 1, 1, "Requested SOP Class UID"),
        tags::COMMAND_FIELD => (US, 1, 1, "Command Field"),
        tags::MESSAGE_ID => (US, 1, 1, "Message ID"),
        tags::MESSAGE_ID_REPLIED_TO => (US, 1, 1, "Message ID Being Responded To"),
        tags::MOVE_DESTINATION => (AE, 1, 1, "Move Destination"),
        tags::PRIORITY => (US, 1, 1, "Priority"),
        tags::DATA_SET_TYPE => (US, 1, 1, "Command Data Set Type"),
        tags::STATUS => (US, 1, 1, "Status"),
        tags::ATTRIBUTE_IDENTIFIER_LIST => (AT, 1, VM_N, "Attribute Identifier List"),
        tags::AFFECTED_SOP_INSTANCE_UID => (UI, 1, 1, "Affected SOP Instance UID"),
        tags::REQUESTED_SOP_INSTANCE_UID => (UI, 1, 1, "Requested SOP Instance UID"),
        tags::EVENT_TYPE_ID => (US, 1, 1, "Event Type ID"),
        tags::ACTION_TYPE_ID => (US, 1, 1, "Action Type ID"),
        tags::NUMBER_OF_REMAINING_SUBOPERATIONS => (US, 1, 1, "Number of Remaining Sub-operations"),
        tags::NUMBER_OF_COMPLETED_SUBOPERATIONS => (US, 1, 1, "Number of Completed Sub-operations"),
        tags::NUMBER_OF_FAILED_SUBOPERATIONS => (US, 1, 1, "Number of Failed Sub-operations"),
        tags::NUMBER_OF_WARNING_SUBOPERATIONS => (US, 1, 1, "Number of Warning Sub-operations"),
        tags::MOVE_ORIGINATOR_AE_TITLE => (AE, 1, 1, "Move Originator Application Entity Title"),
        tags::MOVE_ORIGINATOR_MESSAGE_ID => (US, 1, 1, "Move Originator Message ID"),
        tags::MEDIA_STORAGE_SOP_CLASS_UID => (UI, 1, 1, "Media Storage SOP Class UID"),
        tags::MEDIA_STORAGE_SOP_INSTANCE_UID => (UI, 1, 1, "Media Storage SOP Instance UID"),
        tags::TRANSFER_SYNTAX_UID => (UI, 1, 1, "Transfer Syntax UID"),
        tags::IMPLEMENTATION_CLASS_UID => (UI, 1, 1, "Implementation Class UID"),
        tags::IMPLEMENTATION_VERSION_NAME => (SH, 1, 1, "Implementation Version Name"),
        tags::SPECIFIC_CHARACTER_SET => (CS, 1, VM_N, "Specific Character Set"),
        tags::SOP_CLASS_UID => (UI, 1, 1, "SOP Class UID"),
        tags::SOP_INSTANCE_UID => (UI, 1, 1, "SOP Instance UID"),
        tags::STUDY_DATE => (DA, 1, 1, "Study Date"),
        tags::STUDY_TIME => (TM, 1, 1, "Study Time"),
        tags::ACCESSION_NUMBER => (SH, 1, 1, "Accession Number"),
        tags::QUERY_RETRIEVE_LEVEL => (CS, 1, 1, "Query/Retrieve Level"),
        tags::MODALITY => (CS, 1, 1, "Modality"),
        tags::PATIENT_NAME => (PN, 1, 1, "Patient's Name"),
        tags::PATIENT_ID => (LO, 1, 1, "Patient ID"),
        tags::PATIENT_BIRTH_DATE => (DA, 1, 1, "Patient's Birth Date"),
        tags::STUDY_INSTANCE_UID => (UI, 1, 1, "Study Instance UID"),
        tags::SERIES_INSTANCE_UID => (UI, 1, 1, "Series Instance UID"),
        tags::STUDY_ID => (SH, 1, 1, "Study ID"),
        tags::INSTANCE_NUMBER => (IS, 1, 1, "Instance Number"),
        tags::SAMPLES_PER_PIXEL => (US, 1, 1, "Samples per Pixel"),
        tags::ROWS => (US, 1, 1, "Rows"),
        tags::COLUMNS => (US, 1, 1, "Columns"),
        tags::BITS_ALLOCATED => (US, 1, 1, "Bits Allocated"),
        tags::BITS_STORED => (US, 1, 1, "Bits Stored"),
        tags::PIXEL_REPRESENTATION => (US, 1, 1, "Pixel Representation"),
        Tag::new(0x0028, 0x1101) => (US, 3, 3, "Red Palette Color Lookup Table Descriptor"),
        tags::PIXEL_DATA => (OW, 1, 1, "Pixel Data"),
    ]
    .into_iter()
    .collect()
});

static GROUP_LENGTH: DictEntry = DictEntry {
    vr: Vr::UL,
    vm_min: 1,
    vm_max: 1,
    description: "Group Length",
};

/// Look up a tag. Group length elements (gggg,0000) always resolve to UL.
pub fn lookup(tag: Tag) -> Option<&'static DictEntry> {
    if tag.is_group_length() {
        return Some(&GROUP_LENGTH);
    }
    TABLE.get(&tag)
}

/// Human label for dump output.
pub fn describe(tag: Tag) -> &'static str {
    lookup(tag).map(|e| e.description).unwrap_or("Unknown")
}

//! DIMSE command vocabulary
//!
//! Command fields, statuses, priorities, and the abstract syntaxes this
//! implementation negotiates. Command datasets themselves are plain group
//! 0000 datasets built by the connection.

use std::fmt;
use std::str::FromStr;

use crate::error::DimseError;

/// Command field opcodes carried in (0000,0100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandField {
    CStoreRq = 0x0001,
    CStoreRsp = 0x8001,
    CGetRq = 0x0010,
    CGetRsp = 0x8010,
    CFindRq = 0x0020,
    CFindRsp = 0x8020,
    CMoveRq = 0x0021,
    CMoveRsp = 0x8021,
    CEchoRq = 0x0030,
    CEchoRsp = 0x8030,
    NGetRq = 0x0110,
    NGetRsp = 0x8110,
    NActionRq = 0x0130,
    NActionRsp = 0x8130,
    CCancelRq = 0x0FFF,
}

impl CommandField {
    pub fn from_u16(v: u16) -> Option<CommandField> {
        Some(match v {
            0x0001 => CommandField::CStoreRq,
            0x8001 => CommandField::CStoreRsp,
            0x0010 => CommandField::CGetRq,
            0x8010 => CommandField::CGetRsp,
            0x0020 => CommandField::CFindRq,
            0x8020 => CommandField::CFindRsp,
            0x0021 => CommandField::CMoveRq,
            0x8021 => CommandField::CMoveRsp,
            0x0030 => CommandField::CEchoRq,
            0x8030 => CommandField::CEchoRsp,
            0x0110 => CommandField::NGetRq,
            0x8110 => CommandField::NGetRsp,
            0x0130 => CommandField::NActionRq,
            0x8130 => CommandField::NActionRsp,
            0x0FFF => CommandField::CCancelRq,
            _ => return None,
        })
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn is_response(self) -> bool {
        self.as_u16() & 0x8000 != 0
    }
}

impl fmt::Display for CommandField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandField::CStoreRq => "C-STORE-RQ",
            CommandField::CStoreRsp => "C-STORE-RSP",
            CommandField::CGetRq => "C-GET-RQ",
            CommandField::CGetRsp => "C-GET-RSP",
            CommandField::CFindRq => "C-FIND-RQ",
            CommandField::CFindRsp => "C-FIND-RSP",
            CommandField::CMoveRq => "C-MOVE-RQ",
            CommandField::CMoveRsp => "C-MOVE-RSP",
            CommandField::CEchoRq => "C-ECHO-RQ",
            CommandField::CEchoRsp => "C-ECHO-RSP",
            CommandField::NGetRq => "N-GET-RQ",
            CommandField::NGetRsp => "N-GET-RSP",
            CommandField::NActionRq => "N-ACTION-RQ",
            CommandField::NActionRsp => "N-ACTION-RSP",
            CommandField::CCancelRq => "C-CANCEL-RQ",
        };
        f.write_str(name)
    }
}

/// DIMSE status code, kept as the raw wire value with named constants for
/// the codes this implementation produces or inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(pub u16);

impl Status {
    pub const SUCCESS: Status = Status(0x0000);
    pub const CANCEL: Status = Status(0xFE00);
    pub const PENDING: Status = Status(0xFF00);
    pub const PENDING_WARNING: Status = Status(0xFF01);
    pub const WARNING_DUPLICATE_SOP_INSTANCE: Status = Status(0x0111);
    pub const WARNING_DUPLICATE_INVOCATION: Status = Status(0x0210);
    pub const ERROR_NO_SUCH_SOP_CLASS: Status = Status(0x0118);
    pub const ERROR_CLASS_INSTANCE_CONFLICT: Status = Status(0x0119);
    pub const ERROR_UNRECOGNIZED_OPERATION: Status = Status(0x0211);
    pub const REFUSED_OUT_OF_RESOURCES: Status = Status(0xA700);
    pub const REFUSED_MOVE_DESTINATION_UNKNOWN: Status = Status(0xA801);
    pub const ERROR_DATA_SET_MISMATCH: Status = Status(0xA900);
    pub const WARNING_SUB_OPS_COMPLETE: Status = Status(0xB000);
    pub const ERROR_CANNOT_UNDERSTAND: Status = Status(0xC000);

    pub fn is_success(self) -> bool {
        self == Status::SUCCESS
    }

    pub fn is_pending(self) -> bool {
        self == Status::PENDING || self == Status::PENDING_WARNING
    }

    pub fn is_cancel(self) -> bool {
        self == Status::CANCEL
    }

    /// Store response codes that count as delivered with a caveat.
    pub fn is_warning(self) -> bool {
        self == Status::WARNING_DUPLICATE_SOP_INSTANCE
            || self == Status::WARNING_DUPLICATE_INVOCATION
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Operation priority carried in (0000,0700).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Medium = 0,
    High = 1,
    Low = 2,
}

impl Priority {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Values for (0000,0800): does a data set follow the command.
pub mod data_set_type {
    pub const NONE: u16 = 0x0101;
    pub const PRESENT: u16 = 0x0102;
}

/// Query/Retrieve Level attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryLevel {
    Patient,
    Study,
    Series,
    Image,
}

impl fmt::Display for QueryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryLevel::Patient => "PATIENT",
            QueryLevel::Study => "STUDY",
            QueryLevel::Series => "SERIES",
            QueryLevel::Image => "IMAGE",
        };
        f.write_str(s)
    }
}

impl FromStr for QueryLevel {
    type Err = DimseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PATIENT" => Ok(QueryLevel::Patient),
            "STUDY" => Ok(QueryLevel::Study),
            "SERIES" => Ok(QueryLevel::Series),
            "IMAGE" => Ok(QueryLevel::Image),
            other => Err(DimseError::NotSupported(format!(
                "unknown query level: {other}"
            ))),
        }
    }
}

/// Query/Retrieve information models, selecting the abstract syntax for
/// FIND/MOVE/GET requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryModel {
    PatientRoot,
    StudyRoot,
    PatientStudyOnly,
    ModalityWorklist,
}

impl QueryModel {
    pub fn find_uid(self) -> &'static str {
        match self {
            QueryModel::PatientRoot => abstract_syntax::PATIENT_ROOT_FIND,
            QueryModel::StudyRoot => abstract_syntax::STUDY_ROOT_FIND,
            QueryModel::PatientStudyOnly => abstract_syntax::PATIENT_STUDY_ONLY_FIND,
            QueryModel::ModalityWorklist => abstract_syntax::MODALITY_WORKLIST_FIND,
        }
    }

    pub fn move_uid(self) -> Option<&'static str> {
        match self {
            QueryModel::PatientRoot => Some(abstract_syntax::PATIENT_ROOT_MOVE),
            QueryModel::StudyRoot => Some(abstract_syntax::STUDY_ROOT_MOVE),
            QueryModel::PatientStudyOnly => Some(abstract_syntax::PATIENT_STUDY_ONLY_MOVE),
            QueryModel::ModalityWorklist => None,
        }
    }

    pub fn get_uid(self) -> Option<&'static str> {
        match self {
            QueryModel::PatientRoot => Some(abstract_syntax::PATIENT_ROOT_GET),
            QueryModel::StudyRoot => Some(abstract_syntax::STUDY_ROOT_GET),
            QueryModel::PatientStudyOnly => Some(abstract_syntax::PATIENT_STUDY_ONLY_GET),
            QueryModel::ModalityWorklist => None,
        }
    }
}

/// Abstract syntax UIDs this implementation knows how to serve.
pub mod abstract_syntax {
    pub const VERIFICATION: &str = "1.2.840.10008.1.1";
    pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
    pub const MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4";
    pub const SECONDARY_CAPTURE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.7";
    pub const PATIENT_ROOT_FIND: &str = "1.2.840.10008.5.1.4.1.2.1.1";
    pub const PATIENT_ROOT_MOVE: &str = "1.2.840.10008.5.1.4.1.2.1.2";
    pub const PATIENT_ROOT_GET: &str = "1.2.840.10008.5.1.4.1.2.1.3";
    pub const STUDY_ROOT_FIND: &str = "1.2.840.10008.5.1.4.1.2.2.1";
    pub const STUDY_ROOT_MOVE: &str = "1.2.840.10008.5.1.4.1.2.2.2";
    pub const STUDY_ROOT_GET: &str = "1.2.840.10008.5.1.4.1.2.2.3";
    pub const PATIENT_STUDY_ONLY_FIND: &str = "1.2.840.10008.5.1.4.1.2.3.1";
    pub const PATIENT_STUDY_ONLY_MOVE: &str = "1.2.840.10008.5.1.4.1.2.3.2";
    pub const PATIENT_STUDY_ONLY_GET: &str = "1.2.840.10008.5.1.4.1.2.3.3";
    pub const MODALITY_WORKLIST_FIND: &str = "1.2.840.10008.5.1.4.31";

    /// Storage classes offered by default on the SCP side.
    pub fn storage_classes() -> [&'static str; 3] {
        [CT_IMAGE_STORAGE, MR_IMAGE_STORAGE, SECONDARY_CAPTURE_STORAGE]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_field_round_trip() {
        for field in [
            CommandField::CStoreRq,
            CommandField::CEchoRsp,
            CommandField::CCancelRq,
            CommandField::NActionRq,
        ] {
            assert_eq!(CommandField::from_u16(field.as_u16()), Some(field));
        }
        assert_eq!(CommandField::from_u16(0x4242), None);
    }

    #[test]
    fn test_response_bit() {
        assert!(CommandField::CEchoRsp.is_response());
        assert!(!CommandField::CEchoRq.is_response());
        assert!(!CommandField::CCancelRq.is_response());
    }

    #[test]
    fn test_status_classification() {
        assert!(Status::SUCCESS.is_success());
        assert!(Status::PENDING.is_pending());
        assert!(Status::PENDING_WARNING.is_pending());
        assert!(Status::WARNING_DUPLICATE_SOP_INSTANCE.is_warning());
        assert!(!Status(0xC001).is_warning());
        assert!(Status::CANCEL.is_cancel());
    }

    #[test]
    fn test_query_level_parse() {
        assert_eq!("STUDY".parse::<QueryLevel>().unwrap(), QueryLevel::Study);
        assert_eq!(" image ".parse::<QueryLevel>().unwrap(), QueryLevel::Image);
        assert!("VOLUME".parse::<QueryLevel>().is_err());
    }

    #[test]
    fn test_query_model_uids() {
        assert_eq!(
            QueryModel::StudyRoot.find_uid(),
            "1.2.840.10008.5.1.4.1.2.2.1"
        );
        assert_eq!(
            QueryModel::PatientStudyOnly.get_uid(),
            Some("1.2.840.10008.5.1.4.1.2.3.3")
        );
        assert!(QueryModel::ModalityWorklist.move_uid().is_none());
    }
}

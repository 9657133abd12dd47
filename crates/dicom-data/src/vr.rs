//! Value representations
//!
//! The closed set of two-letter VR codes. An unrecognized code on the wire
//! falls back to OB at the dispatch site so that malformed elements still
//! decode as opaque bytes.

use std::fmt;

/// The two-letter value representation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vr {
    /// Application Entity
    AE,
    /// Age String
    AS,
    /// Attribute Tag
    AT,
    /// Code String
    CS,
    /// Date
    DA,
    /// Decimal String
    DS,
    /// Date Time
    DT,
    /// Floating Point Double
    FD,
    /// Floating Point Single
    FL,
    /// Integer String
    IS,
    /// Long String
    LO,
    /// Long Text
    LT,
    /// Other Byte
    OB,
    /// Other Word
    OW,
    /// Person Name
    PN,
    /// Short String
    SH,
    /// Signed Long
    SL,
    /// Sequence of Items
    SQ,
    /// Signed Short
    SS,
    /// Short Text
    ST,
    /// Time
    TM,
    /// Unique Identifier
    UI,
    /// Unsigned Long
    UL,
    /// Unknown
    UN,
    /// Unsigned Short
    US,
    /// Unlimited Text
    UT,
}

impl Vr {
    pub fn from_code(code: [u8; 2]) -> Option<Vr> {
        Some(match &code {
            b"AE" => Vr::AE,
            b"AS" => Vr::AS,
            b"AT" => Vr::AT,
            b"CS" => Vr::CS,
            b"DA" => Vr::DA,
            b"DS" => Vr::DS,
            b"DT" => Vr::DT,
            b"FD" => Vr::FD,
            b"FL" => Vr::FL,
            b"IS" => Vr::IS,
            b"LO" => Vr::LO,
            b"LT" => Vr::LT,
            b"OB" => Vr::OB,
            b"OW" => Vr::OW,
            b"PN" => Vr::PN,
            b"SH" => Vr::SH,
            b"SL" => Vr::SL,
            b"SQ" => Vr::SQ,
            b"SS" => Vr::SS,
            b"ST" => Vr::ST,
            b"TM" => Vr::TM,
            b"UI" => Vr::UI,
            b"UL" => Vr::UL,
            b"UN" => Vr::UN,
            b"US" => Vr::US,
            b"UT" => Vr::UT,
            _ => return None,
        })
    }

    pub fn code(self) -> [u8; 2] {
        match self {
            Vr::AE => *b"AE",
            Vr::AS => *b"AS",
            Vr::AT => *b"AT",
            Vr::CS => *b"CS",
            Vr::DA => *b"DA",
            Vr::DS => *b"DS",
            Vr::DT => *b"DT",
            Vr::FD => *b"FD",
            Vr::FL => *b"FL",
            Vr::IS => *b"IS",
            Vr::LO => *b"LO",
            Vr::LT => *b"LT",
            Vr::OB => *b"OB",
            Vr::OW => *b"OW",
            Vr::PN => *b"PN",
            Vr::SH => *b"SH",
            Vr::SL => *b"SL",
            Vr::SQ => *b"SQ",
            Vr::SS => *b"SS",
            Vr::ST => *b"ST",
            Vr::TM => *b"TM",
            Vr::UI => *b"UI",
            Vr::UL => *b"UL",
            Vr::UN => *b"UN",
            Vr::US => *b"US",
            Vr::UT => *b"UT",
        }
    }

    /// VRs whose explicit header carries 2 reserved bytes and a 4-byte
    /// length instead of the short 2-byte length.
    pub fn has_long_header(self) -> bool {
        matches!(self, Vr::UT | Vr::UN | Vr::OB | Vr::OW | Vr::SQ)
    }

    /// Padding byte appended to odd-length values, if the VR pads at all.
    pub fn pad_byte(self) -> Option<u8> {
        match self {
            Vr::UI => Some(0x00),
            Vr::AE
            | Vr::AS
            | Vr::CS
            | Vr::DA
            | Vr::DS
            | Vr::DT
            | Vr::IS
            | Vr::LO
            | Vr::LT
            | Vr::PN
            | Vr::SH
            | Vr::ST
            | Vr::TM
            | Vr::UT => Some(0x20),
            _ => None,
        }
    }

    /// Text-family VRs stored as strings (UI is handled separately).
    pub fn is_text(self) -> bool {
        matches!(
            self,
            Vr::AE
                | Vr::AS
                | Vr::CS
                | Vr::DA
                | Vr::DS
                | Vr::DT
                | Vr::IS
                | Vr::LO
                | Vr::LT
                | Vr::PN
                | Vr::SH
                | Vr::ST
                | Vr::TM
                | Vr::UT
        )
    }
}

impl fmt::Display for Vr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code();
        write!(f, "{}{}", code[0] as char, code[1] as char)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for vr in [
            Vr::AE,
            Vr::AT,
            Vr::FD,
            Vr::OB,
            Vr::OW,
            Vr::SQ,
            Vr::UI,
            Vr::US,
            Vr::UT,
        ] {
            assert_eq!(Vr::from_code(vr.code()), Some(vr));
        }
        assert_eq!(Vr::from_code(*b"ZZ"), None);
    }

    #[test]
    fn test_long_header_set() {
        assert!(Vr::OB.has_long_header());
        assert!(Vr::OW.has_long_header());
        assert!(Vr::SQ.has_long_header());
        assert!(Vr::UN.has_long_header());
        assert!(Vr::UT.has_long_header());
        assert!(!Vr::US.has_long_header());
        assert!(!Vr::UI.has_long_header());
    }

    #[test]
    fn test_pad_bytes() {
        assert_eq!(Vr::UI.pad_byte(), Some(0x00));
        assert_eq!(Vr::PN.pad_byte(), Some(0x20));
        assert_eq!(Vr::US.pad_byte(), None);
    }
}

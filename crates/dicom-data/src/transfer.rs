//! Transfer syntaxes
//!
//! A transfer syntax fixes three things about a stream: explicit vs implicit
//! VR headers, byte order, and pixel data compression. Per-element overrides
//! still apply on top: group 0000 is always implicit little-endian and group
//! 0002 always explicit little-endian, whatever the negotiated syntax says.

use once_cell::sync::Lazy;

/// Pixel data compression family carried by a transfer syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Deflated,
    JpegLossy,
    JpegLossless,
    Jpeg2000,
    Rle,
    Other,
}

/// Whether this toolkit can decode pixel data stored with the given
/// compression. Codecs are external collaborators, so only uncompressed
/// streams qualify here.
pub fn supports_decompression(compression: Compression) -> bool {
    compression == Compression::None
}

#[derive(Debug, Clone)]
pub struct TransferSyntax {
    pub uid: String,
    pub name: String,
    pub explicit_vr: bool,
    pub big_endian: bool,
    pub compression: Compression,
}

impl PartialEq for TransferSyntax {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl Eq for TransferSyntax {}

impl TransferSyntax {
    fn known(uid: &str, name: &str, explicit_vr: bool, big_endian: bool, compression: Compression) -> Self {
        TransferSyntax {
            uid: uid.to_string(),
            name: name.to_string(),
            explicit_vr,
            big_endian,
            compression,
        }
    }

    /// Whether elements outside groups 0000/0002 use explicit VR headers.
    pub fn element_explicit_vr(&self, group: u16) -> bool {
        group == 0x0002 || (self.explicit_vr && group != 0x0000)
    }

    /// Whether elements outside groups 0000/0002 are byte-swapped.
    pub fn element_swapped(&self, group: u16) -> bool {
        self.big_endian && group != 0x0000 && group != 0x0002
    }
}

pub static IMPLICIT_VR_LITTLE_ENDIAN: Lazy<TransferSyntax> = Lazy::new(|| {
    TransferSyntax::known(
        "1.2.840.10008.1.2",
        "Implicit VR Little Endian",
        false,
        false,
        Compression::None,
    )
});

pub static EXPLICIT_VR_LITTLE_ENDIAN: Lazy<TransferSyntax> = Lazy::new(|| {
    TransferSyntax::known(
        "1.2.840.10008.1.2.1",
        "Explicit VR Little Endian",
        true,
        false,
        Compression::None,
    )
});

pub static DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: Lazy<TransferSyntax> = Lazy::new(|| {
    TransferSyntax::known(
        "1.2.840.10008.1.2.1.99",
        "Deflated Explicit VR Little Endian",
        true,
        false,
        Compression::Deflated,
    )
});

pub static EXPLICIT_VR_BIG_ENDIAN: Lazy<TransferSyntax> = Lazy::new(|| {
    TransferSyntax::known(
        "1.2.840.10008.1.2.2",
        "Explicit VR Big Endian",
        true,
        true,
        Compression::None,
    )
});

pub static JPEG_BASELINE_PROCESS_1: Lazy<TransferSyntax> = Lazy::new(|| {
    TransferSyntax::known(
        "1.2.840.10008.1.2.4.50",
        "JPEG Baseline (Process 1)",
        true,
        false,
        Compression::JpegLossy,
    )
});

pub static JPEG_LOSSLESS_PROCESS_14_SV1: Lazy<TransferSyntax> = Lazy::new(|| {
    TransferSyntax::known(
        "1.2.840.10008.1.2.4.70",
        "JPEG Lossless (Process 14, SV1)",
        true,
        false,
        Compression::JpegLossless,
    )
});

pub static JPEG_2000_LOSSLESS: Lazy<TransferSyntax> = Lazy::new(|| {
    TransferSyntax::known(
        "1.2.840.10008.1.2.4.90",
        "JPEG 2000 (Lossless Only)",
        true,
        false,
        Compression::Jpeg2000,
    )
});

pub static RLE_LOSSLESS: Lazy<TransferSyntax> = Lazy::new(|| {
    TransferSyntax::known(
        "1.2.840.10008.1.2.5",
        "RLE Lossless",
        true,
        false,
        Compression::Rle,
    )
});

static ALL: Lazy<Vec<&'static Lazy<TransferSyntax>>> = Lazy::new(|| {
    vec![
        &IMPLICIT_VR_LITTLE_ENDIAN,
        &EXPLICIT_VR_LITTLE_ENDIAN,
        &DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN,
        &EXPLICIT_VR_BIG_ENDIAN,
        &JPEG_BASELINE_PROCESS_1,
        &JPEG_LOSSLESS_PROCESS_14_SV1,
        &JPEG_2000_LOSSLESS,
        &RLE_LOSSLESS,
    ]
});

/// Resolve a transfer syntax UID. Unrecognized UIDs come back as an opaque
/// explicit-VR syntax so parsing can still make a best effort.
pub fn lookup(uid: &str) -> TransferSyntax {
    for syntax in ALL.iter() {
        if syntax.uid == uid {
            return (***syntax).clone();
        }
    }
    TransferSyntax {
        uid: uid.to_string(),
        name: format!("Unknown ({uid})"),
        explicit_vr: true,
        big_endian: false,
        compression: Compression::Other,
    }
}

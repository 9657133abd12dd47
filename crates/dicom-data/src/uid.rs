//! UID handling
//!
//! Dotted-decimal unique identifiers. Values are sanitized on the way in and
//! NUL-padded to even length on the way out.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Clean up a UID value: strip NULs and whitespace, clamp to the 64-char
/// limit, and drop a trailing dot left by naive truncation.
pub fn sanitize_uid(raw: &str) -> String {
    let mut uid: String = raw.chars().filter(|c| *c != '\0').collect();
    uid = uid.trim().to_string();
    if uid.len() > 64 {
        uid.truncate(64);
    }
    if uid.ends_with('.') {
        uid.pop();
    }
    uid
}

/// Encode for the wire, padding odd lengths with a single NUL.
pub fn uid_to_bytes(uid: &str) -> Vec<u8> {
    let mut bytes = uid.as_bytes().to_vec();
    if bytes.len() % 2 == 1 {
        bytes.push(0);
    }
    bytes
}

/// Decode a raw wire value, stripping one trailing NUL pad and whitespace.
pub fn uid_from_raw(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == 0 {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

/// A registered UID with its display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uid {
    pub value: &'static str,
    pub name: &'static str,
}

static WELL_KNOWN: Lazy<HashMap<&'static str, Uid>> = Lazy::new(|| {
    [
        ("1.2.840.10008.1.1", "Verification SOP Class"),
        ("1.2.840.10008.1.2", "Implicit VR Little Endian"),
        ("1.2.840.10008.1.2.1", "Explicit VR Little Endian"),
        ("1.2.840.10008.1.2.1.99", "Deflated Explicit VR Little Endian"),
        ("1.2.840.10008.1.2.2", "Explicit VR Big Endian"),
        ("1.2.840.10008.1.2.4.50", "JPEG Baseline (Process 1)"),
        ("1.2.840.10008.1.2.4.70", "JPEG Lossless (Process 14, SV1)"),
        ("1.2.840.10008.1.2.4.90", "JPEG 2000 (Lossless Only)"),
        ("1.2.840.10008.1.2.5", "RLE Lossless"),
        ("1.2.840.10008.5.1.4.1.1.2", "CT Image Storage"),
        ("1.2.840.10008.5.1.4.1.1.4", "MR Image Storage"),
        ("1.2.840.10008.5.1.4.1.1.7", "Secondary Capture Image Storage"),
        ("1.2.840.10008.5.1.4.1.2.1.1", "Patient Root Q/R - FIND"),
        ("1.2.840.10008.5.1.4.1.2.1.2", "Patient Root Q/R - MOVE"),
        ("1.2.840.10008.5.1.4.1.2.1.3", "Patient Root Q/R - GET"),
        ("1.2.840.10008.5.1.4.1.2.2.1", "Study Root Q/R - FIND"),
        ("1.2.840.10008.5.1.4.1.2.2.2", "Study Root Q/R - MOVE"),
        ("1.2.840.10008.5.1.4.1.2.2.3", "Study Root Q/R - GET"),
        ("1.2.840.10008.5.1.4.31", "Modality Worklist - FIND"),
    ]
    .into_iter()
    .map(|(value, name)| (value, Uid { value, name }))
    .collect()
});

/// Look up the display name of a registered UID.
pub fn well_known(uid: &str) -> Option<&'static Uid> {
    WELL_KNOWN.get(uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_nuls_and_whitespace() {
        assert_eq!(sanitize_uid(" 1.2.840.10008.1.1\0 "), "1.2.840.10008.1.1");
    }

    #[test]
    fn test_sanitize_drops_trailing_dot() {
        assert_eq!(sanitize_uid("1.2.3."), "1.2.3");
    }

    #[test]
    fn test_sanitize_clamps_to_64_chars() {
        let long = "1.".repeat(40);
        let cleaned = sanitize_uid(&long);
        assert!(cleaned.len() <= 64);
        assert!(!cleaned.ends_with('.'));
    }

    #[test]
    fn test_wire_round_trip_pads_odd() {
        let bytes = uid_to_bytes("1.2.3");
        assert_eq!(bytes.len(), 6);
        assert_eq!(bytes[5], 0);
        assert_eq!(uid_from_raw(&bytes), "1.2.3");
    }

    #[test]
    fn test_well_known_lookup() {
        assert_eq!(
            well_known("1.2.840.10008.1.1").unwrap().name,
            "Verification SOP Class"
        );
        assert!(well_known("1.2.3.4").is_none());
    }
}

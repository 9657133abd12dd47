//! Sequence items
//!
//! SQ bodies are streams of (FFFE,E000) item headers. An item holds either a
//! nested dataset or, under an encapsulated pixel data sequence, one raw
//! compressed fragment. The two never mix in one item.
//!
//! Some producers emit a sequence item in the opposite byte order from the
//! rest of the stream. The giveaway is an item tag whose group half reads as
//! 0xFEFF: the delimiter group 0xFFFE seen byte-swapped. Recovery toggles the
//! reader for exactly that one item and restores the order afterwards.

use std::sync::Mutex;

use tracing::warn;

use crate::codec::{ByteReader, ByteWriter};
use crate::dataset::Dataset;
use crate::element::{Element, UNDEFINED_LENGTH};
use crate::error::{DataError, Result};
use crate::tags::{self, Tag};
use crate::transfer::TransferSyntax;

#[derive(Debug, Clone, PartialEq)]
enum ItemBody {
    Dataset(Dataset),
    Fragment(Vec<u8>),
}

/// One item of a sequence. Items have no back-pointer to their sequence;
/// position in the owning Vec is the only linkage.
#[derive(Debug)]
pub struct SequenceItem {
    body: ItemBody,
    // Encoded length is expensive for deep nesting, so it is cached per
    // header mode and dropped on any mutable access.
    cached_len: Mutex<Option<(bool, u32)>>,
}

impl Clone for SequenceItem {
    fn clone(&self) -> Self {
        SequenceItem {
            body: self.body.clone(),
            cached_len: Mutex::new(*self.cached_len.lock().unwrap()),
        }
    }
}

impl PartialEq for SequenceItem {
    fn eq(&self, other: &Self) -> bool {
        self.body == other.body
    }
}

impl SequenceItem {
    pub fn from_dataset(dataset: Dataset) -> Self {
        SequenceItem {
            body: ItemBody::Dataset(dataset),
            cached_len: Mutex::new(None),
        }
    }

    pub fn from_fragment(fragment: Vec<u8>) -> Self {
        SequenceItem {
            body: ItemBody::Fragment(fragment),
            cached_len: Mutex::new(None),
        }
    }

    pub fn is_fragment(&self) -> bool {
        matches!(self.body, ItemBody::Fragment(_))
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        match &self.body {
            ItemBody::Dataset(ds) => Some(ds),
            ItemBody::Fragment(_) => None,
        }
    }

    pub fn dataset_mut(&mut self) -> Option<&mut Dataset> {
        *self.cached_len.lock().unwrap() = None;
        match &mut self.body {
            ItemBody::Dataset(ds) => Some(ds),
            ItemBody::Fragment(_) => None,
        }
    }

    pub fn fragment(&self) -> Option<&[u8]> {
        match &self.body {
            ItemBody::Fragment(f) => Some(f),
            ItemBody::Dataset(_) => None,
        }
    }

    pub fn set_fragment(&mut self, fragment: Vec<u8>) {
        *self.cached_len.lock().unwrap() = None;
        self.body = ItemBody::Fragment(fragment);
    }

    /// Wire length of the item body (header excluded).
    pub fn encoded_len(&self, explicit: bool) -> u32 {
        if let Some((cached_explicit, len)) = *self.cached_len.lock().unwrap() {
            if cached_explicit == explicit {
                return len;
            }
        }
        let len = match &self.body {
            ItemBody::Fragment(f) => f.len() as u32,
            ItemBody::Dataset(ds) => ds.encoded_len(explicit),
        };
        *self.cached_len.lock().unwrap() = Some((explicit, len));
        len
    }

    fn read(
        r: &mut ByteReader<'_>,
        len: u32,
        encapsulated: bool,
        syntax: &TransferSyntax,
    ) -> Result<SequenceItem> {
        if encapsulated && len != UNDEFINED_LENGTH {
            return Ok(SequenceItem::from_fragment(r.read_bytes(len as usize)?.to_vec()));
        }

        let mut dataset = Dataset::new();
        let start = r.position();
        loop {
            if len != UNDEFINED_LENGTH && (r.position() - start) as u32 >= len {
                break;
            }
            if r.remaining() < 8 {
                if len == UNDEFINED_LENGTH {
                    warn!("sequence item ended without a delimiter");
                    break;
                }
                return Err(DataError::Truncated {
                    needed: 8,
                    available: r.remaining(),
                });
            }
            let group = r.read_u16()?;
            let element = r.read_u16()?;
            let tag = Tag::new(group, element);
            if tag == tags::ITEM_DELIMITATION_END {
                let garbage = r.read_u32()?;
                if garbage != 0 && garbage != UNDEFINED_LENGTH {
                    r.read_bytes_upto(garbage as usize);
                }
                break;
            }
            dataset.insert(Element::read(tag, r, syntax)?);
        }
        Ok(SequenceItem::from_dataset(dataset))
    }

    fn write(&self, w: &mut ByteWriter, syntax: &TransferSyntax) {
        match &self.body {
            ItemBody::Fragment(f) => w.write_bytes(f),
            ItemBody::Dataset(ds) => {
                for element in ds.iter() {
                    element.write(w, syntax);
                }
            }
        }
    }
}

/// Parse a sequence body into `items`. `len` is the declared sequence length
/// or the undefined sentinel; `encapsulated` marks pixel data sequences whose
/// finite-length items are raw fragments.
pub fn read_items(
    items: &mut Vec<SequenceItem>,
    r: &mut ByteReader<'_>,
    len: u32,
    encapsulated: bool,
    syntax: &TransferSyntax,
) -> Result<()> {
    let start = r.position();
    loop {
        if len != UNDEFINED_LENGTH && (r.position() - start) as u32 >= len {
            break;
        }
        if r.remaining() < 8 {
            if len == UNDEFINED_LENGTH && r.remaining() == 0 {
                warn!("sequence ended without a delimiter");
                break;
            }
            return Err(DataError::Truncated {
                needed: 8,
                available: r.remaining(),
            });
        }

        let mut group = r.read_u16()?;
        let mut element = r.read_u16()?;
        let mut item_len = r.read_u32()?;

        // Byte-order anomaly: the item tag group read as its own swap.
        // Flip the reader for this one item and fix up what was already read.
        let anomaly = group == 0xFEFF;
        if anomaly {
            warn!("byte-order anomaly in sequence item, toggling order for one item");
            r.toggle_swapped();
            group = group.swap_bytes();
            element = element.swap_bytes();
            item_len = item_len.swap_bytes();
        }

        let tag = Tag::new(group, element);
        if tag == tags::ITEM {
            let result = SequenceItem::read(r, item_len, encapsulated, syntax);
            if anomaly {
                r.toggle_swapped();
            }
            items.push(result?);
        } else if tag == tags::SEQUENCE_DELIMITATION_END {
            // Delimiter lengths are occasionally garbage; honor small ones.
            if item_len != 0 && item_len != UNDEFINED_LENGTH {
                r.read_bytes_upto(item_len as usize);
            }
            if anomaly {
                r.toggle_swapped();
            }
            break;
        } else {
            if anomaly {
                r.toggle_swapped();
            }
            return Err(DataError::UnexpectedItemTag(tag));
        }
    }
    Ok(())
}

/// Encode items with explicit per-item lengths. With `terminated` a trailing
/// sequence delimiter item is appended (the undefined-length form).
pub fn write_items(
    w: &mut ByteWriter,
    items: &[SequenceItem],
    syntax: &TransferSyntax,
    terminated: bool,
) {
    for item in items {
        w.write_u16(tags::ITEM.group);
        w.write_u16(tags::ITEM.element);
        w.write_u32(item.encoded_len(syntax.explicit_vr));
        item.write(w, syntax);
    }
    if terminated {
        w.write_u16(tags::SEQUENCE_DELIMITATION_END.group);
        w.write_u16(tags::SEQUENCE_DELIMITATION_END.element);
        w.write_u32(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Value;
    use crate::transfer::{EXPLICIT_VR_LITTLE_ENDIAN, IMPLICIT_VR_LITTLE_ENDIAN};
    use crate::vr::Vr;

    fn item_with_rows(rows: u16) -> SequenceItem {
        let mut ds = Dataset::new();
        let mut element = Element::new(tags::ROWS, Vr::US);
        element.set_u16(rows).unwrap();
        ds.insert(element);
        SequenceItem::from_dataset(ds)
    }

    #[test]
    fn test_explicit_and_undefined_length_forms_decode_identically() {
        let items = vec![item_with_rows(1), item_with_rows(2)];
        let syntax = &*EXPLICIT_VR_LITTLE_ENDIAN;

        // Counted form.
        let mut w = ByteWriter::new(false);
        write_items(&mut w, &items, syntax, false);
        let counted = w.into_bytes();

        // Delimiter-terminated form.
        let mut w = ByteWriter::new(false);
        write_items(&mut w, &items, syntax, true);
        let terminated = w.into_bytes();
        assert_eq!(terminated.len(), counted.len() + 8);

        let mut decoded_counted = Vec::new();
        let mut r = ByteReader::new(&counted, false);
        read_items(&mut decoded_counted, &mut r, counted.len() as u32, false, syntax).unwrap();

        let mut decoded_terminated = Vec::new();
        let mut r = ByteReader::new(&terminated, false);
        read_items(&mut decoded_terminated, &mut r, UNDEFINED_LENGTH, false, syntax).unwrap();

        assert_eq!(decoded_counted, items);
        assert_eq!(decoded_terminated, items);
    }

    #[test]
    fn test_byte_order_anomaly_recovers_single_item() {
        let syntax = &*IMPLICIT_VR_LITTLE_ENDIAN;
        let mut stream: Vec<u8> = Vec::new();
        // First item encoded big-endian: tag, length, then one implicit
        // element (Rows = 512).
        stream.extend_from_slice(&[0xFF, 0xFE, 0xE0, 0x00]);
        stream.extend_from_slice(&[0x00, 0x00, 0x00, 0x0A]);
        stream.extend_from_slice(&[0x00, 0x28, 0x00, 0x10]);
        stream.extend_from_slice(&[0x00, 0x00, 0x00, 0x02]);
        stream.extend_from_slice(&[0x02, 0x00]);
        // Second item in normal little-endian order.
        stream.extend_from_slice(&[0xFE, 0xFF, 0x00, 0xE0]);
        stream.extend_from_slice(&[0x0A, 0x00, 0x00, 0x00]);
        stream.extend_from_slice(&[0x28, 0x00, 0x10, 0x00]);
        stream.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]);
        stream.extend_from_slice(&[0x00, 0x02]);
        // Sequence delimiter.
        stream.extend_from_slice(&[0xFE, 0xFF, 0xDD, 0xE0]);
        stream.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

        let mut items = Vec::new();
        let mut r = ByteReader::new(&stream, false);
        read_items(&mut items, &mut r, UNDEFINED_LENGTH, false, syntax).unwrap();

        assert!(!r.swapped(), "reader order must be restored after the item");
        assert_eq!(items.len(), 2);
        for item in &items {
            let rows = item.dataset().unwrap().get(tags::ROWS).unwrap();
            assert_eq!(rows.u16_value(), Some(512));
        }
    }

    #[test]
    fn test_encapsulated_finite_items_are_fragments() {
        let syntax = &*EXPLICIT_VR_LITTLE_ENDIAN;
        let fragments = vec![
            SequenceItem::from_fragment(vec![0xDE, 0xAD]),
            SequenceItem::from_fragment(vec![0xBE, 0xEF, 0x01, 0x02]),
        ];
        let mut w = ByteWriter::new(false);
        write_items(&mut w, &fragments, syntax, true);
        let bytes = w.into_bytes();

        let mut items = Vec::new();
        let mut r = ByteReader::new(&bytes, false);
        read_items(&mut items, &mut r, UNDEFINED_LENGTH, true, syntax).unwrap();
        assert_eq!(items, fragments);
        assert!(items[0].is_fragment());
    }

    #[test]
    fn test_undefined_length_item_parses_as_elements_even_when_encapsulated() {
        let syntax = &*IMPLICIT_VR_LITTLE_ENDIAN;
        let mut stream: Vec<u8> = Vec::new();
        // Undefined-length item holding one element, ended by the item
        // delimiter.
        stream.extend_from_slice(&[0xFE, 0xFF, 0x00, 0xE0]);
        stream.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        stream.extend_from_slice(&[0x28, 0x00, 0x10, 0x00]);
        stream.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]);
        stream.extend_from_slice(&[0x00, 0x02]);
        stream.extend_from_slice(&[0xFE, 0xFF, 0x0D, 0xE0]);
        stream.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        stream.extend_from_slice(&[0xFE, 0xFF, 0xDD, 0xE0]);
        stream.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

        let mut items = Vec::new();
        let mut r = ByteReader::new(&stream, false);
        read_items(&mut items, &mut r, UNDEFINED_LENGTH, true, syntax).unwrap();
        assert_eq!(items.len(), 1);
        assert!(!items[0].is_fragment());
        assert_eq!(
            items[0].dataset().unwrap().get(tags::ROWS).unwrap().value,
            Value::U16(crate::element::SmallInt::One(512))
        );
    }

    #[test]
    fn test_unexpected_tag_is_an_error() {
        let stream = [0x08, 0x00, 0x18, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut items = Vec::new();
        let mut r = ByteReader::new(&stream, false);
        let err = read_items(
            &mut items,
            &mut r,
            UNDEFINED_LENGTH,
            false,
            &EXPLICIT_VR_LITTLE_ENDIAN,
        )
        .unwrap_err();
        assert!(matches!(err, DataError::UnexpectedItemTag(_)));
    }

    #[test]
    fn test_cached_length_invalidated_on_mutation() {
        let mut item = item_with_rows(1);
        let before = item.encoded_len(true);
        let mut extra = Element::new(tags::COLUMNS, Vr::US);
        extra.set_u16(2).unwrap();
        item.dataset_mut().unwrap().insert(extra);
        let after = item.encoded_len(true);
        assert_eq!(after, before * 2);
    }
}

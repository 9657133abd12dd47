//! Elements and their values
//!
//! An element is a tag, a VR, and a decoded value. The `Value` enum carries
//! one state per VR family, so a US element can never hold a string and the
//! compiler enforces what each setter accepts.
//!
//! Decode is deliberately forgiving: a body shorter than the natural width
//! yields a zero value, a longer one is read at natural width with the
//! remainder discarded, and a body that fails to decode is logged and left
//! at its default without disturbing sibling elements.

use tracing::warn;

use crate::codec::{ByteReader, ByteWriter};
use crate::dictionary;
use crate::error::{DataError, Result};
use crate::sequence::{self, SequenceItem};
use crate::tags::{self, Tag};
use crate::transfer::TransferSyntax;
use crate::uid;
use crate::vr::Vr;

/// Length sentinel meaning "delimiter-terminated, not counted".
pub const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

/// Scalar-or-array storage for the short integer VRs. Which shape decode
/// produces depends on the dictionary multiplicity for the tag.
#[derive(Debug, Clone, PartialEq)]
pub enum SmallInt<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Copy> SmallInt<T> {
    pub fn first(&self) -> Option<T> {
        match self {
            SmallInt::One(v) => Some(*v),
            SmallInt::Many(vs) => vs.first().copied(),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            SmallInt::One(_) => 1,
            SmallInt::Many(vs) => vs.len(),
        }
    }
}

/// Decoded element payload, one variant per VR family.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// AE AS CS DA DS DT IS LO LT PN SH ST TM UT
    Text(String),
    /// UI
    Uid(String),
    /// AT
    TagRef(Tag),
    /// FL
    F32(f32),
    /// FD
    F64(f64),
    /// SL
    I32(i32),
    /// UL
    U32(u32),
    /// SS
    I16(SmallInt<i16>),
    /// US
    U16(SmallInt<u16>),
    /// OB and UN
    Bytes(Vec<u8>),
    /// OW, kept as a little-endian byte buffer
    Words(Vec<u8>),
    /// SQ
    Sequence(Vec<SequenceItem>),
}

impl Value {
    fn default_for(vr: Vr) -> Value {
        match vr {
            Vr::UI => Value::Uid(String::new()),
            Vr::AT => Value::TagRef(Tag::new(0, 0)),
            Vr::FL => Value::F32(0.0),
            Vr::FD => Value::F64(0.0),
            Vr::SL => Value::I32(0),
            Vr::UL => Value::U32(0),
            Vr::SS => Value::I16(SmallInt::One(0)),
            Vr::US => Value::U16(SmallInt::One(0)),
            Vr::OB | Vr::UN => Value::Bytes(Vec::new()),
            Vr::OW => Value::Words(Vec::new()),
            Vr::SQ => Value::Sequence(Vec::new()),
            _ => Value::Text(String::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: Tag,
    pub vr: Vr,
    pub value: Value,
}

impl Element {
    pub fn new(tag: Tag, vr: Vr) -> Self {
        Element {
            tag,
            vr,
            value: Value::default_for(vr),
        }
    }

    /// Build a default element typed by the dictionary, OB when unknown.
    pub fn new_for_tag(tag: Tag) -> Self {
        let vr = dictionary::lookup(tag).map(|e| e.vr).unwrap_or(Vr::OB);
        Element::new(tag, vr)
    }

    pub fn is_pixel_data(&self) -> bool {
        self.tag == tags::PIXEL_DATA
    }

    /// Decode the header and body of one element. The caller has already
    /// consumed the 4 tag bytes; the reader's swap flag reflects the byte
    /// order the tag was read under.
    pub fn read(tag: Tag, reader: &mut ByteReader<'_>, syntax: &TransferSyntax) -> Result<Element> {
        let explicit = syntax.element_explicit_vr(tag.group);
        let (vr, len) = if explicit {
            let code = reader.read_bytes(2)?;
            let vr = match Vr::from_code([code[0], code[1]]) {
                Some(vr) => vr,
                // Unrecognized code: treat the body as opaque bytes.
                None => Vr::OB,
            };
            let len = if vr.has_long_header() {
                reader.skip(2)?;
                reader.read_u32()?
            } else {
                u32::from(reader.read_u16()?)
            };
            (vr, len)
        } else {
            let vr = dictionary::lookup(tag).map(|e| e.vr).unwrap_or(Vr::OB);
            (vr, reader.read_u32()?)
        };

        // The undefined-length sentinel always means a sequence, whatever
        // the header claimed.
        let vr = if len == UNDEFINED_LENGTH { Vr::SQ } else { vr };
        let mut element = Element::new(tag, vr);

        if len == UNDEFINED_LENGTH {
            let mut items = Vec::new();
            if let Err(err) =
                sequence::read_items(&mut items, reader, UNDEFINED_LENGTH, element.is_pixel_data(), syntax)
            {
                warn!(tag = %tag, error = %err, "sequence body failed to decode");
            }
            element.value = Value::Sequence(items);
        } else {
            let body = reader.read_bytes_upto(len as usize);
            if body.len() < len as usize {
                warn!(tag = %tag, declared = len, actual = body.len(), "element body truncated");
            }
            let mut body_reader = ByteReader::new(body, reader.swapped());
            if let Err(err) = element.parse_body(&mut body_reader, syntax) {
                warn!(tag = %tag, error = %err, "element body failed to decode");
            }
        }
        Ok(element)
    }

    fn parse_body(&mut self, r: &mut ByteReader<'_>, syntax: &TransferSyntax) -> Result<()> {
        let len = r.remaining();
        self.value = match self.vr {
            Vr::UI => {
                let raw = r.read_bytes(len)?;
                Value::Uid(uid::sanitize_uid(&uid::uid_from_raw(raw)))
            }
            Vr::AT => {
                // Zero- and half-length AT bodies occur in the wild.
                let group = if r.remaining() >= 2 { r.read_u16()? } else { 0 };
                let element = if r.remaining() >= 2 { r.read_u16()? } else { 0 };
                Value::TagRef(Tag::new(group, element))
            }
            Vr::FL => Value::F32(if len < 4 { 0.0 } else { r.read_f32()? }),
            Vr::FD => Value::F64(if len < 8 { 0.0 } else { r.read_f64()? }),
            Vr::SL => Value::I32(if len < 4 { 0 } else { r.read_i32()? }),
            Vr::UL => Value::U32(if len < 4 { 0 } else { r.read_u32()? }),
            Vr::SS => {
                let mut values = Vec::with_capacity(len / 2);
                while r.remaining() >= 2 {
                    values.push(r.read_i16()?);
                }
                Value::I16(Self::shape_small(self.tag, values, 0))
            }
            Vr::US => {
                let mut values = Vec::with_capacity(len / 2);
                while r.remaining() >= 2 {
                    values.push(r.read_u16()?);
                }
                Value::U16(Self::shape_small(self.tag, values, 0))
            }
            Vr::OB | Vr::UN => Value::Bytes(r.read_bytes(len)?.to_vec()),
            Vr::OW => {
                let mut buf = Vec::with_capacity(len);
                while r.remaining() >= 2 {
                    let word = r.read_u16()?;
                    buf.extend_from_slice(&word.to_le_bytes());
                }
                Value::Words(buf)
            }
            Vr::SQ => {
                let mut items = Vec::new();
                sequence::read_items(&mut items, r, len as u32, self.is_pixel_data(), syntax)?;
                Value::Sequence(items)
            }
            _ => {
                let raw = r.read_bytes(len)?;
                let mut text = String::from_utf8_lossy(raw).into_owned();
                // Drop the single pad character encode may have appended.
                if let Some(pad) = self.vr.pad_byte() {
                    if text.as_bytes().last() == Some(&pad) {
                        text.pop();
                    }
                }
                Value::Text(text)
            }
        };
        Ok(())
    }

    /// Scalar when the dictionary pins multiplicity to 1, array when it
    /// allows more or doesn't know the tag. Extra scalar values are dropped.
    fn shape_small<T: Copy>(tag: Tag, mut values: Vec<T>, zero: T) -> SmallInt<T> {
        if values.len() <= 1 {
            return SmallInt::One(values.pop().unwrap_or(zero));
        }
        match dictionary::lookup(tag) {
            Some(entry) if entry.vm_max == 1 => SmallInt::One(values[0]),
            _ => SmallInt::Many(values),
        }
    }

    /// Encode the full element: tag, header, body. Pixel data is always
    /// written under the OB code; a pixel data sequence additionally gets
    /// the undefined-length sentinel and a trailing sequence delimiter.
    pub fn write(&self, w: &mut ByteWriter, syntax: &TransferSyntax) {
        let explicit = syntax.element_explicit_vr(self.tag.group);
        w.write_u16(self.tag.group);
        w.write_u16(self.tag.element);

        let pixel_sequence = self.is_pixel_data() && matches!(self.value, Value::Sequence(_));
        let len = if pixel_sequence {
            UNDEFINED_LENGTH
        } else {
            self.data_len(explicit)
        };

        if explicit {
            let code = if self.is_pixel_data() {
                Vr::OB.code()
            } else {
                self.vr.code()
            };
            w.write_bytes(&code);
            if self.vr.has_long_header() {
                w.write_u16(0);
                w.write_u32(len);
            } else {
                w.write_u16(len as u16);
            }
        } else {
            w.write_u32(len);
        }
        self.write_body(w, syntax);
    }

    fn write_body(&self, w: &mut ByteWriter, syntax: &TransferSyntax) {
        match &self.value {
            Value::Text(text) => {
                w.write_bytes(text.as_bytes());
                if text.len() % 2 == 1 {
                    w.write_u8(self.vr.pad_byte().unwrap_or(0x20));
                }
            }
            Value::Uid(value) => w.write_bytes(&uid::uid_to_bytes(value)),
            Value::TagRef(tag) => {
                w.write_u16(tag.group);
                w.write_u16(tag.element);
            }
            Value::F32(v) => w.write_f32(*v),
            Value::F64(v) => w.write_f64(*v),
            Value::I32(v) => w.write_i32(*v),
            Value::U32(v) => w.write_u32(*v),
            Value::I16(small) => match small {
                SmallInt::One(v) => w.write_i16(*v),
                SmallInt::Many(vs) => {
                    for v in vs {
                        w.write_i16(*v);
                    }
                }
            },
            Value::U16(small) => match small {
                SmallInt::One(v) => w.write_u16(*v),
                SmallInt::Many(vs) => {
                    for v in vs {
                        w.write_u16(*v);
                    }
                }
            },
            Value::Bytes(bytes) => w.write_bytes(bytes),
            Value::Words(buf) => {
                if w.swapped() {
                    for pair in buf.chunks_exact(2) {
                        w.write_bytes(&[pair[1], pair[0]]);
                    }
                } else {
                    w.write_bytes(buf);
                }
            }
            Value::Sequence(items) => {
                let terminated = self.is_pixel_data();
                sequence::write_items(w, items, syntax, terminated);
            }
        }
    }

    /// Wire length of the body alone, padding included.
    pub fn data_len(&self, explicit: bool) -> u32 {
        match &self.value {
            Value::Text(text) => {
                let l = text.len() as u32;
                l + (l & 1)
            }
            Value::Uid(value) => {
                let l = value.len() as u32;
                l + (l & 1)
            }
            Value::TagRef(_) | Value::F32(_) | Value::I32(_) | Value::U32(_) => 4,
            Value::F64(_) => 8,
            Value::I16(small) => 2 * small.count() as u32,
            Value::U16(small) => 2 * small.count() as u32,
            Value::Bytes(bytes) => bytes.len() as u32,
            Value::Words(buf) => buf.len() as u32,
            Value::Sequence(items) => {
                let mut total: u32 = items.iter().map(|i| 8 + i.encoded_len(explicit)).sum();
                if self.is_pixel_data() {
                    // Trailing sequence delimiter item.
                    total += 8;
                }
                total
            }
        }
    }

    /// Wire length of header plus body.
    pub fn encoded_len(&self, explicit: bool) -> u32 {
        let header = if explicit && self.vr.has_long_header() {
            12
        } else {
            8
        };
        header + self.data_len(explicit)
    }

    // Typed setters. Wrong source type for the element's value family is a
    // TypeMismatch; OB additionally ingests fixed-width primitives and text
    // as raw little-endian bytes.

    pub fn set_text(&mut self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        match &mut self.value {
            Value::Text(t) => *t = text,
            Value::Uid(u) => *u = uid::sanitize_uid(&text),
            Value::Bytes(b) => *b = text.into_bytes(),
            _ => return Err(self.mismatch("string")),
        }
        Ok(())
    }

    pub fn set_u16(&mut self, v: u16) -> Result<()> {
        match &mut self.value {
            Value::U16(s) => *s = SmallInt::One(v),
            Value::Bytes(b) => *b = v.to_le_bytes().to_vec(),
            _ => return Err(self.mismatch("u16")),
        }
        Ok(())
    }

    pub fn set_u16s(&mut self, values: Vec<u16>) -> Result<()> {
        match &mut self.value {
            Value::U16(s) => *s = SmallInt::Many(values),
            Value::Words(buf) => {
                buf.clear();
                for v in &values {
                    buf.extend_from_slice(&v.to_le_bytes());
                }
            }
            _ => return Err(self.mismatch("u16 array")),
        }
        Ok(())
    }

    pub fn set_i16(&mut self, v: i16) -> Result<()> {
        match &mut self.value {
            Value::I16(s) => *s = SmallInt::One(v),
            Value::Bytes(b) => *b = v.to_le_bytes().to_vec(),
            _ => return Err(self.mismatch("i16")),
        }
        Ok(())
    }

    pub fn set_u32(&mut self, v: u32) -> Result<()> {
        match &mut self.value {
            Value::U32(x) => *x = v,
            Value::Bytes(b) => *b = v.to_le_bytes().to_vec(),
            _ => return Err(self.mismatch("u32")),
        }
        Ok(())
    }

    pub fn set_i32(&mut self, v: i32) -> Result<()> {
        match &mut self.value {
            Value::I32(x) => *x = v,
            Value::Bytes(b) => *b = v.to_le_bytes().to_vec(),
            _ => return Err(self.mismatch("i32")),
        }
        Ok(())
    }

    pub fn set_f32(&mut self, v: f32) -> Result<()> {
        match &mut self.value {
            Value::F32(x) => *x = v,
            Value::Bytes(b) => *b = v.to_le_bytes().to_vec(),
            _ => return Err(self.mismatch("f32")),
        }
        Ok(())
    }

    pub fn set_f64(&mut self, v: f64) -> Result<()> {
        match &mut self.value {
            Value::F64(x) => *x = v,
            Value::Bytes(b) => *b = v.to_le_bytes().to_vec(),
            _ => return Err(self.mismatch("f64")),
        }
        Ok(())
    }

    pub fn set_bytes(&mut self, bytes: Vec<u8>) -> Result<()> {
        match &mut self.value {
            Value::Bytes(b) => *b = bytes,
            Value::Words(b) => *b = bytes,
            _ => return Err(self.mismatch("bytes")),
        }
        Ok(())
    }

    pub fn set_tag_ref(&mut self, tag: Tag) -> Result<()> {
        match &mut self.value {
            Value::TagRef(t) => *t = tag,
            _ => return Err(self.mismatch("tag")),
        }
        Ok(())
    }

    pub fn set_items(&mut self, items: Vec<SequenceItem>) -> Result<()> {
        match &mut self.value {
            Value::Sequence(existing) => *existing = items,
            _ => return Err(self.mismatch("sequence items")),
        }
        Ok(())
    }

    fn mismatch(&self, wanted: &str) -> DataError {
        DataError::type_mismatch(format!(
            "cannot store {wanted} in {} element {}",
            self.vr, self.tag
        ))
    }

    // Typed accessors.

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::Text(t) => Some(t),
            Value::Uid(u) => Some(u),
            _ => None,
        }
    }

    pub fn u16_value(&self) -> Option<u16> {
        match &self.value {
            Value::U16(s) => s.first(),
            _ => None,
        }
    }

    pub fn u32_value(&self) -> Option<u32> {
        match &self.value {
            Value::U32(v) => Some(*v),
            Value::U16(s) => s.first().map(u32::from),
            _ => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.value {
            Value::Bytes(b) | Value::Words(b) => Some(b),
            _ => None,
        }
    }

    /// OW contents as words, decoding the little-endian pair buffer.
    pub fn words(&self) -> Option<Vec<u16>> {
        match &self.value {
            Value::Words(buf) => Some(
                buf.chunks_exact(2)
                    .map(|p| u16::from_le_bytes([p[0], p[1]]))
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn items(&self) -> Option<&[SequenceItem]> {
        match &self.value {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn items_mut(&mut self) -> Option<&mut Vec<SequenceItem>> {
        match &mut self.value {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// One-line rendering for dumps.
    pub fn display(&self) -> String {
        match &self.value {
            Value::Text(t) => t.clone(),
            Value::Uid(u) => match uid::well_known(u) {
                Some(known) => format!("{u} ({})", known.name),
                None => u.clone(),
            },
            Value::TagRef(t) => t.to_string(),
            Value::F32(v) => v.to_string(),
            Value::F64(v) => v.to_string(),
            Value::I32(v) => v.to_string(),
            Value::U32(v) => v.to_string(),
            Value::I16(SmallInt::One(v)) => v.to_string(),
            Value::I16(SmallInt::Many(vs)) => format!("[{} values]", vs.len()),
            Value::U16(SmallInt::One(v)) => v.to_string(),
            Value::U16(SmallInt::Many(vs)) => format!("[{} values]", vs.len()),
            Value::Bytes(b) => format!("[{} bytes]", b.len()),
            Value::Words(b) => format!("[{} words]", b.len() / 2),
            Value::Sequence(items) => format!("[sequence, {} items]", items.len()),
        }
    }
}

//! Datasets
//!
//! An ordered element collection with a tag index. Elements keep their
//! insertion order on iteration and on the wire; replacing a tag keeps its
//! original position.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::codec::{ByteReader, ByteWriter};
use crate::element::Element;
use crate::error::Result;
use crate::tags::{self, Tag};
use crate::transfer::{self, TransferSyntax};

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    elements: Vec<Element>,
    index: HashMap<Tag, usize>,
}

impl Dataset {
    pub fn new() -> Self {
        Dataset::default()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.index.contains_key(&tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    pub fn get(&self, tag: Tag) -> Option<&Element> {
        self.index.get(&tag).map(|&i| &self.elements[i])
    }

    pub fn get_mut(&mut self, tag: Tag) -> Option<&mut Element> {
        self.index.get(&tag).map(|&i| &mut self.elements[i])
    }

    /// Insert an element, replacing any existing element with the same tag
    /// in place.
    pub fn insert(&mut self, element: Element) {
        match self.index.get(&element.tag) {
            Some(&i) => self.elements[i] = element,
            None => {
                self.index.insert(element.tag, self.elements.len());
                self.elements.push(element);
            }
        }
    }

    pub fn remove(&mut self, tag: Tag) -> Option<Element> {
        let i = self.index.remove(&tag)?;
        let element = self.elements.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(element)
    }

    /// Get the element for a tag, materializing a dictionary-typed default
    /// (OB for unknown tags) when absent.
    pub fn entry(&mut self, tag: Tag) -> &mut Element {
        if !self.contains(tag) {
            self.insert(Element::new_for_tag(tag));
        }
        let i = self.index[&tag];
        &mut self.elements[i]
    }

    // Typed conveniences used heavily by command builders.

    pub fn put_str(&mut self, tag: Tag, value: impl Into<String>) -> Result<()> {
        self.entry(tag).set_text(value)
    }

    pub fn put_u16(&mut self, tag: Tag, value: u16) -> Result<()> {
        self.entry(tag).set_u16(value)
    }

    pub fn put_u32(&mut self, tag: Tag, value: u32) -> Result<()> {
        self.entry(tag).set_u32(value)
    }

    pub fn str_value(&self, tag: Tag) -> Option<&str> {
        self.get(tag).and_then(Element::as_str)
    }

    pub fn u16_value(&self, tag: Tag) -> Option<u16> {
        self.get(tag).and_then(Element::u16_value)
    }

    pub fn u32_value(&self, tag: Tag) -> Option<u32> {
        self.get(tag).and_then(Element::u32_value)
    }

    /// Wire length of all elements, group lengths excluded.
    pub fn encoded_len(&self, explicit: bool) -> u32 {
        self.elements
            .iter()
            .filter(|e| !e.tag.is_group_length())
            .map(|e| e.encoded_len(explicit))
            .sum()
    }

    /// Decode a bare element stream. Groups 0000 and 0002 override the
    /// stream syntax per element, and a Transfer Syntax UID in the file meta
    /// group switches the syntax for everything after it. Decode is best
    /// effort: a malformed element ends the parse with what was recovered.
    pub fn read_from(buf: &[u8], syntax: &TransferSyntax) -> Result<Dataset> {
        let mut syntax = syntax.clone();
        let mut dataset = Dataset::new();
        let mut reader = ByteReader::new(buf, false);

        while reader.remaining() >= 8 {
            // Resolve the group before committing to a byte order: groups
            // 0000/0002 are little-endian whatever the stream syntax says.
            let pos = reader.position();
            let group_le = u16::from_le_bytes([buf[pos], buf[pos + 1]]);
            let group = if group_le == 0x0000 || group_le == 0x0002 || !syntax.big_endian {
                group_le
            } else {
                group_le.swap_bytes()
            };
            if reader.swapped() != syntax.element_swapped(group) {
                reader.toggle_swapped();
            }

            let group = match reader.read_u16() {
                Ok(g) => g,
                Err(_) => break,
            };
            let element_num = match reader.read_u16() {
                Ok(e) => e,
                Err(_) => break,
            };
            let tag = Tag::new(group, element_num);

            match Element::read(tag, &mut reader, &syntax) {
                Ok(element) => {
                    if tag == tags::TRANSFER_SYNTAX_UID {
                        if let Some(uid) = element.as_str() {
                            let next = transfer::lookup(uid);
                            debug!(syntax = %next.name, "stream declares transfer syntax");
                            syntax = next;
                        }
                    }
                    dataset.insert(element);
                }
                Err(err) => {
                    warn!(tag = %tag, error = %err, "stopping dataset decode on malformed element");
                    break;
                }
            }
        }
        Ok(dataset)
    }

    /// Encode the element stream. Network mode skips the file meta group.
    /// Stored group-length elements are stale after any edit, so none are
    /// written.
    pub fn write_to(&self, writer: &mut ByteWriter, syntax: &TransferSyntax, network: bool) {
        for element in &self.elements {
            if element.tag.is_group_length() {
                continue;
            }
            if network && element.tag.is_file_meta() {
                continue;
            }
            if writer.swapped() != syntax.element_swapped(element.tag.group) {
                writer.toggle_swapped();
            }
            element.write(writer, syntax);
        }
        if writer.swapped() {
            writer.toggle_swapped();
        }
    }

    /// Shortcut for `write_to` into a fresh buffer.
    pub fn to_bytes(&self, syntax: &TransferSyntax, network: bool) -> bytes::Bytes {
        let mut writer = ByteWriter::new(false);
        self.write_to(&mut writer, syntax, network);
        writer.into_bytes()
    }

    /// Decode a Part-10 style byte image: an optional 128-byte preamble with
    /// the DICM magic, then the element stream. The file meta group carries
    /// the syntax for the rest.
    pub fn read_file_bytes(buf: &[u8]) -> Result<Dataset> {
        let body = if buf.len() >= PREAMBLE_LEN + 4
            && &buf[PREAMBLE_LEN..PREAMBLE_LEN + 4] == MAGIC
        {
            &buf[PREAMBLE_LEN + 4..]
        } else {
            buf
        };
        Dataset::read_from(body, &transfer::IMPLICIT_VR_LITTLE_ENDIAN)
    }

    /// Encode with the Part-10 preamble and magic.
    pub fn write_file_bytes(&self, syntax: &TransferSyntax) -> bytes::Bytes {
        let mut writer = ByteWriter::new(false);
        writer.write_bytes(&[0u8; PREAMBLE_LEN]);
        writer.write_bytes(MAGIC);
        self.write_to(&mut writer, syntax, false);
        writer.into_bytes()
    }

    /// Multi-line debug rendering, nested sequences indented.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_into(&mut out, 0);
        out
    }

    fn dump_into(&self, out: &mut String, depth: usize) {
        use std::fmt::Write;
        for element in &self.elements {
            let _ = writeln!(
                out,
                "{}{} [{},{}] {}",
                "  ".repeat(depth),
                element.tag,
                element.vr,
                crate::dictionary::describe(element.tag),
                element.display()
            );
            if let Some(items) = element.items() {
                for (n, item) in items.iter().enumerate() {
                    let _ = writeln!(out, "{}item {}:", "  ".repeat(depth + 1), n);
                    match item.dataset() {
                        Some(ds) => ds.dump_into(out, depth + 2),
                        None => {
                            let _ = writeln!(
                                out,
                                "{}[fragment, {} bytes]",
                                "  ".repeat(depth + 2),
                                item.fragment().map(<[u8]>::len).unwrap_or(0)
                            );
                        }
                    }
                }
            }
        }
    }
}

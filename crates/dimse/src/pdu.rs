//! Transport framing
//!
//! Every protocol data unit starts with a 6-byte header: a type byte, a
//! reserved byte, and a big-endian 32-bit body length. Association items use
//! the same shape with a 16-bit length. TCP gives no framing guarantees, so
//! inbound bytes run through an incremental reassembler that yields whole
//! PDUs however the reads were chunked.

use bytes::{Buf, Bytes, BytesMut};

/// PDU type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    AssociateRq = 0x01,
    AssociateAc = 0x02,
    AssociateRj = 0x03,
    PDataTf = 0x04,
    ReleaseRq = 0x05,
    ReleaseRp = 0x06,
    Abort = 0x07,
}

impl PduType {
    pub fn from_u8(byte: u8) -> Option<PduType> {
        Some(match byte {
            0x01 => PduType::AssociateRq,
            0x02 => PduType::AssociateAc,
            0x03 => PduType::AssociateRj,
            0x04 => PduType::PDataTf,
            0x05 => PduType::ReleaseRq,
            0x06 => PduType::ReleaseRp,
            0x07 => PduType::Abort,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Builds one PDU, backfilling the length on `build`.
pub struct PduBuilder {
    buf: BytesMut,
}

impl PduBuilder {
    pub fn new(pdu_type: PduType) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.extend_from_slice(&[pdu_type.as_u8(), 0, 0, 0, 0, 0]);
        PduBuilder { buf }
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.extend_from_slice(&[v]);
        self
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Fixed 16-byte space-padded AE title field.
    pub fn write_ae_title(&mut self, aet: &str) -> &mut Self {
        let mut field = [b' '; 16];
        let bytes = aet.as_bytes();
        let n = bytes.len().min(16);
        field[..n].copy_from_slice(&bytes[..n]);
        self.buf.extend_from_slice(&field);
        self
    }

    pub fn write_item(&mut self, item: ItemBuilder) -> &mut Self {
        self.buf.extend_from_slice(&item.build());
        self
    }

    pub fn build(mut self) -> Bytes {
        let body_len = (self.buf.len() - 6) as u32;
        self.buf[2..6].copy_from_slice(&body_len.to_be_bytes());
        self.buf.freeze()
    }
}

/// Builds one association item (type, reserved, 16-bit length).
pub struct ItemBuilder {
    buf: Vec<u8>,
}

impl ItemBuilder {
    pub fn new(item_type: u8) -> Self {
        ItemBuilder {
            buf: vec![item_type, 0, 0, 0],
        }
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn write_sub_item(&mut self, item: ItemBuilder) -> &mut Self {
        self.buf.extend_from_slice(&item.build());
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        let body_len = (self.buf.len() - 4) as u16;
        self.buf[2..4].copy_from_slice(&body_len.to_be_bytes());
        self.buf
    }
}

/// One reassembled unit. The type byte is kept raw so the connection can
/// log and skip codes it does not recognize.
#[derive(Debug)]
pub struct Pdu {
    pub type_byte: u8,
    pub body: Bytes,
}

/// Incremental PDU reassembler. Feed it whatever the socket produced and
/// drain complete PDUs; partial trailing bytes are held for the next read.
#[derive(Debug, Default)]
pub struct PduReassembler {
    buf: BytesMut,
}

impl PduReassembler {
    pub fn new() -> Self {
        PduReassembler::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes currently buffered but not yet framed.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn next_pdu(&mut self) -> Option<Pdu> {
        if self.buf.len() < 6 {
            return None;
        }
        let body_len =
            u32::from_be_bytes([self.buf[2], self.buf[3], self.buf[4], self.buf[5]]) as usize;
        let total = 6 + body_len;
        if self.buf.len() < total {
            return None;
        }
        let mut frame = self.buf.split_to(total);
        let type_byte = frame[0];
        frame.advance(6);
        Some(Pdu {
            type_byte,
            body: frame.freeze(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdu_builder_backfills_length() {
        let mut builder = PduBuilder::new(PduType::ReleaseRq);
        builder.write_u32(0);
        let bytes = builder.build();
        assert_eq!(bytes[0], 0x05);
        assert_eq!(&bytes[2..6], &4u32.to_be_bytes());
        assert_eq!(bytes.len(), 10);
    }

    #[test]
    fn test_item_builder_backfills_length() {
        let mut item = ItemBuilder::new(0x30);
        item.write_bytes(b"1.2.840.10008.1.1");
        let bytes = item.build();
        assert_eq!(bytes[0], 0x30);
        assert_eq!(&bytes[2..4], &17u16.to_be_bytes());
    }

    #[test]
    fn test_ae_title_is_space_padded() {
        let mut builder = PduBuilder::new(PduType::AssociateRq);
        builder.write_ae_title("SCP");
        let bytes = builder.build();
        assert_eq!(&bytes[6..9], b"SCP");
        assert!(bytes[9..22].iter().all(|&b| b == b' '));
    }

    #[test]
    fn test_reassembler_whole_pdu() {
        let mut builder = PduBuilder::new(PduType::PDataTf);
        builder.write_bytes(&[1, 2, 3]);
        let frame = builder.build();

        let mut reasm = PduReassembler::new();
        reasm.push(&frame);
        let pdu = reasm.next_pdu().unwrap();
        assert_eq!(pdu.type_byte, 0x04);
        assert_eq!(&pdu.body[..], &[1, 2, 3]);
        assert!(reasm.next_pdu().is_none());
    }

    #[test]
    fn test_reassembler_one_byte_chunks_match_whole() {
        let mut frames = Vec::new();
        for n in 0..3u8 {
            let mut builder = PduBuilder::new(PduType::PDataTf);
            builder.write_bytes(&[n; 5]);
            frames.extend_from_slice(&builder.build());
        }

        let mut whole = PduReassembler::new();
        whole.push(&frames);
        let mut dribble = PduReassembler::new();
        let mut dribbled = Vec::new();
        for &b in &frames {
            dribble.push(&[b]);
            while let Some(pdu) = dribble.next_pdu() {
                dribbled.push(pdu);
            }
        }

        for expected in std::iter::from_fn(|| whole.next_pdu()) {
            let got = dribbled.remove(0);
            assert_eq!(got.type_byte, expected.type_byte);
            assert_eq!(got.body, expected.body);
        }
        assert!(dribbled.is_empty());
        assert_eq!(dribble.pending(), 0);
    }

    #[test]
    fn test_reassembler_holds_partial_frames() {
        let mut builder = PduBuilder::new(PduType::Abort);
        builder.write_u32(0);
        let frame = builder.build();

        let mut reasm = PduReassembler::new();
        reasm.push(&frame[..5]);
        assert!(reasm.next_pdu().is_none());
        reasm.push(&frame[5..]);
        assert_eq!(reasm.next_pdu().unwrap().type_byte, 0x07);
    }
}

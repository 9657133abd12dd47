//! Association negotiation
//!
//! ASSOCIATE-RQ/AC bodies share one layout: a protocol version, the called
//! and calling AE title fields, 32 reserved bytes, then a list of items.
//! The 64 bytes covering the AE titles and the reserved block are kept raw
//! and echoed back verbatim in the AC, which is what established toolkits
//! expect to see.

use std::collections::HashSet;

use bytes::Bytes;
use tracing::debug;

use dicom_data::codec::ByteReader;
use dicom_data::transfer::{self, TransferSyntax};

use crate::error::{DimseError, Result};
use crate::pdu::{ItemBuilder, PduBuilder, PduType};
use crate::PROTOCOL_VERSION;

const APPLICATION_CONTEXT_UID: &str = "1.2.840.10008.3.1.1.1";

const ITEM_APPLICATION_CONTEXT: u8 = 0x10;
const ITEM_PRESENTATION_CONTEXT_RQ: u8 = 0x20;
const ITEM_PRESENTATION_CONTEXT_AC: u8 = 0x21;
const SUB_ABSTRACT_SYNTAX: u8 = 0x30;
const SUB_TRANSFER_SYNTAX: u8 = 0x40;
const ITEM_USER_INFO: u8 = 0x50;
const SUB_MAX_PDU: u8 = 0x51;
const SUB_IMPLEMENTATION_UID: u8 = 0x52;
const SUB_IMPLEMENTATION_NAME: u8 = 0x55;

/// Outcome of negotiating one presentation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationResult {
    Acceptance = 0,
    UserRejection = 1,
    NoReason = 2,
    AbstractSyntaxNotSupported = 3,
    TransferSyntaxesNotSupported = 4,
}

impl PresentationResult {
    pub fn from_u8(v: u8) -> PresentationResult {
        match v {
            0 => PresentationResult::Acceptance,
            1 => PresentationResult::UserRejection,
            3 => PresentationResult::AbstractSyntaxNotSupported,
            4 => PresentationResult::TransferSyntaxesNotSupported,
            _ => PresentationResult::NoReason,
        }
    }
}

/// One proposed or negotiated presentation context.
#[derive(Debug, Clone)]
pub struct PresentationContext {
    pub id: u8,
    pub abstract_syntax: String,
    pub proposed: Vec<TransferSyntax>,
    pub result: PresentationResult,
    pub accepted: Option<TransferSyntax>,
}

impl PresentationContext {
    pub fn new(id: u8, abstract_syntax: impl Into<String>, proposed: Vec<TransferSyntax>) -> Self {
        PresentationContext {
            id,
            abstract_syntax: abstract_syntax.into(),
            proposed,
            result: PresentationResult::NoReason,
            accepted: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.result == PresentationResult::Acceptance
    }
}

/// The user information item.
#[derive(Debug, Clone)]
pub struct UserInfo {
    /// Peer receive limit; zero on the wire means unbounded.
    pub max_pdu: u32,
    pub implementation_uid: String,
    pub implementation_name: String,
}

impl Default for UserInfo {
    fn default() -> Self {
        UserInfo {
            max_pdu: 0,
            implementation_uid: crate::IMPLEMENTATION_CLASS_UID.to_string(),
            implementation_name: crate::IMPLEMENTATION_VERSION_NAME.to_string(),
        }
    }
}

/// A parsed ASSOCIATE-RQ or ASSOCIATE-AC body.
#[derive(Debug, Clone)]
pub struct Association {
    pub called_ae: String,
    pub calling_ae: String,
    /// Raw AE title and reserved bytes, echoed back in the AC.
    pub identity: Vec<u8>,
    pub application_context: String,
    pub contexts: Vec<PresentationContext>,
    pub user: UserInfo,
}

fn trimmed_ae(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}

/// Parse an RQ (`accept == false`) or AC (`accept == true`) body.
pub fn parse(body: &[u8], accept: bool) -> Result<Association> {
    let mut r = ByteReader::new(body, false);
    let version = r.read_u16_be().map_err(DimseError::from)?;
    if version != PROTOCOL_VERSION {
        debug!(version, "peer offers unexpected protocol version");
    }
    r.skip(2).map_err(DimseError::from)?;
    let identity = r.read_bytes(64).map_err(DimseError::from)?.to_vec();
    let called_ae = trimmed_ae(&identity[..16]);
    let calling_ae = trimmed_ae(&identity[16..32]);

    let mut assoc = Association {
        called_ae,
        calling_ae,
        identity,
        application_context: String::new(),
        contexts: Vec::new(),
        user: UserInfo {
            max_pdu: u32::MAX,
            implementation_uid: String::new(),
            implementation_name: String::new(),
        },
    };

    while r.remaining() >= 4 {
        let item_type = r.read_u8().map_err(DimseError::from)?;
        r.skip(1).map_err(DimseError::from)?;
        let item_len = r.read_u16_be().map_err(DimseError::from)? as usize;
        let item = r
            .read_bytes(item_len)
            .map_err(|_| DimseError::protocol("association item longer than its PDU"))?;

        match item_type {
            ITEM_APPLICATION_CONTEXT => {
                assoc.application_context = String::from_utf8_lossy(item).to_string();
            }
            ITEM_PRESENTATION_CONTEXT_RQ if !accept => {
                assoc.contexts.push(parse_context_rq(item)?);
            }
            ITEM_PRESENTATION_CONTEXT_AC if accept => {
                assoc.contexts.push(parse_context_ac(item)?);
            }
            ITEM_USER_INFO => parse_user_info(item, &mut assoc.user)?,
            other => {
                debug!(item_type = other, "skipping unknown association item");
            }
        }
    }
    Ok(assoc)
}

fn parse_context_rq(item: &[u8]) -> Result<PresentationContext> {
    let mut r = ByteReader::new(item, false);
    let id = r.read_u8().map_err(DimseError::from)?;
    r.skip(3).map_err(DimseError::from)?;
    let mut ctx = PresentationContext::new(id, String::new(), Vec::new());
    while r.remaining() >= 4 {
        let sub_type = r.read_u8().map_err(DimseError::from)?;
        r.skip(1).map_err(DimseError::from)?;
        let len = r.read_u16_be().map_err(DimseError::from)? as usize;
        let sub = r.read_bytes(len).map_err(DimseError::from)?;
        match sub_type {
            SUB_ABSTRACT_SYNTAX => {
                ctx.abstract_syntax = dicom_data::uid::uid_from_raw(sub);
            }
            SUB_TRANSFER_SYNTAX => {
                ctx.proposed
                    .push(transfer::lookup(&dicom_data::uid::uid_from_raw(sub)));
            }
            _ => {}
        }
    }
    Ok(ctx)
}

fn parse_context_ac(item: &[u8]) -> Result<PresentationContext> {
    let mut r = ByteReader::new(item, false);
    let id = r.read_u8().map_err(DimseError::from)?;
    r.skip(1).map_err(DimseError::from)?;
    let result = PresentationResult::from_u8(r.read_u8().map_err(DimseError::from)?);
    r.skip(1).map_err(DimseError::from)?;
    let mut ctx = PresentationContext::new(id, String::new(), Vec::new());
    ctx.result = result;
    while r.remaining() >= 4 {
        let sub_type = r.read_u8().map_err(DimseError::from)?;
        r.skip(1).map_err(DimseError::from)?;
        let len = r.read_u16_be().map_err(DimseError::from)? as usize;
        let sub = r.read_bytes(len).map_err(DimseError::from)?;
        if sub_type == SUB_TRANSFER_SYNTAX && result == PresentationResult::Acceptance {
            ctx.accepted = Some(transfer::lookup(&dicom_data::uid::uid_from_raw(sub)));
        }
    }
    Ok(ctx)
}

fn parse_user_info(item: &[u8], user: &mut UserInfo) -> Result<()> {
    let mut r = ByteReader::new(item, false);
    while r.remaining() >= 4 {
        let sub_type = r.read_u8().map_err(DimseError::from)?;
        r.skip(1).map_err(DimseError::from)?;
        let len = r.read_u16_be().map_err(DimseError::from)? as usize;
        let sub = r.read_bytes(len).map_err(DimseError::from)?;
        match sub_type {
            SUB_MAX_PDU if sub.len() >= 4 => {
                let declared = u32::from_be_bytes([sub[0], sub[1], sub[2], sub[3]]);
                // Zero is "no limit".
                user.max_pdu = if declared == 0 { u32::MAX } else { declared };
            }
            SUB_IMPLEMENTATION_UID => {
                user.implementation_uid = dicom_data::uid::uid_from_raw(sub);
            }
            SUB_IMPLEMENTATION_NAME => {
                user.implementation_name = String::from_utf8_lossy(sub).trim().to_string();
            }
            other => {
                debug!(sub_type = other, "skipping unknown user info sub-item");
            }
        }
    }
    Ok(())
}

fn user_info_item(user: &UserInfo) -> ItemBuilder {
    let mut name = user.implementation_name.clone();
    if name.is_empty() {
        name = "FillMeIn".to_string();
    }
    name.truncate(16);

    let mut info = ItemBuilder::new(ITEM_USER_INFO);
    let mut max_pdu = ItemBuilder::new(SUB_MAX_PDU);
    max_pdu.write_u32(if user.max_pdu == u32::MAX { 0 } else { user.max_pdu });
    info.write_sub_item(max_pdu);
    let mut impl_uid = ItemBuilder::new(SUB_IMPLEMENTATION_UID);
    impl_uid.write_bytes(user.implementation_uid.as_bytes());
    info.write_sub_item(impl_uid);
    let mut impl_name = ItemBuilder::new(SUB_IMPLEMENTATION_NAME);
    impl_name.write_bytes(name.as_bytes());
    info.write_sub_item(impl_name);
    info
}

fn header(builder: &mut PduBuilder, called_ae: &str, calling_ae: &str) {
    builder.write_u16(PROTOCOL_VERSION);
    builder.write_u16(0);
    builder.write_ae_title(called_ae);
    builder.write_ae_title(calling_ae);
    builder.write_bytes(&[0u8; 32]);
}

/// Build a full ASSOCIATE-RQ PDU.
pub fn build_rq(
    called_ae: &str,
    calling_ae: &str,
    contexts: &[PresentationContext],
    user: &UserInfo,
) -> Bytes {
    let mut builder = PduBuilder::new(PduType::AssociateRq);
    header(&mut builder, called_ae, calling_ae);

    let mut app = ItemBuilder::new(ITEM_APPLICATION_CONTEXT);
    app.write_bytes(APPLICATION_CONTEXT_UID.as_bytes());
    builder.write_item(app);

    for ctx in contexts {
        let mut item = ItemBuilder::new(ITEM_PRESENTATION_CONTEXT_RQ);
        item.write_u8(ctx.id).write_u8(0).write_u8(0).write_u8(0);
        let mut abs = ItemBuilder::new(SUB_ABSTRACT_SYNTAX);
        abs.write_bytes(ctx.abstract_syntax.as_bytes());
        item.write_sub_item(abs);
        for ts in &ctx.proposed {
            let mut sub = ItemBuilder::new(SUB_TRANSFER_SYNTAX);
            sub.write_bytes(ts.uid.as_bytes());
            item.write_sub_item(sub);
        }
        builder.write_item(item);
    }

    builder.write_item(user_info_item(user));
    builder.build()
}

/// Build a full ASSOCIATE-AC PDU, echoing the identity bytes of the RQ.
pub fn build_ac(identity: &[u8], contexts: &[PresentationContext], user: &UserInfo) -> Bytes {
    let mut builder = PduBuilder::new(PduType::AssociateAc);
    builder.write_u16(PROTOCOL_VERSION);
    builder.write_u16(0);
    if identity.len() == 64 {
        builder.write_bytes(identity);
    } else {
        builder.write_bytes(&[b' '; 32]);
        builder.write_bytes(&[0u8; 32]);
    }

    let mut app = ItemBuilder::new(ITEM_APPLICATION_CONTEXT);
    app.write_bytes(APPLICATION_CONTEXT_UID.as_bytes());
    builder.write_item(app);

    for ctx in contexts {
        let mut item = ItemBuilder::new(ITEM_PRESENTATION_CONTEXT_AC);
        item.write_u8(ctx.id)
            .write_u8(0)
            .write_u8(ctx.result as u8)
            .write_u8(0);
        // A rejected context still carries a syntax field; echo the first
        // proposal there, or leave it empty.
        let mut sub = ItemBuilder::new(SUB_TRANSFER_SYNTAX);
        let uid = ctx
            .accepted
            .as_ref()
            .or_else(|| ctx.proposed.first())
            .map(|ts| ts.uid.as_str());
        if let Some(uid) = uid {
            sub.write_bytes(uid.as_bytes());
        }
        item.write_sub_item(sub);
        builder.write_item(item);
    }

    builder.write_item(user_info_item(user));
    builder.build()
}

/// ASSOCIATE-RJ details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reject {
    pub result: u8,
    pub source: u8,
    pub reason: u8,
}

pub fn build_rj(reject: Reject) -> Bytes {
    let mut builder = PduBuilder::new(PduType::AssociateRj);
    builder
        .write_u8(0)
        .write_u8(reject.result)
        .write_u8(reject.source)
        .write_u8(reject.reason);
    builder.build()
}

pub fn parse_rj(body: &[u8]) -> Result<Reject> {
    if body.len() < 4 {
        return Err(DimseError::protocol("truncated ASSOCIATE-RJ"));
    }
    Ok(Reject {
        result: body[1],
        source: body[2],
        reason: body[3],
    })
}

/// Transfer syntaxes this implementation can actually read and write.
pub fn transfer_supported(ts: &TransferSyntax) -> bool {
    ts.uid == transfer::IMPLICIT_VR_LITTLE_ENDIAN.uid
        || ts.uid == transfer::EXPLICIT_VR_LITTLE_ENDIAN.uid
        || ts.uid == transfer::EXPLICIT_VR_BIG_ENDIAN.uid
}

/// Give every workable proposal an uncompressed fallback before the RQ goes
/// out. A context whose list already carries Implicit VR Little Endian is
/// left alone; otherwise, if at least one proposed syntax stores pixel data
/// in a compression this toolkit can decode, Implicit VR LE is appended so
/// the peer can still pick something both sides read. Contexts proposing
/// only undecodable compressions stay as-is: the bytes can only travel in
/// their stored form.
pub fn ensure_usable_transfer_syntaxes(contexts: &mut [PresentationContext]) {
    for ctx in contexts.iter_mut() {
        if ctx
            .proposed
            .iter()
            .any(|ts| ts.uid == transfer::IMPLICIT_VR_LITTLE_ENDIAN.uid)
        {
            continue;
        }
        if ctx
            .proposed
            .iter()
            .any(|ts| transfer::supports_decompression(ts.compression))
        {
            ctx.proposed.push(transfer::IMPLICIT_VR_LITTLE_ENDIAN.clone());
        }
    }
}

/// Decide the fate of each proposed context. With `prefer_specific`, a
/// proposal list offering Explicit VR Little Endian alongside any other
/// workable syntax resolves to the other one; Explicit VR LE is the
/// catch-all every toolkit proposes, so a peer that also proposes something
/// narrower is taken at its word about the narrower preference.
pub fn negotiate(
    contexts: &mut [PresentationContext],
    supported_abstracts: &HashSet<String>,
    prefer_specific: bool,
) {
    for ctx in contexts.iter_mut() {
        if !supported_abstracts.contains(&ctx.abstract_syntax) {
            ctx.result = PresentationResult::AbstractSyntaxNotSupported;
            ctx.accepted = None;
            continue;
        }
        let usable: Vec<&TransferSyntax> =
            ctx.proposed.iter().filter(|ts| transfer_supported(ts)).collect();
        let pick = if prefer_specific {
            usable
                .iter()
                .copied()
                .find(|ts| ts.uid != transfer::EXPLICIT_VR_LITTLE_ENDIAN.uid)
                .or_else(|| usable.first().copied())
        } else {
            usable.first().copied()
        };
        match pick {
            Some(ts) => {
                ctx.result = PresentationResult::Acceptance;
                ctx.accepted = Some(ts.clone());
            }
            None => {
                ctx.result = PresentationResult::TransferSyntaxesNotSupported;
                ctx.accepted = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::abstract_syntax;

    fn supported() -> HashSet<String> {
        [
            abstract_syntax::VERIFICATION.to_string(),
            abstract_syntax::STUDY_ROOT_FIND.to_string(),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_rq_round_trip() {
        let contexts = vec![PresentationContext::new(
            1,
            abstract_syntax::VERIFICATION,
            vec![
                transfer::IMPLICIT_VR_LITTLE_ENDIAN.clone(),
                transfer::EXPLICIT_VR_LITTLE_ENDIAN.clone(),
            ],
        )];
        let user = UserInfo {
            max_pdu: 0xC80E,
            ..UserInfo::default()
        };
        let pdu = build_rq("ARCHIVE", "WORKSTATION", &contexts, &user);
        assert_eq!(pdu[0], PduType::AssociateRq.as_u8());

        let assoc = parse(&pdu[6..], false).unwrap();
        assert_eq!(assoc.called_ae, "ARCHIVE");
        assert_eq!(assoc.calling_ae, "WORKSTATION");
        assert_eq!(assoc.application_context, APPLICATION_CONTEXT_UID);
        assert_eq!(assoc.contexts.len(), 1);
        assert_eq!(assoc.contexts[0].id, 1);
        assert_eq!(
            assoc.contexts[0].abstract_syntax,
            abstract_syntax::VERIFICATION
        );
        assert_eq!(assoc.contexts[0].proposed.len(), 2);
        assert_eq!(assoc.user.max_pdu, 0xC80E);
        assert_eq!(assoc.user.implementation_uid, crate::IMPLEMENTATION_CLASS_UID);
    }

    #[test]
    fn test_max_pdu_zero_means_unbounded() {
        let contexts = vec![];
        let user = UserInfo {
            max_pdu: u32::MAX,
            ..UserInfo::default()
        };
        let pdu = build_rq("A", "B", &contexts, &user);
        let assoc = parse(&pdu[6..], false).unwrap();
        assert_eq!(assoc.user.max_pdu, u32::MAX);
    }

    #[test]
    fn test_implementation_name_clamped() {
        let user = UserInfo {
            max_pdu: 16384,
            implementation_uid: "1.2.3".into(),
            implementation_name: "AN_EXCESSIVELY_LONG_NAME".into(),
        };
        let pdu = build_rq("A", "B", &[], &user);
        let assoc = parse(&pdu[6..], false).unwrap();
        assert_eq!(assoc.user.implementation_name.len(), 16);

        let unnamed = UserInfo {
            max_pdu: 16384,
            implementation_uid: "1.2.3".into(),
            implementation_name: String::new(),
        };
        let pdu = build_rq("A", "B", &[], &unnamed);
        let assoc = parse(&pdu[6..], false).unwrap();
        assert_eq!(assoc.user.implementation_name, "FillMeIn");
    }

    #[test]
    fn test_ac_echoes_identity_bytes() {
        let contexts = vec![PresentationContext::new(
            1,
            abstract_syntax::VERIFICATION,
            vec![transfer::IMPLICIT_VR_LITTLE_ENDIAN.clone()],
        )];
        let rq = build_rq("ARCHIVE", "WORKSTATION", &contexts, &UserInfo::default());
        let parsed = parse(&rq[6..], false).unwrap();

        let mut negotiated = parsed.contexts.clone();
        negotiate(&mut negotiated, &supported(), true);
        let ac = build_ac(&parsed.identity, &negotiated, &UserInfo::default());
        assert_eq!(ac[0], PduType::AssociateAc.as_u8());
        // Identity bytes sit right after version + reserved.
        assert_eq!(&ac[10..74], &parsed.identity[..]);

        let accepted = parse(&ac[6..], true).unwrap();
        assert_eq!(accepted.called_ae, "ARCHIVE");
        assert_eq!(accepted.contexts[0].result, PresentationResult::Acceptance);
        assert_eq!(
            accepted.contexts[0].accepted.as_ref().unwrap().uid,
            transfer::IMPLICIT_VR_LITTLE_ENDIAN.uid
        );
    }

    #[test]
    fn test_negotiation_prefers_specific_over_explicit_le() {
        let mut contexts = vec![PresentationContext::new(
            1,
            abstract_syntax::STUDY_ROOT_FIND,
            vec![
                transfer::EXPLICIT_VR_LITTLE_ENDIAN.clone(),
                transfer::IMPLICIT_VR_LITTLE_ENDIAN.clone(),
            ],
        )];
        negotiate(&mut contexts, &supported(), true);
        assert_eq!(
            contexts[0].accepted.as_ref().unwrap().uid,
            transfer::IMPLICIT_VR_LITTLE_ENDIAN.uid
        );

        // Toggled off, first workable proposal wins.
        let mut contexts = vec![PresentationContext::new(
            1,
            abstract_syntax::STUDY_ROOT_FIND,
            vec![
                transfer::EXPLICIT_VR_LITTLE_ENDIAN.clone(),
                transfer::IMPLICIT_VR_LITTLE_ENDIAN.clone(),
            ],
        )];
        negotiate(&mut contexts, &supported(), false);
        assert_eq!(
            contexts[0].accepted.as_ref().unwrap().uid,
            transfer::EXPLICIT_VR_LITTLE_ENDIAN.uid
        );
    }

    #[test]
    fn test_negotiation_rejections() {
        let mut contexts = vec![
            PresentationContext::new(
                1,
                "1.9.9.9",
                vec![transfer::IMPLICIT_VR_LITTLE_ENDIAN.clone()],
            ),
            PresentationContext::new(
                3,
                abstract_syntax::VERIFICATION,
                vec![transfer::JPEG_BASELINE_PROCESS_1.clone()],
            ),
        ];
        negotiate(&mut contexts, &supported(), true);
        assert_eq!(
            contexts[0].result,
            PresentationResult::AbstractSyntaxNotSupported
        );
        assert_eq!(
            contexts[1].result,
            PresentationResult::TransferSyntaxesNotSupported
        );
    }

    #[test]
    fn test_uncompressed_proposals_gain_implicit_fallback() {
        let mut contexts = vec![
            // Uncompressed proposal without implicit LE: fallback appended.
            PresentationContext::new(
                1,
                abstract_syntax::CT_IMAGE_STORAGE,
                vec![transfer::EXPLICIT_VR_LITTLE_ENDIAN.clone()],
            ),
            // Only an undecodable compression: left exactly as proposed.
            PresentationContext::new(
                3,
                abstract_syntax::MR_IMAGE_STORAGE,
                vec![transfer::JPEG_BASELINE_PROCESS_1.clone()],
            ),
            // Already carries implicit LE: untouched.
            PresentationContext::new(
                5,
                abstract_syntax::VERIFICATION,
                vec![transfer::IMPLICIT_VR_LITTLE_ENDIAN.clone()],
            ),
        ];
        ensure_usable_transfer_syntaxes(&mut contexts);

        let uids = |ctx: &PresentationContext| {
            ctx.proposed.iter().map(|ts| ts.uid.clone()).collect::<Vec<_>>()
        };
        assert_eq!(
            uids(&contexts[0]),
            [
                transfer::EXPLICIT_VR_LITTLE_ENDIAN.uid.clone(),
                transfer::IMPLICIT_VR_LITTLE_ENDIAN.uid.clone(),
            ]
        );
        assert_eq!(uids(&contexts[1]), [transfer::JPEG_BASELINE_PROCESS_1.uid.clone()]);
        assert_eq!(uids(&contexts[2]), [transfer::IMPLICIT_VR_LITTLE_ENDIAN.uid.clone()]);
    }

    #[test]
    fn test_reject_round_trip() {
        let pdu = build_rj(Reject {
            result: 1,
            source: 2,
            reason: 3,
        });
        let parsed = parse_rj(&pdu[6..]).unwrap();
        assert_eq!(parsed, Reject { result: 1, source: 2, reason: 3 });
    }
}

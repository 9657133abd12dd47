//! The association state machine
//!
//! One `DicomConnection` drives one TCP association, on either side of it.
//! A single reader task pulls PDUs off the socket through the reassembler
//! and feeds them to the state machine sequentially; everything the peer's
//! traffic triggers happens through the `ConnectionHandler` trait. Writes
//! go through a mutex-guarded write half so a response is never interleaved
//! into another PDU.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dicom_data::codec::ByteReader;
use dicom_data::transfer::{self, TransferSyntax};
use dicom_data::{tags, Dataset, Tag};

use crate::association::{self, PresentationContext, Reject, UserInfo};
use crate::commands::{data_set_type, CommandField, Priority, Status};
use crate::config::DimseConfig;
use crate::error::{DimseError, Result};
use crate::pdu::{Pdu, PduBuilder, PduReassembler, PduType};
use crate::qr::SendableInstance;

/// Lifecycle of an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Associating,
    Associated,
    Releasing,
    Closed,
    Aborted,
}

/// Callbacks invoked by the reader loop. One handler drives one connection;
/// it receives the connection itself to answer with.
#[async_trait]
pub trait ConnectionHandler: Send {
    /// A peer asked to associate and negotiation has already run. The
    /// default accepts when anything was negotiated and rejects otherwise.
    async fn on_association_requested(&mut self, conn: &mut DicomConnection) -> Result<()> {
        if conn.contexts().iter().any(PresentationContext::is_accepted) {
            conn.send_associate_ac().await
        } else {
            conn.send_associate_rj(Reject {
                result: 1,
                source: 1,
                reason: 2,
            })
            .await
        }
    }

    async fn on_association_accepted(&mut self, _conn: &mut DicomConnection) -> Result<()> {
        Ok(())
    }

    async fn on_association_rejected(
        &mut self,
        _conn: &mut DicomConnection,
        _reject: Reject,
    ) -> Result<()> {
        Ok(())
    }

    /// A complete DIMSE message arrived: the command set, and the data set
    /// when the command announced one.
    async fn on_command(
        &mut self,
        conn: &mut DicomConnection,
        field: CommandField,
        command: Dataset,
        data: Option<Dataset>,
    ) -> Result<()>;

    async fn on_closed(&mut self, _conn: &mut DicomConnection) {}
}

/// Pending C-GET service state: instances still to push over this
/// connection and the running sub-operation counters.
struct GetState {
    ctx_id: u8,
    message_id: u16,
    sop_class_uid: String,
    queue: VecDeque<SendableInstance>,
    remaining: u16,
    completed: u16,
    failed: u16,
    warned: u16,
}

pub struct DicomConnection {
    name: String,
    local_aet: String,
    state: ConnectionState,
    read_half: Option<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    my_max_pdu: u32,
    peer_max_pdu: u32,
    prefer_specific: bool,
    supported_abstracts: HashSet<String>,
    contexts: Vec<PresentationContext>,
    identity: Vec<u8>,
    called_ae: String,
    calling_ae: String,
    active_context: Option<u8>,
    command_buf: BytesMut,
    data_buf: BytesMut,
    pending_command: Option<Dataset>,
    next_message_id: u16,
    next_context_id: u8,
    released: bool,
    get_state: Option<GetState>,
}

impl DicomConnection {
    pub fn from_stream(stream: TcpStream, name: impl Into<String>, config: &DimseConfig) -> Self {
        let (read_half, write_half) = stream.into_split();
        DicomConnection {
            name: name.into(),
            local_aet: config.local_aet.clone(),
            state: ConnectionState::Idle,
            read_half: Some(read_half),
            writer: Mutex::new(write_half),
            my_max_pdu: config.max_pdu,
            peer_max_pdu: config.max_pdu,
            prefer_specific: config.prefer_specific_transfer_syntax,
            supported_abstracts: HashSet::new(),
            contexts: Vec::new(),
            identity: Vec::new(),
            called_ae: String::new(),
            calling_ae: String::new(),
            active_context: None,
            command_buf: BytesMut::new(),
            data_buf: BytesMut::new(),
            pending_command: None,
            next_message_id: 1,
            next_context_id: 1,
            released: false,
            get_state: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn called_ae(&self) -> &str {
        &self.called_ae
    }

    pub fn calling_ae(&self) -> &str {
        &self.calling_ae
    }

    pub fn contexts(&self) -> &[PresentationContext] {
        &self.contexts
    }

    /// Whether the association ended with a clean release handshake.
    pub fn released(&self) -> bool {
        self.released
    }

    /// Abstract syntaxes this side will accept as an SCP.
    pub fn set_supported_abstracts<I, S>(&mut self, abstracts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_abstracts = abstracts.into_iter().map(Into::into).collect();
    }

    /// Propose a presentation context for the next ASSOCIATE-RQ. Returns
    /// the assigned (odd) context id.
    pub fn add_presentation_context(
        &mut self,
        abstract_syntax: impl Into<String>,
        proposed: Vec<TransferSyntax>,
    ) -> u8 {
        let id = self.next_context_id;
        self.next_context_id = self.next_context_id.wrapping_add(2);
        self.contexts
            .push(PresentationContext::new(id, abstract_syntax, proposed));
        id
    }

    /// Override the next outbound message id (mostly useful in tests and
    /// when correlating with an external system).
    pub fn set_next_message_id(&mut self, id: u16) {
        self.next_message_id = id.max(1);
    }

    fn gen_message_id(&mut self) -> u16 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1).max(1);
        id
    }

    /// Drive the connection until it closes, is cancelled, or fails.
    pub async fn run(
        &mut self,
        handler: &mut dyn ConnectionHandler,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut read_half = self
            .read_half
            .take()
            .ok_or_else(|| DimseError::internal("connection is already running"))?;
        let mut reassembler = PduReassembler::new();
        let mut buf = BytesMut::with_capacity(64 * 1024);

        let result = loop {
            if matches!(
                self.state,
                ConnectionState::Closed | ConnectionState::Aborted
            ) {
                break Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(name = %self.name, "connection cancelled");
                    let _ = self.send_abort().await;
                    break Ok(());
                }
                read = read_half.read_buf(&mut buf) => match read {
                    Ok(0) => {
                        debug!(name = %self.name, "peer closed the connection");
                        break Ok(());
                    }
                    Ok(_) => {
                        reassembler.push(&buf);
                        buf.clear();
                        let mut failure = None;
                        while let Some(pdu) = reassembler.next_pdu() {
                            if let Err(err) = self.handle_pdu(pdu, handler).await {
                                failure = Some(err);
                                break;
                            }
                            if matches!(
                                self.state,
                                ConnectionState::Closed | ConnectionState::Aborted
                            ) {
                                break;
                            }
                        }
                        if let Some(err) = failure {
                            error!(name = %self.name, error = %err, "protocol failure, aborting");
                            let _ = self.send_abort().await;
                            break Err(err);
                        }
                    }
                    Err(err) => break Err(DimseError::from(err)),
                }
            }
        };

        if self.state != ConnectionState::Aborted {
            self.state = ConnectionState::Closed;
        }
        handler.on_closed(self).await;
        result
    }

    async fn handle_pdu(&mut self, pdu: Pdu, handler: &mut dyn ConnectionHandler) -> Result<()> {
        let Some(pdu_type) = PduType::from_u8(pdu.type_byte) else {
            warn!(name = %self.name, type_byte = pdu.type_byte, "ignoring unknown PDU type");
            return Ok(());
        };
        match pdu_type {
            PduType::AssociateRq => self.handle_associate_rq(&pdu.body, handler).await,
            PduType::AssociateAc => self.handle_associate_ac(&pdu.body, handler).await,
            PduType::AssociateRj => {
                let reject = association::parse_rj(&pdu.body)?;
                warn!(
                    name = %self.name,
                    result = reject.result,
                    source = reject.source,
                    reason = reject.reason,
                    "association rejected"
                );
                self.state = ConnectionState::Closed;
                handler.on_association_rejected(self, reject).await
            }
            PduType::PDataTf => self.handle_pdata(&pdu.body, handler).await,
            PduType::ReleaseRq => {
                debug!(name = %self.name, "peer requested release");
                self.send_release_rp().await?;
                self.released = true;
                self.state = ConnectionState::Closed;
                self.shutdown().await;
                Ok(())
            }
            PduType::ReleaseRp => {
                self.released = true;
                self.state = ConnectionState::Closed;
                self.shutdown().await;
                Ok(())
            }
            PduType::Abort => {
                warn!(name = %self.name, "association aborted by peer");
                self.state = ConnectionState::Aborted;
                Ok(())
            }
        }
    }

    async fn handle_associate_rq(
        &mut self,
        body: &[u8],
        handler: &mut dyn ConnectionHandler,
    ) -> Result<()> {
        let assoc = association::parse(body, false)?;
        info!(
            name = %self.name,
            called = %assoc.called_ae,
            calling = %assoc.calling_ae,
            contexts = assoc.contexts.len(),
            "association requested"
        );
        self.called_ae = assoc.called_ae;
        self.calling_ae = assoc.calling_ae;
        self.identity = assoc.identity;
        self.peer_max_pdu = assoc.user.max_pdu;
        let mut contexts = assoc.contexts;
        association::negotiate(
            &mut contexts,
            &self.supported_abstracts,
            self.prefer_specific,
        );
        self.contexts = contexts;
        self.state = ConnectionState::Associating;
        handler.on_association_requested(self).await
    }

    async fn handle_associate_ac(
        &mut self,
        body: &[u8],
        handler: &mut dyn ConnectionHandler,
    ) -> Result<()> {
        let assoc = association::parse(body, true)?;
        self.peer_max_pdu = assoc.user.max_pdu;
        for reply in assoc.contexts {
            if let Some(mine) = self.contexts.iter_mut().find(|c| c.id == reply.id) {
                mine.result = reply.result;
                mine.accepted = reply.accepted;
            }
        }
        let accepted = self.contexts.iter().filter(|c| c.is_accepted()).count();
        info!(name = %self.name, accepted, "association accepted");
        self.state = ConnectionState::Associated;
        handler.on_association_accepted(self).await
    }

    async fn handle_pdata(
        &mut self,
        body: &[u8],
        handler: &mut dyn ConnectionHandler,
    ) -> Result<()> {
        let mut r = ByteReader::new(body, false);
        while r.remaining() >= 6 {
            let len = r.read_u32_be().map_err(DimseError::from)? as usize;
            if len < 2 {
                return Err(DimseError::protocol("P-DATA item shorter than its header"));
            }
            let ctx_id = r.read_u8().map_err(DimseError::from)?;
            let control = r.read_u8().map_err(DimseError::from)?;
            let payload = r
                .read_bytes(len - 2)
                .map_err(|_| DimseError::protocol("P-DATA item longer than its PDU"))?;
            let is_command = control & 0x01 != 0;
            let last = control & 0x02 != 0;

            self.active_context = Some(ctx_id);
            if is_command {
                self.command_buf.extend_from_slice(payload);
            } else {
                self.data_buf.extend_from_slice(payload);
            }
            if !last {
                continue;
            }

            if is_command {
                // The command set is always implicit VR little-endian.
                let command =
                    Dataset::read_from(&self.command_buf, &transfer::IMPLICIT_VR_LITTLE_ENDIAN)?;
                self.command_buf.clear();
                let has_data =
                    command.u16_value(tags::DATA_SET_TYPE) != Some(data_set_type::NONE);
                if has_data {
                    self.pending_command = Some(command);
                } else {
                    self.dispatch(handler, command, None).await?;
                }
            } else {
                let syntax = self.accepted_syntax(ctx_id)?;
                let data = Dataset::read_from(&self.data_buf, &syntax)?;
                self.data_buf.clear();
                let command = self
                    .pending_command
                    .take()
                    .ok_or_else(|| DimseError::protocol("data set arrived without a command"))?;
                self.dispatch(handler, command, Some(data)).await?;
            }
        }
        Ok(())
    }

    async fn dispatch(
        &mut self,
        handler: &mut dyn ConnectionHandler,
        command: Dataset,
        data: Option<Dataset>,
    ) -> Result<()> {
        let field = command
            .u16_value(tags::COMMAND_FIELD)
            .and_then(CommandField::from_u16);
        let Some(field) = field else {
            warn!(name = %self.name, "ignoring command with unknown command field");
            return Ok(());
        };
        debug!(name = %self.name, command = %field, "dispatching");
        if field == CommandField::CStoreRsp && self.get_state.is_some() {
            self.note_get_store_rsp(&command).await?;
        }
        handler.on_command(self, field, command, data).await
    }

    // ---- outbound: association control ----

    pub async fn send_associate_rq(&mut self, called_ae: &str) -> Result<()> {
        association::ensure_usable_transfer_syntaxes(&mut self.contexts);
        let user = UserInfo {
            max_pdu: self.my_max_pdu,
            ..UserInfo::default()
        };
        let pdu = association::build_rq(called_ae, &self.local_aet, &self.contexts, &user);
        self.state = ConnectionState::Associating;
        self.called_ae = called_ae.to_string();
        self.calling_ae = self.local_aet.clone();
        self.send_pdu(pdu).await
    }

    pub async fn send_associate_ac(&mut self) -> Result<()> {
        let user = UserInfo {
            max_pdu: self.my_max_pdu,
            ..UserInfo::default()
        };
        let pdu = association::build_ac(&self.identity, &self.contexts, &user);
        self.state = ConnectionState::Associated;
        self.send_pdu(pdu).await
    }

    pub async fn send_associate_rj(&mut self, reject: Reject) -> Result<()> {
        let pdu = association::build_rj(reject);
        self.send_pdu(pdu).await?;
        self.state = ConnectionState::Closed;
        self.shutdown().await;
        Ok(())
    }

    pub async fn send_release_rq(&mut self) -> Result<()> {
        let mut builder = PduBuilder::new(PduType::ReleaseRq);
        builder.write_u32(0);
        self.state = ConnectionState::Releasing;
        self.send_pdu(builder.build()).await
    }

    pub async fn send_release_rp(&mut self) -> Result<()> {
        let mut builder = PduBuilder::new(PduType::ReleaseRp);
        builder.write_u32(0);
        self.send_pdu(builder.build()).await
    }

    pub async fn send_abort(&mut self) -> Result<()> {
        let mut builder = PduBuilder::new(PduType::Abort);
        builder.write_u8(0).write_u8(0).write_u8(0).write_u8(0);
        self.send_pdu(builder.build()).await?;
        self.state = ConnectionState::Aborted;
        self.shutdown().await;
        Ok(())
    }

    // ---- outbound: DIMSE operations ----

    pub async fn send_c_echo_rq(&mut self) -> Result<u16> {
        let (ctx_id, _) = self.context_for(crate::commands::abstract_syntax::VERIFICATION)?;
        let message_id = self.gen_message_id();
        let mut cmd = Dataset::new();
        cmd.put_str(
            tags::AFFECTED_SOP_CLASS_UID,
            crate::commands::abstract_syntax::VERIFICATION,
        )?;
        cmd.put_u16(tags::COMMAND_FIELD, CommandField::CEchoRq.as_u16())?;
        cmd.put_u16(tags::MESSAGE_ID, message_id)?;
        cmd.put_u16(tags::DATA_SET_TYPE, data_set_type::NONE)?;
        self.send_dimse(ctx_id, &cmd, None).await?;
        Ok(message_id)
    }

    pub async fn send_c_echo_rsp(&mut self, request: &Dataset, status: Status) -> Result<()> {
        let ctx_id = self.active_ctx()?;
        let mut cmd = Dataset::new();
        cmd.put_str(
            tags::AFFECTED_SOP_CLASS_UID,
            request
                .str_value(tags::AFFECTED_SOP_CLASS_UID)
                .unwrap_or(crate::commands::abstract_syntax::VERIFICATION),
        )?;
        cmd.put_u16(tags::COMMAND_FIELD, CommandField::CEchoRsp.as_u16())?;
        cmd.put_u16(
            tags::MESSAGE_ID_REPLIED_TO,
            request.u16_value(tags::MESSAGE_ID).unwrap_or(0),
        )?;
        cmd.put_u16(tags::DATA_SET_TYPE, data_set_type::NONE)?;
        cmd.put_u16(tags::STATUS, status.0)?;
        self.send_dimse(ctx_id, &cmd, None).await
    }

    /// Send a C-STORE-RQ. `move_originator` annotates stores triggered by a
    /// C-MOVE with the originating AE and message id.
    pub async fn send_c_store_rq(
        &mut self,
        sop_class_uid: &str,
        sop_instance_uid: &str,
        dataset: &Dataset,
        priority: Priority,
        move_originator: Option<(&str, u16)>,
    ) -> Result<u16> {
        let (ctx_id, _) = self.context_for(sop_class_uid)?;
        let message_id = self.gen_message_id();
        let mut cmd = Dataset::new();
        cmd.put_str(tags::AFFECTED_SOP_CLASS_UID, sop_class_uid)?;
        cmd.put_u16(tags::COMMAND_FIELD, CommandField::CStoreRq.as_u16())?;
        cmd.put_u16(tags::MESSAGE_ID, message_id)?;
        cmd.put_u16(tags::PRIORITY, priority.as_u16())?;
        cmd.put_u16(tags::DATA_SET_TYPE, data_set_type::PRESENT)?;
        cmd.put_str(tags::AFFECTED_SOP_INSTANCE_UID, sop_instance_uid)?;
        if let Some((aet, originator_id)) = move_originator {
            cmd.put_str(tags::MOVE_ORIGINATOR_AE_TITLE, aet)?;
            cmd.put_u16(tags::MOVE_ORIGINATOR_MESSAGE_ID, originator_id)?;
        }
        self.send_dimse(ctx_id, &cmd, Some(dataset)).await?;
        Ok(message_id)
    }

    pub async fn send_c_store_rsp(&mut self, request: &Dataset, status: Status) -> Result<()> {
        let ctx_id = self.active_ctx()?;
        let mut cmd = Dataset::new();
        cmd.put_str(
            tags::AFFECTED_SOP_CLASS_UID,
            request
                .str_value(tags::AFFECTED_SOP_CLASS_UID)
                .unwrap_or_default(),
        )?;
        cmd.put_u16(tags::COMMAND_FIELD, CommandField::CStoreRsp.as_u16())?;
        cmd.put_u16(
            tags::MESSAGE_ID_REPLIED_TO,
            request.u16_value(tags::MESSAGE_ID).unwrap_or(0),
        )?;
        cmd.put_u16(tags::DATA_SET_TYPE, data_set_type::NONE)?;
        cmd.put_u16(tags::STATUS, status.0)?;
        cmd.put_str(
            tags::AFFECTED_SOP_INSTANCE_UID,
            request
                .str_value(tags::AFFECTED_SOP_INSTANCE_UID)
                .unwrap_or_default(),
        )?;
        self.send_dimse(ctx_id, &cmd, None).await
    }

    pub async fn send_c_find_rq(
        &mut self,
        abstract_syntax: &str,
        identifier: &Dataset,
    ) -> Result<u16> {
        let (ctx_id, _) = self.context_for(abstract_syntax)?;
        let message_id = self.gen_message_id();
        let mut cmd = Dataset::new();
        cmd.put_str(tags::AFFECTED_SOP_CLASS_UID, abstract_syntax)?;
        cmd.put_u16(tags::COMMAND_FIELD, CommandField::CFindRq.as_u16())?;
        cmd.put_u16(tags::MESSAGE_ID, message_id)?;
        cmd.put_u16(tags::PRIORITY, Priority::Medium.as_u16())?;
        cmd.put_u16(tags::DATA_SET_TYPE, data_set_type::PRESENT)?;
        self.send_dimse(ctx_id, &cmd, Some(identifier)).await?;
        Ok(message_id)
    }

    /// Send a C-FIND-RSP: pending with a row, or final without one.
    pub async fn send_c_find_rsp(
        &mut self,
        request: &Dataset,
        row: Option<&Dataset>,
        status: Status,
    ) -> Result<()> {
        let ctx_id = self.active_ctx()?;
        let mut cmd = Dataset::new();
        cmd.put_str(
            tags::AFFECTED_SOP_CLASS_UID,
            request
                .str_value(tags::AFFECTED_SOP_CLASS_UID)
                .unwrap_or_default(),
        )?;
        cmd.put_u16(tags::COMMAND_FIELD, CommandField::CFindRsp.as_u16())?;
        cmd.put_u16(
            tags::MESSAGE_ID_REPLIED_TO,
            request.u16_value(tags::MESSAGE_ID).unwrap_or(0),
        )?;
        cmd.put_u16(
            tags::DATA_SET_TYPE,
            if row.is_some() {
                data_set_type::PRESENT
            } else {
                data_set_type::NONE
            },
        )?;
        cmd.put_u16(tags::STATUS, status.0)?;
        self.send_dimse(ctx_id, &cmd, row).await
    }

    pub async fn send_c_get_rq(
        &mut self,
        abstract_syntax: &str,
        identifier: &Dataset,
    ) -> Result<u16> {
        let (ctx_id, _) = self.context_for(abstract_syntax)?;
        let message_id = self.gen_message_id();
        let mut cmd = Dataset::new();
        cmd.put_str(tags::AFFECTED_SOP_CLASS_UID, abstract_syntax)?;
        cmd.put_u16(tags::COMMAND_FIELD, CommandField::CGetRq.as_u16())?;
        cmd.put_u16(tags::MESSAGE_ID, message_id)?;
        cmd.put_u16(tags::PRIORITY, Priority::Medium.as_u16())?;
        cmd.put_u16(tags::DATA_SET_TYPE, data_set_type::PRESENT)?;
        self.send_dimse(ctx_id, &cmd, Some(identifier)).await?;
        Ok(message_id)
    }

    pub async fn send_c_move_rq(
        &mut self,
        abstract_syntax: &str,
        destination_aet: &str,
        identifier: &Dataset,
    ) -> Result<u16> {
        let (ctx_id, _) = self.context_for(abstract_syntax)?;
        let message_id = self.gen_message_id();
        let mut cmd = Dataset::new();
        cmd.put_str(tags::AFFECTED_SOP_CLASS_UID, abstract_syntax)?;
        cmd.put_u16(tags::COMMAND_FIELD, CommandField::CMoveRq.as_u16())?;
        cmd.put_u16(tags::MESSAGE_ID, message_id)?;
        cmd.put_str(tags::MOVE_DESTINATION, destination_aet)?;
        cmd.put_u16(tags::PRIORITY, Priority::Medium.as_u16())?;
        cmd.put_u16(tags::DATA_SET_TYPE, data_set_type::PRESENT)?;
        self.send_dimse(ctx_id, &cmd, Some(identifier)).await?;
        Ok(message_id)
    }

    pub async fn send_c_get_rsp(
        &mut self,
        request: &Dataset,
        status: Status,
        remaining: u16,
        completed: u16,
        failed: u16,
        warned: u16,
    ) -> Result<()> {
        let ctx_id = self.active_ctx()?;
        let cmd = Self::sub_op_rsp(
            CommandField::CGetRsp,
            request,
            status,
            remaining,
            completed,
            failed,
            warned,
        )?;
        self.send_dimse(ctx_id, &cmd, None).await
    }

    pub async fn send_c_move_rsp(
        &mut self,
        request: &Dataset,
        status: Status,
        remaining: u16,
        completed: u16,
        failed: u16,
        warned: u16,
    ) -> Result<()> {
        let ctx_id = self.active_ctx()?;
        let cmd = Self::sub_op_rsp(
            CommandField::CMoveRsp,
            request,
            status,
            remaining,
            completed,
            failed,
            warned,
        )?;
        self.send_dimse(ctx_id, &cmd, None).await
    }

    pub async fn send_c_cancel_rq(
        &mut self,
        abstract_syntax: &str,
        message_id: u16,
    ) -> Result<()> {
        let (ctx_id, _) = self.context_for(abstract_syntax)?;
        let mut cmd = Dataset::new();
        cmd.put_u16(tags::COMMAND_FIELD, CommandField::CCancelRq.as_u16())?;
        cmd.put_u16(tags::MESSAGE_ID_REPLIED_TO, message_id)?;
        cmd.put_u16(tags::DATA_SET_TYPE, data_set_type::NONE)?;
        self.send_dimse(ctx_id, &cmd, None).await
    }

    pub async fn send_n_get_rq(
        &mut self,
        sop_class_uid: &str,
        sop_instance_uid: &str,
        attributes: &[Tag],
    ) -> Result<u16> {
        let (ctx_id, _) = self.context_for(sop_class_uid)?;
        let message_id = self.gen_message_id();
        let mut cmd = Dataset::new();
        cmd.put_str(tags::REQUESTED_SOP_CLASS_UID, sop_class_uid)?;
        cmd.put_u16(tags::COMMAND_FIELD, CommandField::NGetRq.as_u16())?;
        cmd.put_u16(tags::MESSAGE_ID, message_id)?;
        cmd.put_u16(tags::DATA_SET_TYPE, data_set_type::NONE)?;
        cmd.put_str(tags::REQUESTED_SOP_INSTANCE_UID, sop_instance_uid)?;
        if let Some(first) = attributes.first() {
            // The attribute list is a multi-valued AT; this implementation
            // sends the first requested attribute only.
            cmd.entry(tags::ATTRIBUTE_IDENTIFIER_LIST).set_tag_ref(*first)?;
        }
        self.send_dimse(ctx_id, &cmd, None).await?;
        Ok(message_id)
    }

    pub async fn send_n_get_rsp(
        &mut self,
        request: &Dataset,
        status: Status,
        data: Option<&Dataset>,
    ) -> Result<()> {
        let ctx_id = self.active_ctx()?;
        let mut cmd = Dataset::new();
        cmd.put_str(
            tags::AFFECTED_SOP_CLASS_UID,
            request
                .str_value(tags::REQUESTED_SOP_CLASS_UID)
                .unwrap_or_default(),
        )?;
        cmd.put_u16(tags::COMMAND_FIELD, CommandField::NGetRsp.as_u16())?;
        cmd.put_u16(
            tags::MESSAGE_ID_REPLIED_TO,
            request.u16_value(tags::MESSAGE_ID).unwrap_or(0),
        )?;
        cmd.put_u16(
            tags::DATA_SET_TYPE,
            if data.is_some() {
                data_set_type::PRESENT
            } else {
                data_set_type::NONE
            },
        )?;
        cmd.put_u16(tags::STATUS, status.0)?;
        self.send_dimse(ctx_id, &cmd, data).await
    }

    pub async fn send_n_action_rq(
        &mut self,
        sop_class_uid: &str,
        sop_instance_uid: &str,
        action_type_id: u16,
    ) -> Result<u16> {
        let (ctx_id, _) = self.context_for(sop_class_uid)?;
        let message_id = self.gen_message_id();
        let mut cmd = Dataset::new();
        cmd.put_str(tags::REQUESTED_SOP_CLASS_UID, sop_class_uid)?;
        cmd.put_u16(tags::COMMAND_FIELD, CommandField::NActionRq.as_u16())?;
        cmd.put_u16(tags::MESSAGE_ID, message_id)?;
        cmd.put_u16(tags::DATA_SET_TYPE, data_set_type::NONE)?;
        cmd.put_str(tags::REQUESTED_SOP_INSTANCE_UID, sop_instance_uid)?;
        cmd.put_u16(tags::ACTION_TYPE_ID, action_type_id)?;
        self.send_dimse(ctx_id, &cmd, None).await?;
        Ok(message_id)
    }

    pub async fn send_n_action_rsp(&mut self, request: &Dataset, status: Status) -> Result<()> {
        let ctx_id = self.active_ctx()?;
        let mut cmd = Dataset::new();
        cmd.put_str(
            tags::AFFECTED_SOP_CLASS_UID,
            request
                .str_value(tags::REQUESTED_SOP_CLASS_UID)
                .unwrap_or_default(),
        )?;
        cmd.put_u16(tags::COMMAND_FIELD, CommandField::NActionRsp.as_u16())?;
        cmd.put_u16(
            tags::MESSAGE_ID_REPLIED_TO,
            request.u16_value(tags::MESSAGE_ID).unwrap_or(0),
        )?;
        cmd.put_u16(tags::DATA_SET_TYPE, data_set_type::NONE)?;
        cmd.put_u16(tags::STATUS, status.0)?;
        self.send_dimse(ctx_id, &cmd, None).await
    }

    // ---- C-GET service: queued stores over this same association ----

    /// Begin serving a C-GET: queue the located instances and push the
    /// first one. Progress is driven by the requester's C-STORE-RSPs.
    pub async fn start_get_response(
        &mut self,
        request: &Dataset,
        files: VecDeque<SendableInstance>,
    ) -> Result<()> {
        let ctx_id = self.active_ctx()?;
        self.get_state = Some(GetState {
            ctx_id,
            message_id: request.u16_value(tags::MESSAGE_ID).unwrap_or(0),
            sop_class_uid: request
                .str_value(tags::AFFECTED_SOP_CLASS_UID)
                .unwrap_or_default()
                .to_string(),
            remaining: files.len() as u16,
            completed: 0,
            failed: 0,
            warned: 0,
            queue: files,
        });
        self.send_next_get_instance().await
    }

    async fn note_get_store_rsp(&mut self, command: &Dataset) -> Result<()> {
        let status = Status(command.u16_value(tags::STATUS).unwrap_or(0));
        if let Some(state) = self.get_state.as_mut() {
            if status.is_success() {
                state.completed += 1;
            } else if status.is_warning() {
                state.warned += 1;
            } else {
                state.failed += 1;
            }
            state.remaining = state.remaining.saturating_sub(1);
        }
        self.send_next_get_instance().await
    }

    async fn send_next_get_instance(&mut self) -> Result<()> {
        loop {
            let (ctx_id, message_id, sop_class, counts, next) = {
                let Some(state) = self.get_state.as_mut() else {
                    return Ok(());
                };
                (
                    state.ctx_id,
                    state.message_id,
                    state.sop_class_uid.clone(),
                    (state.remaining, state.completed, state.failed, state.warned),
                    state.queue.pop_front(),
                )
            };
            let Some(instance) = next else {
                self.get_state = None;
                let status = if counts.2 > 0 {
                    Status::WARNING_SUB_OPS_COMPLETE
                } else {
                    Status::SUCCESS
                };
                let cmd = Self::get_rsp_command(
                    message_id, &sop_class, status, 0, counts.1, counts.2, counts.3,
                )?;
                return self.send_dimse(ctx_id, &cmd, None).await;
            };

            let cmd = Self::get_rsp_command(
                message_id,
                &sop_class,
                Status::PENDING,
                counts.0,
                counts.1,
                counts.2,
                counts.3,
            )?;
            self.send_dimse(ctx_id, &cmd, None).await?;

            let sent = match instance.load().await {
                Ok(dataset) => self
                    .send_c_store_rq(
                        &instance.sop_class_uid,
                        &instance.sop_instance_uid,
                        &dataset,
                        Priority::Medium,
                        None,
                    )
                    .await
                    .map(|_| ()),
                Err(err) => Err(err),
            };
            match sent {
                // Wait for the requester's C-STORE-RSP.
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(
                        name = %self.name,
                        instance = %instance.sop_instance_uid,
                        error = %err,
                        "could not send queued instance"
                    );
                    if let Some(state) = self.get_state.as_mut() {
                        state.failed += 1;
                        state.remaining = state.remaining.saturating_sub(1);
                    }
                }
            }
        }
    }

    fn get_rsp_command(
        message_id: u16,
        sop_class_uid: &str,
        status: Status,
        remaining: u16,
        completed: u16,
        failed: u16,
        warned: u16,
    ) -> Result<Dataset> {
        let mut cmd = Dataset::new();
        cmd.put_str(tags::AFFECTED_SOP_CLASS_UID, sop_class_uid)?;
        cmd.put_u16(tags::COMMAND_FIELD, CommandField::CGetRsp.as_u16())?;
        cmd.put_u16(tags::MESSAGE_ID_REPLIED_TO, message_id)?;
        cmd.put_u16(tags::DATA_SET_TYPE, data_set_type::NONE)?;
        cmd.put_u16(tags::STATUS, status.0)?;
        cmd.put_u16(tags::NUMBER_OF_REMAINING_SUBOPERATIONS, remaining)?;
        cmd.put_u16(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS, completed)?;
        cmd.put_u16(tags::NUMBER_OF_FAILED_SUBOPERATIONS, failed)?;
        cmd.put_u16(tags::NUMBER_OF_WARNING_SUBOPERATIONS, warned)?;
        Ok(cmd)
    }

    fn sub_op_rsp(
        field: CommandField,
        request: &Dataset,
        status: Status,
        remaining: u16,
        completed: u16,
        failed: u16,
        warned: u16,
    ) -> Result<Dataset> {
        let mut cmd = Dataset::new();
        cmd.put_str(
            tags::AFFECTED_SOP_CLASS_UID,
            request
                .str_value(tags::AFFECTED_SOP_CLASS_UID)
                .unwrap_or_default(),
        )?;
        cmd.put_u16(tags::COMMAND_FIELD, field.as_u16())?;
        cmd.put_u16(
            tags::MESSAGE_ID_REPLIED_TO,
            request.u16_value(tags::MESSAGE_ID).unwrap_or(0),
        )?;
        cmd.put_u16(tags::DATA_SET_TYPE, data_set_type::NONE)?;
        cmd.put_u16(tags::STATUS, status.0)?;
        cmd.put_u16(tags::NUMBER_OF_REMAINING_SUBOPERATIONS, remaining)?;
        cmd.put_u16(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS, completed)?;
        cmd.put_u16(tags::NUMBER_OF_FAILED_SUBOPERATIONS, failed)?;
        cmd.put_u16(tags::NUMBER_OF_WARNING_SUBOPERATIONS, warned)?;
        Ok(cmd)
    }

    // ---- plumbing ----

    fn active_ctx(&self) -> Result<u8> {
        self.active_context
            .ok_or_else(|| DimseError::MissingContext("no active presentation context".into()))
    }

    fn context_for(&self, abstract_uid: &str) -> Result<(u8, TransferSyntax)> {
        for ctx in &self.contexts {
            if ctx.is_accepted() && ctx.abstract_syntax == abstract_uid {
                if let Some(ts) = &ctx.accepted {
                    return Ok((ctx.id, ts.clone()));
                }
            }
        }
        Err(DimseError::MissingContext(abstract_uid.to_string()))
    }

    fn accepted_syntax(&self, ctx_id: u8) -> Result<TransferSyntax> {
        self.contexts
            .iter()
            .find(|c| c.id == ctx_id && c.is_accepted())
            .and_then(|c| c.accepted.clone())
            .ok_or_else(|| {
                DimseError::MissingContext(format!("presentation context {ctx_id}"))
            })
    }

    async fn send_dimse(
        &mut self,
        ctx_id: u8,
        command: &Dataset,
        data: Option<&Dataset>,
    ) -> Result<()> {
        let syntax = self.accepted_syntax(ctx_id)?;
        let cmd_bytes = command.to_bytes(&transfer::IMPLICIT_VR_LITTLE_ENDIAN, true);
        self.send_pdata(ctx_id, &cmd_bytes, true).await?;
        if let Some(ds) = data {
            let data_bytes = ds.to_bytes(&syntax, true);
            self.send_pdata(ctx_id, &data_bytes, false).await?;
        }
        Ok(())
    }

    /// Fragment a command or data stream into P-DATA-TF PDUs sized to the
    /// peer's receive limit.
    async fn send_pdata(&self, ctx_id: u8, payload: &[u8], command: bool) -> Result<()> {
        let max_chunk = self.peer_max_pdu.saturating_sub(12).max(16) as usize;
        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![&[][..]]
        } else {
            payload.chunks(max_chunk).collect()
        };
        let count = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut control = 0u8;
            if command {
                control |= 0x01;
            }
            if i + 1 == count {
                control |= 0x02;
            }
            let mut builder = PduBuilder::new(PduType::PDataTf);
            builder.write_u32(chunk.len() as u32 + 2);
            builder.write_u8(ctx_id);
            builder.write_u8(control);
            builder.write_bytes(chunk);
            self.send_pdu(builder.build()).await?;
        }
        Ok(())
    }

    async fn send_pdu(&self, pdu: Bytes) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(&pdu).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::abstract_syntax;
    use tokio::net::TcpListener;

    fn test_config(aet: &str) -> DimseConfig {
        DimseConfig {
            local_aet: aet.to_string(),
            ..DimseConfig::default()
        }
    }

    fn default_syntaxes() -> Vec<TransferSyntax> {
        vec![
            transfer::IMPLICIT_VR_LITTLE_ENDIAN.clone(),
            transfer::EXPLICIT_VR_LITTLE_ENDIAN.clone(),
        ]
    }

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[derive(Default)]
    struct EchoScp;

    #[async_trait]
    impl ConnectionHandler for EchoScp {
        async fn on_command(
            &mut self,
            conn: &mut DicomConnection,
            field: CommandField,
            command: Dataset,
            _data: Option<Dataset>,
        ) -> Result<()> {
            if field == CommandField::CEchoRq {
                conn.send_c_echo_rsp(&command, Status::SUCCESS).await?;
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct EchoScu {
        replied_to: Option<u16>,
        status: Option<u16>,
    }

    #[async_trait]
    impl ConnectionHandler for EchoScu {
        async fn on_association_accepted(&mut self, conn: &mut DicomConnection) -> Result<()> {
            conn.send_c_echo_rq().await?;
            Ok(())
        }

        async fn on_command(
            &mut self,
            conn: &mut DicomConnection,
            field: CommandField,
            command: Dataset,
            _data: Option<Dataset>,
        ) -> Result<()> {
            if field == CommandField::CEchoRsp {
                self.replied_to = command.u16_value(tags::MESSAGE_ID_REPLIED_TO);
                self.status = command.u16_value(tags::STATUS);
                conn.send_release_rq().await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_verification_exchange() {
        let (client_stream, server_stream) = socket_pair().await;

        let server = tokio::spawn(async move {
            let mut conn =
                DicomConnection::from_stream(server_stream, "server", &test_config("SCP"));
            conn.set_supported_abstracts([abstract_syntax::VERIFICATION]);
            let mut handler = EchoScp::default();
            conn.run(&mut handler, &CancellationToken::new())
                .await
                .unwrap();
            conn.released()
        });

        let mut conn = DicomConnection::from_stream(client_stream, "client", &test_config("SCU"));
        conn.add_presentation_context(abstract_syntax::VERIFICATION, default_syntaxes());
        conn.set_next_message_id(7);
        conn.send_associate_rq("SCP").await.unwrap();
        let mut handler = EchoScu::default();
        conn.run(&mut handler, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(handler.replied_to, Some(7));
        assert_eq!(handler.status, Some(0));
        assert!(conn.released());
        assert!(server.await.unwrap());
    }

    struct FindScp {
        rows: Vec<Dataset>,
    }

    #[async_trait]
    impl ConnectionHandler for FindScp {
        async fn on_command(
            &mut self,
            conn: &mut DicomConnection,
            field: CommandField,
            command: Dataset,
            _data: Option<Dataset>,
        ) -> Result<()> {
            if field == CommandField::CFindRq {
                for row in &self.rows {
                    conn.send_c_find_rsp(&command, Some(row), Status::PENDING)
                        .await?;
                }
                conn.send_c_find_rsp(&command, None, Status::SUCCESS).await?;
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FindScu {
        rows: Vec<Dataset>,
        done: bool,
    }

    #[async_trait]
    impl ConnectionHandler for FindScu {
        async fn on_association_accepted(&mut self, conn: &mut DicomConnection) -> Result<()> {
            let mut identifier = Dataset::new();
            identifier.put_str(tags::QUERY_RETRIEVE_LEVEL, "STUDY")?;
            identifier.put_str(tags::PATIENT_ID, "")?;
            conn.send_c_find_rq(abstract_syntax::STUDY_ROOT_FIND, &identifier)
                .await?;
            Ok(())
        }

        async fn on_command(
            &mut self,
            conn: &mut DicomConnection,
            field: CommandField,
            command: Dataset,
            data: Option<Dataset>,
        ) -> Result<()> {
            if field == CommandField::CFindRsp {
                let status = Status(command.u16_value(tags::STATUS).unwrap_or(0));
                if let Some(row) = data {
                    self.rows.push(row);
                }
                if !status.is_pending() {
                    self.done = status.is_success();
                    conn.send_release_rq().await?;
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_find_exchange_streams_rows() {
        let (client_stream, server_stream) = socket_pair().await;

        let server = tokio::spawn(async move {
            let mut conn =
                DicomConnection::from_stream(server_stream, "server", &test_config("SCP"));
            conn.set_supported_abstracts([abstract_syntax::STUDY_ROOT_FIND]);
            let mut row_a = Dataset::new();
            row_a.put_str(tags::PATIENT_ID, "PID001").unwrap();
            let mut row_b = Dataset::new();
            row_b.put_str(tags::PATIENT_ID, "PID002").unwrap();
            let mut handler = FindScp {
                rows: vec![row_a, row_b],
            };
            conn.run(&mut handler, &CancellationToken::new())
                .await
                .unwrap();
        });

        let mut conn = DicomConnection::from_stream(client_stream, "client", &test_config("SCU"));
        conn.add_presentation_context(abstract_syntax::STUDY_ROOT_FIND, default_syntaxes());
        conn.send_associate_rq("SCP").await.unwrap();
        let mut handler = FindScu::default();
        conn.run(&mut handler, &CancellationToken::new())
            .await
            .unwrap();

        assert!(handler.done);
        assert_eq!(handler.rows.len(), 2);
        assert_eq!(handler.rows[0].str_value(tags::PATIENT_ID), Some("PID001"));
        assert_eq!(handler.rows[1].str_value(tags::PATIENT_ID), Some("PID002"));
        server.await.unwrap();
    }

    struct StoreScp {
        stored: Option<Dataset>,
    }

    #[async_trait]
    impl ConnectionHandler for StoreScp {
        async fn on_command(
            &mut self,
            conn: &mut DicomConnection,
            field: CommandField,
            command: Dataset,
            data: Option<Dataset>,
        ) -> Result<()> {
            if field == CommandField::CStoreRq {
                self.stored = data;
                conn.send_c_store_rsp(&command, Status::SUCCESS).await?;
            }
            Ok(())
        }
    }

    struct StoreScu {
        dataset: Option<Dataset>,
        status: Option<u16>,
    }

    #[async_trait]
    impl ConnectionHandler for StoreScu {
        async fn on_association_accepted(&mut self, conn: &mut DicomConnection) -> Result<()> {
            if let Some(ds) = self.dataset.take() {
                conn.send_c_store_rq(
                    abstract_syntax::CT_IMAGE_STORAGE,
                    "1.2.3.4",
                    &ds,
                    Priority::Medium,
                    Some(("MOVE_SCU", 42)),
                )
                .await?;
            }
            Ok(())
        }

        async fn on_command(
            &mut self,
            conn: &mut DicomConnection,
            field: CommandField,
            command: Dataset,
            _data: Option<Dataset>,
        ) -> Result<()> {
            if field == CommandField::CStoreRsp {
                self.status = command.u16_value(tags::STATUS);
                conn.send_release_rq().await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_exchange_round_trips_dataset() {
        let (client_stream, server_stream) = socket_pair().await;

        let server = tokio::spawn(async move {
            let mut config = test_config("SCP");
            // Tiny PDU limit to force multi-fragment data streams.
            config.max_pdu = 4096;
            let mut conn = DicomConnection::from_stream(server_stream, "server", &config);
            conn.set_supported_abstracts([abstract_syntax::CT_IMAGE_STORAGE]);
            let mut handler = StoreScp { stored: None };
            conn.run(&mut handler, &CancellationToken::new())
                .await
                .unwrap();
            handler.stored
        });

        let mut ds = Dataset::new();
        ds.put_str(tags::SOP_CLASS_UID, abstract_syntax::CT_IMAGE_STORAGE)
            .unwrap();
        ds.put_str(tags::SOP_INSTANCE_UID, "1.2.3.4").unwrap();
        ds.put_u16(tags::ROWS, 64).unwrap();
        ds.entry(tags::PIXEL_DATA).set_bytes(vec![7u8; 32 * 1024]).unwrap();

        let mut conn = DicomConnection::from_stream(client_stream, "client", &test_config("SCU"));
        conn.add_presentation_context(abstract_syntax::CT_IMAGE_STORAGE, default_syntaxes());
        conn.send_associate_rq("SCP").await.unwrap();
        let mut handler = StoreScu {
            dataset: Some(ds),
            status: None,
        };
        conn.run(&mut handler, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(handler.status, Some(0));
        let stored = server.await.unwrap().expect("server kept the dataset");
        assert_eq!(stored.u16_value(tags::ROWS), Some(64));
        assert_eq!(stored.get(tags::PIXEL_DATA).unwrap().bytes().unwrap().len(), 32 * 1024);
    }

    #[tokio::test]
    async fn test_send_without_context_fails_fast() {
        let (client_stream, _server_stream) = socket_pair().await;
        let mut conn = DicomConnection::from_stream(client_stream, "client", &test_config("SCU"));
        let err = conn.send_c_echo_rq().await.unwrap_err();
        assert!(matches!(err, DimseError::MissingContext(_)));
    }
}

//! Service class user
//!
//! `DicomScu` opens one association per operation against a configured
//! remote node: verification, query, store, and the two retrieval flavors.
//! Find and move results are streamed through a channel so callers can
//! consume rows as the peer produces them.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dicom_data::transfer::{self, TransferSyntax};
use dicom_data::{tags, Dataset};

use crate::association::Reject;
use crate::commands::{abstract_syntax, CommandField, Priority, Status};
use crate::config::{DimseConfig, RemoteNode};
use crate::connection::{ConnectionHandler, DicomConnection};
use crate::error::{DimseError, Result};
use crate::qr::{QrRequest, SendableInstance};

/// Outcome of a store run: one association, many C-STOREs.
#[derive(Debug, Default)]
pub struct SendReport {
    pub sent: u32,
    pub warned: u32,
    pub failed: u32,
    /// Final status per SOP instance, in send order.
    pub statuses: Vec<(String, Status)>,
}

impl SendReport {
    pub fn all_sent(&self) -> bool {
        self.failed == 0
    }
}

/// One C-MOVE-RSP worth of progress.
#[derive(Debug, Clone, Copy)]
pub struct MoveProgress {
    pub status: Status,
    pub remaining: u16,
    pub completed: u16,
    pub failed: u16,
    pub warned: u16,
}

impl MoveProgress {
    fn from_command(command: &Dataset) -> Self {
        MoveProgress {
            status: Status(command.u16_value(tags::STATUS).unwrap_or(0)),
            remaining: command
                .u16_value(tags::NUMBER_OF_REMAINING_SUBOPERATIONS)
                .unwrap_or(0),
            completed: command
                .u16_value(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS)
                .unwrap_or(0),
            failed: command
                .u16_value(tags::NUMBER_OF_FAILED_SUBOPERATIONS)
                .unwrap_or(0),
            warned: command
                .u16_value(tags::NUMBER_OF_WARNING_SUBOPERATIONS)
                .unwrap_or(0),
        }
    }
}

pub struct DicomScu {
    config: DimseConfig,
    remote: RemoteNode,
}

impl DicomScu {
    pub fn new(config: DimseConfig, remote: RemoteNode) -> Result<Self> {
        config.validate()?;
        remote.validate()?;
        Ok(DicomScu { config, remote })
    }

    pub fn remote(&self) -> &RemoteNode {
        &self.remote
    }

    fn proposed_syntaxes() -> Vec<TransferSyntax> {
        vec![
            transfer::EXPLICIT_VR_LITTLE_ENDIAN.clone(),
            transfer::IMPLICIT_VR_LITTLE_ENDIAN.clone(),
        ]
    }

    async fn connect(&self, name: &str) -> Result<DicomConnection> {
        let timeout = self
            .remote
            .connect_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.connect_timeout());
        let addr = self.remote.addr();
        debug!(%addr, "connecting");
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| DimseError::Timeout(format!("connecting to {addr}")))??;
        let mut config = self.config.clone();
        if let Some(max_pdu) = self.remote.max_pdu {
            config.max_pdu = max_pdu;
        }
        Ok(DicomConnection::from_stream(stream, name, &config))
    }

    /// C-ECHO the remote node.
    pub async fn echo(&self) -> Result<()> {
        let mut conn = self.connect("echo-scu").await?;
        conn.add_presentation_context(abstract_syntax::VERIFICATION, Self::proposed_syntaxes());
        conn.send_associate_rq(&self.remote.ae_title).await?;

        let mut driver = EchoDriver::default();
        tokio::time::timeout(
            self.config.association_timeout(),
            conn.run(&mut driver, &CancellationToken::new()),
        )
        .await
        .map_err(|_| DimseError::Timeout("verification exchange".into()))??;

        if let Some(reject) = driver.rejected {
            return Err(DimseError::AssociationRejected(format!(
                "result {} source {} reason {}",
                reject.result, reject.source, reject.reason
            )));
        }
        match driver.status {
            Some(status) if status.is_success() => {
                info!(remote = %self.remote.ae_title, "verification succeeded");
                Ok(())
            }
            Some(status) => Err(DimseError::operation_failed(format!(
                "C-ECHO returned {status}"
            ))),
            None => Err(DimseError::operation_failed(
                "association closed before C-ECHO-RSP",
            )),
        }
    }

    /// C-FIND: returns a stream of identifier rows. The stream ends after
    /// the final response; a non-success final status or transport failure
    /// surfaces as a trailing `Err` item.
    pub async fn find(&self, request: QrRequest) -> Result<ReceiverStream<Result<Dataset>>> {
        let abstract_uid = request.model.find_uid();
        let identifier = request.into_identifier()?;

        let mut conn = self.connect("find-scu").await?;
        conn.add_presentation_context(abstract_uid, Self::proposed_syntaxes());
        conn.send_associate_rq(&self.remote.ae_title).await?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut driver = FindDriver {
                abstract_uid,
                identifier,
                tx: tx.clone(),
            };
            if let Err(err) = conn.run(&mut driver, &CancellationToken::new()).await {
                let _ = tx.send(Err(err)).await;
            }
        });
        Ok(ReceiverStream::new(rx))
    }

    /// One context per SOP class, proposing the syntax each instance is
    /// stored in. Opaque sources default to explicit little-endian; the
    /// connection appends the implicit fallback for anything decodable.
    fn store_contexts(instances: &[SendableInstance]) -> Vec<(String, Vec<TransferSyntax>)> {
        let mut contexts: Vec<(String, Vec<TransferSyntax>)> = Vec::new();
        for instance in instances {
            let syntax = instance
                .declared_syntax()
                .unwrap_or_else(|| transfer::EXPLICIT_VR_LITTLE_ENDIAN.clone());
            match contexts
                .iter_mut()
                .find(|(class, _)| class == &instance.sop_class_uid)
            {
                Some((_, syntaxes)) => {
                    if !syntaxes.contains(&syntax) {
                        syntaxes.push(syntax);
                    }
                }
                None => contexts.push((instance.sop_class_uid.clone(), vec![syntax])),
            }
        }
        contexts
    }

    /// C-STORE every instance over a single association.
    pub async fn send(&self, instances: Vec<SendableInstance>) -> Result<SendReport> {
        let mut conn = self.connect("store-scu").await?;
        for (class, syntaxes) in Self::store_contexts(&instances) {
            conn.add_presentation_context(class, syntaxes);
        }
        conn.send_associate_rq(&self.remote.ae_title).await?;

        let mut driver = StoreDriver {
            queue: instances.into(),
            in_flight: None,
            report: SendReport::default(),
            rejected: None,
        };
        conn.run(&mut driver, &CancellationToken::new()).await?;

        if let Some(reject) = driver.rejected {
            return Err(DimseError::AssociationRejected(format!(
                "result {} source {} reason {}",
                reject.result, reject.source, reject.reason
            )));
        }
        Ok(driver.report)
    }

    /// C-MOVE to `destination_aet`: returns a stream of progress updates,
    /// one per C-MOVE-RSP, ending with the final one.
    pub async fn move_request(
        &self,
        request: QrRequest,
        destination_aet: &str,
    ) -> Result<ReceiverStream<Result<MoveProgress>>> {
        let abstract_uid = request.model.move_uid().ok_or_else(|| {
            DimseError::NotSupported(format!("{:?} has no move model", request.model))
        })?;
        let identifier = request.into_identifier()?;
        let destination = destination_aet.to_string();

        let mut conn = self.connect("move-scu").await?;
        conn.add_presentation_context(abstract_uid, Self::proposed_syntaxes());
        conn.send_associate_rq(&self.remote.ae_title).await?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut driver = MoveDriver {
                abstract_uid,
                destination,
                identifier,
                tx: tx.clone(),
            };
            if let Err(err) = conn.run(&mut driver, &CancellationToken::new()).await {
                let _ = tx.send(Err(err)).await;
            }
        });
        Ok(ReceiverStream::new(rx))
    }

    /// C-GET: instances come back as C-STOREs on the same association and
    /// are collected in memory.
    pub async fn get(&self, request: QrRequest) -> Result<Vec<Dataset>> {
        let abstract_uid = request.model.get_uid().ok_or_else(|| {
            DimseError::NotSupported(format!("{:?} has no get model", request.model))
        })?;
        let identifier = request.into_identifier()?;

        let mut conn = self.connect("get-scu").await?;
        conn.add_presentation_context(abstract_uid, Self::proposed_syntaxes());
        for class in abstract_syntax::storage_classes() {
            conn.add_presentation_context(class, Self::proposed_syntaxes());
        }
        conn.send_associate_rq(&self.remote.ae_title).await?;

        let mut driver = GetDriver {
            abstract_uid,
            identifier,
            received: Vec::new(),
            final_status: None,
        };
        conn.run(&mut driver, &CancellationToken::new()).await?;

        match driver.final_status {
            Some(status)
                if status.is_success()
                    || status.is_warning()
                    || status == Status::WARNING_SUB_OPS_COMPLETE =>
            {
                Ok(driver.received)
            }
            Some(status) => Err(DimseError::operation_failed(format!(
                "C-GET finished with {status}"
            ))),
            None => Err(DimseError::operation_failed(
                "association closed before the final C-GET-RSP",
            )),
        }
    }
}

#[derive(Default)]
struct EchoDriver {
    status: Option<Status>,
    rejected: Option<Reject>,
}

#[async_trait]
impl ConnectionHandler for EchoDriver {
    async fn on_association_accepted(&mut self, conn: &mut DicomConnection) -> Result<()> {
        conn.send_c_echo_rq().await?;
        Ok(())
    }

    async fn on_association_rejected(
        &mut self,
        _conn: &mut DicomConnection,
        reject: Reject,
    ) -> Result<()> {
        self.rejected = Some(reject);
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
            self.status = Some(Status(command.u16_value(tags::STATUS).unwrap_or(0)));
            conn.send_release_rq().await?;
        }
        Ok(())
    }
}

struct FindDriver {
    abstract_uid: &'static str,
    identifier: Dataset,
    tx: mpsc::Sender<Result<Dataset>>,
}

#[async_trait]
impl ConnectionHandler for FindDriver {
    async fn on_association_accepted(&mut self, conn: &mut DicomConnection) -> Result<()> {
        conn.send_c_find_rq(self.abstract_uid, &self.identifier)
            .await?;
        Ok(())
    }

    async fn on_association_rejected(
        &mut self,
        _conn: &mut DicomConnection,
        reject: Reject,
    ) -> Result<()> {
        let _ = self
            .tx
            .send(Err(DimseError::AssociationRejected(format!(
                "result {} source {} reason {}",
                reject.result, reject.source, reject.reason
            ))))
            .await;
        Ok(())
    }

    async fn on_command(
        &mut self,
        conn: &mut DicomConnection,
        field: CommandField,
        command: Dataset,
        data: Option<Dataset>,
    ) -> Result<()> {
        if field != CommandField::CFindRsp {
            return Ok(());
        }
        let status = Status(command.u16_value(tags::STATUS).unwrap_or(0));
        if let Some(row) = data {
            if self.tx.send(Ok(row)).await.is_err() {
                // Receiver gone; tell the peer to stop producing.
                debug!("find consumer dropped, cancelling");
                let message_id = command.u16_value(tags::MESSAGE_ID_REPLIED_TO).unwrap_or(0);
                conn.send_c_cancel_rq(self.abstract_uid, message_id).await?;
                conn.send_release_rq().await?;
                return Ok(());
            }
        }
        if !status.is_pending() {
            if !status.is_success() && !status.is_cancel() {
                let _ = self
                    .tx
                    .send(Err(DimseError::operation_failed(format!(
                        "C-FIND finished with {status}"
                    ))))
                    .await;
            }
            conn.send_release_rq().await?;
        }
        Ok(())
    }
}

struct StoreDriver {
    queue: VecDeque<SendableInstance>,
    in_flight: Option<String>,
    report: SendReport,
    rejected: Option<Reject>,
}

impl StoreDriver {
    async fn send_next(&mut self, conn: &mut DicomConnection) -> Result<()> {
        loop {
            let Some(instance) = self.queue.pop_front() else {
                conn.send_release_rq().await?;
                return Ok(());
            };
            let outcome = match instance.load().await {
                Ok(dataset) => {
                    conn.send_c_store_rq(
                        &instance.sop_class_uid,
                        &instance.sop_instance_uid,
                        &dataset,
                        Priority::Medium,
                        None,
                    )
                    .await
                }
                Err(err) => Err(err),
            };
            match outcome {
                Ok(_) => {
                    self.in_flight = Some(instance.sop_instance_uid);
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        instance = %instance.sop_instance_uid,
                        error = %err,
                        "store skipped"
                    );
                    self.report.failed += 1;
                    self.report
                        .statuses
                        .push((instance.sop_instance_uid, Status::ERROR_CANNOT_UNDERSTAND));
                }
            }
        }
    }
}

#[async_trait]
impl ConnectionHandler for StoreDriver {
    async fn on_association_accepted(&mut self, conn: &mut DicomConnection) -> Result<()> {
        self.send_next(conn).await
    }

    async fn on_association_rejected(
        &mut self,
        _conn: &mut DicomConnection,
        reject: Reject,
    ) -> Result<()> {
        self.rejected = Some(reject);
        Ok(())
    }

    async fn on_command(
        &mut self,
        conn: &mut DicomConnection,
        field: CommandField,
        command: Dataset,
        _data: Option<Dataset>,
    ) -> Result<()> {
        if field != CommandField::CStoreRsp {
            return Ok(());
        }
        let status = Status(command.u16_value(tags::STATUS).unwrap_or(0));
        if let Some(uid) = self.in_flight.take() {
            if status.is_success() {
                self.report.sent += 1;
            } else if status.is_warning() {
                self.report.warned += 1;
            } else {
                self.report.failed += 1;
            }
            self.report.statuses.push((uid, status));
        }
        self.send_next(conn).await
    }
}

struct MoveDriver {
    abstract_uid: &'static str,
    destination: String,
    identifier: Dataset,
    tx: mpsc::Sender<Result<MoveProgress>>,
}

#[async_trait]
impl ConnectionHandler for MoveDriver {
    async fn on_association_accepted(&mut self, conn: &mut DicomConnection) -> Result<()> {
        conn.send_c_move_rq(self.abstract_uid, &self.destination, &self.identifier)
            .await?;
        Ok(())
    }

    async fn on_association_rejected(
        &mut self,
        _conn: &mut DicomConnection,
        reject: Reject,
    ) -> Result<()> {
        let _ = self
            .tx
            .send(Err(DimseError::AssociationRejected(format!(
                "result {} source {} reason {}",
                reject.result, reject.source, reject.reason
            ))))
            .await;
        Ok(())
    }

    async fn on_command(
        &mut self,
        conn: &mut DicomConnection,
        field: CommandField,
        command: Dataset,
        _data: Option<Dataset>,
    ) -> Result<()> {
        if field != CommandField::CMoveRsp {
            return Ok(());
        }
        let progress = MoveProgress::from_command(&command);
        let still_wanted = self.tx.send(Ok(progress)).await.is_ok();
        if !progress.status.is_pending() {
            conn.send_release_rq().await?;
        } else if !still_wanted {
            let message_id = command.u16_value(tags::MESSAGE_ID_REPLIED_TO).unwrap_or(0);
            conn.send_c_cancel_rq(self.abstract_uid, message_id).await?;
        }
        Ok(())
    }
}

struct GetDriver {
    abstract_uid: &'static str,
    identifier: Dataset,
    received: Vec<Dataset>,
    final_status: Option<Status>,
}

#[async_trait]
impl ConnectionHandler for GetDriver {
    async fn on_association_accepted(&mut self, conn: &mut DicomConnection) -> Result<()> {
        conn.send_c_get_rq(self.abstract_uid, &self.identifier)
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
        match field {
            CommandField::CStoreRq => {
                if let Some(dataset) = data {
                    self.received.push(dataset);
                    conn.send_c_store_rsp(&command, Status::SUCCESS).await?;
                } else {
                    conn.send_c_store_rsp(&command, Status::ERROR_DATA_SET_MISMATCH)
                        .await?;
                }
            }
            CommandField::CGetRsp => {
                let status = Status(command.u16_value(tags::STATUS).unwrap_or(0));
                if !status.is_pending() {
                    self.final_status = Some(status);
                    conn.send_release_rq().await?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{QueryLevel, QueryModel};
    use crate::qr::QrResponse;
    use tokio::net::TcpListener;
    use tokio_stream::StreamExt;

    struct TestScp {
        response: QrResponse,
    }

    #[async_trait]
    impl ConnectionHandler for TestScp {
        async fn on_command(
            &mut self,
            conn: &mut DicomConnection,
            field: CommandField,
            command: Dataset,
            _data: Option<Dataset>,
        ) -> Result<()> {
            match field {
                CommandField::CEchoRq => {
                    conn.send_c_echo_rsp(&command, Status::SUCCESS).await?;
                }
                CommandField::CFindRq => {
                    for row in &self.response.rows {
                        conn.send_c_find_rsp(&command, Some(row), Status::PENDING)
                            .await?;
                    }
                    conn.send_c_find_rsp(&command, None, Status::SUCCESS).await?;
                }
                CommandField::CStoreRq => {
                    conn.send_c_store_rsp(&command, Status::SUCCESS).await?;
                }
                CommandField::CGetRq => {
                    let files = std::mem::take(&mut self.response.files);
                    conn.start_get_response(&command, files).await?;
                }
                _ => {}
            }
            Ok(())
        }
    }

    async fn spawn_scp(
        abstracts: Vec<&'static str>,
        response: QrResponse,
    ) -> (u16, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let config = DimseConfig {
                local_aet: "TEST_SCP".to_string(),
                ..DimseConfig::default()
            };
            let mut conn = DicomConnection::from_stream(stream, "test-scp", &config);
            conn.set_supported_abstracts(abstracts);
            let mut handler = TestScp { response };
            conn.run(&mut handler, &CancellationToken::new())
                .await
                .unwrap();
        });
        (port, handle)
    }

    fn scu_for(port: u16) -> DicomScu {
        let config = DimseConfig {
            local_aet: "TEST_SCU".to_string(),
            ..DimseConfig::default()
        };
        let remote = RemoteNode::new("TEST_SCP", "127.0.0.1", port);
        DicomScu::new(config, remote).unwrap()
    }

    fn instance(uid: &str) -> SendableInstance {
        let mut ds = Dataset::new();
        ds.put_str(tags::SOP_CLASS_UID, abstract_syntax::CT_IMAGE_STORAGE)
            .unwrap();
        ds.put_str(tags::SOP_INSTANCE_UID, uid).unwrap();
        ds.put_u16(tags::ROWS, 16).unwrap();
        SendableInstance::from_dataset(ds).unwrap()
    }

    #[tokio::test]
    async fn test_echo() {
        let (port, scp) = spawn_scp(vec![abstract_syntax::VERIFICATION], QrResponse::new()).await;
        scu_for(port).echo().await.unwrap();
        scp.await.unwrap();
    }

    #[tokio::test]
    async fn test_find_streams_rows() {
        let mut response = QrResponse::new();
        for pid in ["PID001", "PID002", "PID003"] {
            let mut row = Dataset::new();
            row.put_str(tags::PATIENT_ID, pid).unwrap();
            response.add_row(row);
        }
        let (port, scp) = spawn_scp(vec![abstract_syntax::STUDY_ROOT_FIND], response).await;

        let request = QrRequest::new(QueryModel::StudyRoot, QueryLevel::Study)
            .with_key(tags::PATIENT_ID, "")
            .unwrap();
        let mut stream = scu_for(port).find(request).await.unwrap();

        let mut ids = Vec::new();
        while let Some(row) = stream.next().await {
            ids.push(row.unwrap().str_value(tags::PATIENT_ID).unwrap().to_string());
        }
        assert_eq!(ids, ["PID001", "PID002", "PID003"]);
        scp.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_reports_per_instance() {
        let (port, scp) =
            spawn_scp(vec![abstract_syntax::CT_IMAGE_STORAGE], QrResponse::new()).await;

        let report = scu_for(port)
            .send(vec![instance("1.2.3.1"), instance("1.2.3.2")])
            .await
            .unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 0);
        assert!(report.all_sent());
        assert_eq!(report.statuses.len(), 2);
        assert_eq!(report.statuses[0].0, "1.2.3.1");
        scp.await.unwrap();
    }

    fn jpeg_instance(uid: &str) -> SendableInstance {
        let mut ds = Dataset::new();
        ds.put_str(tags::TRANSFER_SYNTAX_UID, "1.2.840.10008.1.2.4.50")
            .unwrap();
        ds.put_str(tags::SOP_CLASS_UID, abstract_syntax::MR_IMAGE_STORAGE)
            .unwrap();
        ds.put_str(tags::SOP_INSTANCE_UID, uid).unwrap();
        SendableInstance::from_dataset(ds).unwrap()
    }

    #[test]
    fn test_store_contexts_propose_stored_syntax() {
        let contexts =
            DicomScu::store_contexts(&[instance("1.2.3.1"), jpeg_instance("1.2.3.9")]);
        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts[0].0, abstract_syntax::CT_IMAGE_STORAGE);
        assert_eq!(
            contexts[0].1.iter().map(|ts| ts.uid.as_str()).collect::<Vec<_>>(),
            [transfer::EXPLICIT_VR_LITTLE_ENDIAN.uid.as_str()]
        );
        assert_eq!(contexts[1].0, abstract_syntax::MR_IMAGE_STORAGE);
        assert_eq!(
            contexts[1].1.iter().map(|ts| ts.uid.as_str()).collect::<Vec<_>>(),
            [transfer::JPEG_BASELINE_PROCESS_1.uid.as_str()]
        );
    }

    #[tokio::test]
    async fn test_send_undecodable_compression_counts_as_failed() {
        // The JPEG instance's context proposes only its stored syntax and
        // gets no uncompressed fallback, so the peer refuses it; the plain
        // instance still goes through on its own context.
        let (port, scp) = spawn_scp(
            vec![
                abstract_syntax::CT_IMAGE_STORAGE,
                abstract_syntax::MR_IMAGE_STORAGE,
            ],
            QrResponse::new(),
        )
        .await;

        let report = scu_for(port)
            .send(vec![instance("1.2.3.1"), jpeg_instance("1.2.3.9")])
            .await
            .unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.statuses[0], ("1.2.3.1".to_string(), Status::SUCCESS));
        assert_eq!(
            report.statuses[1],
            ("1.2.3.9".to_string(), Status::ERROR_CANNOT_UNDERSTAND)
        );
        scp.await.unwrap();
    }

    #[tokio::test]
    async fn test_get_collects_instances() {
        let mut response = QrResponse::new();
        response.queue_instance(instance("1.2.3.1"));
        response.queue_instance(instance("1.2.3.2"));
        let (port, scp) = spawn_scp(
            vec![
                abstract_syntax::STUDY_ROOT_GET,
                abstract_syntax::CT_IMAGE_STORAGE,
            ],
            response,
        )
        .await;

        let request = QrRequest::new(QueryModel::StudyRoot, QueryLevel::Study);
        let received = scu_for(port).get(request).await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].u16_value(tags::ROWS), Some(16));
        scp.await.unwrap();
    }

    #[tokio::test]
    async fn test_move_without_model_is_rejected() {
        let config = DimseConfig::default();
        let remote = RemoteNode::new("ANY", "127.0.0.1", 104);
        let scu = DicomScu::new(config, remote).unwrap();
        let request = QrRequest::new(QueryModel::ModalityWorklist, QueryLevel::Study);
        let err = scu.move_request(request, "DEST").await.unwrap_err();
        assert!(matches!(err, DimseError::NotSupported(_)));
    }
}

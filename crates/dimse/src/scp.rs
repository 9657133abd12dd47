//! Service class provider
//!
//! `DicomScp` listens for associations and serves verification, store,
//! query, and retrieval against a user-supplied `ScpHandler`. Each accepted
//! connection runs on its own task; a shared counter enforces the
//! association limit from the configuration.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dicom_data::transfer::{self, TransferSyntax};
use dicom_data::{tags, Dataset};

use crate::commands::{abstract_syntax, CommandField, Priority, QueryLevel, Status};
use crate::config::{DimseConfig, RemoteNode};
use crate::connection::{ConnectionHandler, DicomConnection};
use crate::error::{DimseError, Result};
use crate::qr::{QrResponse, SendableInstance};

/// Application-side callbacks for inbound DIMSE operations.
#[async_trait]
pub trait ScpHandler: Send + Sync {
    /// Persist an inbound instance and return the store status.
    async fn store(
        &self,
        calling_ae: &str,
        sop_class_uid: &str,
        sop_instance_uid: &str,
        dataset: Dataset,
    ) -> Result<Status>;

    /// Answer a C-FIND with identifier rows.
    async fn query(
        &self,
        calling_ae: &str,
        level: QueryLevel,
        identifier: &Dataset,
    ) -> Result<QrResponse>;

    /// Locate the instances a C-MOVE or C-GET should deliver.
    async fn locate(
        &self,
        calling_ae: &str,
        level: QueryLevel,
        identifier: &Dataset,
    ) -> Result<QrResponse>;

    /// Resolve a C-MOVE destination AE title to a network node. `None`
    /// refuses the move as destination-unknown.
    async fn resolve_destination(&self, _aet: &str) -> Option<RemoteNode> {
        None
    }
}

pub struct DicomScp {
    config: DimseConfig,
    handler: Arc<dyn ScpHandler>,
    active_associations: Arc<RwLock<u32>>,
}

impl DicomScp {
    pub fn new(config: DimseConfig, handler: Arc<dyn ScpHandler>) -> Result<Self> {
        config.validate()?;
        Ok(DicomScp {
            config,
            handler,
            active_associations: Arc::new(RwLock::new(0)),
        })
    }

    /// Bind the configured address and serve until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let addr = SocketAddr::new(self.config.bind_addr, self.config.port);
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, cancel).await
    }

    /// Serve associations from an already-bound listener.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, aet = %self.config.local_aet, "DIMSE SCP listening");

        let scp = Arc::new(self);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("SCP shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!(%peer_addr, "accepted connection");
                        {
                            let active = scp.active_associations.read().await;
                            if *active >= scp.config.max_associations {
                                warn!(%peer_addr, "association limit reached, dropping connection");
                                drop(stream);
                                continue;
                            }
                        }
                        let scp = Arc::clone(&scp);
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(err) = scp.handle_association(stream, peer_addr, cancel).await {
                                error!(%peer_addr, error = %err, "association failed");
                            }
                        });
                    }
                    Err(err) => {
                        error!(error = %err, "accept failed");
                    }
                }
            }
        }
    }

    async fn handle_association(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<()> {
        {
            let mut active = self.active_associations.write().await;
            *active += 1;
        }
        let result = self.drive_association(stream, peer_addr, cancel).await;
        {
            let mut active = self.active_associations.write().await;
            *active -= 1;
        }
        result
    }

    async fn drive_association(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut conn =
            DicomConnection::from_stream(stream, format!("scp-{peer_addr}"), &self.config);
        conn.set_supported_abstracts(self.supported_abstracts());
        let mut handler = ScpConnectionHandler {
            config: self.config.clone(),
            handler: Arc::clone(&self.handler),
        };
        conn.run(&mut handler, &cancel).await
    }

    fn supported_abstracts(&self) -> Vec<&'static str> {
        let mut abstracts: Vec<&'static str> = abstract_syntax::storage_classes().to_vec();
        if self.config.enable_echo {
            abstracts.push(abstract_syntax::VERIFICATION);
        }
        if self.config.enable_find {
            abstracts.push(abstract_syntax::PATIENT_ROOT_FIND);
            abstracts.push(abstract_syntax::STUDY_ROOT_FIND);
            abstracts.push(abstract_syntax::PATIENT_STUDY_ONLY_FIND);
            abstracts.push(abstract_syntax::MODALITY_WORKLIST_FIND);
        }
        if self.config.enable_move {
            abstracts.push(abstract_syntax::PATIENT_ROOT_MOVE);
            abstracts.push(abstract_syntax::STUDY_ROOT_MOVE);
            abstracts.push(abstract_syntax::PATIENT_STUDY_ONLY_MOVE);
        }
        if self.config.enable_get {
            abstracts.push(abstract_syntax::PATIENT_ROOT_GET);
            abstracts.push(abstract_syntax::STUDY_ROOT_GET);
            abstracts.push(abstract_syntax::PATIENT_STUDY_ONLY_GET);
        }
        abstracts
    }
}

/// Per-association dispatch glue between the connection and the handler.
struct ScpConnectionHandler {
    config: DimseConfig,
    handler: Arc<dyn ScpHandler>,
}

impl ScpConnectionHandler {
    fn query_level(identifier: Option<&Dataset>) -> QueryLevel {
        identifier
            .and_then(|ds| ds.str_value(tags::QUERY_RETRIEVE_LEVEL))
            .and_then(|s| s.parse().ok())
            .unwrap_or(QueryLevel::Study)
    }

    async fn handle_store(
        &self,
        conn: &mut DicomConnection,
        command: &Dataset,
        data: Option<Dataset>,
    ) -> Result<()> {
        let Some(dataset) = data else {
            return conn
                .send_c_store_rsp(command, Status::ERROR_DATA_SET_MISMATCH)
                .await;
        };
        let sop_class = command
            .str_value(tags::AFFECTED_SOP_CLASS_UID)
            .unwrap_or_default()
            .to_string();
        let sop_instance = command
            .str_value(tags::AFFECTED_SOP_INSTANCE_UID)
            .unwrap_or_default()
            .to_string();
        let status = match self
            .handler
            .store(conn.calling_ae(), &sop_class, &sop_instance, dataset)
            .await
        {
            Ok(status) => status,
            Err(err) => {
                warn!(instance = %sop_instance, error = %err, "store handler failed");
                Status::ERROR_CANNOT_UNDERSTAND
            }
        };
        conn.send_c_store_rsp(command, status).await
    }

    async fn handle_find(
        &self,
        conn: &mut DicomConnection,
        command: &Dataset,
        data: Option<Dataset>,
    ) -> Result<()> {
        if !self.config.enable_find {
            return conn
                .send_c_find_rsp(command, None, Status::ERROR_UNRECOGNIZED_OPERATION)
                .await;
        }
        let level = Self::query_level(data.as_ref());
        let identifier = data.unwrap_or_default();
        match self
            .handler
            .query(conn.calling_ae(), level, &identifier)
            .await
        {
            Ok(response) => {
                for row in &response.rows {
                    conn.send_c_find_rsp(command, Some(row), Status::PENDING)
                        .await?;
                }
                conn.send_c_find_rsp(command, None, Status::SUCCESS).await
            }
            Err(err) => {
                warn!(error = %err, "query handler failed");
                conn.send_c_find_rsp(command, None, Status::REFUSED_OUT_OF_RESOURCES)
                    .await
            }
        }
    }

    async fn handle_get(
        &self,
        conn: &mut DicomConnection,
        command: &Dataset,
        data: Option<Dataset>,
    ) -> Result<()> {
        if !self.config.enable_get {
            return conn
                .send_c_get_rsp(command, Status::ERROR_UNRECOGNIZED_OPERATION, 0, 0, 0, 0)
                .await;
        }
        let level = Self::query_level(data.as_ref());
        let identifier = data.unwrap_or_default();
        match self
            .handler
            .locate(conn.calling_ae(), level, &identifier)
            .await
        {
            Ok(response) => conn.start_get_response(command, response.files).await,
            Err(err) => {
                warn!(error = %err, "locate handler failed");
                conn.start_get_response(command, VecDeque::new()).await
            }
        }
    }

    async fn handle_move(
        &self,
        conn: &mut DicomConnection,
        command: &Dataset,
        data: Option<Dataset>,
    ) -> Result<()> {
        if !self.config.enable_move {
            return conn
                .send_c_move_rsp(command, Status::ERROR_UNRECOGNIZED_OPERATION, 0, 0, 0, 0)
                .await;
        }
        let destination_aet = command
            .str_value(tags::MOVE_DESTINATION)
            .unwrap_or_default()
            .to_string();
        let Some(destination) = self.handler.resolve_destination(&destination_aet).await else {
            warn!(destination = %destination_aet, "unknown move destination");
            return conn
                .send_c_move_rsp(
                    command,
                    Status::REFUSED_MOVE_DESTINATION_UNKNOWN,
                    0,
                    0,
                    0,
                    0,
                )
                .await;
        };

        let level = Self::query_level(data.as_ref());
        let identifier = data.unwrap_or_default();
        let files = match self
            .handler
            .locate(conn.calling_ae(), level, &identifier)
            .await
        {
            Ok(response) => response.files,
            Err(err) => {
                warn!(error = %err, "locate handler failed");
                return conn
                    .send_c_move_rsp(command, Status::REFUSED_OUT_OF_RESOURCES, 0, 0, 0, 0)
                    .await;
            }
        };

        self.relay_move(conn, command, destination, files).await
    }

    /// Push located instances to the destination over a sub-association,
    /// reporting one pending C-MOVE-RSP per completed sub-operation.
    async fn relay_move(
        &self,
        conn: &mut DicomConnection,
        command: &Dataset,
        destination: RemoteNode,
        files: VecDeque<SendableInstance>,
    ) -> Result<()> {
        let total = files.len() as u16;
        // The originator annotation on relayed stores names the SCU that
        // asked for the move, not this SCP.
        let originator_aet = conn.calling_ae().to_string();
        let originator_id = command.u16_value(tags::MESSAGE_ID).unwrap_or(0);

        let addr = destination.addr();
        let stream = match tokio::time::timeout(
            self.config.connect_timeout(),
            TcpStream::connect(&addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                warn!(%addr, error = %err, "cannot reach move destination");
                return conn
                    .send_c_move_rsp(command, Status::REFUSED_OUT_OF_RESOURCES, 0, 0, total, 0)
                    .await;
            }
            Err(_) => {
                warn!(%addr, "move destination connect timed out");
                return conn
                    .send_c_move_rsp(command, Status::REFUSED_OUT_OF_RESOURCES, 0, 0, total, 0)
                    .await;
            }
        };

        let mut sub = DicomConnection::from_stream(stream, "move-sub", &self.config);
        let mut classes: Vec<String> = files.iter().map(|f| f.sop_class_uid.clone()).collect();
        classes.sort_unstable();
        classes.dedup();
        let syntaxes: Vec<TransferSyntax> = vec![
            transfer::EXPLICIT_VR_LITTLE_ENDIAN.clone(),
            transfer::IMPLICIT_VR_LITTLE_ENDIAN.clone(),
        ];
        for class in classes {
            sub.add_presentation_context(class, syntaxes.clone());
        }
        sub.send_associate_rq(&destination.ae_title).await?;

        let (tx, mut rx) = mpsc::channel(8);
        let relay = tokio::spawn(async move {
            let mut driver = MoveSubDriver {
                queue: files,
                originator_aet,
                originator_id,
                tx,
            };
            if let Err(err) = sub.run(&mut driver, &CancellationToken::new()).await {
                warn!(error = %err, "move sub-association failed");
            }
        });

        let mut remaining = total;
        let mut completed = 0u16;
        let mut failed = 0u16;
        let mut warned = 0u16;
        while let Some(status) = rx.recv().await {
            remaining = remaining.saturating_sub(1);
            if status.is_success() {
                completed += 1;
            } else if status.is_warning() {
                warned += 1;
            } else {
                failed += 1;
            }
            conn.send_c_move_rsp(command, Status::PENDING, remaining, completed, failed, warned)
                .await?;
        }
        let _ = relay.await;

        // Anything never attempted counts as failed.
        failed += remaining;
        let final_status = if failed > 0 {
            Status::WARNING_SUB_OPS_COMPLETE
        } else {
            Status::SUCCESS
        };
        conn.send_c_move_rsp(command, final_status, 0, completed, failed, warned)
            .await
    }
}

#[async_trait]
impl ConnectionHandler for ScpConnectionHandler {
    async fn on_command(
        &mut self,
        conn: &mut DicomConnection,
        field: CommandField,
        command: Dataset,
        data: Option<Dataset>,
    ) -> Result<()> {
        match field {
            CommandField::CEchoRq => {
                let status = if self.config.enable_echo {
                    Status::SUCCESS
                } else {
                    Status::ERROR_UNRECOGNIZED_OPERATION
                };
                conn.send_c_echo_rsp(&command, status).await
            }
            CommandField::CStoreRq => self.handle_store(conn, &command, data).await,
            CommandField::CFindRq => self.handle_find(conn, &command, data).await,
            CommandField::CGetRq => self.handle_get(conn, &command, data).await,
            CommandField::CMoveRq => self.handle_move(conn, &command, data).await,
            CommandField::CStoreRsp => Ok(()),
            CommandField::CCancelRq => {
                // Cancellation between responses is honored implicitly: the
                // find loop above runs to completion within one dispatch, so
                // a cancel that arrives later simply has nothing to stop.
                debug!("C-CANCEL received");
                Ok(())
            }
            CommandField::NGetRq | CommandField::NActionRq => {
                warn!(command = %field, "unsupported N-service request");
                conn.send_n_action_rsp(&command, Status::ERROR_UNRECOGNIZED_OPERATION)
                    .await
            }
            other => {
                warn!(command = %other, "unexpected command on SCP association");
                Ok(())
            }
        }
    }
}

/// C-STORE pump for the move sub-association; forwards one status per
/// finished store back to the move response loop.
struct MoveSubDriver {
    queue: VecDeque<SendableInstance>,
    originator_aet: String,
    originator_id: u16,
    tx: mpsc::Sender<Status>,
}

impl MoveSubDriver {
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
                        Some((&self.originator_aet, self.originator_id)),
                    )
                    .await
                }
                Err(err) => Err(err),
            };
            match outcome {
                Ok(_) => return Ok(()),
                Err(err) => {
                    warn!(
                        instance = %instance.sop_instance_uid,
                        error = %err,
                        "relay store skipped"
                    );
                    let _ = self.tx.send(Status::ERROR_CANNOT_UNDERSTAND).await;
                }
            }
        }
    }
}

#[async_trait]
impl ConnectionHandler for MoveSubDriver {
    async fn on_association_accepted(&mut self, conn: &mut DicomConnection) -> Result<()> {
        self.send_next(conn).await
    }

    async fn on_command(
        &mut self,
        conn: &mut DicomConnection,
        field: CommandField,
        command: Dataset,
        _data: Option<Dataset>,
    ) -> Result<()> {
        if field == CommandField::CStoreRsp {
            let status = Status(command.u16_value(tags::STATUS).unwrap_or(0));
            let _ = self.tx.send(status).await;
            self.send_next(conn).await?;
        }
        Ok(())
    }
}

/// Filesystem-backed handler: stores instances as Part-10 files under a
/// directory and answers queries with nothing.
pub struct DefaultScpHandler {
    storage_dir: PathBuf,
}

impl DefaultScpHandler {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        DefaultScpHandler {
            storage_dir: storage_dir.into(),
        }
    }
}

#[async_trait]
impl ScpHandler for DefaultScpHandler {
    async fn store(
        &self,
        calling_ae: &str,
        _sop_class_uid: &str,
        sop_instance_uid: &str,
        dataset: Dataset,
    ) -> Result<Status> {
        let path = self.storage_dir.join(format!("{sop_instance_uid}.dcm"));
        let bytes = dataset.write_file_bytes(&transfer::EXPLICIT_VR_LITTLE_ENDIAN);
        tokio::fs::write(&path, &bytes).await?;
        info!(from = %calling_ae, path = %path.display(), "instance stored");
        Ok(Status::SUCCESS)
    }

    async fn query(
        &self,
        _calling_ae: &str,
        _level: QueryLevel,
        _identifier: &Dataset,
    ) -> Result<QrResponse> {
        Ok(QrResponse::new())
    }

    async fn locate(
        &self,
        _calling_ae: &str,
        _level: QueryLevel,
        _identifier: &Dataset,
    ) -> Result<QrResponse> {
        Ok(QrResponse::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::QueryModel;
    use crate::qr::QrRequest;
    use crate::scu::DicomScu;
    use std::sync::Mutex;
    use tokio_stream::StreamExt;

    fn scp_config() -> DimseConfig {
        DimseConfig {
            local_aet: "TEST_SCP".to_string(),
            ..DimseConfig::default()
        }
    }

    fn scu_for(port: u16) -> DicomScu {
        let config = DimseConfig {
            local_aet: "TEST_SCU".to_string(),
            ..DimseConfig::default()
        };
        DicomScu::new(config, RemoteNode::new("TEST_SCP", "127.0.0.1", port)).unwrap()
    }

    async fn spawn(scp: DicomScp) -> (u16, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let cancel = CancellationToken::new();
        let serve_cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = scp.serve(listener, serve_cancel).await;
        });
        (port, cancel)
    }

    fn instance(uid: &str) -> SendableInstance {
        let mut ds = Dataset::new();
        ds.put_str(tags::SOP_CLASS_UID, abstract_syntax::CT_IMAGE_STORAGE)
            .unwrap();
        ds.put_str(tags::SOP_INSTANCE_UID, uid).unwrap();
        ds.put_u16(tags::ROWS, 32).unwrap();
        SendableInstance::from_dataset(ds).unwrap()
    }

    #[tokio::test]
    async fn test_echo_against_scp() {
        let dir = tempfile::tempdir().unwrap();
        let scp = DicomScp::new(
            scp_config(),
            Arc::new(DefaultScpHandler::new(dir.path())),
        )
        .unwrap();
        let (port, cancel) = spawn(scp).await;

        scu_for(port).echo().await.unwrap();
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_store_writes_part10_file() {
        let dir = tempfile::tempdir().unwrap();
        let scp = DicomScp::new(
            scp_config(),
            Arc::new(DefaultScpHandler::new(dir.path())),
        )
        .unwrap();
        let (port, cancel) = spawn(scp).await;

        let report = scu_for(port).send(vec![instance("1.2.3.4")]).await.unwrap();
        assert_eq!(report.sent, 1);

        let bytes = tokio::fs::read(dir.path().join("1.2.3.4.dcm")).await.unwrap();
        let stored = Dataset::read_file_bytes(&bytes).unwrap();
        assert_eq!(stored.str_value(tags::SOP_INSTANCE_UID), Some("1.2.3.4"));
        assert_eq!(stored.u16_value(tags::ROWS), Some(32));
        cancel.cancel();
    }

    struct RowHandler;

    #[async_trait]
    impl ScpHandler for RowHandler {
        async fn store(
            &self,
            _calling_ae: &str,
            _sop_class_uid: &str,
            _sop_instance_uid: &str,
            _dataset: Dataset,
        ) -> Result<Status> {
            Ok(Status::SUCCESS)
        }

        async fn query(
            &self,
            _calling_ae: &str,
            level: QueryLevel,
            identifier: &Dataset,
        ) -> Result<QrResponse> {
            assert_eq!(level, QueryLevel::Study);
            assert_eq!(identifier.str_value(tags::PATIENT_ID), Some(""));
            let mut response = QrResponse::new();
            let mut row = Dataset::new();
            row.put_str(tags::PATIENT_ID, "PID007").unwrap();
            response.add_row(row);
            Ok(response)
        }

        async fn locate(
            &self,
            _calling_ae: &str,
            _level: QueryLevel,
            _identifier: &Dataset,
        ) -> Result<QrResponse> {
            Ok(QrResponse::new())
        }
    }

    #[tokio::test]
    async fn test_find_returns_handler_rows() {
        let scp = DicomScp::new(scp_config(), Arc::new(RowHandler)).unwrap();
        let (port, cancel) = spawn(scp).await;

        let request = QrRequest::new(QueryModel::StudyRoot, QueryLevel::Study)
            .with_key(tags::PATIENT_ID, "")
            .unwrap();
        let mut stream = scu_for(port).find(request).await.unwrap();
        let mut rows = Vec::new();
        while let Some(item) = stream.next().await {
            rows.push(item.unwrap());
        }
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].str_value(tags::PATIENT_ID), Some("PID007"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_move_to_unknown_destination_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let scp = DicomScp::new(
            scp_config(),
            Arc::new(DefaultScpHandler::new(dir.path())),
        )
        .unwrap();
        let (port, cancel) = spawn(scp).await;

        let request = QrRequest::new(QueryModel::StudyRoot, QueryLevel::Study);
        let mut stream = scu_for(port)
            .move_request(request, "NOWHERE")
            .await
            .unwrap();
        let progress = stream.next().await.unwrap().unwrap();
        assert_eq!(progress.status, Status::REFUSED_MOVE_DESTINATION_UNKNOWN);
        assert!(stream.next().await.is_none());
        cancel.cancel();
    }

    struct MoveSourceHandler {
        destination_port: u16,
    }

    #[async_trait]
    impl ScpHandler for MoveSourceHandler {
        async fn store(
            &self,
            _calling_ae: &str,
            _sop_class_uid: &str,
            _sop_instance_uid: &str,
            _dataset: Dataset,
        ) -> Result<Status> {
            Ok(Status::SUCCESS)
        }

        async fn query(
            &self,
            _calling_ae: &str,
            _level: QueryLevel,
            _identifier: &Dataset,
        ) -> Result<QrResponse> {
            Ok(QrResponse::new())
        }

        async fn locate(
            &self,
            _calling_ae: &str,
            _level: QueryLevel,
            _identifier: &Dataset,
        ) -> Result<QrResponse> {
            let mut response = QrResponse::new();
            response.queue_instance(instance("1.2.3.1"));
            response.queue_instance(instance("1.2.3.2"));
            Ok(response)
        }

        async fn resolve_destination(&self, aet: &str) -> Option<RemoteNode> {
            (aet == "DEST").then(|| RemoteNode::new("DEST", "127.0.0.1", self.destination_port))
        }
    }

    struct RecordingHandler {
        received: Arc<Mutex<Vec<(String, Dataset)>>>,
    }

    #[async_trait]
    impl ScpHandler for RecordingHandler {
        async fn store(
            &self,
            calling_ae: &str,
            _sop_class_uid: &str,
            _sop_instance_uid: &str,
            dataset: Dataset,
        ) -> Result<Status> {
            self.received
                .lock()
                .unwrap()
                .push((calling_ae.to_string(), dataset));
            Ok(Status::SUCCESS)
        }

        async fn query(
            &self,
            _calling_ae: &str,
            _level: QueryLevel,
            _identifier: &Dataset,
        ) -> Result<QrResponse> {
            Ok(QrResponse::new())
        }

        async fn locate(
            &self,
            _calling_ae: &str,
            _level: QueryLevel,
            _identifier: &Dataset,
        ) -> Result<QrResponse> {
            Ok(QrResponse::new())
        }
    }

    #[tokio::test]
    async fn test_move_relays_instances_to_destination() {
        // Destination store SCP.
        let received = Arc::new(Mutex::new(Vec::new()));
        let dest_scp = DicomScp::new(
            DimseConfig {
                local_aet: "DEST".to_string(),
                ..DimseConfig::default()
            },
            Arc::new(RecordingHandler {
                received: Arc::clone(&received),
            }),
        )
        .unwrap();
        let (dest_port, dest_cancel) = spawn(dest_scp).await;

        // Move source SCP that locates two instances.
        let source_scp = DicomScp::new(
            scp_config(),
            Arc::new(MoveSourceHandler {
                destination_port: dest_port,
            }),
        )
        .unwrap();
        let (source_port, source_cancel) = spawn(source_scp).await;

        let request = QrRequest::new(QueryModel::StudyRoot, QueryLevel::Study);
        let mut stream = scu_for(source_port)
            .move_request(request, "DEST")
            .await
            .unwrap();

        let mut last = None;
        while let Some(item) = stream.next().await {
            last = Some(item.unwrap());
        }
        let last = last.expect("at least the final response");
        assert_eq!(last.status, Status::SUCCESS);
        assert_eq!(last.completed, 2);
        assert_eq!(last.failed, 0);

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 2);
        // The relayed stores arrive from the move SCP, not the requester.
        assert_eq!(received[0].0, "TEST_SCP");
        assert_eq!(received[0].1.u16_value(tags::ROWS), Some(32));
        dest_cancel.cancel();
        source_cancel.cancel();
    }
}

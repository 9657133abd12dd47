//! Query/Retrieve data carriers
//!
//! Plain containers shuttled between the protocol driver and the handlers:
//! a query going out, and the rows plus sendable instances coming back.

use std::collections::VecDeque;
use std::path::PathBuf;

use dicom_data::transfer::{self, TransferSyntax};
use dicom_data::{tags, Dataset};

use crate::commands::{QueryLevel, QueryModel};
use crate::error::{DimseError, Result};

/// An outbound FIND/MOVE/GET query.
#[derive(Debug, Clone)]
pub struct QrRequest {
    pub model: QueryModel,
    pub level: QueryLevel,
    pub identifier: Dataset,
}

impl QrRequest {
    pub fn new(model: QueryModel, level: QueryLevel) -> Self {
        QrRequest {
            model,
            level,
            identifier: Dataset::new(),
        }
    }

    /// Add a string matching key.
    pub fn with_key(mut self, tag: dicom_data::Tag, value: impl Into<String>) -> Result<Self> {
        self.identifier.put_str(tag, value)?;
        Ok(self)
    }

    /// The identifier dataset with the Query/Retrieve Level attribute set.
    pub fn into_identifier(mut self) -> Result<Dataset> {
        self.identifier
            .put_str(tags::QUERY_RETRIEVE_LEVEL, self.level.to_string())?;
        Ok(self.identifier)
    }
}

/// Where an instance's bytes live until it is sent.
#[derive(Debug, Clone)]
pub enum InstanceSource {
    Memory(Dataset),
    File(PathBuf),
}

/// One instance queued for a store operation.
#[derive(Debug, Clone)]
pub struct SendableInstance {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub source: InstanceSource,
}

impl SendableInstance {
    /// Wrap an in-memory dataset, reading its identity from the dataset.
    pub fn from_dataset(dataset: Dataset) -> Result<Self> {
        let sop_class_uid = dataset
            .str_value(tags::SOP_CLASS_UID)
            .ok_or_else(|| DimseError::operation_failed("dataset has no SOP Class UID"))?
            .to_string();
        let sop_instance_uid = dataset
            .str_value(tags::SOP_INSTANCE_UID)
            .ok_or_else(|| DimseError::operation_failed("dataset has no SOP Instance UID"))?
            .to_string();
        Ok(SendableInstance {
            sop_class_uid,
            sop_instance_uid,
            source: InstanceSource::Memory(dataset),
        })
    }

    /// Reference a file on disk; identity must be supplied up front so the
    /// association can be negotiated before any file is read.
    pub fn from_file(
        path: impl Into<PathBuf>,
        sop_class_uid: impl Into<String>,
        sop_instance_uid: impl Into<String>,
    ) -> Self {
        SendableInstance {
            sop_class_uid: sop_class_uid.into(),
            sop_instance_uid: sop_instance_uid.into(),
            source: InstanceSource::File(path.into()),
        }
    }

    /// The transfer syntax the stored bytes declare, when it is knowable
    /// before the association is up. File sources stay opaque until `load`.
    pub fn declared_syntax(&self) -> Option<TransferSyntax> {
        match &self.source {
            InstanceSource::Memory(ds) => ds
                .str_value(tags::TRANSFER_SYNTAX_UID)
                .map(transfer::lookup),
            InstanceSource::File(_) => None,
        }
    }

    /// Materialize the dataset, reading and decoding file sources.
    pub async fn load(&self) -> Result<Dataset> {
        match &self.source {
            InstanceSource::Memory(ds) => Ok(ds.clone()),
            InstanceSource::File(path) => {
                let bytes = tokio::fs::read(path).await?;
                Ok(Dataset::read_file_bytes(&bytes)?)
            }
        }
    }
}

/// What a query handler returns: identifier rows for FIND, and instances to
/// push for MOVE/GET.
#[derive(Debug, Default)]
pub struct QrResponse {
    pub rows: Vec<Dataset>,
    pub files: VecDeque<SendableInstance>,
}

impl QrResponse {
    pub fn new() -> Self {
        QrResponse::default()
    }

    pub fn add_row(&mut self, row: Dataset) {
        self.rows.push(row);
    }

    pub fn queue_instance(&mut self, instance: SendableInstance) {
        self.files.push_back(instance);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.files.is_empty()
    }
}

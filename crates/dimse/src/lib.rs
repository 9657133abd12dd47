//! DIMSE (DICOM Message Service Element) implementation
//!
//! This crate provides both Service Class Provider (SCP) and Service Class User (SCU)
//! implementations for DICOM networking using the DIMSE protocol.
//!
//! # Features
//! - Inbound DIMSE services (SCP): C-ECHO, C-STORE, C-FIND, C-MOVE, C-GET
//! - Outbound DIMSE services (SCU): C-ECHO, C-STORE, C-FIND, C-MOVE
//! - Association negotiation with configurable transfer syntax preference
//! - Binary stream handling on top of the `dicom-data` codec

pub mod association;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod pdu;
pub mod qr;
pub mod scp;
pub mod scu;

// Re-export commonly used types
pub use association::{PresentationContext, PresentationResult};
pub use commands::{CommandField, Priority, QueryLevel, QueryModel, Status};
pub use config::{DimseConfig, RemoteNode};
pub use connection::{ConnectionHandler, ConnectionState, DicomConnection};
pub use error::{DimseError, Result};
pub use qr::{QrRequest, QrResponse, SendableInstance};
pub use scp::{DefaultScpHandler, DicomScp, ScpHandler};
pub use scu::{DicomScu, MoveProgress, SendReport};

/// DIMSE protocol version field carried in association PDUs
pub const PROTOCOL_VERSION: u16 = 1;

/// Default DICOM port
pub const DEFAULT_DIMSE_PORT: u16 = 11112;

/// Implementation class UID announced during association
pub const IMPLEMENTATION_CLASS_UID: &str = "1.2.826.0.1.3680043.10.1443.1.1";

/// Implementation version name announced during association (16 chars max)
pub const IMPLEMENTATION_VERSION_NAME: &str = concat!("DIMSE_RS_", env!("CARGO_PKG_VERSION"));

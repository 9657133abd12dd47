//! DICOM data model and binary value codec
//!
//! This crate covers the on-disk and on-wire shape of DICOM data: tags, value
//! representations, elements, sequences, and datasets, with encode/decode for
//! implicit and explicit VR streams in either byte order. Networking lives in
//! the `dimse` crate on top of this one.

pub mod codec;
pub mod dataset;
pub mod dictionary;
pub mod element;
pub mod error;
pub mod sequence;
pub mod tags;
pub mod transfer;
pub mod uid;
pub mod vr;

pub use codec::{ByteReader, ByteWriter};
pub use dataset::Dataset;
pub use element::{Element, SmallInt, Value, UNDEFINED_LENGTH};
pub use error::{DataError, Result};
pub use sequence::SequenceItem;
pub use tags::Tag;
pub use transfer::{Compression, TransferSyntax};
pub use vr::Vr;

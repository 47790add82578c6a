//! GRIB2 parser implementation (WMO FM 92 GRIB Edition 2).
//!
//! Walks the messages of a GRIB2 byte buffer, parses the sections the
//! archiver needs (identification, grid, product, data representation,
//! bitmap) and unpacks field values. Simple packing is unpacked in-crate;
//! other packings are delegated to the `grib` crate.

use thiserror::Error;

pub mod grid;
pub mod message;
pub mod sections;
pub mod tables;
pub mod unpacking;

pub use grid::GridCoordinates;
pub use message::{Grib2Message, Grib2Reader};
pub use sections::{
    DataRepresentation, GridDefinition, GridGeometry, Identification, Indicator,
    ProductDefinition,
};
pub use tables::{level_description, Grib2Tables};
pub use unpacking::unpack_simple;

/// Errors raised while parsing or unpacking GRIB2 data.
#[derive(Error, Debug)]
pub enum Grib2Error {
    #[error("Invalid GRIB2 format: {0}")]
    InvalidFormat(String),

    #[error("Invalid section {section}: {reason}")]
    InvalidSection { section: u8, reason: String },

    #[error("Unsupported template {section}.{template}")]
    UnsupportedTemplate { section: u8, template: u16 },

    #[error("Unpacking failed: {0}")]
    UnpackingError(String),
}

pub type Grib2Result<T> = Result<T, Grib2Error>;

//! Vendor CSV ingestion: streaming download and row transformation.

pub mod streamer;
pub mod transform;

pub use streamer::{CsvRowStream, CsvStreamer, REQUIRED_COLUMNS, StagingFile, validate_headers};
pub use transform::{RowTransformer, VendorRow};

//! Module for the error management.
//!
//! Only the load path produces errors. Resolution itself never fails:
//! every miss there degrades to a diagnostic note on the result.

use thiserror::Error;

/// An error that can occur when fetching or parsing an operator dataset.
#[derive(Error, Debug)]
pub enum Error {
    /// Could not build the HTTP client or complete the archive request
    #[error("could not fetch archive for operator '{operator}'")]
    Fetch {
        /// Operator key whose archive was requested
        operator: String,
        /// The underlying transport error
        #[source]
        source: reqwest::Error,
    },
    /// The HTTP client itself could not be constructed
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// One of the tabular files could not be read as CSV
    #[error("could not read table '{file_name}'")]
    Table {
        /// Name of the table inside the archive
        file_name: String,
        /// The initial error by the csv library
        #[source]
        source: csv::Error,
    },
    /// The fetched bytes are not a readable zip archive
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

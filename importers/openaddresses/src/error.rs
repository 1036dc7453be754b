use std::io;

use crate::archive::{MANIFEST, README};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("invalid CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing column `{0}` in CSV header")]
    MissingColumn(&'static str),
    #[error("`{0}` not found in archive")]
    MissingFile(String),
    #[error(
        "no license data found: expected {} or a single data file described by {}",
        MANIFEST,
        README
    )]
    MissingLicense,
}

use std::io;

use crate::orchestrator::Phase;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Source(#[from] importer_openaddresses::Error),
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to write bulk data: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported store target `{0}`, expected a PostgreSQL connection string or sqlite://<path>")]
    UnsupportedTarget(String),
    #[error("cannot {action} while {phase:?}")]
    InvalidTransition { phase: Phase, action: &'static str },
    #[error("license identifier {0} does not fit in a 32 bits integer")]
    LicenseIdOverflow(i64),
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
}

//! Storage backends.
//!
//! Every backend exposes the same schema: `license`, `city`, `street`, a `house` table split into
//! partitions along X and an `address_data` view joining them. PostgreSQL is the production
//! target, SQLite is used for local runs and tests.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use importer_openaddresses::LicenseRecord;

use crate::bulk::LoadBatch;
use crate::partition::{Partition, PartitionLayout};
use crate::{Error, Result};

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PgStore;
pub use self::sqlite::SqliteStore;

/// Prefix of the targets opened with SQLite.
const SQLITE_SCHEME: &str = "sqlite://";

/// A foreign key between two tables of the hierarchy.
#[derive(Debug)]
pub struct ForeignKey {
    pub name: &'static str,
    pub table: &'static str,
    pub column: &'static str,
    pub references: &'static str,
}

pub static FOREIGN_KEYS: [ForeignKey; 3] = [
    ForeignKey {
        name: "city_license_id_fk",
        table: "city",
        column: "license_id",
        references: "license",
    },
    ForeignKey {
        name: "street_city_id_fk",
        table: "street",
        column: "city_id",
        references: "city",
    },
    ForeignKey {
        name: "house_street_id_fk",
        table: "house",
        column: "street_id",
        references: "street",
    },
];

/// An index that is dropped while loading and rebuilt when finalizing.
#[derive(Debug)]
pub struct BaselineIndex {
    pub name: &'static str,
    pub table: &'static str,
    pub column: &'static str,
    /// Built for fuzzy text search when the backend supports it.
    pub trigram: bool,
}

pub static BASELINE_INDEXES: [BaselineIndex; 5] = [
    BaselineIndex {
        name: "city_city_trgm_idx",
        table: "city",
        column: "city",
        trigram: true,
    },
    BaselineIndex {
        name: "city_postcode_idx",
        table: "city",
        column: "postcode",
        trigram: false,
    },
    BaselineIndex {
        name: "street_street_trgm_idx",
        table: "street",
        column: "street",
        trigram: true,
    },
    BaselineIndex {
        name: "street_city_id_idx",
        table: "street",
        column: "city_id",
        trigram: false,
    },
    BaselineIndex {
        name: "house_street_id_idx",
        table: "house",
        column: "street_id",
        trigram: false,
    },
];

/// Names of the per-partition indexes rebuilt by `Store::optimize_partition`, the first one
/// being the one the partition is clustered on.
pub fn partition_indexes(partition: &Partition) -> [String; 3] {
    let table = partition.table_name();
    [
        format!("{}_geohash_idx", table),
        format!("{}_housenumber_idx", table),
        format!("{}_location_idx", table),
    ]
}

/// Number of rows of each table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub licenses: i64,
    pub cities: i64,
    pub streets: i64,
    pub houses: i64,
}

/// Operations the pipeline needs from a database. Each worker opens its own store.
pub trait Store {
    /// Creates the schema and the partitions of `layout`, dropping existing data if `clean`.
    fn prepare_schema(&mut self, layout: &PartitionLayout, clean: bool) -> Result<()>;

    /// Drops foreign keys and baseline indexes before a bulk load.
    fn drop_constraints(&mut self) -> Result<()>;

    /// Recreates foreign keys and baseline indexes, whether they exist or not.
    fn restore_constraints(&mut self) -> Result<()>;

    /// Saves a license and returns its identifier.
    fn insert_license(&mut self, record: &LicenseRecord) -> Result<i32>;

    /// Loads the streams of a file in a single transaction.
    fn bulk_load(&mut self, batch: &LoadBatch) -> Result<()>;

    /// Rebuilds the indexes of a partition, clusters it on its geohash index and refreshes its
    /// statistics.
    fn optimize_partition(&mut self, partition: &Partition) -> Result<()>;

    fn count_rows(&mut self) -> Result<TableCounts>;

    /// Number of foreign keys declared between the tables of the hierarchy.
    fn count_foreign_keys(&mut self) -> Result<i64>;

    /// Number of `BASELINE_INDEXES` currently present, zero while loading and all of them once
    /// finalized.
    fn count_baseline_indexes(&mut self) -> Result<i64>;

    /// Number of partitions having a clustering index.
    fn count_clustered_partitions(&mut self) -> Result<i64>;
}

/// Where to import data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreTarget {
    /// A PostgreSQL connection string, either an URL or `key=value` pairs.
    Postgres(String),
    Sqlite(PathBuf),
}

impl StoreTarget {
    pub fn connect(&self) -> Result<Box<dyn Store>> {
        let store: Box<dyn Store> = match self {
            Self::Postgres(params) => Box::new(PgStore::connect(params)?),
            Self::Sqlite(path) => Box::new(SqliteStore::open(path)?),
        };

        Ok(store)
    }
}

impl FromStr for StoreTarget {
    type Err = Error;

    /// # Example
    /// ```
    /// use loader::store::StoreTarget;
    ///
    /// let parse = |s: &str| s.parse::<StoreTarget>().ok();
    ///
    /// assert!(matches!(parse("postgres://localhost/geo"), Some(StoreTarget::Postgres(_))));
    /// assert!(matches!(parse("host=localhost dbname=geo"), Some(StoreTarget::Postgres(_))));
    /// assert_eq!(parse("sqlite://out.db"), Some(StoreTarget::Sqlite("out.db".into())));
    /// assert_eq!(parse("mysql://localhost"), None);
    /// assert_eq!(parse("sqlite://"), None);
    /// ```
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Some(path) = s.strip_prefix(SQLITE_SCHEME) {
            if !path.is_empty() {
                return Ok(Self::Sqlite(path.into()));
            }
        } else if s.starts_with("postgres://")
            || s.starts_with("postgresql://")
            || (!s.contains("://") && s.contains('='))
        {
            return Ok(Self::Postgres(s.to_owned()));
        }

        Err(Error::UnsupportedTarget(s.to_owned()))
    }
}

impl fmt::Display for StoreTarget {
    /// Connection strings are not displayed as they may hold credentials.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Postgres(_) => write!(f, "PostgreSQL"),
            Self::Sqlite(path) => write!(f, "SQLite ({})", path.display()),
        }
    }
}

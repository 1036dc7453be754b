//! SQLite backend.
//!
//! SQLite has no table partitioning: houses are kept in a single table and each partition is
//! materialized as a set of partial indexes restricted to its X range. Partitions are listed in
//! the `house_partition` table. Foreign keys are declared along with the tables and never
//! enforced during loads, as `foreign_keys` is left disabled.

use std::path::Path;
use std::time::Duration;

use csv::ReaderBuilder;
use importer_openaddresses::LicenseRecord;
use itertools::Itertools;
use rusqlite::{params, params_from_iter, Connection, TransactionBehavior};

use super::{partition_indexes, Store, TableCounts, BASELINE_INDEXES, FOREIGN_KEYS};
use crate::bulk::{LoadBatch, Table};
use crate::partition::{Partition, PartitionLayout};
use crate::{Error, Result};

/// Time a connection waits for another one to release its lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(60);

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        Ok(Self { conn })
    }

    fn count(&self, query: &str) -> Result<i64> {
        Ok(self.conn.query_row(query, [], |row| row.get(0))?)
    }
}

/// Condition selecting the houses of a partition.
fn partition_filter(partition: &Partition) -> String {
    if partition.is_last {
        format!("x >= {:?}", partition.lower)
    } else {
        format!("x >= {:?} AND x < {:?}", partition.lower, partition.upper)
    }
}

fn insert_statement(table: &Table) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.name,
        table.column_list(),
        (1..=table.columns.len()).map(|i| format!("?{}", i)).join(", "),
    )
}

fn drop_indexes_statement() -> String {
    BASELINE_INDEXES
        .iter()
        .map(|index| format!("DROP INDEX IF EXISTS {};", index.name))
        .join("\n")
}

impl Store for SqliteStore {
    fn prepare_schema(&mut self, layout: &PartitionLayout, clean: bool) -> Result<()> {
        if clean {
            self.conn.execute_batch(
                "
                    DROP VIEW IF EXISTS address_data;
                    DROP TABLE IF EXISTS house;
                    DROP TABLE IF EXISTS house_partition;
                    DROP TABLE IF EXISTS street;
                    DROP TABLE IF EXISTS city;
                    DROP TABLE IF EXISTS license;
                ",
            )?;
        }

        self.conn.execute_batch(
            "
                CREATE TABLE IF NOT EXISTS license (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    website     TEXT NOT NULL,
                    license     TEXT NOT NULL,
                    attribution TEXT NOT NULL,
                    source      TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS city (
                    id          TEXT PRIMARY KEY,
                    city        TEXT NOT NULL,
                    district    TEXT NOT NULL,
                    region      TEXT NOT NULL,
                    postcode    TEXT NOT NULL,
                    license_id  INTEGER NOT NULL
                        CONSTRAINT city_license_id_fk REFERENCES license (id)
                        ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED
                );

                CREATE TABLE IF NOT EXISTS street (
                    id          TEXT PRIMARY KEY,
                    street      TEXT NOT NULL,
                    unit        TEXT NOT NULL,
                    city_id     TEXT NOT NULL
                        CONSTRAINT street_city_id_fk REFERENCES city (id)
                        ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED
                );

                CREATE TABLE IF NOT EXISTS house (
                    x           REAL NOT NULL,
                    y           REAL NOT NULL,
                    name        TEXT,
                    housenumber TEXT NOT NULL,
                    geohash     TEXT NOT NULL,
                    street_id   TEXT NOT NULL
                        CONSTRAINT house_street_id_fk REFERENCES street (id)
                        ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED,
                    source      TEXT NOT NULL
                        CHECK (source IN ('openaddresses', 'openstreetmap'))
                );

                CREATE TABLE IF NOT EXISTS house_partition (
                    id          INTEGER PRIMARY KEY,
                    name        TEXT NOT NULL,
                    lower       REAL NOT NULL,
                    upper       REAL
                );

                CREATE VIEW IF NOT EXISTS address_data AS
                    SELECT
                        house.x,
                        house.y,
                        house.name,
                        house.housenumber,
                        house.geohash,
                        street.street,
                        street.unit,
                        city.city,
                        city.district,
                        city.region,
                        city.postcode,
                        city.license_id
                    FROM house
                    JOIN street ON street.id = house.street_id
                    JOIN city ON city.id = street.city_id;
            ",
        )?;

        let tx = self.conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO house_partition (id, name, lower, upper)
                    VALUES (?1, ?2, ?3, ?4)",
            )?;

            for partition in layout.partitions() {
                let upper = if partition.is_last {
                    None
                } else {
                    Some(partition.upper)
                };

                stmt.execute(params![
                    partition.index,
                    partition.table_name(),
                    partition.lower,
                    upper
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn drop_constraints(&mut self) -> Result<()> {
        self.conn.execute_batch(&drop_indexes_statement())?;
        Ok(())
    }

    fn restore_constraints(&mut self) -> Result<()> {
        let create = BASELINE_INDEXES
            .iter()
            .map(|index| {
                format!(
                    "CREATE INDEX {} ON {} ({});",
                    index.name, index.table, index.column
                )
            })
            .join("\n");

        self.conn
            .execute_batch(&format!("{}\n{}", drop_indexes_statement(), create))?;
        Ok(())
    }

    fn insert_license(&mut self, record: &LicenseRecord) -> Result<i32> {
        self.conn.execute(
            "INSERT INTO license (website, license, attribution, source)
                VALUES (?1, ?2, ?3, ?4)",
            params![
                record.website,
                record.license,
                record.attribution,
                record.source
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        i32::try_from(id).map_err(|_| Error::LicenseIdOverflow(id))
    }

    fn bulk_load(&mut self, batch: &LoadBatch) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        for (table, data) in batch.streams() {
            let mut stmt = tx.prepare(&insert_statement(table))?;
            let mut rdr = ReaderBuilder::new().has_headers(false).from_reader(data);

            for record in rdr.records() {
                let record = record?;
                let values = table.columns.iter().zip(record.iter()).map(|(column, value)| {
                    if value.is_empty() && table.is_nullable(column) {
                        None
                    } else {
                        Some(value)
                    }
                });

                stmt.execute(params_from_iter(values))?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn optimize_partition(&mut self, partition: &Partition) -> Result<()> {
        let filter = partition_filter(partition);
        let [geohash_idx, housenumber_idx, location_idx] = partition_indexes(partition);

        self.conn.execute_batch(&format!(
            "
                DROP INDEX IF EXISTS {geohash_idx};
                DROP INDEX IF EXISTS {housenumber_idx};
                DROP INDEX IF EXISTS {location_idx};
                CREATE INDEX {geohash_idx} ON house (geohash) WHERE {filter};
                CREATE INDEX {housenumber_idx} ON house (housenumber) WHERE {filter};
                CREATE INDEX {location_idx} ON house (x, y) WHERE {filter};
                ANALYZE {geohash_idx};
                ANALYZE {housenumber_idx};
                ANALYZE {location_idx};
            ",
            geohash_idx = geohash_idx,
            housenumber_idx = housenumber_idx,
            location_idx = location_idx,
            filter = filter,
        ))?;

        Ok(())
    }

    fn count_rows(&mut self) -> Result<TableCounts> {
        Ok(TableCounts {
            licenses: self.count("SELECT COUNT(*) FROM license")?,
            cities: self.count("SELECT COUNT(*) FROM city")?,
            streets: self.count("SELECT COUNT(*) FROM street")?,
            houses: self.count("SELECT COUNT(*) FROM house")?,
        })
    }

    fn count_foreign_keys(&mut self) -> Result<i64> {
        let mut stmt = self
            .conn
            .prepare("SELECT COUNT(*) FROM pragma_foreign_key_list(?1)")?;
        let mut total = 0;

        for fk in FOREIGN_KEYS.iter() {
            total += stmt.query_row([fk.table], |row| row.get::<_, i64>(0))?;
        }

        Ok(total)
    }

    fn count_baseline_indexes(&mut self) -> Result<i64> {
        let query = format!(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name IN ({})",
            (1..=BASELINE_INDEXES.len()).map(|i| format!("?{}", i)).join(", "),
        );
        let names = BASELINE_INDEXES.iter().map(|index| index.name);

        Ok(self
            .conn
            .query_row(&query, params_from_iter(names), |row| row.get(0))?)
    }

    fn count_clustered_partitions(&mut self) -> Result<i64> {
        self.count(
            r"SELECT COUNT(*) FROM sqlite_master
                WHERE type = 'index' AND name LIKE 'house\_p%\_geohash\_idx' ESCAPE '\'",
        )
    }
}

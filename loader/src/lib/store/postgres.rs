//! PostgreSQL backend, with PostGIS and pg_trgm.

use std::io::Write;

use ::postgres::{Client, NoTls};
use importer_openaddresses::LicenseRecord;
use itertools::Itertools;
use tools::projection::STORAGE_SRID;

use super::{partition_indexes, Store, TableCounts, BASELINE_INDEXES, FOREIGN_KEYS};
use crate::bulk::{LoadBatch, Table};
use crate::partition::{Partition, PartitionLayout};
use crate::Result;

/// Tables the foreign keys are looked up in.
const HIERARCHY_TABLES: [&str; 4] = ["license", "city", "street", "house"];

pub struct PgStore {
    client: Client,
}

impl PgStore {
    /// Opens a connection, durability of commits is relaxed as a failed import is restarted from
    /// scratch anyway.
    pub fn connect(params: &str) -> Result<Self> {
        let mut client = Client::connect(params, NoTls)?;
        client.batch_execute("SET synchronous_commit TO OFF")?;
        Ok(Self { client })
    }

    fn execute_all<I>(&mut self, statements: I) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        for statement in statements {
            self.client.batch_execute(&statement)?;
        }

        Ok(())
    }

    fn count(&mut self, query: &str) -> Result<i64> {
        Ok(self.client.query_one(query, &[])?.get(0))
    }
}

fn partition_statement(partition: &Partition) -> String {
    let upper = if partition.is_last {
        "MAXVALUE".to_owned()
    } else {
        format!("{:?}", partition.upper)
    };

    format!(
        "CREATE TABLE IF NOT EXISTS {} PARTITION OF house FOR VALUES FROM ({:?}) TO ({})",
        partition.table_name(),
        partition.lower,
        upper,
    )
}

fn copy_statement(table: &Table) -> String {
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv, FORCE_NOT_NULL ({}))",
        table.name,
        table.column_list(),
        table.non_nullable_columns().join(", "),
    )
}

fn drop_constraints_statements() -> impl Iterator<Item = String> {
    let foreign_keys = FOREIGN_KEYS.iter().map(|fk| {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
            fk.table, fk.name
        )
    });
    let indexes = BASELINE_INDEXES
        .iter()
        .map(|index| format!("DROP INDEX IF EXISTS {}", index.name));

    foreign_keys.chain(indexes)
}

impl Store for PgStore {
    fn prepare_schema(&mut self, layout: &PartitionLayout, clean: bool) -> Result<()> {
        if clean {
            self.client.batch_execute(
                "
                    DROP VIEW IF EXISTS address_data;
                    DROP TABLE IF EXISTS house, street, city, license CASCADE;
                    DROP TYPE IF EXISTS house_source;
                ",
            )?;
        }

        self.client.batch_execute(&format!(
            "
                CREATE EXTENSION IF NOT EXISTS postgis;
                CREATE EXTENSION IF NOT EXISTS pg_trgm;

                DO $$ BEGIN
                    CREATE TYPE house_source AS ENUM ('openaddresses', 'openstreetmap');
                EXCEPTION
                    WHEN duplicate_object THEN NULL;
                END $$;

                CREATE TABLE IF NOT EXISTS license (
                    id          SERIAL PRIMARY KEY,
                    website     TEXT NOT NULL,
                    license     TEXT NOT NULL,
                    attribution TEXT NOT NULL,
                    source      TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS city (
                    id          UUID PRIMARY KEY,
                    city        TEXT NOT NULL,
                    district    TEXT NOT NULL,
                    region      TEXT NOT NULL,
                    postcode    TEXT NOT NULL,
                    license_id  INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS street (
                    id          UUID PRIMARY KEY,
                    street      TEXT NOT NULL,
                    unit        TEXT NOT NULL,
                    city_id     UUID NOT NULL
                );

                CREATE TABLE IF NOT EXISTS house (
                    x           DOUBLE PRECISION NOT NULL,
                    y           DOUBLE PRECISION NOT NULL,
                    location    geometry(Point, {srid}) GENERATED ALWAYS AS
                                    (ST_SetSRID(ST_MakePoint(x, y), {srid})) STORED,
                    name        TEXT,
                    housenumber TEXT NOT NULL,
                    geohash     TEXT NOT NULL,
                    street_id   UUID NOT NULL,
                    source      house_source NOT NULL
                ) PARTITION BY RANGE (x);
            ",
            srid = STORAGE_SRID,
        ))?;

        self.execute_all(layout.partitions().map(|partition| partition_statement(&partition)))?;

        self.client.batch_execute(
            "
                CREATE OR REPLACE VIEW address_data AS
                    SELECT
                        house.location,
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

        Ok(())
    }

    fn drop_constraints(&mut self) -> Result<()> {
        self.execute_all(drop_constraints_statements())
    }

    fn restore_constraints(&mut self) -> Result<()> {
        self.execute_all(drop_constraints_statements())?;

        self.execute_all(FOREIGN_KEYS.iter().map(|fk| {
            format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} (id) \
                 ON DELETE CASCADE INITIALLY DEFERRED",
                fk.table, fk.name, fk.column, fk.references
            )
        }))?;

        self.execute_all(BASELINE_INDEXES.iter().map(|index| {
            if index.trigram {
                format!(
                    "CREATE INDEX {} ON {} USING GIN ({} gin_trgm_ops)",
                    index.name, index.table, index.column
                )
            } else {
                format!(
                    "CREATE INDEX {} ON {} ({})",
                    index.name, index.table, index.column
                )
            }
        }))
    }

    fn insert_license(&mut self, record: &LicenseRecord) -> Result<i32> {
        let row = self.client.query_one(
            "INSERT INTO license (website, license, attribution, source)
                VALUES ($1, $2, $3, $4)
                RETURNING id",
            &[
                &record.website,
                &record.license,
                &record.attribution,
                &record.source,
            ],
        )?;

        Ok(row.get(0))
    }

    fn bulk_load(&mut self, batch: &LoadBatch) -> Result<()> {
        let mut tx = self.client.transaction()?;

        for (table, data) in batch.streams() {
            let statement = copy_statement(table);
            let mut writer = tx.copy_in(statement.as_str())?;
            writer.write_all(data)?;
            writer.finish()?;
        }

        tx.commit()?;
        Ok(())
    }

    fn optimize_partition(&mut self, partition: &Partition) -> Result<()> {
        let table = partition.table_name();
        let [geohash_idx, housenumber_idx, location_idx] = partition_indexes(partition);

        self.execute_all([
            format!("DROP INDEX IF EXISTS {}", geohash_idx),
            format!("DROP INDEX IF EXISTS {}", housenumber_idx),
            format!("DROP INDEX IF EXISTS {}", location_idx),
            format!("CREATE INDEX {} ON {} (geohash)", geohash_idx, table),
            format!("CLUSTER {} USING {}", table, geohash_idx),
            format!(
                "CREATE INDEX {} ON {} USING GIN (housenumber gin_trgm_ops)",
                housenumber_idx, table
            ),
            format!("CREATE INDEX {} ON {} USING GIST (location)", location_idx, table),
            format!("ANALYZE {}", table),
        ])
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
        let tables = HIERARCHY_TABLES
            .iter()
            .map(|table| format!("'{}'::regclass", table))
            .join(", ");

        self.count(&format!(
            "SELECT COUNT(*) FROM pg_constraint WHERE contype = 'f' AND conrelid IN ({})",
            tables
        ))
    }

    fn count_baseline_indexes(&mut self) -> Result<i64> {
        let names: Vec<&str> = BASELINE_INDEXES.iter().map(|index| index.name).collect();
        let row = self.client.query_one(
            "SELECT COUNT(*) FROM pg_indexes WHERE indexname = ANY($1)",
            &[&names],
        )?;

        Ok(row.get(0))
    }

    fn count_clustered_partitions(&mut self) -> Result<i64> {
        self.count(
            "SELECT COUNT(DISTINCT tree.relid)
                FROM pg_partition_tree('house') AS tree
                JOIN pg_index ON pg_index.indrelid = tree.relid
                WHERE tree.isleaf AND pg_index.indisclustered",
        )
    }
}

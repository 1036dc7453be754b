//! Serialization of a hierarchy into the CSV streams loaded into the store.
//!
//! Streams have no header and their fields follow exactly the columns of the destination table.
//! An empty unquoted field means NULL for nullable columns and an empty string for the others.

use csv::WriterBuilder;
use itertools::Itertools;
use serde::Serialize;
use uuid::Uuid;

use crate::hierarchy::Hierarchy;
use crate::Result;

/// A destination table and the columns bulk data is written to.
#[derive(Debug, PartialEq, Eq)]
pub struct Table {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub nullable: &'static [&'static str],
}

pub const CITY: Table = Table {
    name: "city",
    columns: &["id", "city", "district", "region", "postcode", "license_id"],
    nullable: &[],
};

pub const STREET: Table = Table {
    name: "street",
    columns: &["id", "street", "unit", "city_id"],
    nullable: &[],
};

pub const HOUSE: Table = Table {
    name: "house",
    columns: &["x", "y", "name", "housenumber", "geohash", "street_id", "source"],
    nullable: &["name"],
};

/// Tables in the order they must be loaded.
pub const TABLES: [&Table; 3] = [&CITY, &STREET, &HOUSE];

impl Table {
    pub fn is_nullable(&self, column: &str) -> bool {
        self.nullable.iter().any(|nullable| *nullable == column)
    }

    pub fn column_list(&self) -> String {
        self.columns.iter().join(", ")
    }

    pub fn non_nullable_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns
            .iter()
            .copied()
            .filter(move |column| !self.is_nullable(column))
    }
}

/// Dataset a house comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HouseSource {
    OpenAddresses,
    OpenStreetMap,
}

#[derive(Serialize)]
struct CityRecord<'a> {
    id: Uuid,
    city: &'a str,
    district: &'a str,
    region: &'a str,
    postcode: &'a str,
    license_id: i32,
}

#[derive(Serialize)]
struct StreetRecord<'a> {
    id: Uuid,
    street: &'a str,
    unit: &'a str,
    city_id: Uuid,
}

#[derive(Serialize)]
struct HouseRecord<'a> {
    x: f64,
    y: f64,
    name: Option<&'a str>,
    housenumber: &'a str,
    geohash: &'a str,
    street_id: Uuid,
    source: HouseSource,
}

/// The three streams of a file, ready to be loaded.
#[derive(Clone, Debug, Default)]
pub struct LoadBatch {
    pub city: Vec<u8>,
    pub street: Vec<u8>,
    pub house: Vec<u8>,
    pub nb_cities: u64,
    pub nb_streets: u64,
    pub nb_houses: u64,
}

impl LoadBatch {
    /// Streams along with their table, in load order.
    pub fn streams(&self) -> [(&'static Table, &[u8]); 3] {
        [
            (&CITY, self.city.as_slice()),
            (&STREET, self.street.as_slice()),
            (&HOUSE, self.house.as_slice()),
        ]
    }
}

fn write_records<T: Serialize>(records: impl IntoIterator<Item = T>) -> Result<(Vec<u8>, u64)> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    let mut count = 0;

    for record in records {
        writer.serialize(record)?;
        count += 1;
    }

    let data = writer.into_inner().map_err(|err| err.into_error())?;
    Ok((data, count))
}

/// Serializes a hierarchy, cities being attached to `license_id`.
pub fn serialize(hierarchy: &Hierarchy, license_id: i32, source: HouseSource) -> Result<LoadBatch> {
    let (city, nb_cities) = write_records(hierarchy.cities.iter().map(|city| CityRecord {
        id: city.id,
        city: &city.city,
        district: &city.district,
        region: &city.region,
        postcode: &city.postcode,
        license_id,
    }))?;

    let (street, nb_streets) = write_records(hierarchy.streets().map(|(city, street)| {
        StreetRecord {
            id: street.id,
            street: &street.street,
            unit: &street.unit,
            city_id: city.id,
        }
    }))?;

    let (house, nb_houses) = write_records(hierarchy.houses().map(|(street, house)| {
        HouseRecord {
            x: house.location.x(),
            y: house.location.y(),
            name: None,
            housenumber: &house.housenumber,
            geohash: &house.geohash,
            street_id: street.id,
            source,
        }
    }))?;

    Ok(LoadBatch {
        city,
        street,
        house,
        nb_cities,
        nb_streets,
        nb_houses,
    })
}

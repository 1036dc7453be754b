//! Normalization of the rows of one file into a `city -> street -> house` hierarchy.
//!
//! Rows sharing the same city fields resolve to a single city and rows sharing the same street
//! fields inside of a city resolve to a single street. Identifiers are minted when an entity is
//! first seen, so the hierarchy can be loaded without reading anything back from the store.

use std::collections::HashMap;

use geo::Point;
use importer_openaddresses::AddressSink;
use sha2::{Digest, Sha256};
use smartstring::{LazyCompact, SmartString};
use tools::projection::locate;
use tools::Address;
use uuid::Uuid;

use crate::partition::PartitionLayout;

type HouseNumber = SmartString<LazyCompact>;

/// Casing applied to text fields before they are used as keys.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CaseRule {
    /// Values are kept as found in the source.
    #[default]
    Preserve,
    /// Names are title-cased and postcodes upper-cased.
    Normalize,
}

impl CaseRule {
    pub fn name(self, value: String) -> String {
        match self {
            Self::Preserve => value,
            Self::Normalize => title_case(&value),
        }
    }

    pub fn postcode(self, value: String) -> String {
        match self {
            Self::Preserve => value,
            Self::Normalize => value.to_uppercase(),
        }
    }

    /// Applies the rule to every text field of an address.
    pub fn apply(self, addr: Address) -> Address {
        Address {
            street: self.name(addr.street),
            city: self.name(addr.city),
            district: self.name(addr.district),
            region: self.name(addr.region),
            postcode: self.postcode(addr.postcode),
            ..addr
        }
    }
}

/// Upper-cases the first letter of every word and lower-cases the others.
///
/// # Example
/// ```
/// use loader::hierarchy::title_case;
///
/// assert_eq!(title_case("RUE DE L'ÉGLISE"), "Rue De L'Église");
/// assert_eq!(title_case("saint-jean 3rd"), "Saint-Jean 3rd");
/// ```
pub fn title_case(value: &str) -> String {
    let mut res = String::with_capacity(value.len());
    let mut word_start = true;

    for c in value.chars() {
        if word_start {
            res.extend(c.to_uppercase());
        } else {
            res.extend(c.to_lowercase());
        }

        word_start = !c.is_alphanumeric();
    }

    res
}

/// Digest identifying an entity by its content.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    /// Hashes a tuple of fields. Each field is prefixed by its length so that moving characters
    /// from one field to another changes the key.
    ///
    /// # Example
    /// ```
    /// use loader::hierarchy::ContentKey;
    ///
    /// assert_eq!(ContentKey::new(&["a", "bc"]), ContentKey::new(&["a", "bc"]));
    /// assert_ne!(ContentKey::new(&["a", "bc"]), ContentKey::new(&["ab", "c"]));
    /// ```
    pub fn new(fields: &[&str]) -> Self {
        let mut hasher = Sha256::new();

        for field in fields {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }

        Self(hasher.finalize().into())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct House {
    pub location: Point<f64>,
    pub geohash: String,
    pub housenumber: String,
}

#[derive(Clone, Debug)]
pub struct Street {
    pub id: Uuid,
    pub street: String,
    pub unit: String,
    pub houses: Vec<House>,
    house_index: HashMap<HouseNumber, usize>,
}

impl Street {
    fn new(street: String, unit: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            street,
            unit,
            houses: Vec::new(),
            house_index: HashMap::new(),
        }
    }

    /// Records a house, returns true if it replaced one with the same number.
    fn insert(&mut self, house: House) -> bool {
        let number = HouseNumber::from(house.housenumber.as_str());

        if let Some(&pos) = self.house_index.get(&number) {
            self.houses[pos] = house;
            true
        } else {
            self.house_index.insert(number, self.houses.len());
            self.houses.push(house);
            false
        }
    }
}

#[derive(Clone, Debug)]
pub struct City {
    pub id: Uuid,
    pub city: String,
    pub district: String,
    pub region: String,
    pub postcode: String,
    pub streets: Vec<Street>,
    street_index: HashMap<ContentKey, usize>,
}

impl City {
    fn new(addr: &Address) -> Self {
        Self {
            id: Uuid::new_v4(),
            city: addr.city.clone(),
            district: addr.district.clone(),
            region: addr.region.clone(),
            postcode: addr.postcode.clone(),
            streets: Vec::new(),
            street_index: HashMap::new(),
        }
    }

    fn street_mut(&mut self, addr: &Address) -> &mut Street {
        let key = ContentKey::new(&addr.street_fields());
        let streets = &mut self.streets;
        let pos = *self.street_index.entry(key).or_insert_with(|| {
            streets.push(Street::new(addr.street.clone(), addr.unit.clone()));
            streets.len() - 1
        });

        &mut self.streets[pos]
    }
}

/// Counters of a normalization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    /// Rows that made it into the hierarchy.
    pub rows: u64,
    /// Rows overwriting a previous house with the same number.
    pub replaced: u64,
    /// Rows whose coordinate can't be projected or falls outside of the partitioned range.
    pub out_of_range: u64,
}

/// Entities of one file, in the order they were first seen.
#[derive(Clone, Debug, Default)]
pub struct Hierarchy {
    pub cities: Vec<City>,
    city_index: HashMap<ContentKey, usize>,
}

impl Hierarchy {
    fn city_mut(&mut self, addr: &Address) -> &mut City {
        let key = ContentKey::new(&addr.city_fields());
        let cities = &mut self.cities;
        let pos = *self.city_index.entry(key).or_insert_with(|| {
            cities.push(City::new(addr));
            cities.len() - 1
        });

        &mut self.cities[pos]
    }

    pub fn streets(&self) -> impl Iterator<Item = (&City, &Street)> {
        self.cities
            .iter()
            .flat_map(|city| city.streets.iter().map(move |street| (city, street)))
    }

    pub fn houses(&self) -> impl Iterator<Item = (&Street, &House)> {
        self.streets()
            .flat_map(|(_, street)| street.houses.iter().map(move |house| (street, house)))
    }

    pub fn nb_streets(&self) -> usize {
        self.cities.iter().map(|city| city.streets.len()).sum()
    }

    pub fn nb_houses(&self) -> usize {
        self.streets().map(|(_, street)| street.houses.len()).sum()
    }
}

/// Builds the hierarchy of a file from its rows.
///
/// # Example
/// ```
/// use importer_openaddresses::AddressSink;
/// use loader::hierarchy::{CaseRule, Normalizer};
/// use loader::partition::PartitionLayout;
/// use tools::Address;
///
/// let mut normalizer = Normalizer::new(CaseRule::Preserve, PartitionLayout::default());
///
/// for number in ["1", "2", "1"] {
///     normalizer.insert(Address {
///         lon: 2.35,
///         lat: 48.85,
///         number: number.to_owned(),
///         street: "Rue de Rivoli".to_owned(),
///         city: "Paris".to_owned(),
///         ..Address::default()
///     });
/// }
///
/// let (hierarchy, stats) = normalizer.finish();
/// assert_eq!(hierarchy.cities.len(), 1);
/// assert_eq!(hierarchy.nb_houses(), 2);
/// assert_eq!(stats.replaced, 1);
/// ```
pub struct Normalizer {
    hierarchy: Hierarchy,
    stats: NormalizeStats,
    case_rule: CaseRule,
    layout: PartitionLayout,
}

impl Normalizer {
    pub fn new(case_rule: CaseRule, layout: PartitionLayout) -> Self {
        Self {
            hierarchy: Hierarchy::default(),
            stats: NormalizeStats::default(),
            case_rule,
            layout,
        }
    }

    pub fn stats(&self) -> NormalizeStats {
        self.stats
    }

    pub fn finish(self) -> (Hierarchy, NormalizeStats) {
        (self.hierarchy, self.stats)
    }
}

impl AddressSink for Normalizer {
    fn insert(&mut self, addr: Address) {
        let located = match locate(addr.lon, addr.lat) {
            Some(located) if self.layout.partition_of(located.location.x()).is_some() => located,
            _ => {
                self.stats.out_of_range += 1;
                return;
            }
        };

        let addr = self.case_rule.apply(addr);
        let house = House {
            location: located.location,
            geohash: located.geohash,
            housenumber: addr.number.clone(),
        };

        let replaced = self
            .hierarchy
            .city_mut(&addr)
            .street_mut(&addr)
            .insert(house);

        self.stats.rows += 1;

        if replaced {
            self.stats.replaced += 1;
        }
    }
}

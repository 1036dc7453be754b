//! Reading of OpenAddresses extracts.
//!
//! An extract is a zip archive (or the directory it was unpacked into) holding one CSV file per
//! source, together with a license manifest. Rows are streamed one by one into an
//! [`AddressSink`], files are never loaded in memory as a whole.

use std::io::Read;
use std::str::FromStr;

use csv::{ReaderBuilder, StringRecord};
use tools::Address;

pub mod archive;
mod error;
pub mod license;

pub use archive::{Archive, DataFile};
pub use error::{Error, Result};
pub use license::{LicenseRecord, UnknownLicensePolicy};

/// Something addresses can be fed into.
pub trait AddressSink {
    fn insert(&mut self, addr: Address);
}

impl AddressSink for Vec<Address> {
    fn insert(&mut self, addr: Address) {
        self.push(addr);
    }
}

/// Counters of a CSV read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Rows sent to the sink.
    pub rows: u64,
    /// Rows that could not be read or that had no usable coordinates.
    pub skipped: u64,
}

macro_rules! get_field {
    ($headers:expr, $column:ident, $record:expr) => {
        $record.get($headers.$column).unwrap_or("").trim().to_owned()
    };
}

macro_rules! get_f64 {
    ($headers:expr, $column:ident, $record:expr, $stats:expr) => {
        match $record
            .get($headers.$column)
            .and_then(|x| f64::from_str(x.trim()).ok())
        {
            Some(x) => x,
            None => {
                $stats.skipped += 1;
                continue;
            }
        }
    };
}

/// Position of each column in the records of a file.
struct Headers {
    /// Number of columns of the header, shorter records are incomplete.
    len: usize,
    lon: usize,
    lat: usize,
    number: usize,
    street: usize,
    unit: usize,
    city: usize,
    district: usize,
    region: usize,
    postcode: usize,
}

impl Headers {
    fn new(headers: &StringRecord) -> Result<Headers> {
        let find = |column: &'static str| {
            headers
                .iter()
                .position(|header| header.trim().eq_ignore_ascii_case(column))
                .ok_or(Error::MissingColumn(column))
        };

        Ok(Headers {
            len: headers.len(),
            lon: find("lon")?,
            lat: find("lat")?,
            number: find("number")?,
            street: find("street")?,
            unit: find("unit")?,
            city: find("city")?,
            district: find("district")?,
            region: find("region")?,
            postcode: find("postcode")?,
        })
    }
}

/// Streams the rows of a CSV extract into `sink`.
///
/// A header lacking one of the address columns fails the whole file. Malformed records, records
/// with fewer fields than the header and rows without valid coordinates are skipped and counted,
/// while I/O errors fail the read.
///
/// # Example
/// ```
/// use openaddresses::read_csv;
/// use tools::Address;
///
/// let data = "LON,LAT,NUMBER,STREET,UNIT,CITY,DISTRICT,REGION,POSTCODE\n\
///     13.4,52.5,1,Unter den Linden,,Berlin,,,10117\n\
///     oops,52.5,2,Unter den Linden,,Berlin,,,10117\n";
///
/// let mut addresses: Vec<Address> = Vec::new();
/// let stats = read_csv(data.as_bytes(), &mut addresses).unwrap();
///
/// assert_eq!((stats.rows, stats.skipped), (1, 1));
/// assert_eq!(addresses[0].street, "Unter den Linden");
/// ```
pub fn read_csv<R: Read, T: AddressSink + ?Sized>(reader: R, sink: &mut T) -> Result<ReadStats> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = Headers::new(rdr.headers()?)?;
    let mut stats = ReadStats::default();

    for record in rdr.into_records() {
        let record = match record {
            Ok(record) => record,
            Err(err) if err.is_io_error() => return Err(err.into()),
            Err(_) => {
                stats.skipped += 1;
                continue;
            }
        };

        if record.len() < headers.len {
            stats.skipped += 1;
            continue;
        }

        sink.insert(Address {
            lon: get_f64!(headers, lon, record, stats),
            lat: get_f64!(headers, lat, record, stats),
            number: get_field!(headers, number, record),
            street: get_field!(headers, street, record),
            unit: get_field!(headers, unit, record),
            city: get_field!(headers, city, record),
            district: get_field!(headers, district, record),
            region: get_field!(headers, region, record),
            postcode: get_field!(headers, postcode, record),
        });

        stats.rows += 1;
    }

    Ok(stats)
}

/// Streams one data file of an archive into `sink`.
pub fn import_file<T: AddressSink + ?Sized>(
    archive: &Archive,
    file: &DataFile,
    sink: &mut T,
) -> Result<ReadStats> {
    archive.with_file(&file.name, |reader| read_csv(reader, sink))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;

    use tempdir::TempDir;

    use super::*;

    const HEADER: &str = "LON,LAT,NUMBER,STREET,UNIT,CITY,DISTRICT,REGION,POSTCODE,HASH\n";

    #[test]
    fn header_is_case_insensitive() {
        let data = "lat,Lon,number,STREET,unit,city,district,region,postcode\n\
            48.85,2.35, 12 ,Rue de Rivoli,,Paris,,,75001\n";

        let mut addresses: Vec<Address> = Vec::new();
        let stats = read_csv(data.as_bytes(), &mut addresses).unwrap();

        assert_eq!(stats, ReadStats { rows: 1, skipped: 0 });
        assert_eq!(addresses[0].lon, 2.35);
        assert_eq!(addresses[0].lat, 48.85);
        assert_eq!(addresses[0].number, "12");
        assert_eq!(addresses[0].postcode, "75001");
    }

    #[test]
    fn missing_column() {
        let data = "LON,LAT,NUMBER,STREET,UNIT,CITY,DISTRICT,REGION\n";
        let mut addresses: Vec<Address> = Vec::new();

        match read_csv(data.as_bytes(), &mut addresses) {
            Err(Error::MissingColumn(column)) => assert_eq!(column, "postcode"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn invalid_rows_are_counted() {
        let data = format!(
            "{}\
            2.35,48.85,1,Rue de Rivoli,,Paris,,,75001,a\n\
            ,48.85,2,Rue de Rivoli,,Paris,,,75001,b\n\
            2.35,,3,Rue de Rivoli,,Paris,,,75001,c\n\
            2.35,48.85,4\n\
            2.35,48.85,5,Rue de Rivoli,,Paris,,,75001,e\n",
            HEADER
        );

        let mut addresses: Vec<Address> = Vec::new();
        let stats = read_csv(data.as_bytes(), &mut addresses).unwrap();

        assert_eq!(stats, ReadStats { rows: 2, skipped: 3 });
        assert_eq!(addresses[0].number, "1");
        assert_eq!(addresses[1].number, "5");
    }

    #[test]
    fn truncated_rows_are_skipped() {
        let data = "LON,LAT,NUMBER,STREET,UNIT,CITY,DISTRICT,REGION,POSTCODE\n\
            2.35,48.85\n\
            2.35,48.85,1,Rue de Rivoli,,Paris,,\n\
            2.35,48.85,2,Rue de Rivoli,,Paris,,,75001\n";

        let mut addresses: Vec<Address> = Vec::new();
        let stats = read_csv(data.as_bytes(), &mut addresses).unwrap();

        assert_eq!(stats, ReadStats { rows: 1, skipped: 2 });
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].postcode, "75001");
    }

    #[test]
    fn archive_directory() {
        let dir = TempDir::new("openaddresses").unwrap();
        fs::create_dir_all(dir.path().join("fr")).unwrap();
        fs::create_dir_all(dir.path().join("summary")).unwrap();

        let mut file = fs::File::create(dir.path().join("fr/paris.csv")).unwrap();
        writeln!(file, "{}2.35,48.85,1,Rue de Rivoli,,Paris,,,75001,a", HEADER).unwrap();
        fs::write(dir.path().join("summary/fr.csv"), "ignored").unwrap();
        fs::write(dir.path().join("fr/notes.txt"), "ignored").unwrap();
        fs::write(
            dir.path().join("LICENSE.txt"),
            "fr/paris.csv\nWebsite: https://opendata.paris.fr\nLicense: ODbL\n",
        )
        .unwrap();

        let archive = Archive::open(dir.path()).unwrap();
        let files = archive.data_files().unwrap();
        assert_eq!(files, [DataFile::new("fr/paris.csv")]);
        assert_eq!(files[0].source, "fr/paris");

        let licenses = archive
            .licenses(&files, UnknownLicensePolicy::Retain)
            .unwrap();
        assert_eq!(licenses[0].source, "fr/paris");
        assert_eq!(licenses[0].license, "ODbL");

        let mut addresses: Vec<Address> = Vec::new();
        let stats = import_file(&archive, &files[0], &mut addresses).unwrap();
        assert_eq!(stats.rows, 1);
        assert_eq!(addresses[0].city, "Paris");

        assert!(matches!(
            import_file(&archive, &DataFile::new("fr/lyon.csv"), &mut addresses),
            Err(Error::MissingFile(_))
        ));
    }

    #[test]
    fn archive_without_license() {
        let dir = TempDir::new("openaddresses").unwrap();
        fs::write(dir.path().join("a.csv"), HEADER).unwrap();
        fs::write(dir.path().join("b.csv"), HEADER).unwrap();
        fs::write(dir.path().join("README.txt"), "License: CC0\n").unwrap();

        let archive = Archive::open(dir.path()).unwrap();
        let files = archive.data_files().unwrap();

        // The README only describes single-source downloads.
        assert!(matches!(
            archive.licenses(&files, UnknownLicensePolicy::Retain),
            Err(Error::MissingLicense)
        ));

        let licenses = archive
            .licenses(&files[..1], UnknownLicensePolicy::Retain)
            .unwrap();
        assert_eq!(licenses[0].source, "a");
        assert_eq!(licenses[0].license, "CC0");
    }
}

//! Parsing of the license data shipped with OpenAddresses downloads.
//!
//! The manifest lists one block per source, blocks being separated by blank lines:
//!
//! ```text
//! us/ca/san_francisco.csv
//! Website: https://data.sfgov.org/
//! License: Public Domain
//! Required attribution: Yes
//! ```

use std::mem;

use crate::archive::source_label;

const WEBSITE: &str = "Website:";
const LICENSE: &str = "License:";
const ATTRIBUTION: &str = "Required attribution:";

/// License text used by the manifest when the license of a source is not known.
const UNKNOWN: &str = "Unknown";

/// Attribution value meaning that attribution is required without any specific text.
const ATTRIBUTION_WITHOUT_TEXT: &str = "Yes";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LicenseRecord {
    pub source: String,
    pub website: String,
    pub license: String,
    /// Text that has to be displayed along with the data, empty if none is specified.
    pub attribution: String,
}

impl LicenseRecord {
    /// License of OpenStreetMap data, for houses that come from the map rather than from an
    /// OpenAddresses source.
    pub fn openstreetmap() -> Self {
        Self {
            source: "openstreetmap".to_owned(),
            website: "https://www.openstreetmap.org".to_owned(),
            license: "ODbL".to_owned(),
            attribution: "© OpenStreetMap contributors".to_owned(),
        }
    }

    /// Returns true if the license text is missing or explicitly unknown.
    pub fn is_unknown(&self) -> bool {
        self.license.is_empty() || self.license.eq_ignore_ascii_case(UNKNOWN)
    }
}

/// What to do with sources whose license is unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnknownLicensePolicy {
    #[default]
    Retain,
    Skip,
}

impl UnknownLicensePolicy {
    pub fn accepts(self, record: &LicenseRecord) -> bool {
        self == Self::Retain || !record.is_unknown()
    }
}

enum Line<'l> {
    Blank,
    Website(&'l str),
    License(&'l str),
    Attribution(&'l str),
    Other(&'l str),
}

impl<'l> Line<'l> {
    fn classify(line: &'l str) -> Self {
        let line = line.trim();

        if line.is_empty() {
            Self::Blank
        } else if let Some(value) = line.strip_prefix(WEBSITE) {
            Self::Website(value.trim())
        } else if let Some(value) = line.strip_prefix(LICENSE) {
            Self::License(value.trim())
        } else if let Some(value) = line.strip_prefix(ATTRIBUTION) {
            Self::Attribution(value.trim())
        } else {
            Self::Other(line)
        }
    }
}

/// Fields collected for the block being read.
#[derive(Default)]
struct Block {
    source: Option<String>,
    website: Option<String>,
    license: Option<String>,
    attribution: Option<String>,
}

impl Block {
    fn feed(&mut self, line: Line) {
        match line {
            Line::Website(value) => self.website = Some(value.to_owned()),
            Line::License(value) => self.license = Some(value.to_owned()),
            Line::Attribution(value) => self.attribution = Some(attribution(value)),
            Line::Other(value) => {
                if self.source.is_none() {
                    self.source = Some(source_label(value));
                }
            }
            Line::Blank => {}
        }
    }

    fn has_license_data(&self) -> bool {
        self.website.is_some() || self.license.is_some() || self.attribution.is_some()
    }

    /// Turns the block into a record, resetting it. Blocks without any license line (such as the
    /// header of the manifest) or without a source don't produce anything.
    fn take_record(&mut self) -> Option<LicenseRecord> {
        let block = mem::take(self);

        if !block.has_license_data() {
            return None;
        }

        Some(LicenseRecord {
            source: block.source?,
            website: block.website.unwrap_or_default(),
            license: block.license.unwrap_or_default(),
            attribution: block.attribution.unwrap_or_default(),
        })
    }
}

fn attribution(value: &str) -> String {
    if value == ATTRIBUTION_WITHOUT_TEXT {
        String::new()
    } else {
        value.to_owned()
    }
}

/// Parses a license manifest into one record per source.
///
/// # Example
/// ```
/// use openaddresses::license::*;
///
/// let manifest = b"OpenAddresses data collection\n\
///     \n\
///     de/berlin.csv\n\
///     Website: https://daten.berlin.de\n\
///     License: Creative Commons Attribution 3.0\n\
///     Required attribution: Yes\n";
///
/// let records = parse_manifest(manifest, UnknownLicensePolicy::Retain);
/// assert_eq!(records.len(), 1);
/// assert_eq!(records[0].source, "de/berlin");
/// assert_eq!(records[0].attribution, "");
/// ```
pub fn parse_manifest(data: &[u8], policy: UnknownLicensePolicy) -> Vec<LicenseRecord> {
    let text = String::from_utf8_lossy(data);
    let mut records = Vec::new();
    let mut block = Block::default();

    for line in text.lines().map(Line::classify) {
        if let Line::Blank = line {
            records.extend(block.take_record().filter(|record| policy.accepts(record)));
        } else {
            block.feed(line);
        }
    }

    records.extend(block.take_record().filter(|record| policy.accepts(record)));
    records
}

/// Parses the single-source description found in a README, prefixed lines may be anywhere in
/// the document. Returns `None` if neither a website nor a license is given.
pub fn parse_readme(data: &[u8], source: &str) -> Option<LicenseRecord> {
    let text = String::from_utf8_lossy(data);
    let mut block = Block {
        source: Some(source_label(source)),
        ..Block::default()
    };

    for line in text.lines().map(Line::classify) {
        match line {
            Line::Website(_) if block.website.is_some() => {}
            Line::License(_) if block.license.is_some() => {}
            Line::Attribution(_) if block.attribution.is_some() => {}
            Line::Other(_) => {}
            line => block.feed(line),
        }
    }

    if block.website.is_none() && block.license.is_none() {
        return None;
    }

    block.take_record()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &[u8] = b"OpenAddresses data collection, assembled 2019-01-02\r\n\
        \r\n\
        at/city_of_vienna.csv\r\n\
        Website: https://www.data.gv.at\r\n\
        License: Creative Commons Attribution 3.0 Austria\r\n\
        Required attribution: Stadt Wien - data.wien.gv.at\r\n\
        \r\n\
        de/berlin.csv\r\n\
        Website: https://daten.berlin.de\r\n\
        License: Unknown\r\n\
        Required attribution: Yes\r\n\
        \r\n\
        de/hamburg.csv\r\n\
        Website: https://transparenz.hamburg.de\r\n\
        License: Datenlizenz Deutschland Namensnennung 2.0\r\n\
        Required attribution: Yes";

    #[test]
    fn manifest_records() {
        let records = parse_manifest(MANIFEST, UnknownLicensePolicy::Retain);
        assert_eq!(records.len(), 3);

        assert_eq!(
            records[0],
            LicenseRecord {
                source: "at/city_of_vienna".to_owned(),
                website: "https://www.data.gv.at".to_owned(),
                license: "Creative Commons Attribution 3.0 Austria".to_owned(),
                attribution: "Stadt Wien - data.wien.gv.at".to_owned(),
            }
        );

        assert!(records[1].is_unknown());
        assert_eq!(records[1].attribution, "");

        // The last block is not followed by a blank line.
        assert_eq!(records[2].source, "de/hamburg");
    }

    #[test]
    fn skip_unknown_licenses() {
        let records = parse_manifest(MANIFEST, UnknownLicensePolicy::Skip);
        let sources: Vec<_> = records.iter().map(|record| record.source.as_str()).collect();
        assert_eq!(sources, ["at/city_of_vienna", "de/hamburg"]);
    }

    #[test]
    fn parsing_is_deterministic() {
        assert_eq!(
            parse_manifest(MANIFEST, UnknownLicensePolicy::Retain),
            parse_manifest(MANIFEST, UnknownLicensePolicy::Retain)
        );
    }

    #[test]
    fn header_only_manifest() {
        let manifest = b"OpenAddresses data collection\n\nnothing to see here\n";
        assert!(parse_manifest(manifest, UnknownLicensePolicy::Retain).is_empty());
    }

    #[test]
    fn readme_block() {
        let readme = b"This data was collected by OpenAddresses.\n\
            Website: https://www.geoportal.lu\n\
            \n\
            It is licensed as follows:\n\
            License: CC0\n\
            Required attribution: Yes\n";

        let record = parse_readme(readme, "lu/countrywide.csv").unwrap();
        assert_eq!(record.source, "lu/countrywide");
        assert_eq!(record.website, "https://www.geoportal.lu");
        assert_eq!(record.license, "CC0");
        assert_eq!(record.attribution, "");

        assert_eq!(parse_readme(b"no license in here", "lu/countrywide"), None);
    }
}

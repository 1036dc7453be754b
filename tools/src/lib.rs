use time::OffsetDateTime;

pub mod projection;

/// Returns a `String` representing the current time under the form "HH:MM:SS".
///
/// The local offset is used when it can be determined, UTC otherwise.
pub fn get_time() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format!("{:02}:{:02}:{:02}", now.hour(), now.minute(), now.second())
}

/// Formats the message prepended by the current time.
///
/// Example:
///
/// ```
/// use tools::tformat;
///
/// let line = tformat!("Imported {} files", 3);
/// assert!(line.starts_with('['));
/// assert!(line.ends_with("] Imported 3 files"));
/// ```
#[macro_export]
macro_rules! tformat {
    ($($arg:tt)*) => {{
        format!("[{}] {}", $crate::get_time(), format!($($arg)*))
    }}
}

/// Prints the message on stdout prepended by the current time.
///
/// Example:
///
/// ```
/// use tools::tprint;
///
/// tprint!("Something to print");
/// tprint!("Printing even more: {}", 32);
/// ```
#[macro_export]
macro_rules! tprint {
    ($($arg:tt)*) => {{
        print!("{}", $crate::tformat!($($arg)*));
    }}
}

/// Prints the message on stderr prepended by the current time.
///
/// Example:
///
/// ```
/// use tools::teprint;
///
/// teprint!("Something to print");
/// teprint!("Printing even more: {}", 32);
/// ```
#[macro_export]
macro_rules! teprint {
    ($($arg:tt)*) => {{
        eprint!("{}", $crate::tformat!($($arg)*));
    }}
}

#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => {{
        println!("{}", $crate::tformat!($($arg)*));
    }}
}

#[macro_export]
macro_rules! teprintln {
    ($($arg:tt)*) => {{
        eprintln!("{}", $crate::tformat!($($arg)*));
    }}
}

/// A row of an OpenAddresses extract. Coordinates are WGS84, text fields are trimmed and empty
/// when the source left them blank.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Address {
    pub lon: f64,
    pub lat: f64,
    pub number: String,
    pub street: String,
    pub unit: String,
    pub city: String,
    pub district: String,
    pub region: String,
    pub postcode: String,
}

impl Address {
    /// Number of columns an extract row carries.
    pub const NB_FIELDS: usize = 9;

    /// Returns the fields identifying the city this address belongs to, in key order.
    ///
    /// Example:
    ///
    /// ```
    /// use tools::Address;
    ///
    /// let addr = Address {
    ///     city: "Berlin".to_owned(),
    ///     postcode: "10115".to_owned(),
    ///     ..Address::default()
    /// };
    /// assert_eq!(addr.city_fields(), ["Berlin", "", "", "10115"]);
    /// ```
    pub fn city_fields(&self) -> [&str; 4] {
        [
            self.city.as_str(),
            self.district.as_str(),
            self.region.as_str(),
            self.postcode.as_str(),
        ]
    }

    /// Returns the fields identifying the street inside of its city, in key order.
    pub fn street_fields(&self) -> [&str; 2] {
        [self.street.as_str(), self.unit.as_str()]
    }
}

//! Access to an OpenAddresses download, either the zip archive itself or a directory it was
//! unpacked into.

use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::license::{parse_manifest, parse_readme, LicenseRecord, UnknownLicensePolicy};
use crate::{Error, Result};

/// Name of the manifest listing the license of every source of the archive.
pub const MANIFEST: &str = "LICENSE.txt";

/// Name of the descriptive file shipped with single-source downloads.
pub const README: &str = "README.txt";

/// Aggregated statistics shipped with some downloads, never imported.
const SUMMARY_DIR: &str = "summary/";

/// Returns the label a data file is referred to by in license manifests: its path inside of the
/// archive without the `.csv` extension.
///
/// # Example
/// ```
/// use openaddresses::archive::source_label;
///
/// assert_eq!(source_label("us/ca/san_francisco.csv"), "us/ca/san_francisco");
/// assert_eq!(source_label(" de/berlin "), "de/berlin");
/// ```
pub fn source_label(name: &str) -> String {
    let name = name.trim();
    name.strip_suffix(".csv").unwrap_or(name).to_owned()
}

/// A CSV file of the archive.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DataFile {
    /// Path of the file inside of the archive.
    pub name: String,
    /// Label of the file in the license manifest.
    pub source: String,
}

impl DataFile {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let source = source_label(&name);
        Self { name, source }
    }
}

#[derive(Clone, Debug)]
pub enum Archive {
    Zip(PathBuf),
    Directory(PathBuf),
}

impl Archive {
    /// Opens a zip archive or a directory. Zip archives are checked to be readable but nothing is
    /// kept open: every read reopens the file, so that several threads can stream different
    /// members at the same time.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.is_dir() {
            return Ok(Self::Directory(path.to_owned()));
        }

        ZipArchive::new(File::open(path)?)?;
        Ok(Self::Zip(path.to_owned()))
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Zip(path) | Self::Directory(path) => path,
        }
    }

    /// Lists every file of the archive, with `/` as path separator.
    pub fn file_names(&self) -> Result<Vec<String>> {
        match self {
            Self::Zip(path) => {
                let archive = ZipArchive::new(File::open(path)?)?;
                Ok(archive.file_names().map(str::to_owned).collect())
            }
            Self::Directory(root) => {
                let mut names = Vec::new();
                walk(root, root, &mut names)?;
                Ok(names)
            }
        }
    }

    /// Lists the CSV files that hold addresses, sorted by name.
    pub fn data_files(&self) -> Result<Vec<DataFile>> {
        Ok(self
            .file_names()?
            .into_iter()
            .filter(|name| !name.starts_with(SUMMARY_DIR) && name.ends_with(".csv"))
            .sorted()
            .map(DataFile::new)
            .collect())
    }

    /// Reads a whole file of the archive, `None` if there is no such file.
    pub fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let content = self.with_file(name, |reader| {
            let mut buffer = Vec::new();
            reader.read_to_end(&mut buffer)?;
            Ok(buffer)
        });

        match content {
            Ok(content) => Ok(Some(content)),
            Err(Error::MissingFile(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Calls `f` with a reader streaming the content of a file of the archive.
    pub fn with_file<T, F>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Read) -> Result<T>,
    {
        match self {
            Self::Zip(path) => {
                let mut archive = ZipArchive::new(File::open(path)?)?;
                let mut file = match archive.by_name(name) {
                    Ok(file) => file,
                    Err(ZipError::FileNotFound) => return Err(Error::MissingFile(name.to_owned())),
                    Err(err) => return Err(err.into()),
                };
                f(&mut file)
            }
            Self::Directory(root) => {
                let mut file = match File::open(root.join(name)) {
                    Ok(file) => file,
                    Err(err) if err.kind() == ErrorKind::NotFound => {
                        return Err(Error::MissingFile(name.to_owned()))
                    }
                    Err(err) => return Err(err.into()),
                };
                f(&mut file)
            }
        }
    }

    /// Reads the license data of the archive.
    ///
    /// The manifest is used when it yields at least one record. Otherwise, if the archive holds a
    /// single data file, its license is read from the README. Having none of them is an error:
    /// data can't be imported without knowing its license.
    pub fn licenses(
        &self,
        files: &[DataFile],
        policy: UnknownLicensePolicy,
    ) -> Result<Vec<LicenseRecord>> {
        if let Some(manifest) = self.read(MANIFEST)? {
            let records = parse_manifest(&manifest, policy);

            if !records.is_empty() {
                return Ok(records);
            }
        }

        if let [file] = files {
            if let Some(readme) = self.read(README)? {
                if let Some(record) =
                    parse_readme(&readme, &file.source).filter(|record| policy.accepts(record))
                {
                    return Ok(vec![record]);
                }
            }
        }

        Err(Error::MissingLicense)
    }
}

fn walk(root: &Path, dir: &Path, names: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();

        if path.is_dir() {
            walk(root, &path, names)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            names.push(
                relative
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy())
                    .join("/"),
            );
        }
    }

    Ok(())
}

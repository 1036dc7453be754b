use std::fmt;

use crate::pool::DeadLetter;

/// Counters of an imported file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileSummary {
    pub name: String,
    pub rows: u64,
    pub skipped: u64,
    pub out_of_range: u64,
    pub replaced: u64,
    pub cities: u64,
    pub streets: u64,
    pub houses: u64,
}

/// What happened during a run.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub licenses: usize,
    pub files: Vec<FileSummary>,
    /// Files that were not imported as they have no license.
    pub unlicensed: Vec<String>,
    pub partitions_optimized: usize,
    pub dead_letters: Vec<DeadLetter>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        !self.dead_letters.is_empty()
    }

    pub fn total(&self) -> FileSummary {
        self.files.iter().fold(
            FileSummary {
                name: "total".to_owned(),
                ..FileSummary::default()
            },
            |mut acc, file| {
                acc.rows += file.rows;
                acc.skipped += file.skipped;
                acc.out_of_range += file.out_of_range;
                acc.replaced += file.replaced;
                acc.cities += file.cities;
                acc.streets += file.streets;
                acc.houses += file.houses;
                acc
            },
        )
    }
}

impl fmt::Display for FileSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:<45} {:>10} rows ({} skipped, {} out of range, {} replaced) => {} cities, {} streets, {} houses",
            self.name,
            self.rows,
            self.skipped,
            self.out_of_range,
            self.replaced,
            self.cities,
            self.streets,
            self.houses,
        )
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Licenses: {}", self.licenses)?;

        for file in &self.files {
            writeln!(f, "  {}", file)?;
        }

        if self.files.len() > 1 {
            writeln!(f, "  {}", self.total())?;
        }

        for name in &self.unlicensed {
            writeln!(f, "  {} skipped: no license", name)?;
        }

        if self.partitions_optimized > 0 {
            writeln!(f, "Optimized partitions: {}", self.partitions_optimized)?;
        }

        if self.has_failures() {
            writeln!(f, "Failed jobs:")?;

            for dead in &self.dead_letters {
                writeln!(
                    f,
                    "  {} after {} attempts: {}",
                    dead.name, dead.attempts, dead.error
                )?;
            }
        }

        Ok(())
    }
}

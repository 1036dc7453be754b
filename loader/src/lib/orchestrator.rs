//! Sequencing of the phases of an import.
//!
//! ```text
//! Idle -> Prepared -> LicensesLoaded -> Importing -> Finalized -> Optimized
//! ```
//!
//! Finalizing and optimizing may also be run on their own against an existing database. Any
//! other transition is refused, nothing is rolled back when a phase fails.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::Path;

use importer_openaddresses::{import_file, AddressSink, Archive, DataFile, LicenseRecord};
use prog_rs::prelude::*;
use prog_rs::StepProgress;
use tools::{teprintln, tprintln, Address};

use crate::bulk::{serialize, HouseSource};
use crate::config::ImportConfig;
use crate::hierarchy::Normalizer;
use crate::partition::Partition;
use crate::pool::{dead_letters, WorkerPool};
use crate::status::{jitter, StatusBoard, StatusHandle, StatusLine};
use crate::summary::{FileSummary, RunSummary};
use crate::{Error, Result};

/// Number of rows between two refreshes of a status line.
const PROGRESS_STEP: u64 = 50_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Prepared,
    LicensesLoaded,
    Importing,
    Finalized,
    Optimized,
}

/// A file to import along with the license of its source.
struct ImportJob {
    file: DataFile,
    license_id: i32,
}

impl fmt::Display for ImportJob {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.file.name)
    }
}

/// Forwards addresses to the normalizer, reporting progress on the way.
struct Tracked<'l> {
    normalizer: Normalizer,
    line: &'l StatusLine,
    count: u64,
}

impl AddressSink for Tracked<'_> {
    fn insert(&mut self, addr: Address) {
        self.normalizer.insert(addr);
        self.count += 1;

        if self.count % PROGRESS_STEP == 0 {
            self.line.update(format!("{} rows read", self.count));
        }
    }
}

/// Reads, normalizes and loads a single file.
fn import_job(
    config: &ImportConfig,
    archive: &Archive,
    status: &StatusHandle,
    job: &ImportJob,
) -> Result<FileSummary> {
    jitter(config.jitter);
    let line = status.claim(&job.file.name);
    line.update("reading");

    let mut sink = Tracked {
        normalizer: Normalizer::new(config.case_rule, config.layout),
        line: &line,
        count: 0,
    };

    let read = import_file(archive, &job.file, &mut sink)?;
    let (hierarchy, stats) = sink.normalizer.finish();
    let batch = serialize(&hierarchy, job.license_id, HouseSource::OpenAddresses)?;

    line.update(format!("loading {} houses", batch.nb_houses));
    config.target.connect()?.bulk_load(&batch)?;
    line.update(format!("done, {} houses", batch.nb_houses));

    Ok(FileSummary {
        name: job.file.name.clone(),
        rows: read.rows,
        skipped: read.skipped,
        out_of_range: stats.out_of_range,
        replaced: stats.replaced,
        cities: batch.nb_cities,
        streets: batch.nb_streets,
        houses: batch.nb_houses,
    })
}

pub struct Orchestrator {
    config: ImportConfig,
    phase: Phase,
    archive: Option<Archive>,
    /// License identifiers by source label.
    licenses: HashMap<String, i32>,
    summary: RunSummary,
}

impl Orchestrator {
    pub fn new(config: ImportConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            archive: None,
            licenses: HashMap::new(),
            summary: RunSummary::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn into_summary(self) -> RunSummary {
        self.summary
    }

    fn expect(&self, allowed: &[Phase], action: &'static str) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                phase: self.phase,
                action,
            })
        }
    }

    /// Creates the schema and drops the constraints that would slow down loads.
    pub fn prepare(&mut self, clean: bool) -> Result<()> {
        self.expect(&[Phase::Idle], "prepare")?;
        tprintln!("Preparing schema on {}", self.config.target);

        let mut store = self.config.target.connect()?;
        store.prepare_schema(&self.config.layout, clean)?;
        store.drop_constraints()?;

        self.phase = Phase::Prepared;
        Ok(())
    }

    /// Saves the licenses of an archive. Fails if the archive has no license data, before
    /// anything is written.
    pub fn load_licenses<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.expect(&[Phase::Prepared], "load licenses")?;

        let archive = Archive::open(path)?;
        let files = archive.data_files()?;
        let mut records = archive.licenses(&files, self.config.license_policy)?;

        if self.config.with_osm_license {
            records.insert(0, LicenseRecord::openstreetmap());
        }

        let mut store = self.config.target.connect()?;

        for record in &records {
            let id = store.insert_license(record)?;
            tprintln!("Saved license for {}: {}", record.source, record.license);
            self.licenses.insert(record.source.clone(), id);
        }

        self.summary.licenses += records.len();
        self.archive = Some(archive);
        self.phase = Phase::LicensesLoaded;
        Ok(())
    }

    /// Imports every licensed file of the archive, in parallel.
    pub fn import(&mut self) -> Result<()> {
        self.expect(&[Phase::LicensesLoaded], "import")?;

        let archive = match &self.archive {
            Some(archive) => archive,
            None => {
                return Err(Error::InvalidTransition {
                    phase: self.phase,
                    action: "import",
                })
            }
        };

        let mut jobs = Vec::new();

        for file in archive.data_files()? {
            match self.licenses.get(&file.source) {
                Some(&license_id) => jobs.push(ImportJob { file, license_id }),
                None => {
                    teprintln!("Skipping {}, no license data", file.name);
                    self.summary.unlicensed.push(file.name);
                }
            }
        }

        tprintln!(
            "Importing {} files with {} threads",
            jobs.len(),
            self.config.nb_threads
        );

        let board = StatusBoard::start(
            jobs.iter().map(|job| job.file.name.clone()),
            io::stderr(),
        );
        let status = board.handle();
        let config = &self.config;

        let reports = WorkerPool::new(config.nb_threads).run(
            &jobs,
            |job| import_job(config, archive, &status, job),
            |_| {},
        );

        drop(status);
        board.finish()?;

        self.summary.dead_letters.extend(dead_letters(&reports));
        self.summary.files.extend(
            reports
                .into_iter()
                .filter_map(|report| report.outcome.ok()),
        );

        self.phase = Phase::Importing;
        Ok(())
    }

    fn restore_constraints(&self) -> Result<()> {
        tprintln!("Restoring foreign keys and indexes");
        self.config.target.connect()?.restore_constraints()
    }

    /// Recreates foreign keys and baseline indexes.
    pub fn finalize(&mut self) -> Result<()> {
        self.expect(
            &[
                Phase::Idle,
                Phase::Prepared,
                Phase::Importing,
                Phase::Finalized,
                Phase::Optimized,
            ],
            "finalize",
        )?;

        self.restore_constraints()?;
        self.phase = Phase::Finalized;
        Ok(())
    }

    /// Rebuilds the indexes of every partition in parallel, then finalizes.
    pub fn optimize(&mut self) -> Result<()> {
        self.expect(
            &[
                Phase::Idle,
                Phase::Prepared,
                Phase::Importing,
                Phase::Finalized,
            ],
            "optimize",
        )?;

        let partitions: Vec<Partition> = self.config.layout.partitions().collect();
        let target = &self.config.target;

        let mut progress = StepProgress::new()
            .with_refresh_delay(self.config.refresh_delay)
            .with_prefix("Optimize partitions")
            .with_max_step(partitions.len())
            .with_output_stream(prog_rs::OutputStream::StdErr);

        let reports = WorkerPool::new(self.config.nb_threads).run(
            &partitions,
            |partition| target.connect()?.optimize_partition(partition),
            |_| {
                progress.step(1);
            },
        );

        progress.finish();

        let dead = dead_letters(&reports);
        self.summary.partitions_optimized += reports.len() - dead.len();
        self.summary.dead_letters.extend(dead);

        self.restore_constraints()?;
        self.phase = Phase::Optimized;
        Ok(())
    }
}

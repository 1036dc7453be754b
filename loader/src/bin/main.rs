use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use importer_openaddresses::UnknownLicensePolicy;
use structopt::StructOpt;
use tools::{teprintln, tprintln};

use loader::hierarchy::CaseRule;
use loader::partition::{PartitionLayout, DEFAULT_PARTITIONS};
use loader::{ImportConfig, Orchestrator, Result, StoreTarget};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "oa-import",
    about = "Import an OpenAddresses extract into a partitioned address database."
)]
struct Params {
    /// Target database, either a PostgreSQL connection string or `sqlite://<path>`
    #[structopt(long)]
    db: StoreTarget,

    /// Number of files imported in parallel
    #[structopt(short, long, default_value = "1")]
    threads: usize,

    /// Drop any existing address tables before importing
    #[structopt(long)]
    clean: bool,

    /// Rebuild partition indexes and cluster houses after the import
    #[structopt(long)]
    optimize: bool,

    /// Only restore foreign keys and indexes of an existing database
    #[structopt(long, conflicts_with_all = &["clean", "optimize", "fast", "datafile"])]
    finalize: bool,

    /// Leave foreign keys and indexes dropped after the import
    #[structopt(long)]
    fast: bool,

    /// Number of partitions of the house table
    #[structopt(long, default_value = "360")]
    partitions: u32,

    /// Title-case names and upper-case postcodes
    #[structopt(long)]
    normalize_case: bool,

    /// Don't save licenses that are unknown in the manifest
    #[structopt(long)]
    skip_unknown_licenses: bool,

    /// Also save the OpenStreetMap license
    #[structopt(long)]
    with_osm_license: bool,

    /// Upper bound of the random delay before a worker starts, in milliseconds
    #[structopt(long, default_value = "250")]
    jitter_ms: u64,

    /// Path to an OpenAddresses zip archive or unpacked directory
    #[structopt(parse(from_os_str))]
    datafile: Option<PathBuf>,
}

impl Params {
    fn config(&self) -> ImportConfig {
        let mut config = ImportConfig::new(self.db.clone());
        config.nb_threads = self.threads.max(1);
        config.jitter = Duration::from_millis(self.jitter_ms);

        if self.partitions != DEFAULT_PARTITIONS {
            config.layout = PartitionLayout::new(self.partitions);
        }

        if self.normalize_case {
            config.case_rule = CaseRule::Normalize;
        }

        if self.skip_unknown_licenses {
            config.license_policy = UnknownLicensePolicy::Skip;
        }

        config.with_osm_license = self.with_osm_license;
        config
    }
}

fn run(params: &Params, orchestrator: &mut Orchestrator) -> Result<()> {
    if params.finalize {
        return orchestrator.finalize();
    }

    let prepared = params.clean || params.datafile.is_some();

    if prepared {
        orchestrator.prepare(params.clean)?;
    }

    if let Some(datafile) = &params.datafile {
        tprintln!("Loading licenses from {:?}", datafile);
        orchestrator.load_licenses(datafile)?;
        orchestrator.import()?;
    }

    if prepared && !params.fast {
        orchestrator.finalize()?;
    }

    if params.optimize {
        orchestrator.optimize()?;
    }

    Ok(())
}

fn main() {
    let params = Params::from_args();
    let mut orchestrator = Orchestrator::new(params.config());

    if let Err(err) = run(&params, &mut orchestrator) {
        teprintln!("Import failed during {:?}: {}", orchestrator.phase(), err);
        exit(1);
    }

    let summary = orchestrator.into_summary();
    print!("{}", summary);

    if summary.has_failures() {
        teprintln!("{} jobs failed", summary.dead_letters.len());
        exit(1);
    }

    tprintln!("Import done");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Option<Params> {
        let base = ["oa-import", "--db", "sqlite://addresses.db"];
        Params::from_iter_safe(base.iter().chain(args)).ok()
    }

    #[test]
    fn finalize_runs_alone() {
        assert!(parse(&["--finalize"]).unwrap().finalize);
        assert!(parse(&["--finalize", "--clean"]).is_none());
        assert!(parse(&["--finalize", "--optimize"]).is_none());
        assert!(parse(&["--finalize", "--fast"]).is_none());
        assert!(parse(&["--finalize", "extract.zip"]).is_none());
    }

    #[test]
    fn import_options() {
        let params = parse(&[
            "-t",
            "4",
            "--optimize",
            "--skip-unknown-licenses",
            "extract.zip",
        ])
        .unwrap();
        let config = params.config();

        assert_eq!(config.nb_threads, 4);
        assert_eq!(config.license_policy, UnknownLicensePolicy::Skip);
        assert_eq!(config.layout.count(), DEFAULT_PARTITIONS);
        assert_eq!(params.datafile, Some(PathBuf::from("extract.zip")));
        assert!(params.optimize && !params.finalize);
    }
}

use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempdir::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::partition::PartitionLayout;
use crate::store::{TableCounts, BASELINE_INDEXES};
use crate::{Error, ImportConfig, Orchestrator, Phase, StoreTarget};

const HEADER: &str = "LON,LAT,NUMBER,STREET,UNIT,CITY,DISTRICT,REGION,POSTCODE,ID,HASH\n";

fn manifest(sources: &[&str]) -> String {
    let mut manifest = "OpenAddresses data collection\n".to_owned();

    for source in sources {
        manifest.push_str(&format!(
            "\n{}\nWebsite: https://example.org/{}\nLicense: CC-BY 4.0\nRequired attribution: Yes\n",
            source, source
        ));
    }

    manifest
}

fn build_zip(path: &Path, files: &[(&str, String)]) -> PathBuf {
    let mut zip = ZipWriter::new(File::create(path).unwrap());

    for (name, content) in files {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }

    zip.finish().unwrap();
    path.to_owned()
}

/// Rows of a fictional city spread along the equator, one street per ten houses.
fn rows(city: &str, count: usize) -> String {
    let mut data = HEADER.to_owned();

    for i in 0..count {
        data.push_str(&format!(
            "{},{},{},Street {},,{},,,{:05},,\n",
            -170. + (i as f64) * 340. / (count as f64),
            (i % 7) as f64,
            i,
            i / 10,
            city,
            i % 3,
        ));
    }

    data
}

fn config(dir: &TempDir, threads: usize) -> ImportConfig {
    let mut config = ImportConfig::new(StoreTarget::Sqlite(dir.path().join("addresses.db")));
    config.nb_threads = threads;
    config.layout = PartitionLayout::new(8);
    config.jitter = Duration::ZERO;
    config.refresh_delay = Duration::from_millis(10);
    config
}

fn import(config: ImportConfig, archive: &Path) -> Result<Orchestrator, Error> {
    let mut orchestrator = Orchestrator::new(config);
    orchestrator.prepare(true)?;
    orchestrator.load_licenses(archive)?;
    orchestrator.import()?;
    orchestrator.finalize()?;
    Ok(orchestrator)
}

fn counts(config: &ImportConfig) -> TableCounts {
    config.target.connect().unwrap().count_rows().unwrap()
}

#[test]
fn single_file_hierarchy() -> Result<(), Error> {
    let dir = TempDir::new("loader").unwrap();
    let data = format!(
        "{}\
         13.3777,52.5163,1,Pariser Platz,,Berlin,,,10117,,\n\
         13.3779,52.5165,2,Pariser Platz,,Berlin,,,10117,,\n\
         13.3769,52.5159,1,Ebertstraße,,Berlin,,,10117,,\n",
        HEADER
    );
    let archive = build_zip(
        &dir.path().join("berlin.zip"),
        &[
            ("LICENSE.txt", manifest(&["de/berlin"])),
            ("de/berlin.csv", data),
        ],
    );

    let config = config(&dir, 1);
    let orchestrator = import(config.clone(), &archive)?;

    assert_eq!(orchestrator.phase(), Phase::Finalized);
    assert_eq!(
        counts(&config),
        TableCounts {
            licenses: 1,
            cities: 1,
            streets: 2,
            houses: 3,
        }
    );
    assert_eq!(config.target.connect()?.count_foreign_keys()?, 3);

    let summary = orchestrator.into_summary();
    assert_eq!(summary.licenses, 1);
    assert_eq!(summary.files.len(), 1);
    assert_eq!(summary.files[0].name, "de/berlin.csv");
    assert_eq!(summary.files[0].rows, 3);
    assert!(!summary.has_failures());
    Ok(())
}

#[test]
fn concurrency_does_not_change_counts() -> Result<(), Error> {
    let dir = TempDir::new("loader").unwrap();
    let names = ["a", "b", "c", "d", "e", "f"];
    let mut files = vec![("LICENSE.txt", manifest(&names))];
    let csv_names: Vec<_> = names.iter().map(|name| format!("{}.csv", name)).collect();

    for (name, csv_name) in names.iter().zip(&csv_names) {
        files.push((csv_name.as_str(), rows(name, 40)));
    }

    let archive = build_zip(&dir.path().join("all.zip"), &files);

    let serial_dir = TempDir::new("serial").unwrap();
    let serial = config(&serial_dir, 1);
    import(serial.clone(), &archive)?;

    let parallel_dir = TempDir::new("parallel").unwrap();
    let parallel = config(&parallel_dir, 4);
    let orchestrator = import(parallel.clone(), &archive)?;

    assert_eq!(counts(&serial), counts(&parallel));
    assert_eq!(
        counts(&parallel),
        TableCounts {
            licenses: 6,
            cities: 6 * 3,
            streets: 6 * 4 * 3,
            houses: 6 * 40,
        }
    );
    assert_eq!(orchestrator.summary().files.len(), 6);
    Ok(())
}

#[test]
fn optimize_clusters_every_partition() -> Result<(), Error> {
    let dir = TempDir::new("loader").unwrap();
    let archive = build_zip(
        &dir.path().join("world.zip"),
        &[
            ("LICENSE.txt", manifest(&["world"])),
            ("world.csv", rows("Somewhere", 100)),
        ],
    );

    let config = config(&dir, 3);
    let mut orchestrator = import(config.clone(), &archive)?;
    orchestrator.optimize()?;

    assert_eq!(orchestrator.phase(), Phase::Optimized);
    assert_eq!(orchestrator.summary().partitions_optimized, 8);

    let mut store = config.target.connect()?;
    assert_eq!(store.count_clustered_partitions()?, 8);
    assert_eq!(store.count_foreign_keys()?, 3);
    assert_eq!(store.count_baseline_indexes()?, 5);
    assert_eq!(store.count_rows()?.houses, 100);
    Ok(())
}

#[test]
fn finalize_restores_constraints() -> Result<(), Error> {
    let dir = TempDir::new("loader").unwrap();
    let archive = build_zip(
        &dir.path().join("small.zip"),
        &[
            ("LICENSE.txt", manifest(&["small"])),
            ("small.csv", rows("Small", 20)),
        ],
    );

    let config = config(&dir, 2);
    let mut orchestrator = Orchestrator::new(config.clone());
    orchestrator.prepare(true)?;
    orchestrator.load_licenses(&archive)?;
    orchestrator.import()?;

    // Loads run without the baseline indexes.
    assert_eq!(config.target.connect()?.count_baseline_indexes()?, 0);

    orchestrator.finalize()?;
    let mut store = config.target.connect()?;
    assert_eq!(
        store.count_baseline_indexes()?,
        BASELINE_INDEXES.len() as i64
    );
    assert_eq!(store.count_foreign_keys()?, 3);

    // A new run drops them again, and a finalize-only run brings them back.
    Orchestrator::new(config.clone()).prepare(false)?;
    assert_eq!(store.count_baseline_indexes()?, 0);

    let mut finalize_only = Orchestrator::new(config.clone());
    finalize_only.finalize()?;
    assert_eq!(store.count_baseline_indexes()?, 5);
    assert_eq!(store.count_rows()?.houses, 20);
    Ok(())
}

/// Runs the whole pipeline against the PostgreSQL database of `OA_TEST_PG_URL`, if set. The
/// database must have PostGIS and pg_trgm available, its address tables are dropped.
#[test]
fn postgres_pipeline() -> Result<(), Error> {
    let url = match env::var("OA_TEST_PG_URL") {
        Ok(url) => url,
        Err(_) => return Ok(()),
    };

    let dir = TempDir::new("loader").unwrap();
    let archive = build_zip(
        &dir.path().join("pg.zip"),
        &[
            ("LICENSE.txt", manifest(&["a", "b"])),
            ("a.csv", rows("A", 40)),
            ("b.csv", rows("B", 40)),
        ],
    );

    let mut config = config(&dir, 2);
    config.target = url.parse()?;

    let mut orchestrator = Orchestrator::new(config.clone());
    orchestrator.prepare(true)?;

    let mut store = config.target.connect()?;
    assert_eq!(store.count_foreign_keys()?, 0);
    assert_eq!(store.count_baseline_indexes()?, 0);

    orchestrator.load_licenses(&archive)?;
    orchestrator.import()?;
    assert_eq!(store.count_foreign_keys()?, 0);

    orchestrator.finalize()?;
    assert_eq!(store.count_foreign_keys()?, 3);
    assert_eq!(store.count_baseline_indexes()?, 5);

    orchestrator.optimize()?;
    assert_eq!(store.count_clustered_partitions()?, 8);
    assert_eq!(store.count_foreign_keys()?, 3);
    assert_eq!(
        store.count_rows()?,
        TableCounts {
            licenses: 2,
            cities: 2 * 3,
            streets: 2 * 4 * 3,
            houses: 2 * 40,
        }
    );
    assert!(!orchestrator.summary().has_failures());
    Ok(())
}

#[test]
fn missing_manifest_is_fatal() {
    let dir = TempDir::new("loader").unwrap();
    let archive = build_zip(
        &dir.path().join("nolicense.zip"),
        &[("a.csv", rows("A", 5)), ("b.csv", rows("B", 5))],
    );

    let config = config(&dir, 2);
    let mut orchestrator = Orchestrator::new(config.clone());
    orchestrator.prepare(true).unwrap();

    assert!(matches!(
        orchestrator.load_licenses(&archive),
        Err(Error::Source(importer_openaddresses::Error::MissingLicense))
    ));
    assert_eq!(orchestrator.phase(), Phase::Prepared);
    assert_eq!(counts(&config), TableCounts::default());
}

#[test]
fn unlicensed_file_is_skipped() -> Result<(), Error> {
    let dir = TempDir::new("loader").unwrap();
    let archive = build_zip(
        &dir.path().join("partial.zip"),
        &[
            ("LICENSE.txt", manifest(&["fr/paris"])),
            ("fr/paris.csv", rows("Paris", 10)),
            ("fr/lyon.csv", rows("Lyon", 10)),
            ("summary/fr.csv", rows("Ignored", 10)),
        ],
    );

    let config = config(&dir, 2);
    let orchestrator = import(config.clone(), &archive)?;

    let summary = orchestrator.summary();
    assert_eq!(summary.unlicensed, ["fr/lyon.csv"]);
    assert_eq!(summary.files.len(), 1);
    assert_eq!(counts(&config).houses, 10);
    Ok(())
}

#[test]
fn failing_file_is_dead_lettered() -> Result<(), Error> {
    let dir = TempDir::new("loader").unwrap();
    let archive = build_zip(
        &dir.path().join("broken.zip"),
        &[
            ("LICENSE.txt", manifest(&["good", "bad"])),
            ("good.csv", rows("Good", 10)),
            ("bad.csv", "LON,LAT,NUMBER,STREET\n1,1,1,Nowhere\n".to_owned()),
        ],
    );

    let config = config(&dir, 2);
    let orchestrator = import(config.clone(), &archive)?;

    let summary = orchestrator.summary();
    assert!(summary.has_failures());
    assert_eq!(summary.dead_letters.len(), 1);
    assert_eq!(summary.dead_letters[0].name, "bad.csv");
    assert_eq!(summary.dead_letters[0].attempts, 2);
    assert_eq!(counts(&config).houses, 10);
    Ok(())
}

#[test]
fn unpacked_directory() -> Result<(), Error> {
    let dir = TempDir::new("loader").unwrap();
    let root = dir.path().join("unpacked");
    fs::create_dir_all(root.join("us/ca")).unwrap();
    fs::write(root.join("us/ca/sf.csv"), rows("San Francisco", 20)).unwrap();
    fs::write(
        root.join("README.txt"),
        "Website: https://datasf.org\nLicense: PDDL\n",
    )
    .unwrap();

    let mut config = config(&dir, 1);
    config.with_osm_license = true;
    import(config.clone(), &root)?;

    let counts = counts(&config);
    assert_eq!(counts.licenses, 2);
    assert_eq!(counts.houses, 20);
    Ok(())
}

#[test]
fn invalid_transitions() -> Result<(), Error> {
    let dir = TempDir::new("loader").unwrap();
    let mut orchestrator = Orchestrator::new(config(&dir, 1));

    assert!(matches!(
        orchestrator.import(),
        Err(Error::InvalidTransition {
            phase: Phase::Idle,
            action: "import"
        })
    ));

    orchestrator.prepare(false)?;
    assert!(matches!(
        orchestrator.prepare(false),
        Err(Error::InvalidTransition { .. })
    ));

    orchestrator.finalize()?;
    orchestrator.optimize()?;
    assert_eq!(orchestrator.phase(), Phase::Optimized);
    assert!(matches!(
        orchestrator.optimize(),
        Err(Error::InvalidTransition { .. })
    ));

    // Finalizing is always possible once the schema exists.
    orchestrator.finalize()?;
    assert_eq!(orchestrator.phase(), Phase::Finalized);
    Ok(())
}
